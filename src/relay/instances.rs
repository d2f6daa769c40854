//! Instance directory
//!
//! The gateway routes each turn to a downstream bridge instance. The
//! directory lists the instances currently connected, which is how the relay
//! recovers when its cached instance id goes stale.

use crate::relay::transport::{Transport, DIRECTORY_TIMEOUT};
use crate::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One bridge instance known to the gateway
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Instance {
    /// Routing identifier
    pub id: String,
    /// Human-readable name
    pub name: String,
    /// Connection status as reported by the gateway
    pub status: String,
    /// When the instance connected
    pub connected_at: DateTime<Utc>,
}

/// Fetch the currently connected instances
pub async fn list(transport: &Transport) -> Result<Vec<Instance>> {
    transport.get_json("/instances", DIRECTORY_TIMEOUT).await
}
