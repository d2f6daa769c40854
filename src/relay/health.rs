//! Gateway health probe
//!
//! A cheap connectivity check against the models endpoint. Never fails;
//! problems come back inside the report so callers can display them.

use crate::relay::transport::Transport;
use std::time::{Duration, Instant};

/// Probe timeout
const HEALTH_TIMEOUT: Duration = Duration::from_secs(5);

/// Outcome of one health probe
#[derive(Clone, Debug)]
pub struct HealthReport {
    /// Whether the gateway answered with a success status
    pub ok: bool,
    /// Round-trip time of the probe
    pub latency: Duration,
    /// Failure detail when `ok` is false
    pub error: Option<String>,
}

/// Ping the gateway and measure latency
pub async fn check(transport: &Transport) -> HealthReport {
    let start = Instant::now();
    match transport.probe("/v1/models", HEALTH_TIMEOUT).await {
        Ok(status) if (200..300).contains(&status) => HealthReport {
            ok: true,
            latency: start.elapsed(),
            error: None,
        },
        Ok(status) => HealthReport {
            ok: false,
            latency: start.elapsed(),
            error: Some(format!("HTTP {}", status)),
        },
        Err(e) => HealthReport {
            ok: false,
            latency: start.elapsed(),
            error: Some(e.to_string()),
        },
    }
}
