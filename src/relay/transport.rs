//! HTTP transport for the gateway
//!
//! One shared client with a connect-phase timeout only: an open streaming
//! body must never be cut off by a request timer, because generations can
//! legitimately run long. Short directory-style calls opt into a bounded
//! total timeout per request.

use crate::{PrattleError, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;

/// Total timeout for small non-streaming calls
pub const DIRECTORY_TIMEOUT: Duration = Duration::from_secs(5);

/// HTTP transport bound to one gateway
pub struct Transport {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl Transport {
    /// Build a transport for `base_url` with the given connect timeout
    pub fn new(base_url: &str, token: Option<String>, connect_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|e| PrattleError::ConfigError(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        })
    }

    /// Gateway base URL
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authorize(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    /// POST a JSON body and return the raw response for incremental reads
    ///
    /// No total timeout: once the connect phase succeeds the body may stream
    /// for as long as the gateway keeps producing.
    pub async fn post_stream(&self, path: &str, body: &impl Serialize) -> Result<reqwest::Response> {
        self.authorize(self.client.post(self.url(path)))
            .json(body)
            .send()
            .await
            .map_err(connect_error)
    }

    /// GET a JSON document with a bounded total timeout
    pub async fn get_json<T: DeserializeOwned>(&self, path: &str, timeout: Duration) -> Result<T> {
        let response = self
            .authorize(self.client.get(self.url(path)))
            .timeout(timeout)
            .send()
            .await
            .map_err(connect_error)?;

        let response = check_status(response).await?;
        response
            .json()
            .await
            .map_err(|e| PrattleError::ProtocolError(format!("Invalid JSON response: {}", e)))
    }

    /// POST a JSON body and decode a JSON response, bounded timeout
    pub async fn post_json<T: DeserializeOwned>(
        &self,
        path: &str,
        body: &impl Serialize,
        timeout: Duration,
    ) -> Result<T> {
        let response = self
            .authorize(self.client.post(self.url(path)))
            .timeout(timeout)
            .json(body)
            .send()
            .await
            .map_err(connect_error)?;

        let response = check_status(response).await?;
        response
            .json()
            .await
            .map_err(|e| PrattleError::ProtocolError(format!("Invalid JSON response: {}", e)))
    }

    /// PUT a JSON body, discarding the response
    pub async fn put_json(&self, path: &str, body: &impl Serialize, timeout: Duration) -> Result<()> {
        let response = self
            .authorize(self.client.put(self.url(path)))
            .timeout(timeout)
            .json(body)
            .send()
            .await
            .map_err(connect_error)?;

        check_status(response).await?;
        Ok(())
    }

    /// PATCH a JSON body, discarding the response
    pub async fn patch_json(
        &self,
        path: &str,
        body: &impl Serialize,
        timeout: Duration,
    ) -> Result<()> {
        let response = self
            .authorize(self.client.patch(self.url(path)))
            .timeout(timeout)
            .json(body)
            .send()
            .await
            .map_err(connect_error)?;

        check_status(response).await?;
        Ok(())
    }

    /// DELETE a resource, discarding the response
    pub async fn delete(&self, path: &str, timeout: Duration) -> Result<()> {
        let response = self
            .authorize(self.client.delete(self.url(path)))
            .timeout(timeout)
            .send()
            .await
            .map_err(connect_error)?;

        check_status(response).await?;
        Ok(())
    }

    /// GET returning only success/latency, for health probes
    pub async fn probe(&self, path: &str, timeout: Duration) -> Result<u16> {
        let response = self
            .authorize(self.client.get(self.url(path)))
            .timeout(timeout)
            .send()
            .await
            .map_err(connect_error)?;

        Ok(response.status().as_u16())
    }
}

fn connect_error(e: reqwest::Error) -> PrattleError {
    PrattleError::ConnectError(e.to_string())
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(PrattleError::ServerError {
        status: status.as_u16(),
        body,
    })
}
