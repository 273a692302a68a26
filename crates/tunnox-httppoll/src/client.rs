//! Thin `reqwest`-based client for the push/poll endpoints
//! (`POST …/push`, `GET …/poll?timeout=<seconds>`).

use std::time::Duration;

use thiserror::Error;

use crate::fragment::FragmentWire;
use crate::header::TunnelPackage;

pub const DEFAULT_PATH_ROOT: &str = "/_tunnox/v1";
pub const POLL_TIMEOUT: Duration = Duration::from_secs(20);
pub const MAX_RETRIES: u32 = 3;

#[derive(Debug, Error)]
pub enum HttpPollError {
    #[error("http request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("gateway returned {0}")]
    Status(u16),
    #[error("response body was not a valid fragment: {0}")]
    BadResponse(String),
}

#[derive(serde::Deserialize)]
struct PushResponse {
    #[allow(dead_code)]
    success: bool,
    #[allow(dead_code)]
    ack: Option<String>,
}

#[derive(serde::Deserialize)]
struct PollResponse {
    #[serde(flatten)]
    fragment: Option<FragmentWire>,
    timeout: bool,
    sequence_number: Option<u64>,
}

pub struct HttpPollClient {
    http: reqwest::Client,
    base_url: String,
    /// Bearer token sent as `Authorization` on every push/poll request, so
    /// the gateway can authenticate a long-poll connection the same way it
    /// authenticates the handshake over a standard transport.
    token: Option<String>,
}

impl HttpPollClient {
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            token,
        }
    }

    fn authorize(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => builder.header("Authorization", format!("Bearer {token}")),
            None => builder,
        }
    }

    /// POST one fragment, retrying up to `MAX_RETRIES` times with linear
    /// backoff on request failure or a non-2xx response.
    pub async fn push(
        &self,
        fragment: &FragmentWire,
        package: &TunnelPackage,
    ) -> Result<(), HttpPollError> {
        let url = format!("{}{}/push", self.base_url, DEFAULT_PATH_ROOT);
        let mut attempt = 0;
        loop {
            attempt += 1;
            let request = self.authorize(self.http.post(&url))
                .header("X-Tunnel-Package", package.header_value())
                .json(fragment);
            let result = request.send().await;
            match result {
                Ok(resp) if resp.status().is_success() => {
                    let _: PushResponse = resp
                        .json()
                        .await
                        .map_err(|e| HttpPollError::BadResponse(e.to_string()))?;
                    return Ok(());
                }
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    if attempt >= MAX_RETRIES {
                        return Err(HttpPollError::Status(status));
                    }
                }
                Err(e) => {
                    if attempt >= MAX_RETRIES {
                        return Err(HttpPollError::Request(e));
                    }
                }
            }
            tokio::time::sleep(Duration::from_millis(200 * attempt as u64)).await;
        }
    }

    /// GET one long-poll response. `timeout:true` with no fragment means
    /// the gateway had nothing to deliver before the poll window elapsed.
    pub async fn poll(
        &self,
        package: &TunnelPackage,
    ) -> Result<Option<(FragmentWire, u64)>, HttpPollError> {
        let url = format!(
            "{}{}/poll?timeout={}",
            self.base_url,
            DEFAULT_PATH_ROOT,
            POLL_TIMEOUT.as_secs()
        );
        let resp = self
            .authorize(self.http.get(&url))
            .header("X-Tunnel-Package", package.header_value())
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(HttpPollError::Status(resp.status().as_u16()));
        }
        let body: PollResponse = resp
            .json()
            .await
            .map_err(|e| HttpPollError::BadResponse(e.to_string()))?;
        if body.timeout {
            return Ok(None);
        }
        let fragment = body
            .fragment
            .ok_or_else(|| HttpPollError::BadResponse("missing fragment".into()))?;
        let sequence_number = body.sequence_number.unwrap_or(0);
        Ok(Some((fragment, sequence_number)))
    }
}
