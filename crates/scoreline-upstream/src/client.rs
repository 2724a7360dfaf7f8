//! Thin HTTP client for the upstream provider.

use reqwest::Client;
use scoreline_core::{Error, Result, UpstreamConfig};
use scoreline_governor::UpstreamError;
use serde_json::Value;
use tracing::debug;

/// Longest error body kept in an `UpstreamError`.
const MAX_ERROR_BODY: usize = 200;

pub struct UpstreamClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl UpstreamClient {
    pub fn new(config: &UpstreamConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| Error::Config(format!("HTTP client: {}", e)))?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// GET `path` relative to the base URL and parse the body as JSON.
    pub async fn get_json(&self, path: &str) -> std::result::Result<Value, UpstreamError> {
        let url = format!("{}/{}", self.base_url, path.trim_start_matches('/'));
        debug!("GET {}", url);

        let mut request = self.client.get(&url).header("Accept", "application/json");
        if let Some(key) = &self.api_key {
            request = request.header("x-api-key", key);
        }

        let response = request.send().await.map_err(classify)?;
        let status = response.status();
        if !status.is_success() {
            let mut body = response.text().await.unwrap_or_default();
            if body.len() > MAX_ERROR_BODY {
                let mut cut = MAX_ERROR_BODY;
                while !body.is_char_boundary(cut) {
                    cut -= 1;
                }
                body.truncate(cut);
            }
            return Err(UpstreamError::Status {
                status: status.as_u16(),
                body,
            });
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| UpstreamError::Decode(e.to_string()))
    }
}

fn classify(e: reqwest::Error) -> UpstreamError {
    if e.is_timeout() {
        UpstreamError::Timeout(e.to_string())
    } else if e.is_decode() {
        UpstreamError::Decode(e.to_string())
    } else {
        UpstreamError::Connect(e.to_string())
    }
}
