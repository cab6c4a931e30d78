//! REST client for the upstream content API
//!
//! Stateless: one GET per call, no caching, retrying or batching. Those
//! belong to the request-scoped loaders.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, instrument, warn};

use crate::config::GatewayConfig;
use crate::GraphQLError;

/// Source of upstream JSON payloads
#[async_trait]
pub trait Upstream: Send + Sync {
    /// GET `relative_path` and return the `data` member of the envelope.
    ///
    /// A missing or `null` `data` is returned as `Value::Null`.
    async fn get_data(&self, relative_path: &str) -> crate::Result<Value>;
}

/// `{ "data": ... }` envelope returned by every content API route
#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    data: Value,
}

/// HTTP implementation of [`Upstream`] backed by `reqwest`.
#[derive(Debug, Clone)]
pub struct RestClient {
    client: reqwest::Client,
    base_url: String,
}

impl RestClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn from_config(config: &GatewayConfig) -> crate::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| GraphQLError::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, relative_path: &str) -> String {
        format!("{}{}", self.base_url, relative_path)
    }
}

#[async_trait]
impl Upstream for RestClient {
    #[instrument(skip(self), fields(base_url = %self.base_url))]
    async fn get_data(&self, relative_path: &str) -> crate::Result<Value> {
        let resp = self
            .client
            .get(self.url(relative_path))
            .send()
            .await
            .map_err(|e| GraphQLError::fetch(relative_path, e))?;

        let status = resp.status();
        if !status.is_success() {
            warn!(status = status.as_u16(), "Upstream returned error status");
            return Err(GraphQLError::fetch(
                relative_path,
                format!("upstream returned {}", status.as_u16()),
            ));
        }

        let envelope: Envelope = resp
            .json()
            .await
            .map_err(|e| GraphQLError::fetch(relative_path, e))?;

        debug!(null = envelope.data.is_null(), "Upstream payload received");
        Ok(envelope.data)
    }
}
