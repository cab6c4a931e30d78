//! Gateway configuration.
//!
//! Values are read from the environment (a `.env` file is honored in
//! development):
//!
//! | Variable | Default |
//! |---|---|
//! | `CONTENT_API_BASE_URL` | `https://titan-fury.practodev.com/content/v1` |
//! | `LOADER_BATCH_DELAY_MS` | `1` |
//! | `CONTENT_API_TIMEOUT_SECS` | `30` |

use std::env;
use std::str::FromStr;
use std::time::Duration;

use dotenvy::dotenv;

use crate::GraphQLError;

pub const DEFAULT_BASE_URL: &str = "https://titan-fury.practodev.com/content/v1";

/// Upstream and loader settings shared by every request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayConfig {
    /// Base URL of the content API, without a trailing slash.
    pub base_url: String,

    /// How long a loader waits for more keys before dispatching a batch.
    pub batch_delay: Duration,

    /// Per-request HTTP timeout for upstream calls.
    pub request_timeout: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            batch_delay: Duration::from_millis(1),
            request_timeout: Duration::from_secs(30),
        }
    }
}

impl GatewayConfig {
    /// Config pointing at an explicit upstream, other settings defaulted
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            base_url: normalize_base_url(base_url.into()),
            ..Self::default()
        }
    }

    /// Load configuration from environment variables
    pub fn from_env() -> crate::Result<Self> {
        let _ = dotenv();
        Self::from_lookup(|name| env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> crate::Result<Self> {
        let defaults = Self::default();

        let base_url = lookup("CONTENT_API_BASE_URL")
            .map(normalize_base_url)
            .unwrap_or(defaults.base_url);

        let batch_delay = match lookup("LOADER_BATCH_DELAY_MS") {
            Some(raw) => Duration::from_millis(parse_number("LOADER_BATCH_DELAY_MS", &raw)?),
            None => defaults.batch_delay,
        };

        let request_timeout = match lookup("CONTENT_API_TIMEOUT_SECS") {
            Some(raw) => Duration::from_secs(parse_number("CONTENT_API_TIMEOUT_SECS", &raw)?),
            None => defaults.request_timeout,
        };

        Ok(Self {
            base_url,
            batch_delay,
            request_timeout,
        })
    }
}

fn normalize_base_url(url: String) -> String {
    url.trim_end_matches('/').to_string()
}

fn parse_number<T: FromStr>(name: &str, raw: &str) -> crate::Result<T> {
    raw.trim()
        .parse()
        .map_err(|_| GraphQLError::Config(format!("{name} must be a valid number, got {raw:?}")))
}
