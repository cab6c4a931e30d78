//! # provider-graph
//!
//! GraphQL facade over the provider content REST API.
//!
//! ## Features
//!
//! - **Request-scoped DataLoaders** - batching, deduplicating, caching lookups
//!   that share one cache map per incoming query
//! - **Relay Global IDs** - opaque `node(id)` identifiers with tag-based type dispatch
//! - **REST Client** - thin JSON client for the upstream content service
//! - **Request Context Factory** - Axum handler that builds a fresh loader set per request
//!
//! ## Usage
//!
//! ```rust,no_run
//! use provider_graph::{router, GatewayConfig, GatewayState};
//!
//! # async fn example() -> provider_graph::Result<()> {
//! let config = GatewayConfig::from_env()?;
//! let state = GatewayState::new(config)?;
//! let app = router(state);
//! # let _ = app;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod context;
pub mod dataloaders;
pub mod loaders;
pub mod relay;
pub mod schema;
pub mod types;

pub use client::{RestClient, Upstream};
pub use config::GatewayConfig;
pub use context::{extract_request_id, graphql_handler, router, GatewayState};
pub use dataloaders::{BatchLoader, CacheMap, DataLoader};
pub use loaders::LoaderSet;
pub use relay::GlobalId;
pub use schema::{build_schema, GatewaySchema};
pub use types::{Entity, EntityKind, Establishment, Provider, Resource};

use async_graphql::ErrorExtensions;
use thiserror::Error;

/// Errors raised by the data-access layer.
///
/// `Clone` because a single batch outcome is handed to every caller that
/// waited on one of its keys.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GraphQLError {
    /// Network, non-2xx or non-JSON failure from the upstream service
    #[error("Fetch error for {path}: {message}")]
    Fetch { path: String, message: String },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Malformed global id: {0}")]
    MalformedId(String),

    #[error("Unknown type: {0}")]
    UnknownType(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl GraphQLError {
    pub(crate) fn fetch(path: &str, message: impl ToString) -> Self {
        Self::Fetch {
            path: path.to_string(),
            message: message.to_string(),
        }
    }

    /// Stable code exposed under the GraphQL error `extensions.code`
    pub fn code(&self) -> &'static str {
        match self {
            Self::Fetch { .. } => "FETCH_FAILED",
            Self::NotFound(_) => "NOT_FOUND",
            Self::MalformedId(_) => "MALFORMED_ID",
            Self::UnknownType(_) => "UNKNOWN_TYPE",
            Self::Config(_) => "CONFIG",
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

impl ErrorExtensions for GraphQLError {
    fn extend(&self) -> async_graphql::Error {
        async_graphql::Error::new(self.to_string()).extend_with(|_, e| e.set("code", self.code()))
    }
}

/// Result type for gateway operations
pub type Result<T> = std::result::Result<T, GraphQLError>;
