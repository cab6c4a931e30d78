//! Request context factory
//!
//! Provides helpers for:
//! - Building a fresh [`LoaderSet`] for every incoming GraphQL request
//! - Correlating each request with an id from `x-request-id`
//! - Standard Axum handler and router for the GraphQL endpoint

use std::sync::Arc;

use async_graphql::http::GraphiQLSource;
use async_graphql::{Request, Response};
use axum::{
    extract::Extension,
    http::HeaderMap,
    response::{Html, IntoResponse},
    routing::get,
    Json, Router,
};
use tracing::{debug, info_span, Instrument};
use uuid::Uuid;

use crate::client::{RestClient, Upstream};
use crate::config::GatewayConfig;
use crate::loaders::LoaderSet;
use crate::schema::{build_schema, GatewaySchema};

/// Process-wide state. Holds no cached entities: everything cached lives in
/// the [`LoaderSet`] built per request.
#[derive(Clone)]
pub struct GatewayState {
    schema: GatewaySchema,
    upstream: Arc<dyn Upstream>,
    config: GatewayConfig,
}

impl GatewayState {
    /// State talking to the configured content API over HTTP
    pub fn new(config: GatewayConfig) -> crate::Result<Self> {
        let client = RestClient::from_config(&config)?;
        Ok(Self::with_upstream(config, Arc::new(client)))
    }

    pub fn with_upstream(config: GatewayConfig, upstream: Arc<dyn Upstream>) -> Self {
        Self {
            schema: build_schema(),
            upstream,
            config,
        }
    }

    pub fn schema(&self) -> &GatewaySchema {
        &self.schema
    }

    /// A new loader set with its own empty cache map
    pub fn loaders(&self) -> LoaderSet {
        LoaderSet::with_delay(self.upstream.clone(), self.config.batch_delay)
    }

    /// Execute one GraphQL request in its own request scope
    pub async fn execute(&self, request: Request) -> Response {
        self.schema.execute(request.data(self.loaders())).await
    }
}

/// Extract request id from x-request-id header, or mint one
pub fn extract_request_id(headers: &HeaderMap) -> String {
    headers
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

/// Standard GraphQL handler with a request-scoped loader set
///
/// # Example
///
/// ```rust,no_run
/// use axum::{extract::Extension, routing::post, Router};
/// use provider_graph::{graphql_handler, GatewayConfig, GatewayState};
///
/// # fn example() -> provider_graph::Result<()> {
/// let state = GatewayState::new(GatewayConfig::default())?;
/// let app: Router = Router::new()
///     .route("/graphql", post(graphql_handler))
///     .layer(Extension(state));
/// # Ok(())
/// # }
/// ```
pub async fn graphql_handler(
    Extension(state): Extension<GatewayState>,
    headers: HeaderMap,
    req: Json<Request>,
) -> Json<Response> {
    let request_id = extract_request_id(&headers);
    let span = info_span!("graphql_request", %request_id);

    let request = req.0;
    let response = async move {
        debug!(operation = ?request.operation_name, "Executing GraphQL request");
        state.execute(request).await
    }
    .instrument(span)
    .await;

    Json(response)
}

async fn graphiql() -> impl IntoResponse {
    Html(GraphiQLSource::build().endpoint("/graphql").finish())
}

/// `/graphql` endpoint: GraphiQL on GET, queries on POST
pub fn router(state: GatewayState) -> Router {
    Router::new()
        .route("/graphql", get(graphiql).post(graphql_handler))
        .layer(Extension(state))
}
