//! OQL Server - OData-style REST queries over typed JSON collections
//!
//! Loads a dataset (a schema plus collections typed against it) and answers
//! `GET /resources/{name}?$filter=…&$orderby=…&$select=…&$top=…&$skip=…`.
//!
//! # Example
//!
//! ```ignore
//! use oql_server::{ServerConfig, ServerCore, build_router};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() {
//!     let dataset = oql_server::loader::load_dataset("shop.json".as_ref()).await.unwrap();
//!     let core = Arc::new(ServerCore::with_dataset(dataset, ServerConfig::default()));
//!
//!     let router = build_router(core);
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await.unwrap();
//!     axum::serve(listener, router).await.unwrap();
//! }
//! ```

pub mod core;
pub mod error;
pub mod http;
pub mod loader;
pub mod state;

// Re-exports for convenience
pub use crate::core::ServerCore;
pub use error::{AppError, ServerError};
pub use state::{Dataset, ServerConfig, SharedState};

use std::sync::Arc;

use axum::Router;
use axum::routing::get;
use tower_http::cors::CorsLayer;
use utoipa::OpenApi;

/// OpenAPI documentation
#[derive(OpenApi)]
#[openapi(
    paths(http::list_collections, http::query_collection),
    components(schemas(
        state::CollectionsResponse,
        state::CollectionSummary,
        state::QueryResponse,
        state::ErrorResponse,
    ))
)]
struct ApiDoc;

pub fn openapi_spec() -> utoipa::openapi::OpenApi {
    ApiDoc::openapi()
}

/// Build the axum router with all endpoints
pub fn build_router(core: Arc<ServerCore>) -> Router {
    Router::new()
        .route("/resources", get(http::list_collections))
        .route("/resources/{name}", get(http::query_collection))
        .with_state(core)
}

/// Build the router with the OpenAPI documentation endpoint and permissive CORS
pub fn build_router_with_docs(core: Arc<ServerCore>) -> Router {
    use utoipa_swagger_ui::SwaggerUi;

    build_router(core)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", openapi_spec()))
        .layer(CorsLayer::permissive())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn openapi_lists_both_routes() {
        let spec = openapi_spec();
        assert!(spec.paths.paths.contains_key("/resources"));
        assert!(spec.paths.paths.contains_key("/resources/{name}"));
    }
}
