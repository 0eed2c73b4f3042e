//! HTTP REST handlers

use std::sync::Arc;
use std::time::Instant;

use axum::Json;
use axum::extract::{Path, Query, State};
use log::{debug, info, warn};
use oql::QueryRequest;
use serde::Deserialize;
use utoipa::IntoParams;

use crate::core::ServerCore;
use crate::error::AppError;
use crate::state::{CollectionsResponse, ErrorResponse, QueryResponse};

/// OData-style system query options
#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct QueryOptions {
    /// Boolean predicate, e.g. `status eq 'Active' and total gt 10m`
    #[serde(rename = "$filter")]
    #[param(rename = "$filter")]
    pub filter: Option<String>,
    /// Comma separated keys, each optionally followed by `asc` or `desc`
    #[serde(rename = "$orderby")]
    #[param(rename = "$orderby")]
    pub order_by: Option<String>,
    /// Comma separated projections, `expr as alias` or a property path
    #[serde(rename = "$select")]
    #[param(rename = "$select")]
    pub select: Option<String>,
    #[serde(rename = "$top")]
    #[param(rename = "$top")]
    pub top: Option<usize>,
    #[serde(rename = "$skip")]
    #[param(rename = "$skip")]
    pub skip: Option<usize>,
}

impl From<QueryOptions> for QueryRequest {
    fn from(options: QueryOptions) -> Self {
        QueryRequest {
            filter: options.filter,
            order_by: options.order_by,
            select: options.select,
            top: options.top,
            skip: options.skip,
        }
    }
}

/// Query a collection
#[utoipa::path(
    get,
    path = "/resources/{name}",
    params(
        ("name" = String, Path, description = "Collection name"),
        QueryOptions
    ),
    responses(
        (status = 200, description = "Matching items", body = QueryResponse),
        (status = 400, description = "Query error", body = ErrorResponse),
        (status = 404, description = "Unknown collection", body = ErrorResponse)
    )
)]
pub async fn query_collection(
    State(core): State<Arc<ServerCore>>,
    Path(name): Path<String>,
    Query(options): Query<QueryOptions>,
) -> Result<Json<QueryResponse>, AppError> {
    let start = Instant::now();
    info!(
        "GET /resources/{}: $filter={}",
        name,
        options.filter.as_deref().unwrap_or("")
    );
    debug!("Query options: {:?}", options);

    match core.execute_query(&name, options.into()).await {
        Ok(response) => {
            info!(
                "Query succeeded in {:.2?}, {} of {} items",
                start.elapsed(),
                response.items.len(),
                response.total_count
            );
            Ok(Json(response))
        }
        Err(e) => {
            warn!("Query failed in {:.2?}: {}", start.elapsed(), e);
            Err(e.into())
        }
    }
}

/// List available collections
#[utoipa::path(
    get,
    path = "/resources",
    responses(
        (status = 200, description = "Collections with their types and sizes", body = CollectionsResponse)
    )
)]
pub async fn list_collections(State(core): State<Arc<ServerCore>>) -> Json<CollectionsResponse> {
    info!("GET /resources");
    let collections = core.list_collections().await;
    debug!("Available collections: {:?}", collections);
    Json(CollectionsResponse { collections })
}
