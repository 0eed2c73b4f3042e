//! ServerCore - main public API for oql-server

use std::sync::Arc;

use oql::{QueryRequest, Type, Value};

use crate::error::ServerError;
use crate::state::{
    Collection, CollectionSummary, Dataset, DatasetUpdate, QueryResponse, ServerConfig,
    SharedState,
};

/// Main server core providing collection management and query execution
#[derive(Clone)]
pub struct ServerCore {
    state: Arc<SharedState>,
}

impl ServerCore {
    /// Create a ServerCore with no collections
    pub fn new(config: ServerConfig) -> Self {
        Self {
            state: SharedState::new(config),
        }
    }

    /// Create a ServerCore serving a loaded dataset
    pub fn with_dataset(dataset: Dataset, config: ServerConfig) -> Self {
        Self {
            state: SharedState::with_dataset(dataset, config),
        }
    }

    /// Get the underlying shared state
    pub fn state(&self) -> Arc<SharedState> {
        self.state.clone()
    }

    pub fn config(&self) -> ServerConfig {
        self.state.config()
    }

    /// Swap in a new dataset
    pub async fn replace_dataset(&self, dataset: Dataset) {
        self.state.apply_update(DatasetUpdate::Replace(dataset)).await;
    }

    /// Insert a collection; its type must come from the current schema
    pub async fn insert_collection(&self, name: impl Into<String>, ty: Type, items: Vec<Value>) {
        self.state
            .apply_update(DatasetUpdate::Insert {
                name: name.into(),
                collection: Collection::new(ty, items),
            })
            .await;
    }

    /// Remove a collection
    pub async fn remove_collection(&self, name: &str) {
        self.state
            .apply_update(DatasetUpdate::Remove {
                name: name.to_string(),
            })
            .await;
    }

    /// List all collections
    pub async fn list_collections(&self) -> Vec<CollectionSummary> {
        self.state.list_collections().await
    }

    /// Execute a query against a collection
    pub async fn execute_query(
        &self,
        name: &str,
        request: QueryRequest,
    ) -> Result<QueryResponse, ServerError> {
        self.state.execute_query(name, request).await
    }
}

impl Default for ServerCore {
    fn default() -> Self {
        Self::new(ServerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::parse_dataset;

    const DATASET: &str = r#"{
        "schema": {
            "enums": [{ "name": "Genre", "members": ["Novel", "Poetry", "Essay"] }],
            "types": [{ "name": "Book", "properties": {
                "Title": "String", "Year": "Int32", "Genre": "Genre", "Rating": "Double?"
            } }]
        },
        "collections": { "books": { "type": "Book", "items": [
            { "title": "Dune", "year": 1965, "genre": "Novel", "rating": 4.5 },
            { "title": "Ariel", "year": 1965, "genre": "Poetry", "rating": null },
            { "title": "Solaris", "year": 1961, "genre": "Novel", "rating": 4.1 },
            { "title": "Walden", "year": 1854, "genre": "Essay", "rating": 3.9 }
        ] } }
    }"#;

    fn core(config: ServerConfig) -> ServerCore {
        ServerCore::with_dataset(parse_dataset(DATASET).unwrap(), config)
    }

    fn titles(response: &QueryResponse) -> Vec<&str> {
        response
            .items
            .iter()
            .map(|item| item["title"].as_str().unwrap())
            .collect()
    }

    #[tokio::test]
    async fn filters_and_orders_a_collection() {
        let core = core(ServerConfig::default());
        let response = core
            .execute_query(
                "books",
                QueryRequest {
                    filter: Some("genre eq 'Novel' or year lt 1900".into()),
                    order_by: Some("year desc".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(response.total_count, 3);
        assert_eq!(titles(&response), ["Dune", "Solaris", "Walden"]);
    }

    #[tokio::test]
    async fn default_and_max_page_size_apply() {
        let core = core(ServerConfig {
            default_top: Some(1),
            max_top: Some(2),
        });
        let page = core
            .execute_query("books", QueryRequest::default())
            .await
            .unwrap();
        assert_eq!((page.total_count, page.items.len()), (4, 1));

        let page = core
            .execute_query(
                "books",
                QueryRequest {
                    top: Some(10),
                    skip: Some(1),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(titles(&page), ["Ariel", "Solaris"]);
    }

    #[tokio::test]
    async fn select_projects_named_fields() {
        let core = core(ServerConfig::default());
        let response = core
            .execute_query(
                "books",
                QueryRequest {
                    filter: Some("rating ne null".into()),
                    select: Some("title, year as published".into()),
                    order_by: Some("rating".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(
            response.items[0],
            serde_json::json!({ "title": "Walden", "published": 1854 })
        );
    }

    #[tokio::test]
    async fn query_errors_and_unknown_collections() {
        let core = core(ServerConfig::default());
        let err = core
            .execute_query(
                "books",
                QueryRequest {
                    filter: Some("pages gt 100".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ServerError::Query(_)));
        assert!(err.to_string().contains("pages"));

        let err = core
            .execute_query("films", QueryRequest::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ServerError::UnknownCollection(_)));
    }

    #[tokio::test]
    async fn serves_the_sample_shop() {
        let path = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("../../demos/shop.json");
        let dataset = crate::loader::load_dataset(&path).await.unwrap();
        let core = ServerCore::with_dataset(dataset, ServerConfig::default());

        let ids = |filter: &'static str| {
            let core = core.clone();
            async move {
                let request = QueryRequest {
                    filter: Some(filter.into()),
                    order_by: Some("id".into()),
                    ..Default::default()
                };
                let response = core.execute_query("orders", request).await.unwrap();
                response
                    .items
                    .iter()
                    .map(|item| item["id"].as_i64().unwrap())
                    .collect::<Vec<_>>()
            }
        };

        assert_eq!(ids("customer.country eq 'SE' and status ne 'Cancelled'").await, [10]);
        assert_eq!(ids("isof(t'PriorityOrder')").await, [12]);
        assert_eq!(ids("attributes['gift'] eq 'yes'").await, [12]);
        assert_eq!(ids("lines.any(l:l gt 4)").await, [10, 12]);
        assert_eq!(ids("customer.tags.any(t:t eq 'vip')").await, [12]);
        assert_eq!(ids("discount eq null or total lt 100m").await, [11, 13]);
        assert_eq!(ids("substringof('&',customer.name)").await, [11]);
    }

    #[tokio::test]
    async fn collections_can_be_added_and_removed() {
        let core = core(ServerConfig::default());
        let dataset = core.state().dataset.read().await.clone();
        let book = dataset.collections["books"].ty.clone();
        core.insert_collection("empty", book, Vec::new()).await;

        let names: Vec<String> = core
            .list_collections()
            .await
            .into_iter()
            .map(|c| c.name)
            .collect();
        assert_eq!(names, ["books", "empty"]);

        core.remove_collection("books").await;
        let listed = core.list_collections().await;
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].type_name, "Book");
        assert_eq!(listed[0].count, 0);
    }
}
