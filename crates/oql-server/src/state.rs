//! Server state: the loaded dataset behind a lock

use std::sync::Arc;

use indexmap::IndexMap;
use oql::{CompiledQuery, FunctionTable, QueryRequest, Schema, Type, Value};
use serde::Serialize;
use tokio::sync::RwLock;
use utoipa::ToSchema;

use crate::error::ServerError;

/// A named, typed collection of entities
#[derive(Clone)]
pub struct Collection {
    pub ty: Type,
    pub items: Arc<Vec<Value>>,
}

impl Collection {
    pub fn new(ty: Type, items: Vec<Value>) -> Self {
        Self {
            ty,
            items: Arc::new(items),
        }
    }
}

/// Schema plus the collections typed against it. Cloning is cheap.
#[derive(Clone, Default)]
pub struct Dataset {
    pub schema: Arc<Schema>,
    pub collections: IndexMap<String, Collection>,
}

/// Dataset update message
pub enum DatasetUpdate {
    Replace(Dataset),
    Insert { name: String, collection: Collection },
    Remove { name: String },
}

/// Paging limits applied to every collection query
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerConfig {
    /// Page size when the request has no `$top`
    pub default_top: Option<usize>,
    /// Upper bound on `$top` (None = unlimited)
    pub max_top: Option<usize>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            default_top: Some(100),
            max_top: Some(1000),
        }
    }
}

impl ServerConfig {
    pub fn page_size(&self, requested: Option<usize>) -> Option<usize> {
        match (requested.or(self.default_top), self.max_top) {
            (Some(top), Some(max)) => Some(top.min(max)),
            (None, max) => max,
            (top, None) => top,
        }
    }
}

/// Shared server state
pub struct SharedState {
    pub(crate) dataset: RwLock<Dataset>,
    functions: Arc<FunctionTable>,
    config: ServerConfig,
}

impl SharedState {
    pub fn new(config: ServerConfig) -> Arc<Self> {
        Self::with_dataset(Dataset::default(), config)
    }

    pub fn with_dataset(dataset: Dataset, config: ServerConfig) -> Arc<Self> {
        Arc::new(Self {
            dataset: RwLock::new(dataset),
            functions: Arc::new(FunctionTable::builtin()),
            config,
        })
    }

    pub fn config(&self) -> ServerConfig {
        self.config
    }

    /// Apply a dataset update
    pub async fn apply_update(&self, update: DatasetUpdate) {
        let mut dataset = self.dataset.write().await;
        match update {
            DatasetUpdate::Replace(replacement) => {
                *dataset = replacement;
            }
            DatasetUpdate::Insert { name, collection } => {
                dataset.collections.insert(name, collection);
            }
            DatasetUpdate::Remove { name } => {
                dataset.collections.shift_remove(&name);
            }
        }
    }

    /// Summaries of all collections, in load order
    pub async fn list_collections(&self) -> Vec<CollectionSummary> {
        let dataset = self.dataset.read().await;
        dataset
            .collections
            .iter()
            .map(|(name, collection)| CollectionSummary {
                name: name.clone(),
                type_name: collection.ty.type_name(),
                count: collection.items.len(),
            })
            .collect()
    }

    /// Compile and run a query against one collection (runs on blocking thread pool)
    pub async fn execute_query(
        &self,
        name: &str,
        mut request: QueryRequest,
    ) -> Result<QueryResponse, ServerError> {
        let dataset = self.dataset.read().await.clone();
        let functions = self.functions.clone();
        let name = name.to_string();
        request.top = self.config.page_size(request.top);

        tokio::task::spawn_blocking(move || {
            let collection = dataset
                .collections
                .get(&name)
                .ok_or_else(|| ServerError::UnknownCollection(name.clone()))?;
            let query = CompiledQuery::compile(
                &request,
                &collection.ty,
                dataset.schema.as_ref(),
                &functions,
            )?;
            let result = query.apply(&collection.items)?;
            Ok(QueryResponse {
                total_count: result.total_count,
                items: result.items.iter().map(Value::to_json).collect(),
            })
        })
        .await
        .map_err(|e| ServerError::Task(format!("task failed: {e}")))?
    }
}

// ============ API Types ============

#[derive(Serialize, ToSchema)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CollectionSummary {
    pub name: String,
    pub type_name: String,
    pub count: usize,
}

#[derive(Serialize, ToSchema)]
pub struct CollectionsResponse {
    pub collections: Vec<CollectionSummary>,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct QueryResponse {
    /// Matches before `$skip`/`$top`
    pub total_count: usize,
    #[schema(value_type = Vec<Object>)]
    pub items: Vec<serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_size_is_clamped() {
        let config = ServerConfig {
            default_top: Some(10),
            max_top: Some(50),
        };
        assert_eq!(config.page_size(None), Some(10));
        assert_eq!(config.page_size(Some(20)), Some(20));
        assert_eq!(config.page_size(Some(500)), Some(50));

        let unlimited = ServerConfig {
            default_top: None,
            max_top: None,
        };
        assert_eq!(unlimited.page_size(None), None);
        assert_eq!(unlimited.page_size(Some(7)), Some(7));
    }
}
