//! Dataset loading: a JSON document holding a schema and typed collections
//!
//! ```text
//! {
//!   "schema": { "enums": [...], "types": [...] },
//!   "collections": {
//!     "orders": { "type": "Order", "items": [ { "id": 1, ... } ] }
//!   }
//! }
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use indexmap::IndexMap;
use oql::{JsonError, Schema, SchemaDefinition, SchemaError, Type, Value};
use serde::Deserialize;
use thiserror::Error;

use crate::state::{Collection, Dataset};

#[derive(Debug, Deserialize)]
pub struct DatasetDefinition {
    pub schema: SchemaDefinition,
    #[serde(default)]
    pub collections: IndexMap<String, CollectionDefinition>,
}

#[derive(Debug, Deserialize)]
pub struct CollectionDefinition {
    #[serde(rename = "type")]
    pub type_name: String,
    #[serde(default)]
    pub items: Vec<serde_json::Value>,
}

#[derive(Error, Debug)]
pub enum LoadError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid dataset document: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error("Collection '{collection}' has unknown resource type '{type_name}'")]
    UnknownType {
        collection: String,
        type_name: String,
    },

    #[error("Collection '{collection}' item {index}: {source}")]
    Item {
        collection: String,
        index: usize,
        source: JsonError,
    },

    #[error("blocking task failed: {0}")]
    Task(String),
}

/// Build a dataset from its JSON text
pub fn parse_dataset(text: &str) -> Result<Dataset, LoadError> {
    let definition: DatasetDefinition = serde_json::from_str(text)?;
    let schema = Schema::from_definition(&definition.schema)?;

    let mut collections = IndexMap::with_capacity(definition.collections.len());
    for (name, collection) in definition.collections {
        let resource = schema
            .resource(&collection.type_name)
            .ok_or_else(|| LoadError::UnknownType {
                collection: name.clone(),
                type_name: collection.type_name.clone(),
            })?;
        let ty = Type::Resource(resource.clone());
        let items = collection
            .items
            .iter()
            .enumerate()
            .map(|(index, item)| {
                Value::from_json(item, &ty, &schema).map_err(|source| LoadError::Item {
                    collection: name.clone(),
                    index,
                    source,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        log::info!("Loaded collection {} ({} {} items)", name, items.len(), ty);
        collections.insert(name, Collection::new(ty, items));
    }

    Ok(Dataset {
        schema: Arc::new(schema),
        collections,
    })
}

/// Load a dataset file (sync)
pub fn load_dataset_sync(path: &Path) -> Result<Dataset, LoadError> {
    let text = std::fs::read_to_string(path).map_err(|source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_dataset(&text)
}

/// Load a dataset file (async, runs on blocking thread pool)
pub async fn load_dataset(path: &Path) -> Result<Dataset, LoadError> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || load_dataset_sync(&path))
        .await
        .map_err(|e| LoadError::Task(e.to_string()))?
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_schema_and_collections() {
        let dataset = parse_dataset(
            r#"{
                "schema": { "types": [{ "name": "Book", "properties": { "Title": "String", "Year": "Int32" } }] },
                "collections": { "books": { "type": "Book", "items": [
                    { "title": "Dune", "year": 1965 },
                    { "title": "Solaris", "year": 1961 }
                ] } }
            }"#,
        )
        .unwrap();
        let books = &dataset.collections["books"];
        assert_eq!(books.ty.type_name(), "Book");
        assert_eq!(books.items.len(), 2);
        let first = books.items[0].as_entity().unwrap();
        assert_eq!(first.get("Year"), &Value::Int32(1965));
    }

    #[test]
    fn reports_the_failing_item() {
        let err = parse_dataset(
            r#"{
                "schema": { "types": [{ "name": "Book", "properties": { "Year": "Int32" } }] },
                "collections": { "books": { "type": "Book", "items": [{ "year": 1 }, { "year": "x" }] } }
            }"#,
        )
        .err()
        .unwrap();
        assert!(matches!(err, LoadError::Item { index: 1, .. }), "{err}");
    }

    #[test]
    fn rejects_unknown_collection_type() {
        let err = parse_dataset(r#"{ "schema": {}, "collections": { "x": { "type": "Nope" } } }"#)
            .err()
            .unwrap();
        assert!(matches!(err, LoadError::UnknownType { .. }));
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let err = load_dataset_sync(Path::new("/definitely/not/here.json"))
            .err()
            .unwrap();
        assert!(matches!(err, LoadError::Io { .. }));
    }
}
