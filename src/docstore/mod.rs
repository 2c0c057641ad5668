use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::types::{DocstoreBackend, DocstoreConfig};

pub mod http;
pub mod memory;

pub use http::HttpDocumentStore;
pub use memory::MemoryDocumentStore;

pub type Document = Value;

#[derive(Debug, Error)]
pub enum DocError {
    #[error("document store http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("document not found: {collection}/{id}")]
    NotFound { collection: String, id: String },

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("document store status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("document store misconfigured: {0}")]
    Config(String),
}

pub type DocResult<T> = Result<T, DocError>;

/// One batched mutation of a single document: dot-path field sets, field
/// deletes and array unions, applied together.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DocUpdate {
    #[serde(default)]
    pub set: BTreeMap<String, Value>,
    #[serde(default)]
    pub delete: Vec<String>,
    #[serde(default, rename = "arrayUnion")]
    pub array_union: BTreeMap<String, Vec<Value>>,
}

impl DocUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, path: impl Into<String>, value: impl Serialize) -> Self {
        self.set.insert(path.into(), serde_json::to_value(value).unwrap_or(Value::Null));
        self
    }

    pub fn delete(mut self, path: impl Into<String>) -> Self {
        self.delete.push(path.into());
        self
    }

    pub fn array_union(mut self, path: impl Into<String>, values: Vec<Value>) -> Self {
        self.array_union.insert(path.into(), values);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.set.is_empty() && self.delete.is_empty() && self.array_union.is_empty()
    }
}

/// The per-document operations the engine needs from the external document
/// store. Every write is per-document; cross-document batches share no
/// atomicity beyond what the backend offers.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn get(&self, collection: &str, id: &str) -> DocResult<Option<Document>>;

    /// Insert a new document with a generated id.
    async fn add(&self, collection: &str, doc: Document) -> DocResult<String>;

    async fn update(&self, collection: &str, id: &str, update: DocUpdate) -> DocResult<()>;

    /// Apply many per-document updates in one backend round trip.
    async fn commit_batch(
        &self,
        collection: &str,
        updates: Vec<(String, DocUpdate)>,
    ) -> DocResult<()>;

    /// All documents of a collection, id-tagged.
    async fn stream_all(&self, collection: &str) -> DocResult<Vec<(String, Document)>>;
}

/// Build the configured document-store backend.
pub fn from_config(cfg: &DocstoreConfig) -> DocResult<Arc<dyn DocumentStore>> {
    match cfg.backend {
        DocstoreBackend::Memory => Ok(Arc::new(MemoryDocumentStore::new())),
        DocstoreBackend::Http => {
            let base_url = cfg
                .base_url
                .clone()
                .ok_or_else(|| DocError::Config("http backend requires base_url".to_string()))?;
            Ok(Arc::new(HttpDocumentStore::new(base_url)?))
        }
    }
}
