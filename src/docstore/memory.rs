use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use async_trait::async_trait;
use serde_json::{Map, Value};
use uuid::Uuid;

use super::{DocResult, DocUpdate, Document, DocumentStore};

/// In-process document store with the same field-path semantics as the
/// hosted backend. Tests and local runs use it in place of the HTTP store.
#[derive(Default)]
pub struct MemoryDocumentStore {
    collections: RwLock<HashMap<String, BTreeMap<String, Document>>>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn apply_update(doc: &mut Document, update: &DocUpdate) {
    for (path, value) in &update.set {
        set_path(doc, path, value.clone());
    }
    for path in &update.delete {
        delete_path(doc, path);
    }
    for (path, values) in &update.array_union {
        union_path(doc, path, values);
    }
}

fn as_object(value: &mut Value) -> &mut Map<String, Value> {
    if !value.is_object() {
        *value = Value::Object(Map::new());
    }
    value.as_object_mut().unwrap()
}

/// Walk `a.b.c` creating intermediate objects, returning the leaf slot.
fn slot<'a>(doc: &'a mut Value, path: &str) -> (&'a mut Map<String, Value>, String) {
    let mut parts: Vec<&str> = path.split('.').collect();
    let leaf = parts.pop().unwrap_or_default().to_string();
    let mut current = doc;
    for part in parts {
        current = as_object(current).entry(part.to_string()).or_insert(Value::Null);
    }
    (as_object(current), leaf)
}

fn set_path(doc: &mut Value, path: &str, value: Value) {
    let (obj, leaf) = slot(doc, path);
    obj.insert(leaf, value);
}

fn delete_path(doc: &mut Value, path: &str) {
    let (obj, leaf) = slot(doc, path);
    obj.remove(&leaf);
}

/// Append only the elements not already present, preserving order.
fn union_path(doc: &mut Value, path: &str, values: &[Value]) {
    let (obj, leaf) = slot(doc, path);
    let entry = obj.entry(leaf).or_insert_with(|| Value::Array(Vec::new()));
    if !entry.is_array() {
        *entry = Value::Array(Vec::new());
    }
    let array = entry.as_array_mut().unwrap();
    for value in values {
        if !array.contains(value) {
            array.push(value.clone());
        }
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn get(&self, collection: &str, id: &str) -> DocResult<Option<Document>> {
        let collections = self.collections.read().unwrap();
        Ok(collections.get(collection).and_then(|docs| docs.get(id)).cloned())
    }

    async fn add(&self, collection: &str, doc: Document) -> DocResult<String> {
        let id = Uuid::new_v4().simple().to_string();
        let mut collections = self.collections.write().unwrap();
        collections.entry(collection.to_string()).or_default().insert(id.clone(), doc);
        Ok(id)
    }

    async fn update(&self, collection: &str, id: &str, update: DocUpdate) -> DocResult<()> {
        let mut collections = self.collections.write().unwrap();
        let doc = collections
            .entry(collection.to_string())
            .or_default()
            .entry(id.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        apply_update(doc, &update);
        Ok(())
    }

    async fn commit_batch(
        &self,
        collection: &str,
        updates: Vec<(String, DocUpdate)>,
    ) -> DocResult<()> {
        let mut collections = self.collections.write().unwrap();
        let docs = collections.entry(collection.to_string()).or_default();
        for (id, update) in updates {
            let doc = docs.entry(id).or_insert_with(|| Value::Object(Map::new()));
            apply_update(doc, &update);
        }
        Ok(())
    }

    async fn stream_all(&self, collection: &str) -> DocResult<Vec<(String, Document)>> {
        let collections = self.collections.read().unwrap();
        Ok(collections
            .get(collection)
            .map(|docs| docs.iter().map(|(id, doc)| (id.clone(), doc.clone())).collect())
            .unwrap_or_default())
    }
}
