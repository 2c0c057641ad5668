use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};

use super::{DocError, DocResult, DocUpdate, Document, DocumentStore};

/// Document store reached over its REST surface:
/// `GET/POST /{collection}`, `GET/PATCH /{collection}/{id}` and
/// `POST /{collection}/batch`.
pub struct HttpDocumentStore {
    http: Client,
    base_url: String,
}

#[derive(Deserialize)]
struct AddResponse {
    id: String,
}

#[derive(Serialize)]
struct BatchEntry<'a> {
    id: &'a str,
    update: &'a DocUpdate,
}

#[derive(Deserialize)]
struct StreamEntry {
    id: String,
    doc: Document,
}

impl HttpDocumentStore {
    pub fn new(base_url: String) -> DocResult<Self> {
        let http = Client::builder().user_agent("sportfolios-engine/0.1").build()?;
        Ok(Self { http, base_url: base_url.trim_end_matches('/').to_string() })
    }

    fn url(&self, collection: &str, id: Option<&str>) -> String {
        match id {
            Some(id) => format!("{}/{}/{}", self.base_url, collection, id),
            None => format!("{}/{}", self.base_url, collection),
        }
    }

    async fn expect_ok(resp: reqwest::Response) -> DocResult<reqwest::Response> {
        let status = resp.status();
        if status.is_success() {
            Ok(resp)
        } else {
            let body = resp.text().await.unwrap_or_default();
            Err(DocError::Status { status: status.as_u16(), body })
        }
    }
}

#[async_trait]
impl DocumentStore for HttpDocumentStore {
    async fn get(&self, collection: &str, id: &str) -> DocResult<Option<Document>> {
        let resp = self.http.get(self.url(collection, Some(id))).send().await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let resp = Self::expect_ok(resp).await?;
        Ok(Some(resp.json().await?))
    }

    async fn add(&self, collection: &str, doc: Document) -> DocResult<String> {
        let resp = self.http.post(self.url(collection, None)).json(&doc).send().await?;
        let resp = Self::expect_ok(resp).await?;
        let added: AddResponse = resp.json().await?;
        Ok(added.id)
    }

    async fn update(&self, collection: &str, id: &str, update: DocUpdate) -> DocResult<()> {
        let resp =
            self.http.patch(self.url(collection, Some(id))).json(&update).send().await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Err(DocError::NotFound {
                collection: collection.to_string(),
                id: id.to_string(),
            });
        }
        Self::expect_ok(resp).await?;
        Ok(())
    }

    async fn commit_batch(
        &self,
        collection: &str,
        updates: Vec<(String, DocUpdate)>,
    ) -> DocResult<()> {
        let entries: Vec<BatchEntry<'_>> =
            updates.iter().map(|(id, update)| BatchEntry { id, update }).collect();
        let url = format!("{}/batch", self.url(collection, None));
        let resp = self.http.post(url).json(&entries).send().await?;
        Self::expect_ok(resp).await?;
        Ok(())
    }

    async fn stream_all(&self, collection: &str) -> DocResult<Vec<(String, Document)>> {
        let resp = self.http.get(self.url(collection, None)).send().await?;
        let resp = Self::expect_ok(resp).await?;
        let entries: Vec<StreamEntry> = resp.json().await?;
        Ok(entries.into_iter().map(|e| (e.id, e.doc)).collect())
    }
}
