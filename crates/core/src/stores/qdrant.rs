use crate::config::VectorStoreConfig;
use crate::http::ensure_success;
use crate::models::{EmbeddingRecord, RetrievedChunk};
use crate::traits::VectorStore;
use crate::ServiceError;
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde_json::{json, Value};
use url::Url;

const BACKEND: &str = "qdrant";
/// Points per upsert request. At 3072 dimensions this keeps each request
/// well under Qdrant's default 32 MB body limit.
pub const DEFAULT_UPSERT_BATCH_SIZE: usize = 256;

pub struct QdrantStore {
    endpoint: Url,
    collection: String,
    api_key: Option<String>,
    client: Client,
    upsert_batch_size: usize,
}

impl QdrantStore {
    pub fn new(client: Client, config: &VectorStoreConfig) -> Result<Self, ServiceError> {
        let mut endpoint = Url::parse(&config.url)?;
        if !endpoint.path().ends_with('/') {
            let path = format!("{}/", endpoint.path());
            endpoint.set_path(&path);
        }
        Ok(Self {
            endpoint,
            collection: config.collection.clone(),
            api_key: config.api_key.clone(),
            client,
            upsert_batch_size: DEFAULT_UPSERT_BATCH_SIZE,
        })
    }

    pub fn with_upsert_batch_size(mut self, batch_size: usize) -> Self {
        self.upsert_batch_size = batch_size.max(1);
        self
    }

    fn url(&self, path: &str) -> Result<Url, ServiceError> {
        Ok(self.endpoint.join(&format!("collections/{}{path}", self.collection))?)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.api_key {
            Some(key) => request.header("api-key", key),
            None => request,
        }
    }
}

#[async_trait]
impl VectorStore for QdrantStore {
    fn collection(&self) -> &str {
        &self.collection
    }

    async fn collection_exists(&self) -> Result<bool, ServiceError> {
        let response = self
            .authorize(self.client.get(self.url("")?))
            .send()
            .await
            .map_err(|error| ServiceError::from_transport(BACKEND, error))?;

        match response.status() {
            status if status.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            _ => ensure_success(BACKEND, response).await.map(|_| false),
        }
    }

    async fn ensure_collection(&self, vector_size: usize) -> Result<(), ServiceError> {
        if self.collection_exists().await? {
            return Ok(());
        }

        tracing::info!(collection = %self.collection, vector_size, "creating qdrant collection");
        let response = self
            .authorize(self.client.put(self.url("")?))
            .json(&json!({
                "vectors": { "size": vector_size, "distance": "Cosine" }
            }))
            .send()
            .await
            .map_err(|error| ServiceError::from_transport(BACKEND, error))?;
        ensure_success(BACKEND, response).await?;
        Ok(())
    }

    async fn upsert(&self, records: &[EmbeddingRecord]) -> Result<(), ServiceError> {
        if records.is_empty() {
            return Ok(());
        }

        for batch in records.chunks(self.upsert_batch_size) {
            let points = batch
                .iter()
                .map(|record| {
                    json!({
                        "id": record.id.to_string(),
                        "vector": record.vector,
                        "payload": {
                            "text": record.text,
                            "source": record.source,
                            "chunk_index": record.chunk_index,
                            "ingested_at": record.ingested_at.to_rfc3339(),
                        },
                    })
                })
                .collect::<Vec<_>>();

            let response = self
                .authorize(self.client.put(self.url("/points?wait=true")?))
                .json(&json!({ "points": points }))
                .send()
                .await
                .map_err(|error| ServiceError::from_transport(BACKEND, error))?;
            ensure_success(BACKEND, response).await?;
            tracing::debug!(collection = %self.collection, points = batch.len(), "upserted batch");
        }
        Ok(())
    }

    async fn similarity_search(
        &self,
        query_vector: &[f32],
        k: usize,
    ) -> Result<Vec<RetrievedChunk>, ServiceError> {
        let response = self
            .authorize(self.client.post(self.url("/points/search")?))
            .json(&json!({
                "vector": query_vector,
                "limit": k,
                "with_payload": true,
            }))
            .send()
            .await
            .map_err(|error| ServiceError::from_transport(BACKEND, error))?;
        let response = ensure_success(BACKEND, response).await?;

        let parsed: Value = response
            .json()
            .await
            .map_err(|error| ServiceError::from_transport(BACKEND, error))?;
        let hits = parsed
            .pointer("/result")
            .and_then(Value::as_array)
            .ok_or_else(|| ServiceError::BackendResponse {
                backend: BACKEND.to_string(),
                details: "search response has no result array".to_string(),
            })?;

        let mut result = Vec::with_capacity(hits.len());
        for hit in hits {
            let text = hit
                .pointer("/payload/text")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            if text.is_empty() {
                continue;
            }
            result.push(RetrievedChunk {
                text,
                source: hit
                    .pointer("/payload/source")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                score: hit.pointer("/score").and_then(Value::as_f64).unwrap_or(0.0),
            });
        }

        Ok(result)
    }
}
