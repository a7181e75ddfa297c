use crate::config::OpenAiConfig;
use crate::error::ServiceError;
use crate::http::ensure_success;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

const DEFAULT: usize = 128;
const OPENAI_BATCH_SIZE: usize = 64;

pub const DEFAULT_EMBEDDING_DIMENSIONS: usize = DEFAULT;

#[async_trait]
pub trait Embedder: Send + Sync {
    fn dimensions(&self) -> usize;

    /// One vector per input, in input order.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ServiceError>;

    async fn embed(&self, text: &str) -> Result<Vec<f32>, ServiceError> {
        self.embed_batch(&[text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| ServiceError::Request("embedding service returned no vector".to_string()))
    }
}

#[async_trait]
impl<T: Embedder + ?Sized> Embedder for Box<T> {
    fn dimensions(&self) -> usize {
        (**self).dimensions()
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ServiceError> {
        (**self).embed_batch(texts).await
    }
}

/// Hashes character trigrams into a fixed number of buckets. Offline and
/// deterministic, so it also backs the tests.
#[derive(Debug, Clone, Copy)]
pub struct CharacterNgramEmbedder {
    pub dimensions: usize,
}

impl Default for CharacterNgramEmbedder {
    fn default() -> Self {
        Self {
            dimensions: DEFAULT_EMBEDDING_DIMENSIONS,
        }
    }
}

impl CharacterNgramEmbedder {
    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0f32; self.dimensions.max(1)];
        let lowered = text.to_lowercase();
        let chars: Vec<char> = lowered.chars().collect();

        if chars.is_empty() {
            return vector;
        }

        for window in chars.windows(3) {
            let token = window.iter().collect::<String>();
            let mut hash = 1469598103934665603u64;
            for byte in token.bytes() {
                hash ^= byte as u64;
                hash = hash.wrapping_mul(1099511628211);
            }
            let bucket = (hash % vector.len() as u64) as usize;
            vector[bucket] += 1.0;
        }

        let magnitude = vector.iter().map(|value| value * value).sum::<f32>().sqrt();
        if magnitude > 0.0 {
            for value in &mut vector {
                *value /= magnitude;
            }
        }

        vector
    }
}

#[async_trait]
impl Embedder for CharacterNgramEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions.max(1)
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ServiceError> {
        Ok(texts.iter().map(|text| self.embed_text(text)).collect())
    }
}

#[derive(Serialize)]
struct OpenAiEmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct OpenAiEmbedResponse {
    data: Vec<OpenAiEmbedData>,
}

#[derive(Deserialize)]
struct OpenAiEmbedData {
    #[serde(default)]
    index: Option<usize>,
    embedding: Vec<f32>,
}

/// `POST {base}/v1/embeddings`, batched.
pub struct OpenAiEmbedder {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
    dimensions: usize,
}

impl OpenAiEmbedder {
    pub fn new(client: Client, config: &OpenAiConfig, api_key: impl Into<String>) -> Self {
        Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            model: config.embedding_model.clone(),
            dimensions: config.embedding_dimension,
        }
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ServiceError> {
        let url = format!("{}/v1/embeddings", self.base_url);
        let mut vectors = Vec::with_capacity(texts.len());

        for batch in texts.chunks(OPENAI_BATCH_SIZE) {
            let response = self
                .client
                .post(&url)
                .bearer_auth(&self.api_key)
                .json(&OpenAiEmbedRequest {
                    model: &self.model,
                    input: batch,
                })
                .send()
                .await
                .map_err(|error| ServiceError::from_transport("openai-embeddings", error))?;
            let response = ensure_success("openai-embeddings", response).await?;

            let mut body: OpenAiEmbedResponse = response
                .json()
                .await
                .map_err(|error| ServiceError::from_transport("openai-embeddings", error))?;
            if body.data.len() != batch.len() {
                return Err(ServiceError::BackendResponse {
                    backend: "openai-embeddings".to_string(),
                    details: format!("expected {} embeddings, got {}", batch.len(), body.data.len()),
                });
            }
            body.data.sort_by_key(|item| item.index.unwrap_or(usize::MAX));
            vectors.extend(body.data.into_iter().map(|item| item.embedding));
        }

        tracing::debug!(count = vectors.len(), model = %self.model, "generated embeddings");
        Ok(vectors)
    }
}
