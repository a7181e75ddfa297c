use crate::models::{EmbeddingRecord, RetrievedChunk};
use crate::ServiceError;
use async_trait::async_trait;

/// Persistent, named vector collection.
#[async_trait]
pub trait VectorStore: Send + Sync {
    fn collection(&self) -> &str;

    async fn collection_exists(&self) -> Result<bool, ServiceError>;

    /// Creates the collection when missing. Existing collections are left alone.
    async fn ensure_collection(&self, vector_size: usize) -> Result<(), ServiceError>;

    /// Appends records; identical texts are stored again, not deduplicated.
    async fn upsert(&self, records: &[EmbeddingRecord]) -> Result<(), ServiceError>;

    async fn similarity_search(
        &self,
        query_vector: &[f32],
        k: usize,
    ) -> Result<Vec<RetrievedChunk>, ServiceError>;
}

/// Fetches the chunks most relevant to a question.
#[async_trait]
pub trait Retriever: Send + Sync {
    async fn retrieve(&self, query: &str, k: usize) -> Result<Vec<RetrievedChunk>, ServiceError>;

    /// Whether there is anything to retrieve from yet.
    async fn is_available(&self) -> Result<bool, ServiceError> {
        Ok(true)
    }
}
