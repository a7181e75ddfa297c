use crate::embeddings::Embedder;
use crate::models::{Chunk, EmbeddingRecord, RetrievedChunk};
use crate::traits::{Retriever, VectorStore};
use crate::ServiceError;
use async_trait::async_trait;

/// Embeds chunks into one configured collection and serves retrieval from it.
pub struct VectorIndexer<E, S> {
    embedder: E,
    store: S,
}

impl<E, S> VectorIndexer<E, S>
where
    E: Embedder,
    S: VectorStore,
{
    pub fn new(embedder: E, store: S) -> Self {
        Self { embedder, store }
    }

    pub fn collection(&self) -> &str {
        self.store.collection()
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// False until a first ingestion created the collection.
    pub async fn collection_exists(&self) -> Result<bool, ServiceError> {
        self.store.collection_exists().await
    }

    pub async fn prepare(&self) -> Result<(), ServiceError> {
        self.store.ensure_collection(self.embedder.dimensions()).await
    }

    /// Embeds and appends every chunk. Chunks are checked before any
    /// service is contacted; a blank chunk means the upstream pipeline is
    /// broken and nothing is sent. Service failures propagate as-is.
    pub async fn ingest(&self, chunks: &[Chunk]) -> Result<usize, ServiceError> {
        validate_chunks(chunks)?;
        if chunks.is_empty() {
            return Ok(0);
        }

        let texts = chunks.iter().map(|chunk| chunk.text.clone()).collect::<Vec<_>>();
        let vectors = self.embedder.embed_batch(&texts).await?;
        if vectors.len() != chunks.len() {
            return Err(ServiceError::Request(format!(
                "embedding count {} doesn't match chunk count {}",
                vectors.len(),
                chunks.len()
            )));
        }

        let records = chunks
            .iter()
            .zip(vectors)
            .map(|(chunk, vector)| EmbeddingRecord::new(chunk, vector))
            .collect::<Vec<_>>();
        self.store.upsert(&records).await?;

        tracing::info!(
            collection = %self.store.collection(),
            records = records.len(),
            "ingested chunks"
        );
        Ok(records.len())
    }
}

fn validate_chunks(chunks: &[Chunk]) -> Result<(), ServiceError> {
    if let Some(chunk) = chunks.iter().find(|chunk| chunk.text.trim().is_empty()) {
        return Err(ServiceError::ContractViolation(format!(
            "chunk {} from {} carries no text",
            chunk.index, chunk.source
        )));
    }
    Ok(())
}

#[async_trait]
impl<E, S> Retriever for VectorIndexer<E, S>
where
    E: Embedder,
    S: VectorStore,
{
    async fn retrieve(&self, query: &str, k: usize) -> Result<Vec<RetrievedChunk>, ServiceError> {
        let query_vector = self.embedder.embed(query).await?;
        let hits = self.store.similarity_search(&query_vector, k).await?;
        tracing::debug!(collection = %self.store.collection(), k, hits = hits.len(), "retrieved chunks");
        Ok(hits)
    }

    async fn is_available(&self) -> Result<bool, ServiceError> {
        self.collection_exists().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::CharacterNgramEmbedder;
    use crate::stores::InMemoryStore;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingEmbedder {
        inner: CharacterNgramEmbedder,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Embedder for CountingEmbedder {
        fn dimensions(&self) -> usize {
            self.inner.dimensions
        }

        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ServiceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.embed_batch(texts).await
        }
    }

    struct FailingEmbedder;

    #[async_trait]
    impl Embedder for FailingEmbedder {
        fn dimensions(&self) -> usize {
            8
        }

        async fn embed_batch(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>, ServiceError> {
            Err(ServiceError::Unavailable {
                backend: "embeddings".to_string(),
            })
        }
    }

    fn chunk(text: &str, index: usize) -> Chunk {
        Chunk {
            text: text.to_string(),
            source: "tr8s.pdf".to_string(),
            index,
        }
    }

    #[tokio::test]
    async fn blank_chunk_fails_before_any_service_call() {
        let indexer = VectorIndexer::new(CountingEmbedder::default(), InMemoryStore::new("manuals"));

        let error = indexer
            .ingest(&[chunk("Tempo", 0), chunk("   ", 1)])
            .await
            .expect_err("blank chunk is a contract violation");

        assert!(matches!(error, ServiceError::ContractViolation(_)));
        assert_eq!(indexer.embedder.calls.load(Ordering::SeqCst), 0);
        assert!(indexer.store().is_empty());
    }

    #[tokio::test]
    async fn repeated_ingest_appends_records() -> Result<(), ServiceError> {
        let indexer = VectorIndexer::new(CountingEmbedder::default(), InMemoryStore::new("manuals"));
        let chunks = [chunk("Roland TR-8S manual", 0)];

        assert_eq!(indexer.ingest(&chunks).await?, 1);
        assert_eq!(indexer.ingest(&chunks).await?, 1);

        assert_eq!(indexer.store().len(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn retrieval_returns_most_similar_first() -> Result<(), ServiceError> {
        let indexer = VectorIndexer::new(CountingEmbedder::default(), InMemoryStore::new("manuals"));
        indexer
            .ingest(&[
                chunk("Warranty terms and conditions", 0),
                chunk("Adjust the tempo with the TEMPO knob", 1),
                chunk("Connect headphones to the PHONES jack", 2),
            ])
            .await?;

        let hits = indexer.retrieve("How do I adjust the tempo?", 1).await?;

        assert_eq!(hits.len(), 1);
        assert!(hits[0].text.contains("TEMPO knob"));
        Ok(())
    }

    #[tokio::test]
    async fn embedding_failure_propagates() {
        let indexer = VectorIndexer::new(FailingEmbedder, InMemoryStore::new("manuals"));

        let ingest = indexer.ingest(&[chunk("Tempo", 0)]).await;
        let retrieve = indexer.retrieve("tempo", 4).await;

        assert!(matches!(ingest, Err(ServiceError::Unavailable { .. })));
        assert!(matches!(retrieve, Err(ServiceError::Unavailable { .. })));
        assert!(indexer.store().is_empty());
    }

    #[tokio::test]
    async fn availability_tracks_the_collection() -> Result<(), ServiceError> {
        let indexer = VectorIndexer::new(CountingEmbedder::default(), InMemoryStore::new("manuals"));
        assert!(!indexer.is_available().await?);

        indexer.prepare().await?;
        indexer.ingest(&[chunk("Roland TR-8S manual", 0)]).await?;

        assert!(indexer.is_available().await?);
        assert_eq!(indexer.embedder.calls.load(Ordering::SeqCst), 1);
        Ok(())
    }

    #[tokio::test]
    async fn empty_input_is_a_no_op() -> Result<(), ServiceError> {
        let indexer = VectorIndexer::new(CountingEmbedder::default(), InMemoryStore::new("manuals"));
        assert_eq!(indexer.ingest(&[]).await?, 0);
        assert_eq!(indexer.embedder.calls.load(Ordering::SeqCst), 0);
        Ok(())
    }
}
