//! In-process [`VectorStore`] with brute-force cosine search. Nothing is
//! persisted; useful for tests and for hosts that embed the pipeline.

use crate::models::{EmbeddingRecord, RetrievedChunk};
use crate::traits::VectorStore;
use crate::ServiceError;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

pub struct InMemoryStore {
    collection: String,
    records: RwLock<Vec<EmbeddingRecord>>,
    created: AtomicBool,
}

impl InMemoryStore {
    pub fn new(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            records: RwLock::new(Vec::new()),
            created: AtomicBool::new(false),
        }
    }

    pub fn len(&self) -> usize {
        self.records.read().map(|records| records.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn cosine_sim(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let mag_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let mag_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if mag_a < f32::EPSILON || mag_b < f32::EPSILON {
        0.0
    } else {
        dot / (mag_a * mag_b)
    }
}

fn poisoned() -> ServiceError {
    ServiceError::Request("in-memory store lock poisoned".to_string())
}

#[async_trait]
impl VectorStore for InMemoryStore {
    fn collection(&self) -> &str {
        &self.collection
    }

    async fn collection_exists(&self) -> Result<bool, ServiceError> {
        Ok(self.created.load(Ordering::SeqCst))
    }

    async fn ensure_collection(&self, _vector_size: usize) -> Result<(), ServiceError> {
        self.created.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn upsert(&self, records: &[EmbeddingRecord]) -> Result<(), ServiceError> {
        self.records.write().map_err(|_| poisoned())?.extend_from_slice(records);
        self.created.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn similarity_search(
        &self,
        query_vector: &[f32],
        k: usize,
    ) -> Result<Vec<RetrievedChunk>, ServiceError> {
        let records = self.records.read().map_err(|_| poisoned())?;
        let mut scored = records
            .iter()
            .map(|record| (cosine_sim(query_vector, &record.vector), record))
            .collect::<Vec<_>>();
        scored.sort_by(|left, right| right.0.total_cmp(&left.0));

        Ok(scored
            .into_iter()
            .take(k)
            .map(|(score, record)| RetrievedChunk {
                text: record.text.clone(),
                source: record.source.clone(),
                score: f64::from(score),
            })
            .collect())
    }
}
