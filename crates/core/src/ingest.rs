use crate::chunking::TextChunker;
use crate::embeddings::Embedder;
use crate::error::{IngestError, ServiceError};
use crate::extractor::{Extractor, OcrEngine, PdfReader, Rasterizer};
use crate::indexer::VectorIndexer;
use crate::models::{BatchExtraction, Chunk, Document, ExtractionOutcome};
use crate::traits::VectorStore;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

pub fn discover_pdf_files(folder: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();

    for entry in WalkDir::new(folder)
        .into_iter()
        .filter_map(|item| item.ok())
    {
        if !entry.file_type().is_file() {
            continue;
        }

        let is_pdf = entry
            .path()
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"));

        if is_pdf {
            files.push(entry.path().to_path_buf());
        }
    }

    files.sort_unstable();
    files
}

/// Reads every path into a `Document`; a folder expands to the PDFs under it.
pub fn load_documents(paths: &[PathBuf]) -> Result<Vec<Document>, IngestError> {
    let mut files = Vec::new();
    for path in paths {
        if path.is_dir() {
            files.extend(discover_pdf_files(path));
        } else {
            files.push(path.clone());
        }
    }

    if files.is_empty() {
        return Err(IngestError::InvalidArgument("no pdf files to ingest".to_string()));
    }

    files.iter().map(|path| Document::from_path(path)).collect()
}

pub struct PreparedBatch {
    pub extraction: BatchExtraction,
    pub chunks: Vec<Chunk>,
}

#[derive(Debug, Clone)]
pub struct IngestionReport {
    pub outcomes: Vec<ExtractionOutcome>,
    pub chunk_count: usize,
    pub record_count: usize,
}

/// Extract, chunk and index a batch of uploads, one document at a time.
pub struct IngestPipeline<R, S, O> {
    extractor: Extractor<R, S, O>,
    chunker: TextChunker,
}

impl<R, S, O> IngestPipeline<R, S, O>
where
    R: PdfReader,
    S: Rasterizer,
    O: OcrEngine,
{
    pub fn new(extractor: Extractor<R, S, O>, chunker: TextChunker) -> Self {
        Self { extractor, chunker }
    }

    /// The blocking half: extraction (with OCR where needed) and chunking.
    /// Each document is chunked on its own so chunks keep their source.
    pub fn prepare(&self, documents: &[Document]) -> PreparedBatch {
        let extraction = self.extractor.extract_batch(documents);

        let chunks = extraction
            .outcomes
            .iter()
            .filter(|outcome| !outcome.text.trim().is_empty())
            .flat_map(|outcome| self.chunker.chunk(&outcome.document, &outcome.text))
            .collect::<Vec<_>>();

        tracing::info!(
            documents = documents.len(),
            ocr_documents = extraction.outcomes.iter().filter(|outcome| outcome.used_ocr()).count(),
            chunks = chunks.len(),
            "prepared batch"
        );

        PreparedBatch { extraction, chunks }
    }

    /// Runs `prepare` inline, then hands the chunks to the indexer. Index
    /// failures propagate; extraction faults were already absorbed per document.
    pub async fn ingest<E, St>(
        &self,
        documents: &[Document],
        indexer: &VectorIndexer<E, St>,
    ) -> Result<IngestionReport, ServiceError>
    where
        E: Embedder,
        St: VectorStore,
    {
        let prepared = self.prepare(documents);
        index_prepared(prepared, indexer).await
    }
}

pub async fn index_prepared<E, St>(
    prepared: PreparedBatch,
    indexer: &VectorIndexer<E, St>,
) -> Result<IngestionReport, ServiceError>
where
    E: Embedder,
    St: VectorStore,
{
    let record_count = indexer.ingest(&prepared.chunks).await?;
    Ok(IngestionReport {
        outcomes: prepared.extraction.outcomes,
        chunk_count: prepared.chunks.len(),
        record_count,
    })
}
