pub mod chat;
pub mod chunking;
pub mod config;
pub mod conversation;
pub mod embeddings;
pub mod error;
pub mod extractor;
pub mod http;
pub mod indexer;
pub mod ingest;
pub mod models;
pub mod session;
pub mod stores;
pub mod traits;

pub use chat::{ChatService, OpenAiChat, UsageLedger};
pub use chunking::{ChunkingConfig, TextChunker};
pub use config::{EmbeddingProvider, PipelineConfig};
pub use conversation::{build_messages, ConversationEngine, EngineReply};
pub use embeddings::{CharacterNgramEmbedder, Embedder, OpenAiEmbedder, DEFAULT_EMBEDDING_DIMENSIONS};
pub use error::{ConfigError, ExtractError, IngestError, ServiceError};
pub use extractor::{
    Extractor, LopdfReader, OcrEngine, PdfReader, PdftoppmRasterizer, RasterPage, RasterizedDocument,
    Rasterizer, TesseractOcr,
};
pub use indexer::VectorIndexer;
pub use ingest::{
    discover_pdf_files, index_prepared, load_documents, IngestPipeline, IngestionReport, PreparedBatch,
};
pub use models::{
    BatchExtraction, ChatCompletion, ChatMessage, Chunk, ConversationHistory, Document, EmbeddingRecord,
    ExtractionMethod, ExtractionOutcome, RetrievedChunk, Role, TokenUsage,
};
pub use session::{AskOutcome, SessionPhase, SessionStore, SessionWarning};
pub use stores::{InMemoryStore, QdrantStore};
pub use traits::{Retriever, VectorStore};
