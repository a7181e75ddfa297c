use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::Path;
use uuid::Uuid;

use crate::error::IngestError;

/// One uploaded PDF. Consumed once by the extractor and then dropped.
#[derive(Debug, Clone)]
pub struct Document {
    pub name: String,
    pub bytes: Vec<u8>,
}

impl Document {
    pub fn new(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            bytes,
        }
    }

    pub fn from_path(path: &Path) -> Result<Self, IngestError> {
        let name = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| IngestError::MissingFileName(path.display().to_string()))?;
        let bytes = std::fs::read(path)?;
        Ok(Self::new(name, bytes))
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Number of pages lopdf can see; 0 when the bytes do not parse.
    pub fn page_count(&self) -> usize {
        if self.bytes.is_empty() {
            return 0;
        }
        lopdf::Document::load_mem(&self.bytes)
            .map(|document| document.get_pages().len())
            .unwrap_or(0)
    }

    pub fn checksum(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(&self.bytes);
        format!("{:x}", hasher.finalize())
    }
}

/// How a document's text was obtained.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExtractionMethod {
    /// Zero-byte upload; nothing was attempted.
    Empty,
    Structural,
    Ocr,
    /// The OCR fallback itself failed; the document contributes no text.
    Failed(String),
}

#[derive(Debug, Clone)]
pub struct ExtractionOutcome {
    pub document: String,
    /// SHA-256 of the uploaded bytes, hex encoded.
    pub checksum: String,
    pub page_count: usize,
    pub text: String,
    pub method: ExtractionMethod,
}

impl ExtractionOutcome {
    pub fn used_ocr(&self) -> bool {
        matches!(self.method, ExtractionMethod::Ocr | ExtractionMethod::Failed(_))
    }
}

#[derive(Debug, Clone)]
pub struct BatchExtraction {
    pub outcomes: Vec<ExtractionOutcome>,
}

impl BatchExtraction {
    /// All document texts concatenated in upload order.
    pub fn text(&self) -> String {
        self.outcomes
            .iter()
            .map(|outcome| outcome.text.as_str())
            .collect::<String>()
    }

    pub fn failures(&self) -> impl Iterator<Item = &ExtractionOutcome> {
        self.outcomes
            .iter()
            .filter(|outcome| matches!(outcome.method, ExtractionMethod::Failed(_)))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub text: String,
    pub source: String,
    pub index: usize,
}

/// A chunk plus its vector, ready for upsert.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingRecord {
    pub id: Uuid,
    pub text: String,
    pub source: String,
    pub chunk_index: usize,
    pub vector: Vec<f32>,
    pub ingested_at: DateTime<Utc>,
}

impl EmbeddingRecord {
    pub fn new(chunk: &Chunk, vector: Vec<f32>) -> Self {
        Self {
            id: Uuid::new_v4(),
            text: chunk.text.clone(),
            source: chunk.source.clone(),
            chunk_index: chunk.index,
            vector,
            ingested_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievedChunk {
    pub text: String,
    pub source: String,
    pub score: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Append-only within a session. Even indices are user messages, the
/// following odd index is the paired reply.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConversationHistory {
    messages: Vec<ChatMessage>,
}

impl ConversationHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_turn(&mut self, question: impl Into<String>, answer: impl Into<String>) {
        self.messages.push(ChatMessage::user(question));
        self.messages.push(ChatMessage::assistant(answer));
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn turns(&self) -> usize {
        self.messages.len() / 2
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

impl TokenUsage {
    pub fn add(&mut self, other: TokenUsage) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
        self.total_tokens += other.total_tokens;
    }
}

#[derive(Debug, Clone)]
pub struct ChatCompletion {
    pub answer: String,
    pub usage: TokenUsage,
}
