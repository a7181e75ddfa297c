use thiserror::Error;

/// Faults raised while turning one PDF into text. These never leave the
/// extractor; they are folded into an `ExtractionOutcome`.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("pdf parse error: {0}")]
    PdfParse(String),

    #[error("rasterization failed: {0}")]
    Rasterize(String),

    #[error("ocr failed: {0}")]
    OcrFailed(String),

    #[error("regex error: {0}")]
    RegexError(#[from] regex::Error),
}

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("path has no file name: {0}")]
    MissingFileName(String),

    #[error("invalid chunking config: {0}")]
    InvalidChunkConfig(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

/// Failures of the embedding, vector-store and chat services. Callers get
/// these unmodified; nothing in the pipeline retries or swallows them.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("invalid response from {backend}: {details}")]
    BackendResponse { backend: String, details: String },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("service request failed: {0}")]
    Request(String),

    #[error("service unavailable: {backend} did not answer in time")]
    Unavailable { backend: String },

    #[error("contract violation: {0}")]
    ContractViolation(String),
}

impl ServiceError {
    /// Maps a transport error, turning timeouts into the uniform
    /// `Unavailable` failure.
    pub fn from_transport(backend: &str, error: reqwest::Error) -> Self {
        if error.is_timeout() {
            Self::Unavailable {
                backend: backend.to_string(),
            }
        } else {
            Self::Http(error)
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing environment variable: {0}")]
    MissingVariable(String),

    #[error("invalid value for environment variable {name}: {details}")]
    InvalidValue { name: String, details: String },
}

pub type Result<T, E = IngestError> = std::result::Result<T, E>;
