use crate::chunking::ChunkingConfig;
use crate::error::ConfigError;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_CHUNK_SIZE: usize = 1_000;
pub const DEFAULT_CHUNK_OVERLAP: usize = 200;
pub const DEFAULT_TOP_K: usize = 4;
pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com";

/// Which backend turns text into vectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbeddingProvider {
    OpenAi,
    /// Deterministic character n-gram hashing, no network.
    Local,
}

impl std::str::FromStr for EmbeddingProvider {
    type Err = ();

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "openai" => Ok(Self::OpenAi),
            "local" => Ok(Self::Local),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct OcrConfig {
    pub tesseract_path: PathBuf,
    pub pdftoppm_path: PathBuf,
    pub dpi: u32,
    pub language: String,
}

#[derive(Debug, Clone)]
pub struct VectorStoreConfig {
    pub url: String,
    pub collection: String,
    pub api_key: Option<String>,
}

#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub embedding_model: String,
    pub embedding_dimension: usize,
    pub chat_model: String,
}

/// Everything the pipeline needs, read once at process start.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub ocr: OcrConfig,
    pub vector_store: VectorStoreConfig,
    pub openai: OpenAiConfig,
    pub embedding_provider: EmbeddingProvider,
    pub chunking: ChunkingConfig,
    pub top_k: usize,
    pub service_timeout: Option<Duration>,
}

impl PipelineConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary key lookup. Blank values
    /// count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        let required = |key: &str| get(key).ok_or_else(|| ConfigError::MissingVariable(key.to_string()));

        let embedding_provider = match get("EMBEDDING_PROVIDER") {
            Some(value) => value.parse().map_err(|()| ConfigError::InvalidValue {
                name: "EMBEDDING_PROVIDER".to_string(),
                details: format!("expected `openai` or `local`, got `{value}`"),
            })?,
            None => EmbeddingProvider::OpenAi,
        };

        let chunking = ChunkingConfig {
            max_chars: parse_or(get("CHUNK_SIZE"), "CHUNK_SIZE", DEFAULT_CHUNK_SIZE)?,
            overlap_chars: parse_or(get("CHUNK_OVERLAP"), "CHUNK_OVERLAP", DEFAULT_CHUNK_OVERLAP)?,
        };
        chunking.validate().map_err(|error| ConfigError::InvalidValue {
            name: "CHUNK_SIZE/CHUNK_OVERLAP".to_string(),
            details: error.to_string(),
        })?;

        let top_k = parse_or(get("RETRIEVAL_TOP_K"), "RETRIEVAL_TOP_K", DEFAULT_TOP_K)?;
        if top_k == 0 {
            return Err(ConfigError::InvalidValue {
                name: "RETRIEVAL_TOP_K".to_string(),
                details: "must be greater than zero".to_string(),
            });
        }

        let service_timeout = get("SERVICE_TIMEOUT_SECS")
            .map(|value| parse_value::<u64>(&value, "SERVICE_TIMEOUT_SECS"))
            .transpose()?
            .map(Duration::from_secs);

        Ok(Self {
            ocr: OcrConfig {
                tesseract_path: PathBuf::from(get("TESSERACT_PATH").unwrap_or_else(|| "tesseract".to_string())),
                pdftoppm_path: PathBuf::from(get("PDFTOPPM_PATH").unwrap_or_else(|| "pdftoppm".to_string())),
                dpi: parse_or(get("OCR_DPI"), "OCR_DPI", 300)?,
                language: get("OCR_LANGUAGE").unwrap_or_else(|| "eng".to_string()),
            },
            vector_store: VectorStoreConfig {
                url: required("VECTOR_STORE_URL")?,
                collection: required("VECTOR_STORE_COLLECTION")?,
                api_key: get("VECTOR_STORE_API_KEY"),
            },
            openai: OpenAiConfig {
                base_url: get("OPENAI_BASE_URL").unwrap_or_else(|| DEFAULT_OPENAI_BASE_URL.to_string()),
                api_key: get("OPENAI_API_KEY"),
                embedding_model: get("EMBEDDING_MODEL").unwrap_or_else(|| "text-embedding-3-large".to_string()),
                embedding_dimension: parse_or(get("EMBEDDING_DIMENSION"), "EMBEDDING_DIMENSION", 3_072)?,
                chat_model: get("CHAT_MODEL").unwrap_or_else(|| "gpt-4".to_string()),
            },
            embedding_provider,
            chunking,
            top_k,
            service_timeout,
        })
    }

    /// The API key, or an error naming the variable when it is absent.
    pub fn openai_api_key(&self) -> Result<&str, ConfigError> {
        self.openai
            .api_key
            .as_deref()
            .ok_or_else(|| ConfigError::MissingVariable("OPENAI_API_KEY".to_string()))
    }
}

fn parse_or<T: std::str::FromStr>(value: Option<String>, name: &str, default: T) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match value {
        Some(value) => parse_value(&value, name),
        None => Ok(default),
    }
}

fn parse_value<T: std::str::FromStr>(value: &str, name: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    value.parse().map_err(|error: T::Err| ConfigError::InvalidValue {
        name: name.to_string(),
        details: error.to_string(),
    })
}
