mod logging;

use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use manual_chat_core::http::build_client;
use manual_chat_core::{
    index_prepared, load_documents, AskOutcome, CharacterNgramEmbedder, ChatMessage, Embedder,
    EmbeddingProvider, ExtractionMethod, Extractor, IngestPipeline, IngestionReport, LopdfReader,
    OpenAiChat, OpenAiEmbedder, PdftoppmRasterizer, PipelineConfig, QdrantStore, Role, SessionPhase,
    SessionStore, TesseractOcr, TextChunker, UsageLedger, VectorIndexer,
};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

type Index = VectorIndexer<Box<dyn Embedder>, QdrantStore>;
type Chat = UsageLedger<OpenAiChat>;
type Pipeline = IngestPipeline<LopdfReader, PdftoppmRasterizer, TesseractOcr>;

#[derive(Parser)]
#[command(name = "manual-chat", version, about = "Ask questions about PDF manuals")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Vector collection to use instead of VECTOR_STORE_COLLECTION.
    #[arg(long, global = true)]
    collection: Option<String>,
}

#[derive(Subcommand)]
enum Command {
    /// Extract, chunk and index PDF files or folders of PDFs.
    Ingest {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },
    /// Ask one question against an already populated collection.
    Ask {
        #[arg(long)]
        question: String,
    },
    /// Interactive session. Commands: `:ingest <path>`, `:clear`, `:quit`.
    Chat {
        /// PDFs to ingest before the first question.
        #[arg(long = "pdf")]
        pdfs: Vec<PathBuf>,
        /// Bind the existing collection without ingesting anything.
        #[arg(long, default_value_t = false)]
        attach: bool,
    },
}

/// Everything ingestion needs. The chat client is built separately because
/// only `ask` and `chat` talk to the chat service.
struct Runtime {
    pipeline: Pipeline,
    index: Arc<Index>,
    top_k: usize,
}

impl Runtime {
    fn from_config(config: &PipelineConfig) -> anyhow::Result<Self> {
        let client = build_client(config.service_timeout)?;

        let embedder: Box<dyn Embedder> = match config.embedding_provider {
            EmbeddingProvider::OpenAi => Box::new(OpenAiEmbedder::new(
                client.clone(),
                &config.openai,
                config.openai_api_key()?,
            )),
            EmbeddingProvider::Local => Box::new(CharacterNgramEmbedder::default()),
        };
        let store = QdrantStore::new(client, &config.vector_store)?;

        Ok(Self {
            pipeline: IngestPipeline::new(Extractor::from_config(&config.ocr), TextChunker::new(config.chunking)?),
            index: Arc::new(VectorIndexer::new(embedder, store)),
            top_k: config.top_k,
        })
    }

    fn chat(config: &PipelineConfig) -> anyhow::Result<Arc<Chat>> {
        let api_key = config.openai_api_key()?;
        let client = build_client(config.service_timeout)?;
        Ok(Arc::new(UsageLedger::new(OpenAiChat::new(client, &config.openai, api_key))))
    }

    fn session(&self, chat: &Arc<Chat>) -> SessionStore<Index, Chat> {
        SessionStore::new(Arc::clone(chat), self.top_k)
    }

    async fn ingest(&self, paths: &[PathBuf]) -> anyhow::Result<IngestionReport> {
        let documents = load_documents(paths)?;
        info!(documents = documents.len(), collection = self.index.collection(), "ingesting");

        // Extraction shells out to pdftoppm/tesseract and blocks.
        let prepared = tokio::task::block_in_place(|| self.pipeline.prepare(&documents));
        self.index.prepare().await?;
        let report = index_prepared(prepared, &*self.index).await?;

        print_report(&report);
        Ok(report)
    }
}

fn print_report(report: &IngestionReport) {
    for outcome in &report.outcomes {
        let method = match &outcome.method {
            ExtractionMethod::Empty => "empty".to_string(),
            ExtractionMethod::Structural => "text layer".to_string(),
            ExtractionMethod::Ocr => "ocr".to_string(),
            ExtractionMethod::Failed(reason) => format!("failed ({reason})"),
        };
        println!(
            "{} [sha256 {}]: {} page(s), {} chars, {}",
            outcome.document,
            &outcome.checksum[..12.min(outcome.checksum.len())],
            outcome.page_count,
            outcome.text.chars().count(),
            method
        );
    }
    println!(
        "{} chunks, {} records indexed at {}",
        report.chunk_count,
        report.record_count,
        Utc::now().to_rfc3339()
    );
}

fn print_history(history: &[ChatMessage]) {
    for message in history {
        let speaker = match message.role {
            Role::User => "you",
            Role::Assistant => "manual",
            Role::System => continue,
        };
        println!("{speaker}> {}", message.content);
    }
}

async fn ask_and_print(session: &mut SessionStore<Index, Chat>, question: &str, full_history: bool) -> anyhow::Result<()> {
    match session.ask(question).await? {
        AskOutcome::Answered { answer, sources, history } => {
            if full_history {
                print_history(&history);
            } else {
                println!("{answer}");
            }
            for source in sources {
                println!("  [{} score={:.3}]", source.source, source.score);
            }
        }
        AskOutcome::Warning(warning) => println!("{warning}"),
    }
    Ok(())
}

async fn run_chat(runtime: &Runtime, chat: Arc<Chat>, pdfs: Vec<PathBuf>, attach: bool) -> anyhow::Result<()> {
    let mut session = runtime.session(&chat);
    if !pdfs.is_empty() {
        runtime.ingest(&pdfs).await?;
        session.bind_index(Arc::clone(&runtime.index));
    } else if attach && !session.attach(Arc::clone(&runtime.index)).await? {
        println!("Collection {} is empty; use :ingest <path> first.", runtime.index.collection());
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();

        if line == ":quit" {
            break;
        } else if line == ":clear" {
            session.clear();
            println!("conversation cleared");
        } else if let Some(path) = line.strip_prefix(":ingest ") {
            match runtime.ingest(&[PathBuf::from(path.trim())]).await {
                Ok(_) => {
                    if session.phase() == SessionPhase::Uninitialized {
                        session.bind_index(Arc::clone(&runtime.index));
                    }
                }
                Err(error) => eprintln!("ingestion failed: {error:#}"),
            }
        } else if let Err(error) = ask_and_print(&mut session, line, true).await {
            eprintln!("request failed: {error:#}");
        }
    }

    let usage = chat.total();
    info!(
        calls = chat.calls(),
        total_tokens = usage.total_tokens,
        engine_bindings = session.engine_bindings(),
        "chat session finished"
    );
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    logging::init_tracing();

    let cli = Cli::parse();
    let mut config = PipelineConfig::from_env().context("loading configuration")?;
    if let Some(collection) = cli.collection {
        config.vector_store.collection = collection;
    }

    info!(
        version = env!("CARGO_PKG_VERSION"),
        started_at = %Utc::now().to_rfc3339(),
        collection = %config.vector_store.collection,
        "manual-chat boot"
    );
    let runtime = Runtime::from_config(&config)?;

    match cli.command {
        Command::Ingest { paths } => {
            let report = runtime.ingest(&paths).await?;
            let failed = report
                .outcomes
                .iter()
                .filter(|outcome| matches!(outcome.method, ExtractionMethod::Failed(_)))
                .count();
            if failed > 0 {
                warn!(failed, "some documents contributed no text");
            }
        }
        Command::Ask { question } => {
            let chat = Runtime::chat(&config)?;
            let mut session = runtime.session(&chat);
            session.attach(Arc::clone(&runtime.index)).await?;
            ask_and_print(&mut session, &question, false).await?;
        }
        Command::Chat { pdfs, attach } => {
            let chat = Runtime::chat(&config)?;
            run_chat(&runtime, chat, pdfs, attach).await?;
        }
    }

    Ok(())
}
