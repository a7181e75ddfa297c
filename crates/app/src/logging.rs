//! Tracing setup for the CLI.
//!
//! Logs go to stderr and to a file; stdout is left to command output and the
//! chat prompt. `MANUAL_CHAT_LOG_FILE` picks the file;
//! otherwise `manual-chat.log` in the working directory is appended to.
use std::io;
use std::sync::OnceLock;

use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const DEFAULT_LOG_FILE: &str = "manual-chat.log";

static LOG_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// Respects `RUST_LOG` (defaults to `info`). The file layer is skipped when
/// the log file cannot be opened.
pub fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let console_layer = fmt::layer()
        .with_writer(console_writer)
        .with_target(false)
        .compact();

    let registry = tracing_subscriber::registry().with(env_filter).with(console_layer);

    if let Some(writer) = configure_file_writer() {
        let file_layer = fmt::layer()
            .with_writer(writer)
            .with_target(true)
            .with_ansi(false)
            .compact();

        registry.with(file_layer).init();
    } else {
        registry.init();
    }
}

fn console_writer() -> io::Stderr {
    io::stderr()
}

fn configure_file_writer() -> Option<NonBlocking> {
    let path = std::env::var("MANUAL_CHAT_LOG_FILE").unwrap_or_else(|_| DEFAULT_LOG_FILE.to_string());
    match std::fs::OpenOptions::new().create(true).append(true).open(&path) {
        Ok(file) => {
            let (non_blocking, guard) = tracing_appender::non_blocking(file);
            let _ = LOG_GUARD.set(guard);
            Some(non_blocking)
        }
        Err(err) => {
            eprintln!("Failed to open log file {path}: {err}");
            None
        }
    }
}
