//! Tracing configuration and log routing.
//!
//! Logs go to stdout using a compact formatter and, unless disabled, to a file. The file target
//! is chosen by `MMRAG_LOG_FILE`:
//!
//! - unset: daily-rolling files under `logs/mmrag.log.<date>`,
//! - `off` / `none`: stdout only,
//! - any other value: append to that path.
//!
//! Ingestion issues one model call per fragment, so the file layer uses a non-blocking writer.
use std::path::Path;
use std::sync::OnceLock;

use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

static LOG_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// Where file logs should be written.
#[derive(Debug, Clone, PartialEq, Eq)]
enum FileTarget {
    Disabled,
    Rolling,
    Append(String),
}

impl FileTarget {
    fn from_env_value(value: Option<String>) -> Self {
        match value.as_deref().map(str::trim) {
            None | Some("") => Self::Rolling,
            Some(raw) if raw.eq_ignore_ascii_case("off") || raw.eq_ignore_ascii_case("none") => {
                Self::Disabled
            }
            Some(raw) => Self::Append(raw.to_string()),
        }
    }
}

/// Configure tracing subscribers for stdout and file logging.
///
/// `RUST_LOG` wins when set; otherwise `default_directive` (e.g. `info`, `debug`) applies.
pub fn init_tracing(default_directive: &str) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive));
    let stdout_layer = fmt::layer().with_target(false).compact();

    let registry = tracing_subscriber::registry()
        .with(env_filter)
        .with(stdout_layer);

    let target = FileTarget::from_env_value(std::env::var("MMRAG_LOG_FILE").ok());
    if let Some(writer) = configure_file_writer(&target) {
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

fn configure_file_writer(target: &FileTarget) -> Option<NonBlocking> {
    let (non_blocking, guard) = match target {
        FileTarget::Disabled => return None,
        FileTarget::Append(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(Path::new(path))
                .map_err(|err| eprintln!("Failed to open log file {path}: {err}"))
                .ok()?;
            tracing_appender::non_blocking(file)
        }
        FileTarget::Rolling => {
            if let Err(err) = std::fs::create_dir_all("logs") {
                eprintln!("Failed to create logs directory: {err}");
                return None;
            }
            tracing_appender::non_blocking(tracing_appender::rolling::daily("logs", "mmrag.log"))
        }
    };
    let _ = LOG_GUARD.set(guard);
    Some(non_blocking)
}
