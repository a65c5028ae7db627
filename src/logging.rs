// src/logging.rs
//! Logging setup
//!
//! Console output plus an optional log file. `RUST_LOG` overrides the
//! configured level.

use std::{
    fs, io,
    path::{Path, PathBuf},
};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Keeps the file writer alive; dropping it flushes the log file
pub struct LoggingGuard {
    _file_guard: Option<WorkerGuard>,
}

/// Where log output goes
#[derive(Debug, Clone, Default)]
pub struct LogTargets {
    pub log_file: Option<PathBuf>,
    /// Off while the terminal display owns the screen
    pub console: bool,
}

/// Install the global tracing subscriber
pub fn init_logging(level: &str, targets: &LogTargets) -> io::Result<LoggingGuard> {
    let (file_layer, file_guard) = match &targets.log_file {
        Some(path) => {
            let (directory, file_name) = split_log_path(path)?;
            fs::create_dir_all(&directory)?;
            let appender = tracing_appender::rolling::never(directory, file_name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let console_layer = targets.console.then(|| {
        tracing_subscriber::fmt::layer()
            .with_writer(io::stdout)
            .with_target(false)
    });

    tracing_subscriber::registry()
        .with(env_filter(level))
        .with(file_layer)
        .with(console_layer)
        .try_init()
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;

    Ok(LoggingGuard {
        _file_guard: file_guard,
    })
}

fn env_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

fn split_log_path(path: &Path) -> io::Result<(PathBuf, PathBuf)> {
    let file_name = path.file_name().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("Log file path has no file name: {}", path.display()),
        )
    })?;
    let directory = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    Ok((directory, PathBuf::from(file_name)))
}
