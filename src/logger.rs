use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing_appender::{
    non_blocking::WorkerGuard,
    rolling::{RollingFileAppender, Rotation},
};
use tracing_subscriber::{EnvFilter, Registry, fmt, prelude::*};

/// Installs the global subscriber: `log_level` is an `EnvFilter` directive
/// (e.g. `info` or `chatflow=debug`), `RUST_LOG` wins when set. Logs go to
/// stdout and to a daily rolling file at `root/log_file`.
///
/// Keep the returned guard alive for as long as logs should be flushed.
pub fn init_tracing(root: &Path, log_file: &str, log_level: &str) -> Result<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level))
        .with_context(|| format!("invalid log level `{}`", log_level))?;

    let path = root.join(log_file);
    let (dir, file_name) = split_log_path(&path)?;
    std::fs::create_dir_all(&dir).with_context(|| format!("cannot create log directory {}", dir.display()))?;

    let appender = RollingFileAppender::new(Rotation::DAILY, &dir, &file_name);
    let (writer, guard) = tracing_appender::non_blocking(appender);

    let stdout_layer = fmt::layer().with_target(false);
    let file_layer = fmt::layer().with_writer(writer).with_ansi(false);

    Registry::default()
        .with(filter)
        .with(stdout_layer)
        .with(file_layer)
        .try_init()
        .context("a global tracing subscriber is already installed")?;

    Ok(guard)
}

fn split_log_path(path: &Path) -> Result<(PathBuf, String)> {
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .with_context(|| format!("log file path {} has no file name", path.display()))?
        .to_string();
    let dir = path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    Ok((dir, file_name))
}
