//! provides logging helpers

use std::path::Path;

use anyhow::Context;
use anyhow::Result;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::RollingFileAppender;
use tracing_appender::rolling::Rotation;
use tracing_subscriber::filter::{self};
use tracing_subscriber::fmt::layer;
use tracing_subscriber::prelude::*;
use tracing_subscriber::registry;

/// initiate the global tracing subscriber
///
/// Events always go to stderr. When `log_file` is set they are also written
/// to a daily rotated file next to it; the returned guard must be held for
/// the lifetime of the process so buffered lines get flushed.
pub fn init(log_file: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let env_filter = filter::EnvFilter::builder()
        .with_default_directive(filter::LevelFilter::INFO.into())
        .from_env_lossy();

    let stderr_layer = layer().with_writer(std::io::stderr).with_target(true);

    let (file_layer, guard) = match log_file {
        Some(log_file) => {
            let (writer, guard) = tracing_appender::non_blocking(rolling_appender(log_file)?);
            let file_layer = layer()
                .with_writer(writer)
                .with_target(true)
                .with_ansi(false);
            (Some(file_layer), Some(guard))
        }
        None => (None, None),
    };

    registry()
        .with(env_filter)
        .with(stderr_layer)
        .with(file_layer)
        .try_init()
        .context("failed to install global tracing subscriber")?;

    Ok(guard)
}

fn rolling_appender(log_file: &Path) -> Result<RollingFileAppender> {
    let dir = log_file
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    let prefix = log_file
        .file_name()
        .and_then(|name| name.to_str())
        .with_context(|| format!("invalid log file name: {}", log_file.display()))?;

    RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(prefix)
        .max_log_files(3)
        .build(dir)
        .with_context(|| format!("failed to create rolling file appender in {}", dir.display()))
}
