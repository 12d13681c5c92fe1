//! Centralized Logging Infrastructure
//!
//! Provides structured logging with:
//! - Trace IDs for call correlation
//! - Colored console output
//! - Optional file logging with daily rotation

mod trace_context;

pub use trace_context::{generate_trace_id, CallSpan, TraceContext};

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use sessionmux_core::branding;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Default log directory (`<data dir>/sessionmux/logs`)
pub fn default_logs_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(branding::LOG_PREFIX)
        .join("logs")
}

/// Default filter when `RUST_LOG` is not set
fn default_filter() -> EnvFilter {
    // Crate names use underscores in tracing targets
    EnvFilter::new("info,sessionmux_core=debug,sessionmux_gateway=debug")
}

/// Install the global tracing subscriber.
///
/// Console output is always on. When `logs_dir` is given a daily-rotated
/// file layer is added and its guard returned; keep the guard alive for the
/// lifetime of the program or buffered lines are lost.
pub fn init_tracing(logs_dir: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter());

    let console_layer = fmt::layer()
        .with_ansi(true)
        .compact()
        .with_thread_names(false)
        .with_line_number(false)
        .with_file(false)
        .with_target(true);

    let Some(dir) = logs_dir else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(console_layer)
            .try_init()
            .context("tracing subscriber already installed")?;
        return Ok(None);
    };

    std::fs::create_dir_all(dir)
        .with_context(|| format!("failed to create logs directory {}", dir.display()))?;

    // Files like: sessionmux.2026-01-22.log
    let file_appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(branding::LOG_PREFIX)
        .filename_suffix("log")
        .build(dir)
        .context("failed to create log file appender")?;
    let (non_blocking_file, guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = fmt::layer()
        .with_writer(non_blocking_file)
        .with_ansi(false)
        .with_thread_ids(true)
        .with_line_number(true)
        .with_file(true)
        .with_target(true);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .context("tracing subscriber already installed")?;

    Ok(Some(guard))
}
