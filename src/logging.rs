//! Logging setup with journald support on Linux.
//!
//! Uses systemd's journal when it is reachable and falls back to a daily
//! rolling file in the data directory otherwise.

use anyhow::Result;
use std::path::PathBuf;
use std::sync::OnceLock;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Environment variable holding the filter directive.
pub const LOG_ENV: &str = "SNAPCULL_LOG";

static GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// Default directory for file logs.
pub fn default_log_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("snapcull")
        .join("logs")
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Initialize the logging system. Call once at startup.
///
/// `SNAPCULL_LOG` takes any `EnvFilter` directive, e.g. `debug` or
/// `snapcull::embedding=trace,info`.
pub fn init(log_dir: Option<PathBuf>) -> Result<()> {
    #[cfg(target_os = "linux")]
    {
        if let Ok(journald_layer) = tracing_journald::layer() {
            tracing_subscriber::registry()
                .with(env_filter())
                .with(journald_layer)
                .try_init()?;

            tracing::info!("Logging initialized with journald backend");
            return Ok(());
        }
    }

    let log_dir = log_dir.unwrap_or_else(default_log_dir);
    std::fs::create_dir_all(&log_dir)?;

    let file_appender = tracing_appender::rolling::daily(&log_dir, "snapcull.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    let _ = GUARD.set(guard);

    tracing_subscriber::registry()
        .with(env_filter())
        .with(fmt::layer().with_writer(non_blocking).with_ansi(false))
        .try_init()?;

    tracing::info!(dir = ?log_dir, "Logging initialized with file backend");
    Ok(())
}
