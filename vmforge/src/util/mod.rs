//! Logging setup and external process helpers.

pub mod process;

use std::sync::OnceLock;

use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};
use vmforge_shared::{ConfigError, VmforgeResult};

use crate::runtime::layout::FilesystemLayout;

/// Log file name inside `<home>/logs`.
const LOG_FILE_NAME: &str = "vmforge.log";

/// Keeps the non-blocking writer thread alive for the life of the process.
static LOG_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// Register a non-blocking writer as the global tracing subscriber.
///
/// Returns false if a global subscriber was already installed.
pub fn register_to_tracing(non_blocking: NonBlocking, env_filter: EnvFilter) -> bool {
    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_target(true),
        )
        .try_init()
        .is_ok()
}

/// Initialize file logging under the layout's logs directory.
///
/// Uses `RUST_LOG` when set, `info` otherwise. Logs rotate daily.
/// Calling this more than once is harmless.
pub fn init_logging_for(layout: &FilesystemLayout) -> VmforgeResult<()> {
    if LOG_GUARD.get().is_some() {
        return Ok(());
    }

    let logs_dir = layout.logs_dir();
    std::fs::create_dir_all(&logs_dir).map_err(|e| {
        ConfigError::InvalidOptions(format!(
            "cannot create logs directory {}: {}",
            logs_dir.display(),
            e
        ))
    })?;

    let file_appender = tracing_appender::rolling::daily(&logs_dir, LOG_FILE_NAME);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    if register_to_tracing(non_blocking, env_filter) {
        let _ = LOG_GUARD.set(guard);
        tracing::debug!(logs_dir = %logs_dir.display(), "File logging initialized");
    }

    Ok(())
}
