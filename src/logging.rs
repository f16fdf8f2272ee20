//! Tracing setup
//!
//! Logs go to the terminal and to an append-only file under
//! `~/.attendance-console/logs`. Terminal output goes to stderr so it does not
//! interleave with the console's own stdout.

use std::path::{Path, PathBuf};
use tracing_subscriber::prelude::*;

/// Log file name inside the log directory
pub const LOG_FILE_NAME: &str = "attendance-console.log";

/// Format timestamps using the system's local time via chrono
struct LocalTimer;

impl tracing_subscriber::fmt::time::FormatTime for LocalTimer {
    fn format_time(&self, w: &mut tracing_subscriber::fmt::format::Writer<'_>) -> std::fmt::Result {
        write!(w, "{}", chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f"))
    }
}

/// Default log directory (~/.attendance-console/logs)
pub fn default_log_dir() -> PathBuf {
    crate::config::get_config_dir().join("logs")
}

fn env_filter() -> tracing_subscriber::EnvFilter {
    tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"))
}

/// Install the global subscriber
///
/// Falls back to terminal-only logging when the log file cannot be opened.
/// Calling it twice is harmless; the second call is ignored.
pub fn init_logging(log_dir: &Path) {
    let _ = std::fs::create_dir_all(log_dir);
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_dir.join(LOG_FILE_NAME))
        .ok();

    let terminal_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_timer(LocalTimer);

    let result = if let Some(file) = log_file {
        let file_layer = tracing_subscriber::fmt::layer()
            .with_writer(std::sync::Mutex::new(file))
            .with_timer(LocalTimer)
            .with_ansi(false);
        tracing_subscriber::registry()
            .with(env_filter())
            .with(terminal_layer)
            .with(file_layer)
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(env_filter())
            .with(terminal_layer)
            .try_init()
    };

    if result.is_err() {
        tracing::debug!("Tracing subscriber already installed");
    }
}
