use std::env;

use anyhow::Result;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, EnvFilter};

const DEFAULT_FILTER: &str = "warn";

/// Installs the global subscriber. Logs go to stderr unless
/// `GENTABLE_LOG_DIR` is set, in which case they go to a daily file there.
/// Keep the returned guard alive until exit so buffered lines are flushed.
pub fn init() -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_env("GENTABLE_LOG")
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    match env::var("GENTABLE_LOG_DIR").ok().filter(|d| !d.trim().is_empty()) {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "gentable.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(writer)
                .try_init()
                .map_err(|e| anyhow::anyhow!("init logging: {}", e))?;
            Ok(Some(guard))
        }
        None => {
            fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .try_init()
                .map_err(|e| anyhow::anyhow!("init logging: {}", e))?;
            Ok(None)
        }
    }
}
