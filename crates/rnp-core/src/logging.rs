//! Logging configuration using tracing

use std::path::PathBuf;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::error::Result;

const LOG_FILE_NAME: &str = "rnpreview.log";

/// Filter used when `RNP_LOG` is unset or invalid
const DEFAULT_FILTER: &str =
    "rn_preview=info,rnp_core=info,rnp_bridge=info,rnp_daemon=info,rnp_app=info,warn";

/// Initialize the logging subsystem
///
/// Logs are written to `~/.local/share/rn-preview/logs/` (or the platform's
/// local data directory). stdout is never used: in the default mode it
/// carries the bridge channel.
///
/// Log level is controlled by the `RNP_LOG` environment variable.
///
/// # Examples
/// ```bash
/// RNP_LOG=debug rnpreview
/// RNP_LOG=rnp_bridge=trace,info rnpreview
/// ```
pub fn init() -> Result<()> {
    let log_dir = get_log_directory()?;
    std::fs::create_dir_all(&log_dir)?;

    let file_appender = RollingFileAppender::new(Rotation::DAILY, &log_dir, LOG_FILE_NAME);

    let env_filter = EnvFilter::try_from_env("RNP_LOG")
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_writer(file_appender)
                .with_ansi(false)
                .with_target(true)
                .with_thread_ids(false)
                .with_file(true)
                .with_line_number(true)
                .with_timer(fmt::time::ChronoLocal::new(
                    "%Y-%m-%d %H:%M:%S%.3f".to_string(),
                )),
        )
        .init();

    tracing::info!("═══════════════════════════════════════════════════════");
    tracing::info!("React Native Preview controller starting");
    tracing::info!("Log directory: {}", log_dir.display());
    tracing::info!("═══════════════════════════════════════════════════════");

    Ok(())
}

/// Get the log directory path
fn get_log_directory() -> Result<PathBuf> {
    let base = dirs::data_local_dir().unwrap_or_else(|| PathBuf::from("."));
    Ok(base.join("rn-preview").join("logs"))
}
