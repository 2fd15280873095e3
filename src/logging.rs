//! Tracing setup for the `uvm-provision` binary.
//!
//! stderr always gets events filtered by `RUST_LOG` (default `warn`). With
//! `UVM_PROVISION_LOG=1` a plain-text copy also goes to
//! `uvm-provision.log` under [`ShimPaths::logs`] and the default filter is
//! raised to `info`.

use std::path::PathBuf;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::paths::ShimPaths;

pub const LOG_ENV: &str = "UVM_PROVISION_LOG";

const LOG_FILE: &str = "uvm-provision.log";

/// Flushes the file writer when dropped. Hold it until `main` returns.
pub struct LogGuard {
    _file: Option<WorkerGuard>,
}

/// Install the global subscriber.
pub fn init() -> LogGuard {
    let flag = std::env::var(LOG_ENV).ok();
    let dir = file_log_dir(flag.as_deref(), ShimPaths::resolve());

    let (file_layer, guard) = match dir {
        Some(dir) => {
            let (writer, guard) =
                tracing_appender::non_blocking(tracing_appender::rolling::never(dir, LOG_FILE));
            (
                Some(fmt::layer().with_writer(writer).with_ansi(false)),
                Some(guard),
            )
        }
        None => (None, None),
    };

    let default_level = if file_layer.is_some() { "info" } else { "warn" };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .init();

    LogGuard { _file: guard }
}

/// Directory for the log file, or `None` when file logging is off or the
/// directory cannot be created.
fn file_log_dir(flag: Option<&str>, paths: Option<ShimPaths>) -> Option<PathBuf> {
    if flag != Some("1") {
        return None;
    }
    let dir = paths.map(|p| p.logs).unwrap_or_else(std::env::temp_dir);
    std::fs::create_dir_all(&dir).ok()?;
    Some(dir)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paths_in(root: &std::path::Path) -> ShimPaths {
        ShimPaths {
            config: root.join("config"),
            logs: root.join("logs"),
        }
    }

    #[test]
    fn file_logging_needs_flag_set_to_one() {
        let tmp = tempfile::tempdir().unwrap();
        assert_eq!(file_log_dir(None, Some(paths_in(tmp.path()))), None);
        assert_eq!(file_log_dir(Some("true"), Some(paths_in(tmp.path()))), None);
        assert!(!tmp.path().join("logs").exists());
    }

    #[test]
    fn log_dir_is_created_on_demand() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = file_log_dir(Some("1"), Some(paths_in(tmp.path()))).unwrap();
        assert_eq!(dir, tmp.path().join("logs"));
        assert!(dir.is_dir());
    }
}
