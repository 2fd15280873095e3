//! Where uvm-provision looks for its configuration and writes its logs.
//!
//! - Config: `$XDG_CONFIG_HOME/uvm-provision/` or `~/.config/uvm-provision/`
//! - Logs:   `%LOCALAPPDATA%\uvm-provision\logs` on Windows, otherwise
//!   `$XDG_DATA_HOME/uvm-provision/logs` or `~/.local/share/uvm-provision/logs`

use std::path::{Path, PathBuf};

const APP_NAME: &str = "uvm-provision";

/// Name of the shim options file inside the config directory.
pub const OPTIONS_FILE: &str = "options.toml";

#[derive(Debug, Clone)]
pub struct ShimPaths {
    pub config: PathBuf,
    pub logs: PathBuf,
}

impl ShimPaths {
    /// Resolve paths from the environment. Does not create anything.
    pub fn resolve() -> Option<Self> {
        let home = home_dir()?;
        Some(Self {
            config: resolve_config_dir(&home),
            logs: resolve_log_dir(&home),
        })
    }

    /// The default options file, if it exists.
    pub fn options_file(&self) -> Option<PathBuf> {
        let path = self.config.join(OPTIONS_FILE);
        path.is_file().then_some(path)
    }
}

fn home_dir() -> Option<PathBuf> {
    std::env::var_os("HOME")
        .or_else(|| std::env::var_os("USERPROFILE"))
        .map(PathBuf::from)
}

fn resolve_config_dir(home: &Path) -> PathBuf {
    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        PathBuf::from(xdg).join(APP_NAME)
    } else {
        home.join(".config").join(APP_NAME)
    }
}

#[cfg(windows)]
fn resolve_log_dir(home: &Path) -> PathBuf {
    match std::env::var_os("LOCALAPPDATA") {
        Some(local) => PathBuf::from(local).join(APP_NAME).join("logs"),
        None => home.join("AppData").join("Local").join(APP_NAME).join("logs"),
    }
}

#[cfg(not(windows))]
fn resolve_log_dir(home: &Path) -> PathBuf {
    if let Ok(xdg) = std::env::var("XDG_DATA_HOME") {
        PathBuf::from(xdg).join(APP_NAME).join("logs")
    } else {
        home.join(".local").join("share").join(APP_NAME).join("logs")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_produces_app_scoped_paths() {
        let paths = ShimPaths::resolve().expect("HOME should be set in tests");
        assert!(paths.config.ends_with(APP_NAME));
        assert!(paths.logs.ends_with("logs"));
    }

    #[test]
    fn options_file_requires_existing_file() {
        let tmp = tempfile::tempdir().unwrap();
        let paths = ShimPaths {
            config: tmp.path().to_path_buf(),
            logs: tmp.path().join("logs"),
        };
        assert_eq!(paths.options_file(), None);

        std::fs::write(tmp.path().join(OPTIONS_FILE), "VmProcessorCount = 2\n").unwrap();
        assert_eq!(paths.options_file(), Some(tmp.path().join(OPTIONS_FILE)));
    }
}
