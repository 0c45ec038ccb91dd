//! Path utilities for stepwise data directories

use std::path::{Path, PathBuf};

/// Get the default data directory path (~/.stepwise)
pub fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .map(|h| h.join(".stepwise"))
        .unwrap_or_else(|| PathBuf::from(".stepwise"))
}

/// Get the database file path (<data_dir>/line_reports.db)
pub fn database_path(data_dir: &Path) -> PathBuf {
    data_dir.join("line_reports.db")
}

/// Get the logs directory (<data_dir>/logs)
pub fn logs_dir(data_dir: &Path) -> PathBuf {
    data_dir.join("logs")
}

/// Get the default log file path (<data_dir>/logs/stepwise.log)
pub fn log_file_path(data_dir: &Path) -> PathBuf {
    logs_dir(data_dir).join("stepwise.log")
}

/// Get the config file path (<data_dir>/config.toml)
pub fn config_path(data_dir: &Path) -> PathBuf {
    data_dir.join("config.toml")
}

/// Normalize a debuggee-reported path for comparisons and storage keys.
///
/// Adapters report absolute paths; relative paths are resolved against the
/// current directory. The file does not need to exist.
pub fn normalize_path(path: &Path) -> PathBuf {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
    };

    let mut out = PathBuf::new();
    for component in absolute.components() {
        match component {
            std::path::Component::CurDir => {}
            std::path::Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}
