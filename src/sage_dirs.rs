//! Application directory paths for Sage.
//!
//! Uses the [`dirs`] crate for platform-appropriate resolution.
//!
//! | Purpose | macOS | Linux |
//! |---------|-------|-------|
//! | App data | `~/Library/Application Support/sage/` | `~/.local/share/sage/` |
//! | Config | `~/Library/Application Support/sage/` | `~/.config/sage/` |
//!
//! # Environment Overrides
//!
//! - `SAGE_DATA_DIR`: overrides [`data_dir`]
//! - `SAGE_CONFIG_DIR`: overrides [`config_dir`]

use std::path::PathBuf;

/// Application data root directory.
///
/// Holds the short-term and long-term memory logs and the log files.
#[must_use]
pub fn data_dir() -> PathBuf {
    if let Some(override_dir) = std::env::var_os("SAGE_DATA_DIR") {
        return PathBuf::from(override_dir);
    }
    dirs::data_dir()
        .map(|d| d.join("sage"))
        .unwrap_or_else(|| PathBuf::from("/tmp/sage-data"))
}

/// Application config directory.
#[must_use]
pub fn config_dir() -> PathBuf {
    if let Some(override_dir) = std::env::var_os("SAGE_CONFIG_DIR") {
        return PathBuf::from(override_dir);
    }
    dirs::config_dir()
        .map(|d| d.join("sage"))
        .unwrap_or_else(|| PathBuf::from("/tmp/sage-config"))
}

/// Memory data root directory (`data_dir()/memory/`).
#[must_use]
pub fn memory_dir() -> PathBuf {
    data_dir().join("memory")
}

/// Log file directory (`data_dir()/logs/`).
#[must_use]
pub fn logs_dir() -> PathBuf {
    data_dir().join("logs")
}

/// Main config file path (`config_dir()/config.toml`).
#[must_use]
pub fn config_file() -> PathBuf {
    config_dir().join("config.toml")
}
