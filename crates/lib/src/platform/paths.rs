//! Well-known directories.
//!
//! Each root can be overridden through an environment variable; otherwise the
//! XDG base directories (or their Windows equivalents) are used.

use std::path::PathBuf;

use crate::consts::APP_NAME;

/// Overrides the cellar prefix packages are installed into.
pub const PREFIX_ENV: &str = "CELLAR_PREFIX";
/// Overrides the data directory holding install receipts.
pub const DATA_DIR_ENV: &str = "CELLAR_DATA_DIR";
/// Overrides the cache directory holding downloads and work directories.
pub const CACHE_DIR_ENV: &str = "CELLAR_CACHE_DIR";

fn env_path(var: &str) -> Option<PathBuf> {
  std::env::var_os(var).filter(|v| !v.is_empty()).map(PathBuf::from)
}

/// Returns the user's home directory
#[cfg(windows)]
pub fn home_dir() -> PathBuf {
  env_path("USERPROFILE").unwrap_or_else(std::env::temp_dir)
}

/// Returns the user's home directory
#[cfg(not(windows))]
pub fn home_dir() -> PathBuf {
  env_path("HOME").unwrap_or_else(std::env::temp_dir)
}

/// Returns the directory for persistent application data
#[cfg(windows)]
pub fn data_dir() -> PathBuf {
  env_path(DATA_DIR_ENV).unwrap_or_else(|| {
    env_path("APPDATA")
      .unwrap_or_else(|| home_dir().join("AppData").join("Roaming"))
      .join(APP_NAME)
  })
}

/// Returns the directory for persistent application data
#[cfg(not(windows))]
pub fn data_dir() -> PathBuf {
  env_path(DATA_DIR_ENV).unwrap_or_else(|| {
    env_path("XDG_DATA_HOME")
      .unwrap_or_else(|| home_dir().join(".local").join("share"))
      .join(APP_NAME)
  })
}

/// Returns the directory for cache files
#[cfg(windows)]
pub fn cache_dir() -> PathBuf {
  env_path(CACHE_DIR_ENV).unwrap_or_else(|| {
    env_path("LOCALAPPDATA")
      .unwrap_or_else(|| home_dir().join("AppData").join("Local"))
      .join(APP_NAME)
      .join("Cache")
  })
}

/// Returns the directory for cache files
#[cfg(not(windows))]
pub fn cache_dir() -> PathBuf {
  env_path(CACHE_DIR_ENV).unwrap_or_else(|| {
    env_path("XDG_CACHE_HOME")
      .unwrap_or_else(|| home_dir().join(".cache"))
      .join(APP_NAME)
  })
}

/// Root under which each package gets its opt prefix (`<prefix>/<name>`).
pub fn prefix_dir() -> PathBuf {
  env_path(PREFIX_ENV).unwrap_or_else(|| data_dir().join("Cellar"))
}

pub fn receipts_dir() -> PathBuf {
  data_dir().join("receipts")
}

pub fn downloads_dir() -> PathBuf {
  cache_dir().join("downloads")
}

/// Parent of the per-entry private work directories.
pub fn work_dir() -> PathBuf {
  cache_dir().join("work")
}
