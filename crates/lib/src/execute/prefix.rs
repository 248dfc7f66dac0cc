//! Install prefixes that can be rolled back.
//!
//! A reinstall moves the previous contents of `<cellar>/<name>` to a hidden
//! sibling before anything is written. A failed install removes whatever it
//! wrote and moves the previous contents back; a successful one deletes them.

use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

/// An install in progress into one prefix.
#[derive(Debug)]
pub struct PrefixTransaction {
  prefix: PathBuf,
  previous: Option<PathBuf>,
}

impl PrefixTransaction {
  /// Move any existing install aside and create an empty prefix.
  pub async fn begin(prefix: &Path) -> io::Result<Self> {
    let backup = backup_path(prefix);

    // Left behind by an interrupted run.
    if tokio::fs::try_exists(&backup).await? {
      warn!(backup = ?backup, "removing stale prefix backup");
      tokio::fs::remove_dir_all(&backup).await?;
    }

    let previous = if tokio::fs::try_exists(prefix).await? {
      tokio::fs::rename(prefix, &backup).await?;
      debug!(prefix = ?prefix, backup = ?backup, "moved previous install aside");
      Some(backup)
    } else {
      None
    };

    tokio::fs::create_dir_all(prefix).await?;
    Ok(Self {
      prefix: prefix.to_path_buf(),
      previous,
    })
  }

  pub fn prefix(&self) -> &Path {
    &self.prefix
  }

  /// Whether a previous install was moved aside.
  pub fn is_reinstall(&self) -> bool {
    self.previous.is_some()
  }

  /// Keep the new install and drop the previous one.
  pub async fn commit(self) {
    if let Some(previous) = &self.previous
      && let Err(e) = tokio::fs::remove_dir_all(previous).await
    {
      warn!(backup = ?previous, error = %e, "failed to remove previous install");
    }
  }

  /// Discard the new install and put the previous one back.
  pub async fn rollback(self) {
    match tokio::fs::remove_dir_all(&self.prefix).await {
      Ok(()) => debug!(prefix = ?self.prefix, "removed partial install"),
      Err(e) if e.kind() == io::ErrorKind::NotFound => {}
      Err(e) => {
        warn!(prefix = ?self.prefix, error = %e, "failed to remove partial install");
        return;
      }
    }

    if let Some(previous) = &self.previous {
      match tokio::fs::rename(previous, &self.prefix).await {
        Ok(()) => info!(prefix = ?self.prefix, "restored previous install"),
        Err(e) => warn!(prefix = ?self.prefix, backup = ?previous, error = %e, "failed to restore previous install"),
      }
    }
  }
}

/// `<cellar>/.<name>.previous`, next to the prefix so the rename stays on one
/// filesystem.
fn backup_path(prefix: &Path) -> PathBuf {
  let name = prefix
    .file_name()
    .map(|n| n.to_string_lossy().into_owned())
    .unwrap_or_default();
  prefix.with_file_name(format!(".{name}.previous"))
}
