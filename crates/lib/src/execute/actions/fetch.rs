//! Source fetching with SHA-256 verification.
//!
//! Downloads land in a shared cache keyed by file name; a cached file is reused
//! only when its digest still matches. `file://` URLs are read from disk.

use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tokio::fs;
use tracing::{debug, info};

use crate::execute::types::ExecuteError;
use crate::util::hash::{digest_eq, sha256_bytes, sha256_file};

/// Fetch `url` into `downloads_dir` and verify it against `expected_sha256`.
///
/// Returns the path of the verified file.
pub async fn fetch_verified(url: &str, expected_sha256: &str, downloads_dir: &Path) -> Result<PathBuf, ExecuteError> {
  fs::create_dir_all(downloads_dir).await?;

  let dest_path = downloads_dir.join(cache_file_name(url, expected_sha256));

  if fs::try_exists(&dest_path).await.unwrap_or(false) {
    match sha256_file(&dest_path).await {
      Ok(actual) if digest_eq(&actual, expected_sha256) => {
        info!(path = ?dest_path, "using cached download");
        return Ok(dest_path);
      }
      Ok(actual) => debug!(expected = %expected_sha256, actual = %actual, "cached download is stale"),
      Err(e) => debug!(error = %e, "cached download unreadable"),
    }
  }

  info!(url = %url, "fetching source");
  let bytes = download(url).await?;

  let actual = sha256_bytes(&bytes);
  if !digest_eq(&actual, expected_sha256) {
    return Err(ExecuteError::HashMismatch {
      url: url.to_string(),
      expected: expected_sha256.to_string(),
      actual,
    });
  }

  let size = bytes.len();
  persist_download(bytes, downloads_dir.to_path_buf(), dest_path.clone()).await?;

  info!(path = ?dest_path, size, "download complete");
  Ok(dest_path)
}

/// Write through a uniquely named temp file in the cache so concurrent fetches
/// of the same file never see each other's partial writes.
async fn persist_download(bytes: Vec<u8>, downloads_dir: PathBuf, dest_path: PathBuf) -> io::Result<()> {
  tokio::task::spawn_blocking(move || {
    let mut temp = NamedTempFile::new_in(&downloads_dir)?;
    temp.write_all(&bytes)?;
    temp.flush()?;
    temp.persist(&dest_path).map_err(|e| e.error)?;
    Ok(())
  })
  .await
  .map_err(io::Error::other)?
}

async fn download(url: &str) -> Result<Vec<u8>, ExecuteError> {
  let failed = |message: String| ExecuteError::FetchFailed {
    url: url.to_string(),
    message,
  };

  if let Some(path) = url.strip_prefix("file://") {
    return fs::read(path).await.map_err(|e| failed(e.to_string()));
  }

  let response = reqwest::get(url).await.map_err(|e| failed(e.to_string()))?;
  if !response.status().is_success() {
    return Err(failed(format!("HTTP {}", response.status())));
  }

  let bytes = response.bytes().await.map_err(|e| failed(e.to_string()))?;
  Ok(bytes.to_vec())
}

/// Cache file name: the URL's last path component, prefixed with a short
/// digest so two sources with the same file name do not collide.
fn cache_file_name(url: &str, sha256: &str) -> String {
  let short = &sha256[..sha256.len().min(12)];
  format!("{short}--{}", url_to_filename(url))
}

/// Convert a URL to a safe file name.
pub(crate) fn url_to_filename(url: &str) -> String {
  let last = url.split(['?', '#']).next().unwrap_or(url).rsplit('/').next().unwrap_or("");

  let sanitized: String = last
    .chars()
    .map(|c| {
      if c.is_alphanumeric() || c == '-' || c == '_' || c == '.' {
        c
      } else {
        '_'
      }
    })
    .collect();

  if !sanitized.is_empty() && sanitized != "." && sanitized != ".." {
    return sanitized;
  }

  format!("download_{}", &sha256_bytes(url.as_bytes())[..16])
}
