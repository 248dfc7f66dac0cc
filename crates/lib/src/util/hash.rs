//! SHA-256 helpers for source verification.

use std::path::Path;

use sha2::{Digest, Sha256};
use tokio::io::AsyncReadExt;

/// Lowercase hex SHA-256 of a byte slice.
pub fn sha256_bytes(data: &[u8]) -> String {
  let mut hasher = Sha256::new();
  hasher.update(data);
  hex::encode(hasher.finalize())
}

/// Lowercase hex SHA-256 of a file, read in chunks.
pub async fn sha256_file(path: &Path) -> Result<String, std::io::Error> {
  let mut file = tokio::fs::File::open(path).await?;
  let mut hasher = Sha256::new();
  let mut buffer = vec![0u8; 64 * 1024];

  loop {
    let read = file.read(&mut buffer).await?;
    if read == 0 {
      break;
    }
    hasher.update(&buffer[..read]);
  }

  Ok(hex::encode(hasher.finalize()))
}

/// Compare two hex digests ignoring case.
pub fn digest_eq(a: &str, b: &str) -> bool {
  a.eq_ignore_ascii_case(b)
}

#[cfg(test)]
mod tests {
  use super::*;
  use tempfile::tempdir;

  const HELLO: &str = "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824";

  #[test]
  fn bytes_digest() {
    assert_eq!(sha256_bytes(b"hello"), HELLO);
  }

  #[tokio::test]
  async fn file_digest_matches_bytes() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("hello.txt");
    std::fs::write(&path, "hello").unwrap();
    assert_eq!(sha256_file(&path).await.unwrap(), HELLO);
  }

  #[test]
  fn digest_comparison_ignores_case() {
    assert!(digest_eq(HELLO, &HELLO.to_uppercase()));
    assert!(!digest_eq(HELLO, &sha256_bytes(b"world")));
  }
}
