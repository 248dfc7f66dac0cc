//! In-process file steps: `inreplace` and `install_file`.

use std::path::{Component, Path, PathBuf};

use regex::Regex;
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::execute::types::ExecuteError;

/// Replace every match of `pattern` in the file at `path`.
///
/// A pattern that matches nothing is an error: the recipe expected source
/// that is not there.
pub fn inreplace(path: &Path, pattern: &str, replacement: &str) -> Result<usize, ExecuteError> {
  let failed = |message: String| ExecuteError::Inreplace {
    path: path.display().to_string(),
    message,
  };

  let re = Regex::new(pattern).map_err(|e| failed(e.to_string()))?;
  let contents = std::fs::read_to_string(path).map_err(|e| failed(e.to_string()))?;

  let count = re.find_iter(&contents).count();
  if count == 0 {
    return Err(failed(format!("pattern '{pattern}' did not match")));
  }

  let replaced = re.replace_all(&contents, replacement);
  std::fs::write(path, replaced.as_bytes()).map_err(|e| failed(e.to_string()))?;

  debug!(path = ?path, pattern = %pattern, count, "inreplace");
  Ok(count)
}

/// Copy a file or directory `from` into `prefix`, at the prefix-relative `to`.
///
/// `to` may not be absolute or climb out of the prefix. Directories are copied
/// recursively, merging into whatever already exists at the destination.
pub fn install_file(from: &Path, prefix: &Path, to: &str) -> Result<PathBuf, ExecuteError> {
  let failed = |message: String| ExecuteError::InstallFile {
    path: from.display().to_string(),
    message,
  };

  let relative = Path::new(to);
  let escapes = relative
    .components()
    .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
  if escapes {
    return Err(failed(format!("destination '{to}' must be relative to the prefix")));
  }

  let dest = prefix.join(relative);
  let meta = std::fs::metadata(from).map_err(|e| failed(e.to_string()))?;

  if meta.is_dir() {
    copy_dir(from, &dest).map_err(|e| failed(e.to_string()))?;
  } else {
    // `bin/` style destinations name a directory.
    let target = if to.ends_with('/') || dest.is_dir() {
      match from.file_name() {
        Some(file_name) => dest.join(file_name),
        None => return Err(failed("source has no file name".to_string())),
      }
    } else {
      dest
    };
    if let Some(parent) = target.parent() {
      std::fs::create_dir_all(parent).map_err(|e| failed(e.to_string()))?;
    }
    std::fs::copy(from, &target).map_err(|e| failed(e.to_string()))?;
    info!(from = ?from, to = ?target, "installed file");
    return Ok(target);
  }

  info!(from = ?from, to = ?dest, "installed directory");
  Ok(dest)
}

fn copy_dir(from: &Path, dest: &Path) -> std::io::Result<()> {
  for entry in WalkDir::new(from).follow_links(false) {
    let entry = entry.map_err(std::io::Error::other)?;
    let rel = entry.path().strip_prefix(from).map_err(std::io::Error::other)?;
    let target = dest.join(rel);

    if entry.file_type().is_dir() {
      std::fs::create_dir_all(&target)?;
    } else {
      if let Some(parent) = target.parent() {
        std::fs::create_dir_all(parent)?;
      }
      std::fs::copy(entry.path(), &target)?;
    }
  }
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;
  use tempfile::TempDir;

  #[test]
  fn inreplace_rewrites_all_matches() {
    let dir = TempDir::new().unwrap();
    let file = dir.path().join("meson.build");
    std::fs::write(&file, "prefix = '/usr'\nlibdir = '/usr/lib'\n").unwrap();

    let count = inreplace(&file, r"/usr", "/opt/cellar/mpv").unwrap();
    assert_eq!(count, 2);
    assert_eq!(
      std::fs::read_to_string(&file).unwrap(),
      "prefix = '/opt/cellar/mpv'\nlibdir = '/opt/cellar/mpv/lib'\n"
    );
  }

  #[test]
  fn inreplace_supports_capture_groups() {
    let dir = TempDir::new().unwrap();
    let file = dir.path().join("version.h");
    std::fs::write(&file, "#define VERSION \"0.39\"\n").unwrap();

    inreplace(&file, r#"VERSION "(\d+)\.(\d+)""#, r#"VERSION "$1.40""#).unwrap();
    assert_eq!(std::fs::read_to_string(&file).unwrap(), "#define VERSION \"0.40\"\n");
  }

  #[test]
  fn inreplace_without_match_fails_and_leaves_file() {
    let dir = TempDir::new().unwrap();
    let file = dir.path().join("Makefile");
    std::fs::write(&file, "CC = gcc\n").unwrap();

    let err = inreplace(&file, "clang", "cc").unwrap_err();
    assert!(matches!(err, ExecuteError::Inreplace { .. }));
    assert_eq!(std::fs::read_to_string(&file).unwrap(), "CC = gcc\n");
  }

  #[test]
  fn install_single_file_into_directory() {
    let dir = TempDir::new().unwrap();
    let src = dir.path().join("mpv");
    std::fs::write(&src, "binary").unwrap();
    let prefix = dir.path().join("prefix");

    let installed = install_file(&src, &prefix, "bin/").unwrap();
    assert_eq!(installed, prefix.join("bin/mpv"));
    assert_eq!(std::fs::read_to_string(installed).unwrap(), "binary");
  }

  #[test]
  fn install_file_with_rename() {
    let dir = TempDir::new().unwrap();
    let src = dir.path().join("mpv.conf.sample");
    std::fs::write(&src, "vo=gpu").unwrap();
    let prefix = dir.path().join("prefix");

    install_file(&src, &prefix, "etc/mpv/mpv.conf").unwrap();
    assert!(prefix.join("etc/mpv/mpv.conf").is_file());
  }

  #[test]
  fn install_directory_recursively() {
    let dir = TempDir::new().unwrap();
    let src = dir.path().join("include");
    std::fs::create_dir_all(src.join("mpv")).unwrap();
    std::fs::write(src.join("mpv/client.h"), "").unwrap();
    std::fs::write(src.join("mpv/render.h"), "").unwrap();
    let prefix = dir.path().join("prefix");

    install_file(&src, &prefix, "include").unwrap();
    assert!(prefix.join("include/mpv/client.h").is_file());
    assert!(prefix.join("include/mpv/render.h").is_file());
  }

  #[test]
  fn install_rejects_escaping_destination() {
    let dir = TempDir::new().unwrap();
    let src = dir.path().join("f");
    std::fs::write(&src, "").unwrap();

    for to in ["../outside", "/etc/passwd", "lib/../../x"] {
      let err = install_file(&src, &dir.path().join("prefix"), to).unwrap_err();
      assert!(matches!(err, ExecuteError::InstallFile { .. }), "{to} accepted");
    }
  }

  #[test]
  fn install_missing_source_fails() {
    let dir = TempDir::new().unwrap();
    let err = install_file(&dir.path().join("nope"), dir.path(), "bin/").unwrap_err();
    assert!(matches!(err, ExecuteError::InstallFile { .. }));
  }
}
