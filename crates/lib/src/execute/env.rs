//! Per-entry build environment and scratch space.
//!
//! Each entry gets a private [`EnvSnapshot`] and an [`EntryScope`]. The
//! snapshot is only ever handed to that entry's child processes; the process
//! environment is never modified. The scope's directory is removed when the
//! scope is dropped, whatever the entry's outcome.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tracing::debug;

use crate::consts::SOURCE_DATE_EPOCH;
use crate::recipe::EnvOp;

#[cfg(unix)]
const PATH_SEPARATOR: &str = ":";
#[cfg(windows)]
const PATH_SEPARATOR: &str = ";";

/// An isolated environment variable set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvSnapshot {
  vars: BTreeMap<String, String>,
}

impl EnvSnapshot {
  /// The base environment every entry starts from.
  pub fn isolated(scope: &EntryScope, base_path: &str) -> Self {
    let mut env = Self::default();
    env.set("PATH", base_path);
    env.set("HOME", &scope.home().to_string_lossy());
    for var in ["TMPDIR", "TMP", "TEMP"] {
      env.set(var, &scope.tmp().to_string_lossy());
    }
    env.set("LANG", "C");
    env.set("LC_ALL", "C");
    env.set("SOURCE_DATE_EPOCH", SOURCE_DATE_EPOCH);
    env
  }

  pub fn get(&self, key: &str) -> Option<&str> {
    self.vars.get(key).map(String::as_str)
  }

  pub fn set(&mut self, key: &str, value: &str) {
    self.vars.insert(key.to_string(), value.to_string());
  }

  /// Prepend `value`; an unset or empty variable becomes exactly `value`.
  pub fn prepend(&mut self, key: &str, value: &str, separator: &str) {
    let joined = match self.get(key).filter(|v| !v.is_empty()) {
      Some(existing) => format!("{value}{separator}{existing}"),
      None => value.to_string(),
    };
    self.set(key, &joined);
  }

  pub fn append(&mut self, key: &str, value: &str, separator: &str) {
    let joined = match self.get(key).filter(|v| !v.is_empty()) {
      Some(existing) => format!("{existing}{separator}{value}"),
      None => value.to_string(),
    };
    self.set(key, &joined);
  }

  /// Prepend a directory to a search path variable.
  pub fn prepend_path(&mut self, key: &str, dir: &Path) {
    self.prepend(key, &dir.to_string_lossy(), PATH_SEPARATOR);
  }

  /// Apply one recipe mutation with an already-substituted value.
  pub fn apply(&mut self, key: &str, value: &str, op: &EnvOp) {
    match op {
      EnvOp::Set => self.set(key, value),
      EnvOp::Prepend { separator } => self.prepend(key, value, separator),
      EnvOp::Append { separator } => self.append(key, value, separator),
    }
  }

  pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
    self.vars.iter().map(|(k, v)| (k.as_str(), v.as_str()))
  }

  pub fn into_map(self) -> BTreeMap<String, String> {
    self.vars
  }
}

/// Private scratch space for one entry: `src/`, `home/` and `tmp/` under a
/// temporary directory that is deleted on drop.
#[derive(Debug)]
pub struct EntryScope {
  name: String,
  dir: TempDir,
}

impl EntryScope {
  /// Create the scope under `work_root`.
  pub fn create(work_root: &Path, name: &str) -> std::io::Result<Self> {
    std::fs::create_dir_all(work_root)?;
    let prefix = format!("{}-", name.replace('/', "_"));
    let dir = tempfile::Builder::new().prefix(&prefix).tempdir_in(work_root)?;
    for sub in ["src", "home", "tmp"] {
      std::fs::create_dir_all(dir.path().join(sub))?;
    }
    debug!(name = %name, dir = ?dir.path(), "entry scope created");
    Ok(Self {
      name: name.to_string(),
      dir,
    })
  }

  pub fn path(&self) -> &Path {
    self.dir.path()
  }

  pub fn src(&self) -> PathBuf {
    self.dir.path().join("src")
  }

  pub fn home(&self) -> PathBuf {
    self.dir.path().join("home")
  }

  pub fn tmp(&self) -> PathBuf {
    self.dir.path().join("tmp")
  }
}

impl Drop for EntryScope {
  fn drop(&mut self) {
    debug!(name = %self.name, dir = ?self.dir.path(), "entry scope released");
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn prepend_and_append() {
    let mut env = EnvSnapshot::default();
    env.prepend("PKG_CONFIG_PATH", "/a", ":");
    assert_eq!(env.get("PKG_CONFIG_PATH"), Some("/a"));
    env.prepend("PKG_CONFIG_PATH", "/b", ":");
    assert_eq!(env.get("PKG_CONFIG_PATH"), Some("/b:/a"));

    env.set("LDFLAGS", "");
    env.append("LDFLAGS", "-lz", " ");
    env.append("LDFLAGS", "-lm", " ");
    assert_eq!(env.get("LDFLAGS"), Some("-lz -lm"));
  }

  #[test]
  fn apply_recipe_ops() {
    let mut env = EnvSnapshot::default();
    env.apply("CC", "clang", &EnvOp::Set);
    env.apply(
      "CFLAGS",
      "-O2",
      &EnvOp::Append {
        separator: " ".to_string(),
      },
    );
    env.apply(
      "CFLAGS",
      "-g",
      &EnvOp::Append {
        separator: " ".to_string(),
      },
    );
    assert_eq!(env.get("CC"), Some("clang"));
    assert_eq!(env.get("CFLAGS"), Some("-O2 -g"));
  }

  #[test]
  fn isolated_env_points_into_scope() {
    let root = tempfile::tempdir().unwrap();
    let scope = EntryScope::create(root.path(), "mpv").unwrap();
    let env = EnvSnapshot::isolated(&scope, "/usr/bin:/bin");

    assert_eq!(env.get("PATH"), Some("/usr/bin:/bin"));
    assert_eq!(env.get("HOME"), Some(scope.home().to_string_lossy().as_ref()));
    assert_eq!(env.get("SOURCE_DATE_EPOCH"), Some(SOURCE_DATE_EPOCH));
    assert!(scope.src().is_dir());
  }

  #[test]
  fn scope_is_removed_on_drop() {
    let root = tempfile::tempdir().unwrap();
    let scope = EntryScope::create(root.path(), "vivid-lapin/tap/ffmpeg").unwrap();
    let path = scope.path().to_path_buf();
    std::fs::write(scope.src().join("configure"), "#!/bin/sh").unwrap();
    assert!(path.exists());

    drop(scope);
    assert!(!path.exists());
    assert_eq!(std::fs::read_dir(root.path()).unwrap().count(), 0);
  }
}
