//! Install receipts: the completion record of an installed package.
//!
//! # Storage Layout
//!
//! ```text
//! {data_dir}/receipts/
//! ├── mpv.json
//! └── vivid-lapin__tap__ffmpeg.json   # tap-qualified names use `__`
//! ```
//!
//! A receipt is written when an entry reaches `Done`. Receipts are the source
//! of the already-satisfied set and of the installed-conflict check, and they
//! never move to a lower build identity.

use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::consts::RECEIPT_VERSION;
use crate::platform::paths::receipts_dir;
use crate::recipe::{Recipe, RecipeSet, Source};
use crate::version::BuildIdentity;

#[derive(Debug, Error)]
pub enum ReceiptError {
  #[error("failed to create receipts directory: {0}")]
  CreateDir(#[source] io::Error),

  #[error("failed to read receipt {path}: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to write receipt: {0}")]
  Write(#[source] io::Error),

  #[error("failed to parse receipt {path}: {source}")]
  Parse {
    path: PathBuf,
    #[source]
    source: serde_json::Error,
  },

  #[error("failed to serialize receipt: {0}")]
  Serialize(#[source] serde_json::Error),

  #[error("unsupported receipt version {0}")]
  UnsupportedVersion(u32),

  /// Recording would replace an installed build with an older one.
  #[error("refusing to downgrade {name} from {installed} to {candidate}")]
  Downgrade {
    name: String,
    installed: BuildIdentity,
    candidate: BuildIdentity,
  },
}

/// A dependency as recorded in a receipt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiptDependency {
  pub name: String,
  pub version: String,
}

/// The completion record of one installed package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
  pub receipt_version: u32,
  pub name: String,
  pub version: String,
  pub revision: u32,
  /// Platform triple the package was built for.
  pub platform: String,
  pub prefix: PathBuf,
  pub source: Source,
  /// Seconds since the Unix epoch.
  pub installed_at: u64,
  /// Installed because it was requested rather than pulled in.
  pub installed_on_request: bool,
  /// Dependencies linked at run time.
  pub runtime_dependencies: Vec<ReceiptDependency>,
  /// Dependencies needed only to build or test; not linked.
  #[serde(default)]
  pub build_dependencies: Vec<String>,
  /// Installed from a prebuilt bottle instead of built from source.
  #[serde(default)]
  pub poured_from_bottle: bool,
}

impl Receipt {
  /// Start a receipt for `recipe`, stamped with the current time.
  pub fn new(recipe: &Recipe, platform: &str, prefix: &Path, on_request: bool) -> Self {
    let installed_at = SystemTime::now()
      .duration_since(UNIX_EPOCH)
      .map(|d| d.as_secs())
      .unwrap_or(0);

    Self {
      receipt_version: RECEIPT_VERSION,
      name: recipe.name.clone(),
      version: recipe.version.clone(),
      revision: recipe.revision,
      platform: platform.to_string(),
      prefix: prefix.to_path_buf(),
      source: recipe.source.clone(),
      installed_at,
      installed_on_request: on_request,
      runtime_dependencies: Vec::new(),
      build_dependencies: Vec::new(),
      poured_from_bottle: false,
    }
  }

  pub fn identity(&self) -> BuildIdentity {
    BuildIdentity::new(&self.version, self.revision)
  }
}

/// Reads and writes receipts in one directory.
#[derive(Debug, Clone)]
pub struct ReceiptStore {
  dir: PathBuf,
}

impl ReceiptStore {
  pub fn new(dir: impl Into<PathBuf>) -> Self {
    Self { dir: dir.into() }
  }

  /// The store under the default data directory.
  pub fn default_store() -> Self {
    Self::new(receipts_dir())
  }

  pub fn dir(&self) -> &Path {
    &self.dir
  }

  fn path_for(&self, name: &str) -> PathBuf {
    self.dir.join(format!("{}.json", name.replace('/', "__")))
  }

  /// Load the receipt for `name`, if installed.
  pub fn load(&self, name: &str) -> Result<Option<Receipt>, ReceiptError> {
    read_receipt(&self.path_for(name))
  }

  /// Every receipt, ordered by package name.
  pub fn load_all(&self) -> Result<Vec<Receipt>, ReceiptError> {
    let entries = match fs::read_dir(&self.dir) {
      Ok(entries) => entries,
      Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
      Err(source) => {
        return Err(ReceiptError::Read {
          path: self.dir.clone(),
          source,
        });
      }
    };

    let mut receipts = Vec::new();
    for entry in entries {
      let entry = entry.map_err(|source| ReceiptError::Read {
        path: self.dir.clone(),
        source,
      })?;
      let path = entry.path();
      if path.extension().is_some_and(|ext| ext == "json")
        && let Some(receipt) = read_receipt(&path)?
      {
        receipts.push(receipt);
      }
    }

    receipts.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(receipts)
  }

  /// Write a receipt atomically.
  ///
  /// # Errors
  ///
  /// `Downgrade` when an installed receipt has a higher build identity.
  pub fn record(&self, receipt: &Receipt) -> Result<(), ReceiptError> {
    if let Some(existing) = self.load(&receipt.name)?
      && existing.identity() > receipt.identity()
    {
      return Err(ReceiptError::Downgrade {
        name: receipt.name.clone(),
        installed: existing.identity(),
        candidate: receipt.identity(),
      });
    }

    fs::create_dir_all(&self.dir).map_err(ReceiptError::CreateDir)?;

    let path = self.path_for(&receipt.name);
    let temp_path = path.with_extension("json.tmp");
    let content = serde_json::to_string_pretty(receipt).map_err(ReceiptError::Serialize)?;
    fs::write(&temp_path, content).map_err(ReceiptError::Write)?;
    fs::rename(&temp_path, &path).map_err(ReceiptError::Write)?;

    info!(name = %receipt.name, identity = %receipt.identity(), "receipt recorded");
    Ok(())
  }

  /// Remove the receipt for `name`. Returns whether one existed.
  pub fn remove(&self, name: &str) -> Result<bool, ReceiptError> {
    match fs::remove_file(self.path_for(name)) {
      Ok(()) => Ok(true),
      Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
      Err(e) => Err(ReceiptError::Write(e)),
    }
  }

  /// Names of every installed package.
  pub fn installed_names(&self) -> Result<HashSet<String>, ReceiptError> {
    Ok(self.load_all()?.into_iter().map(|r| r.name).collect())
  }

  /// Installed packages whose build identity is at least the recipe's.
  ///
  /// Packages installed without a known recipe are not included.
  pub fn satisfied(&self, recipes: &RecipeSet) -> Result<HashSet<String>, ReceiptError> {
    let mut satisfied = HashSet::new();
    for receipt in self.load_all()? {
      let Some(recipe) = recipes.get(&receipt.name) else {
        continue;
      };
      if receipt.identity() >= recipe.build_identity() {
        satisfied.insert(receipt.name);
      } else {
        debug!(
          name = %receipt.name,
          installed = %receipt.identity(),
          available = %recipe.build_identity(),
          "installed package is outdated"
        );
      }
    }
    Ok(satisfied)
  }
}

fn read_receipt(path: &Path) -> Result<Option<Receipt>, ReceiptError> {
  let content = match fs::read_to_string(path) {
    Ok(content) => content,
    Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
    Err(source) => {
      return Err(ReceiptError::Read {
        path: path.to_path_buf(),
        source,
      });
    }
  };

  let receipt: Receipt = serde_json::from_str(&content).map_err(|source| ReceiptError::Parse {
    path: path.to_path_buf(),
    source,
  })?;

  if receipt.receipt_version != RECEIPT_VERSION {
    return Err(ReceiptError::UnsupportedVersion(receipt.receipt_version));
  }

  Ok(Some(receipt))
}
