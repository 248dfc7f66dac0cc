use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info};

use crate::consts::RECIPE_EXTENSION;

use super::types::Recipe;

/// Errors raised while loading recipes.
#[derive(Debug, Error)]
pub enum RecipeError {
  /// The recipe text is not a valid recipe.
  #[error("failed to parse recipe{}: {message}", display_origin(.origin))]
  Parse { origin: Option<PathBuf>, message: String },

  /// Two recipes in the same universe share a name.
  #[error("duplicate recipe '{0}'")]
  Duplicate(String),

  /// A recipe file's name does not match the recipe it contains.
  #[error("recipe file {path} declares '{name}'")]
  NameMismatch { path: PathBuf, name: String },

  #[error("failed to read {path}: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: io::Error,
  },
}

fn display_origin(origin: &Option<PathBuf>) -> String {
  origin.as_ref().map(|p| format!(" {}", p.display())).unwrap_or_default()
}

impl RecipeError {
  fn parse(message: impl Into<String>) -> Self {
    Self::Parse {
      origin: None,
      message: message.into(),
    }
  }

  fn with_origin(self, path: &Path) -> Self {
    match self {
      Self::Parse { message, .. } => Self::Parse {
        origin: Some(path.to_path_buf()),
        message,
      },
      other => other,
    }
  }
}

/// Parse a recipe from its source bytes.
pub fn load_recipe(source: &[u8]) -> Result<Recipe, RecipeError> {
  let text = std::str::from_utf8(source).map_err(|e| RecipeError::parse(format!("invalid utf-8: {e}")))?;
  let recipe: Recipe = toml::from_str(text).map_err(|e| RecipeError::parse(e.to_string()))?;
  validate(&recipe)?;
  Ok(recipe)
}

/// Read and parse a recipe file.
pub fn load_recipe_file(path: &Path) -> Result<Recipe, RecipeError> {
  let bytes = fs::read(path).map_err(|source| RecipeError::Read {
    path: path.to_path_buf(),
    source,
  })?;
  load_recipe(&bytes).map_err(|e| e.with_origin(path))
}

fn validate(recipe: &Recipe) -> Result<(), RecipeError> {
  if !is_valid_name(&recipe.name) {
    return Err(RecipeError::parse(format!("invalid recipe name '{}'", recipe.name)));
  }
  if recipe.version.trim().is_empty() {
    return Err(RecipeError::parse(format!("{}: version must not be empty", recipe.name)));
  }

  for source in std::iter::once(&recipe.source).chain(recipe.patches.iter()) {
    if source.url.is_empty() {
      return Err(RecipeError::parse(format!("{}: source url must not be empty", recipe.name)));
    }
    if !is_sha256(&source.sha256) {
      return Err(RecipeError::parse(format!(
        "{}: invalid sha256 '{}' for {}",
        recipe.name, source.sha256, source.url
      )));
    }
  }

  if let Some(bottle) = &recipe.bottle {
    if bottle.root_url.trim().is_empty() {
      return Err(RecipeError::parse(format!("{}: bottle root_url must not be empty", recipe.name)));
    }
    if bottle.sha256.is_empty() {
      return Err(RecipeError::parse(format!("{}: bottle declares no platforms", recipe.name)));
    }
    if let Some((tag, sha256)) = bottle.sha256.iter().find(|(_, sha256)| !is_sha256(sha256)) {
      return Err(RecipeError::parse(format!(
        "{}: invalid sha256 '{sha256}' for bottle {tag}",
        recipe.name
      )));
    }
  }

  for dep in &recipe.dependencies {
    if !is_valid_name(&dep.name) {
      return Err(RecipeError::parse(format!("{}: invalid dependency name '{}'", recipe.name, dep.name)));
    }
    if dep.name == recipe.name {
      return Err(RecipeError::parse(format!("{}: recipe depends on itself", recipe.name)));
    }
  }

  for conflict in &recipe.conflicts {
    if conflict.name == recipe.name {
      return Err(RecipeError::parse(format!("{}: recipe conflicts with itself", recipe.name)));
    }
  }

  Ok(())
}

/// Names may be tap-qualified (`vivid-lapin/tap/ffmpeg`).
fn is_valid_name(name: &str) -> bool {
  !name.is_empty()
    && name
      .split('/')
      .all(|part| !part.is_empty() && part.chars().all(|c| c.is_ascii_alphanumeric() || "-_.+@".contains(c)))
}

fn is_sha256(value: &str) -> bool {
  value.len() == 64 && value.bytes().all(|b| b.is_ascii_hexdigit())
}

/// The resolution universe: every recipe known to a run, in declaration order.
#[derive(Debug, Clone, Default)]
pub struct RecipeSet {
  recipes: Vec<Arc<Recipe>>,
  by_name: HashMap<String, usize>,
}

impl RecipeSet {
  /// Build a universe from in-memory recipes, rejecting duplicate names.
  pub fn from_recipes(recipes: impl IntoIterator<Item = Recipe>) -> Result<Self, RecipeError> {
    let mut set = Self::default();
    for recipe in recipes {
      set.insert(recipe)?;
    }
    Ok(set)
  }

  /// Load every recipe file in a directory, ordered by file name.
  ///
  /// The file stem must match the recipe name; a tap-qualified recipe
  /// (`tap/pkg`) lives in `tap/pkg.toml`.
  pub fn load_dir(dir: &Path) -> Result<Self, RecipeError> {
    info!(dir = %dir.display(), "loading recipes");

    if !dir.is_dir() {
      return Err(RecipeError::Read {
        path: dir.to_path_buf(),
        source: io::Error::new(io::ErrorKind::NotFound, "recipe directory not found"),
      });
    }

    let mut files = Vec::new();
    for entry in walkdir::WalkDir::new(dir).follow_links(true) {
      let entry = entry.map_err(|e| RecipeError::Read {
        path: e.path().unwrap_or(dir).to_path_buf(),
        source: e.into(),
      })?;
      let path = entry.path();
      if entry.file_type().is_file() && path.extension().is_some_and(|ext| ext == RECIPE_EXTENSION) {
        files.push(entry.into_path());
      }
    }

    files.sort();

    let mut set = Self::default();
    for path in files {
      let recipe = load_recipe_file(&path)?;
      let expected = expected_name(dir, &path);
      if expected.as_deref() != Some(recipe.name.as_str()) {
        return Err(RecipeError::NameMismatch {
          path,
          name: recipe.name,
        });
      }
      debug!(name = %recipe.name, path = %path.display(), "loaded recipe");
      set.insert(recipe)?;
    }

    info!(count = set.len(), "recipes loaded");
    Ok(set)
  }

  fn insert(&mut self, recipe: Recipe) -> Result<(), RecipeError> {
    if self.by_name.contains_key(&recipe.name) {
      return Err(RecipeError::Duplicate(recipe.name));
    }
    self.by_name.insert(recipe.name.clone(), self.recipes.len());
    self.recipes.push(Arc::new(recipe));
    Ok(())
  }

  pub fn get(&self, name: &str) -> Option<&Arc<Recipe>> {
    self.by_name.get(name).map(|&idx| &self.recipes[idx])
  }

  /// Position of a recipe in declaration order.
  pub fn position(&self, name: &str) -> Option<usize> {
    self.by_name.get(name).copied()
  }

  pub fn contains(&self, name: &str) -> bool {
    self.by_name.contains_key(name)
  }

  pub fn iter(&self) -> impl Iterator<Item = &Arc<Recipe>> {
    self.recipes.iter()
  }

  pub fn names(&self) -> impl Iterator<Item = &str> {
    self.recipes.iter().map(|r| r.name.as_str())
  }

  pub fn len(&self) -> usize {
    self.recipes.len()
  }

  pub fn is_empty(&self) -> bool {
    self.recipes.is_empty()
  }
}

fn expected_name(dir: &Path, path: &Path) -> Option<String> {
  let relative = path.strip_prefix(dir).ok()?.with_extension("");
  let parts: Vec<String> = relative
    .components()
    .map(|c| c.as_os_str().to_string_lossy().into_owned())
    .collect();
  Some(parts.join("/"))
}
