mod info;
mod install;
mod plan;
mod resolve;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use cellar_lib::recipe::RecipeSet;

use crate::output::OutputFormat;

pub use info::cmd_info;
pub use install::{InstallArgs, cmd_install};
pub use plan::cmd_plan;
pub use resolve::cmd_resolve;

/// Flags shared by every subcommand.
pub struct GlobalArgs {
  pub recipes: PathBuf,
  pub platform: Option<String>,
  pub output: OutputFormat,
  pub verbose: bool,
}

fn load_recipes(dir: &Path) -> Result<RecipeSet> {
  RecipeSet::load_dir(dir).with_context(|| format!("Failed to load recipes from {}", dir.display()))
}
