//! Recipe model and loading.
//!
//! A recipe is a declarative description of one installable package: its
//! identity, checksummed sources, dependencies by phase and platform,
//! conflicts, scoped environment and build/install/test steps. Recipes are
//! loaded once per run and never mutated afterwards.

mod bottle;
mod load;
mod types;

pub use bottle::{BOTTLE_STRIP_COMPONENTS, Bottle, BottleChoice, platform_tag};
pub use load::{RecipeError, RecipeSet, load_recipe, load_recipe_file};
pub use types::*;
