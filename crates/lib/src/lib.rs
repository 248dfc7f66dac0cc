//! cellar-lib: recipe resolution, install planning and execution.
//!
//! The pipeline:
//! - `recipe`: load TOML recipes into immutable models
//! - `platform`: evaluate platform conditionals against a target
//! - `graph`: build the dependency graph and reject cycles, conflicts and
//!   unresolved dependencies
//! - `plan`: derive a deterministic install order
//! - `execute`: run the plan with a bounded worker pool
//! - `receipt`: record what was installed

pub mod consts;
pub mod execute;
pub mod graph;
pub mod install;
pub mod placeholder;
pub mod plan;
pub mod platform;
pub mod receipt;
pub mod recipe;
pub mod util;
pub mod version;
