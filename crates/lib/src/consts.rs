//! Crate-wide constants.

/// Application name, used for XDG directory names.
pub const APP_NAME: &str = "cellar";

/// File extension of recipe files inside a recipe directory.
pub const RECIPE_EXTENSION: &str = "toml";

/// Current receipt schema version.
pub const RECEIPT_VERSION: u32 = 1;

/// SOURCE_DATE_EPOCH handed to every build (January 1, 1980 00:00:00 UTC).
pub const SOURCE_DATE_EPOCH: &str = "315532800";
