use anyhow::Result;
use serde::Serialize;

use cellar_lib::install::target_platform;
use cellar_lib::platform::paths::{cache_dir, downloads_dir, prefix_dir, receipts_dir};

use super::GlobalArgs;
use crate::output::{print_json, print_stat};

#[derive(Serialize)]
struct InfoOutput {
  platform: String,
  os: String,
  os_version: u32,
  arch: String,
  recipes: String,
  prefix: String,
  receipts: String,
  cache: String,
}

pub fn cmd_info(global: &GlobalArgs) -> Result<()> {
  let platform = target_platform(global.platform.as_deref())?;

  let info = InfoOutput {
    platform: platform.triple(),
    os: platform.os.to_string(),
    os_version: platform.os_version,
    arch: platform.arch.to_string(),
    recipes: global.recipes.display().to_string(),
    prefix: prefix_dir().display().to_string(),
    receipts: receipts_dir().display().to_string(),
    cache: cache_dir().display().to_string(),
  };

  if global.output.is_json() {
    return print_json(&info);
  }

  println!("cellar v{}", env!("CARGO_PKG_VERSION"));
  println!();
  print_stat("Platform", &info.platform);
  print_stat("OS", &format!("{} {}", info.os, info.os_version));
  print_stat("Arch", &info.arch);
  print_stat("Recipes", &info.recipes);
  print_stat("Prefix", &info.prefix);
  print_stat("Receipts", &info.receipts);
  print_stat("Downloads", &downloads_dir().display().to_string());

  Ok(())
}
