//! Prebuilt binary archives ("bottles") of a recipe.
//!
//! ```toml
//! [bottle]
//! root_url = "https://github.com/vivid-lapin/homebrew-tap/releases/download/2025083101"
//! rebuild = 1
//!
//! [bottle.sha256]
//! arm64_sequoia = "9405f3d4..."
//! x86_64_linux = "..."
//! ```
//!
//! Tags name a platform: `arm64_<macos release>`, `<macos release>` for
//! Intel Macs, `x86_64_linux`, `arm64_linux`, or `all`. A macOS bottle built
//! for an older release is usable on a newer one.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::platform::os::{macos_release_name, macos_release_ordinal};
use crate::platform::{Arch, OsFamily, PlatformDescriptor};
use crate::version::BuildIdentity;

/// Leading path components of a bottle archive (`<name>/<version>/`).
pub const BOTTLE_STRIP_COMPONENTS: usize = 2;

const ARM64_PREFIX: &str = "arm64_";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Bottle {
  pub root_url: String,
  /// Bumped when a bottle is rebuilt without a version change.
  #[serde(default)]
  pub rebuild: u32,
  /// Platform tag to archive digest.
  pub sha256: BTreeMap<String, String>,
}

/// The bottle picked for one platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BottleChoice {
  pub tag: String,
  pub url: String,
  pub file_name: String,
  pub sha256: String,
}

/// The exact bottle tag for a platform, if it has one.
pub fn platform_tag(platform: &PlatformDescriptor) -> Option<String> {
  match platform.os {
    OsFamily::MacOs => {
      let release = macos_release_name(platform.os_version)?;
      Some(match platform.arch {
        Arch::Aarch64 => format!("{ARM64_PREFIX}{release}"),
        Arch::X86_64 => release.to_string(),
      })
    }
    OsFamily::Linux => Some(match platform.arch {
      Arch::Aarch64 => format!("{ARM64_PREFIX}linux"),
      Arch::X86_64 => "x86_64_linux".to_string(),
    }),
    OsFamily::Windows => None,
  }
}

impl Bottle {
  /// The tag to pour on `platform`: the exact tag, else the newest bottle for
  /// an older macOS release on the same architecture, else `all`.
  pub fn tag_for(&self, platform: &PlatformDescriptor) -> Option<&str> {
    if let Some(exact) = platform_tag(platform)
      && let Some((tag, _)) = self.sha256.get_key_value(&exact)
    {
      return Some(tag);
    }

    if platform.os == OsFamily::MacOs {
      let older = self
        .sha256
        .keys()
        .filter_map(|tag| {
          let release = match platform.arch {
            Arch::Aarch64 => tag.strip_prefix(ARM64_PREFIX)?,
            Arch::X86_64 if tag.starts_with(ARM64_PREFIX) => return None,
            Arch::X86_64 => tag.as_str(),
          };
          let ordinal = macos_release_ordinal(release)?;
          (ordinal <= platform.os_version).then_some((ordinal, tag.as_str()))
        })
        .max_by_key(|(ordinal, _)| *ordinal);
      if let Some((_, tag)) = older {
        return Some(tag);
      }
    }

    self.sha256.get_key_value("all").map(|(tag, _)| tag.as_str())
  }

  /// Pick the bottle of `name` at `identity` for `platform`.
  pub fn choose(&self, name: &str, identity: &BuildIdentity, platform: &PlatformDescriptor) -> Option<BottleChoice> {
    let tag = self.tag_for(platform)?;
    let sha256 = self.sha256.get(tag)?.clone();

    // Tap-qualified recipes are bottled under their short name.
    let short = name.rsplit('/').next().unwrap_or(name);
    let rebuild = if self.rebuild > 0 {
      format!("{}.", self.rebuild)
    } else {
      String::new()
    };
    let file_name = format!("{short}-{identity}.{tag}.bottle.{rebuild}tar.gz");

    Some(BottleChoice {
      tag: tag.to_string(),
      url: format!("{}/{file_name}", self.root_url.trim_end_matches('/')),
      file_name,
      sha256,
    })
  }
}
