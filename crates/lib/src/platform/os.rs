use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::PlatformParseError;

/// Operating system families a recipe can target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OsFamily {
  Linux,
  #[serde(alias = "darwin")]
  MacOs,
  Windows,
}

impl OsFamily {
  /// Detect the current operating system family at runtime
  pub fn current() -> Option<Self> {
    match std::env::consts::OS {
      "linux" => Some(Self::Linux),
      "macos" => Some(Self::MacOs),
      "windows" => Some(Self::Windows),
      _ => None,
    }
  }

  /// Returns the lowercase string identifier for this OS family
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Linux => "linux",
      Self::MacOs => "macos",
      Self::Windows => "windows",
    }
  }

  /// Best-effort detection of the running OS version as an ordinal.
  ///
  /// macOS reports its major release (13 for Ventura), Linux its kernel major.
  /// Returns 0 when the version cannot be determined.
  pub fn detect_version(&self) -> u32 {
    let raw = match self {
      Self::MacOs => std::process::Command::new("/usr/bin/sw_vers")
        .arg("-productVersion")
        .output()
        .ok()
        .filter(|out| out.status.success())
        .map(|out| String::from_utf8_lossy(&out.stdout).trim().to_string()),
      Self::Linux => std::fs::read_to_string("/proc/sys/kernel/osrelease").ok(),
      Self::Windows => None,
    };

    let ordinal = raw.as_deref().and_then(leading_ordinal).unwrap_or(0);
    debug!(os = %self, raw = ?raw, ordinal, "detected os version");
    ordinal
  }
}

impl fmt::Display for OsFamily {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.as_str())
  }
}

impl FromStr for OsFamily {
  type Err = PlatformParseError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_ascii_lowercase().as_str() {
      "linux" => Ok(Self::Linux),
      "macos" | "darwin" | "osx" | "mac" => Ok(Self::MacOs),
      "windows" => Ok(Self::Windows),
      other => Err(PlatformParseError::UnknownOs(other.to_string())),
    }
  }
}

/// macOS release names and their major version ordinals.
const MACOS_RELEASES: &[(&str, u32)] = &[
  ("catalina", 10),
  ("big_sur", 11),
  ("monterey", 12),
  ("ventura", 13),
  ("sonoma", 14),
  ("sequoia", 15),
  ("tahoe", 26),
];

/// Map a macOS release name (e.g. `ventura`) to its version ordinal.
pub fn macos_release_ordinal(name: &str) -> Option<u32> {
  let name = name.to_ascii_lowercase().replace(['-', ' '], "_");
  MACOS_RELEASES
    .iter()
    .find(|(release, _)| *release == name)
    .map(|(_, ordinal)| *ordinal)
}

/// The macOS release name for a version ordinal (`13` is `ventura`).
pub fn macos_release_name(ordinal: u32) -> Option<&'static str> {
  MACOS_RELEASES
    .iter()
    .find(|(_, o)| *o == ordinal)
    .map(|(release, _)| *release)
}

/// Parse an OS version given either as an ordinal (`13`, `13.4.1`) or as a
/// macOS release name (`ventura`).
pub fn parse_version_ordinal(raw: &str) -> Option<u32> {
  leading_ordinal(raw).or_else(|| macos_release_ordinal(raw))
}

fn leading_ordinal(raw: &str) -> Option<u32> {
  let digits: String = raw.trim().chars().take_while(|c| c.is_ascii_digit()).collect();
  digits.parse().ok()
}
