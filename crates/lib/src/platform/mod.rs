//! Target platform description, detection and conditional dependency resolution.

pub mod arch;
pub mod os;
pub mod paths;
pub mod predicate;
pub mod resolve;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use arch::Arch;
pub use os::OsFamily;
pub use predicate::PlatformPredicate;
pub use resolve::{ResolvedDependency, ResolvedDependencySet, StepSchedule, resolve, resolve_steps};

/// Errors raised when a platform description cannot be parsed or detected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlatformParseError {
  #[error("unknown operating system: {0}")]
  UnknownOs(String),

  #[error("unknown architecture: {0}")]
  UnknownArch(String),

  #[error("invalid os version: {0}")]
  InvalidVersion(String),

  #[error("malformed platform '{0}', expected <os>-<version>-<arch>")]
  Malformed(String),

  #[error("the current platform is not supported")]
  Unsupported,
}

/// The platform recipes are resolved against (e.g. `macos-13-aarch64`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PlatformDescriptor {
  pub os: OsFamily,
  pub os_version: u32,
  pub arch: Arch,
}

impl PlatformDescriptor {
  pub fn new(os: OsFamily, os_version: u32, arch: Arch) -> Self {
    Self { os, os_version, arch }
  }

  /// Detect the current platform at runtime.
  pub fn current() -> Result<Self, PlatformParseError> {
    let os = OsFamily::current().ok_or(PlatformParseError::Unsupported)?;
    let arch = Arch::current().ok_or(PlatformParseError::Unsupported)?;
    Ok(Self {
      os,
      os_version: os.detect_version(),
      arch,
    })
  }

  /// Returns the platform triple string (e.g. "macos-13-aarch64")
  pub fn triple(&self) -> String {
    format!("{}-{}-{}", self.os, self.os_version, self.arch)
  }
}

impl fmt::Display for PlatformDescriptor {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.triple())
  }
}

impl FromStr for PlatformDescriptor {
  type Err = PlatformParseError;

  /// Parses `<os>-<version>-<arch>`; the version may be a macOS release name.
  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let mut parts = s.splitn(2, '-');
    let os_raw = parts.next().filter(|p| !p.is_empty());
    let rest = parts.next();
    let (Some(os_raw), Some(rest)) = (os_raw, rest) else {
      return Err(PlatformParseError::Malformed(s.to_string()));
    };

    // Arch names contain underscores but never dashes, so split from the right.
    let (version_raw, arch_raw) = rest
      .rsplit_once('-')
      .ok_or_else(|| PlatformParseError::Malformed(s.to_string()))?;

    let os = os_raw.parse()?;
    let arch = arch_raw.parse()?;
    let os_version = os::parse_version_ordinal(version_raw)
      .ok_or_else(|| PlatformParseError::InvalidVersion(version_raw.to_string()))?;

    Ok(Self { os, os_version, arch })
  }
}
