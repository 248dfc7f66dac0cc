//! Platform predicates gating dependencies, environment mutations and steps.
//!
//! A predicate is declared inline in a recipe as a small table:
//!
//! ```toml
//! platform = { os = "linux" }                    # this OS family only
//! platform = { os = "macos", max_version = 13 }  # this OS family, version <= 13
//! platform = { os = "macos", max_version = "ventura" }
//! platform = { not_os = "macos" }                # every OS family but this one
//! platform = { arch = "aarch64" }                # this architecture only
//! ```
//!
//! A missing `platform` key means the declaration applies everywhere.

use serde::{Deserialize, Serialize};

use super::os::{OsFamily, parse_version_ordinal};
use super::{Arch, PlatformDescriptor};

/// A condition over the target platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "PredicateDecl", into = "PredicateDecl")]
pub enum PlatformPredicate {
  /// Matches one OS family.
  Os(OsFamily),
  /// Matches one OS family at or below a version ordinal.
  OsAtMost { os: OsFamily, max_version: u32 },
  /// Matches every OS family except one.
  NotOs(OsFamily),
  /// Matches one CPU architecture.
  Arch(Arch),
}

impl PlatformPredicate {
  /// Evaluate this predicate against a platform.
  pub fn matches(&self, platform: &PlatformDescriptor) -> bool {
    match *self {
      Self::Os(os) => platform.os == os,
      Self::OsAtMost { os, max_version } => platform.os == os && platform.os_version <= max_version,
      Self::NotOs(os) => platform.os != os,
      Self::Arch(arch) => platform.arch == arch,
    }
  }
}

/// Evaluate an optional predicate; `None` applies to every platform.
pub fn applies(predicate: Option<&PlatformPredicate>, platform: &PlatformDescriptor) -> bool {
  predicate.is_none_or(|p| p.matches(platform))
}

/// An OS version bound as written in a recipe: an ordinal or a release name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
enum VersionBound {
  Ordinal(u32),
  Name(String),
}

/// The table form of a predicate as it appears in recipe files.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct PredicateDecl {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  os: Option<OsFamily>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  max_version: Option<VersionBound>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  not_os: Option<OsFamily>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  arch: Option<Arch>,
}

impl TryFrom<PredicateDecl> for PlatformPredicate {
  type Error = String;

  fn try_from(decl: PredicateDecl) -> Result<Self, Self::Error> {
    match decl {
      PredicateDecl {
        os: Some(os),
        max_version: None,
        not_os: None,
        arch: None,
      } => Ok(Self::Os(os)),
      PredicateDecl {
        os: Some(os),
        max_version: Some(bound),
        not_os: None,
        arch: None,
      } => {
        let max_version = match bound {
          VersionBound::Ordinal(n) => n,
          VersionBound::Name(name) => {
            parse_version_ordinal(&name).ok_or_else(|| format!("unknown os version '{name}'"))?
          }
        };
        Ok(Self::OsAtMost { os, max_version })
      }
      PredicateDecl {
        os: None,
        max_version: None,
        not_os: Some(os),
        arch: None,
      } => Ok(Self::NotOs(os)),
      PredicateDecl {
        os: None,
        max_version: None,
        not_os: None,
        arch: Some(arch),
      } => Ok(Self::Arch(arch)),
      PredicateDecl {
        os: None,
        max_version: Some(_),
        ..
      } => Err("max_version requires os".to_string()),
      _ => Err("platform must be exactly one of: os, os + max_version, not_os, arch".to_string()),
    }
  }
}

impl From<PlatformPredicate> for PredicateDecl {
  fn from(predicate: PlatformPredicate) -> Self {
    match predicate {
      PlatformPredicate::Os(os) => Self {
        os: Some(os),
        ..Self::default()
      },
      PlatformPredicate::OsAtMost { os, max_version } => Self {
        os: Some(os),
        max_version: Some(VersionBound::Ordinal(max_version)),
        ..Self::default()
      },
      PlatformPredicate::NotOs(os) => Self {
        not_os: Some(os),
        ..Self::default()
      },
      PlatformPredicate::Arch(arch) => Self {
        arch: Some(arch),
        ..Self::default()
      },
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[derive(Debug, Deserialize)]
  struct Holder {
    platform: PlatformPredicate,
  }

  fn parse(src: &str) -> Result<PlatformPredicate, toml::de::Error> {
    toml::from_str::<Holder>(src).map(|h| h.platform)
  }

  fn ventura() -> PlatformDescriptor {
    PlatformDescriptor::new(OsFamily::MacOs, 13, Arch::Aarch64)
  }

  fn sonoma() -> PlatformDescriptor {
    PlatformDescriptor::new(OsFamily::MacOs, 14, Arch::Aarch64)
  }

  fn linux() -> PlatformDescriptor {
    PlatformDescriptor::new(OsFamily::Linux, 6, Arch::X86_64)
  }

  #[test]
  fn os_family_only() {
    let p = parse(r#"platform = { os = "linux" }"#).unwrap();
    assert_eq!(p, PlatformPredicate::Os(OsFamily::Linux));
    assert!(p.matches(&linux()));
    assert!(!p.matches(&ventura()));
  }

  #[test]
  fn os_version_bound_is_inclusive() {
    let p = parse(r#"platform = { os = "macos", max_version = "ventura" }"#).unwrap();
    assert_eq!(
      p,
      PlatformPredicate::OsAtMost {
        os: OsFamily::MacOs,
        max_version: 13
      }
    );
    assert!(p.matches(&ventura()));
    assert!(!p.matches(&sonoma()));
    assert!(!p.matches(&linux()));
  }

  #[test]
  fn not_os_excludes_one_family() {
    let p = parse(r#"platform = { not_os = "macos" }"#).unwrap();
    assert!(p.matches(&linux()));
    assert!(!p.matches(&ventura()));
  }

  #[test]
  fn arch_only() {
    let p = parse(r#"platform = { arch = "aarch64" }"#).unwrap();
    assert!(p.matches(&ventura()));
    assert!(!p.matches(&linux()));
  }

  #[test]
  fn mixed_keys_are_rejected() {
    assert!(parse(r#"platform = { os = "linux", not_os = "macos" }"#).is_err());
    assert!(parse(r#"platform = { max_version = 13 }"#).is_err());
    assert!(parse(r#"platform = { os = "macos", max_version = "leopard" }"#).is_err());
    assert!(parse(r#"platform = {}"#).is_err());
  }

  #[test]
  fn absent_predicate_applies_everywhere() {
    assert!(applies(None, &linux()));
    assert!(applies(None, &ventura()));
  }
}
