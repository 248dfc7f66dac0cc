//! Package version ordering and constraint matching.
//!
//! Recipe versions are usually semver-shaped (`0.40.0`) but not always
//! (`2024a`, `1.2`, `9e`). Comparison tries semver first and falls back to a
//! segment-wise comparison where numeric runs compare numerically.

use std::cmp::Ordering;
use std::fmt;

use semver::{Version, VersionReq};
use serde::{Deserialize, Serialize};

/// The identity of one build of a package: version plus rebuild counter.
///
/// Identities are totally ordered; an installed package is never replaced by a
/// lower identity. Equality follows the ordering, so `v1.0` equals `1.0.0`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildIdentity {
  pub version: String,
  pub revision: u32,
}

impl BuildIdentity {
  pub fn new(version: &str, revision: u32) -> Self {
    Self {
      version: version.to_string(),
      revision,
    }
  }
}

impl PartialEq for BuildIdentity {
  fn eq(&self, other: &Self) -> bool {
    self.cmp(other) == Ordering::Equal
  }
}

impl Eq for BuildIdentity {}

impl Ord for BuildIdentity {
  fn cmp(&self, other: &Self) -> Ordering {
    compare_versions(&self.version, &other.version).then(self.revision.cmp(&other.revision))
  }
}

impl PartialOrd for BuildIdentity {
  fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
    Some(self.cmp(other))
  }
}

impl fmt::Display for BuildIdentity {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    if self.revision == 0 {
      write!(f, "{}", self.version)
    } else {
      write!(f, "{}_{}", self.version, self.revision)
    }
  }
}

/// Parse a version leniently: strips a leading `v` and pads `1` / `1.2` to
/// three components.
pub fn parse_lenient(raw: &str) -> Option<Version> {
  let trimmed = raw.trim().trim_start_matches('v');
  if let Ok(v) = Version::parse(trimmed) {
    return Some(v);
  }

  let (core, rest) = match trimmed.find(['-', '+']) {
    Some(idx) => trimmed.split_at(idx),
    None => (trimmed, ""),
  };
  let parts: Vec<&str> = core.split('.').collect();
  if parts.is_empty() || parts.len() > 2 || parts.iter().any(|p| p.is_empty() || !p.bytes().all(|b| b.is_ascii_digit())) {
    return None;
  }

  let mut padded = parts.join(".");
  for _ in parts.len()..3 {
    padded.push_str(".0");
  }
  padded.push_str(rest);
  Version::parse(&padded).ok()
}

/// Total order over version strings.
pub fn compare_versions(a: &str, b: &str) -> Ordering {
  if let (Some(va), Some(vb)) = (parse_lenient(a), parse_lenient(b)) {
    return va.cmp(&vb);
  }
  compare_segments(a, b)
}

/// Whether `version` satisfies `req`. Versions that cannot be read as semver
/// never satisfy a constraint.
pub fn satisfies(version: &str, req: &VersionReq) -> bool {
  parse_lenient(version).is_some_and(|v| req.matches(&v))
}

fn compare_segments(a: &str, b: &str) -> Ordering {
  let left = segments(a);
  let right = segments(b);

  for (l, r) in left.iter().zip(right.iter()) {
    let ord = match (l, r) {
      (Segment::Num(x), Segment::Num(y)) => x.cmp(y),
      (Segment::Text(x), Segment::Text(y)) => x.cmp(y),
      (Segment::Num(_), Segment::Text(_)) => Ordering::Greater,
      (Segment::Text(_), Segment::Num(_)) => Ordering::Less,
    };
    if ord != Ordering::Equal {
      return ord;
    }
  }

  left.len().cmp(&right.len())
}

#[derive(Debug, PartialEq, Eq)]
enum Segment {
  Num(u64),
  Text(String),
}

fn segments(raw: &str) -> Vec<Segment> {
  let mut out = Vec::new();
  let mut current = String::new();
  let mut numeric = false;

  let flush = |current: &mut String, numeric: bool, out: &mut Vec<Segment>| {
    if current.is_empty() {
      return;
    }
    let seg = if numeric {
      current.parse().map(Segment::Num).unwrap_or_else(|_| Segment::Text(current.clone()))
    } else {
      Segment::Text(current.clone())
    };
    out.push(seg);
    current.clear();
  };

  for ch in raw.trim_start_matches('v').chars() {
    if !ch.is_ascii_alphanumeric() {
      flush(&mut current, numeric, &mut out);
      continue;
    }
    let is_digit = ch.is_ascii_digit();
    if !current.is_empty() && is_digit != numeric {
      flush(&mut current, numeric, &mut out);
    }
    numeric = is_digit;
    current.push(ch);
  }
  flush(&mut current, numeric, &mut out);

  out
}
