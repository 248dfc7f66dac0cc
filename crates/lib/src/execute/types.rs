//! Types for plan execution: entry states, failure policies, errors, the
//! final report and configuration.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::placeholder::PlaceholderError;
use crate::platform::paths::{downloads_dir, prefix_dir, work_dir};
use crate::receipt::ReceiptError;

/// Lifecycle state of one plan entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryState {
  Pending,
  Preparing,
  Building,
  Installing,
  Testing,
  Done,
  Failed,
  Skipped,
}

impl EntryState {
  pub fn is_terminal(&self) -> bool {
    matches!(self, Self::Done | Self::Failed | Self::Skipped)
  }

  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Pending => "pending",
      Self::Preparing => "preparing",
      Self::Building => "building",
      Self::Installing => "installing",
      Self::Testing => "testing",
      Self::Done => "done",
      Self::Failed => "failed",
      Self::Skipped => "skipped",
    }
  }
}

impl fmt::Display for EntryState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.as_str())
  }
}

/// What happens to the rest of the plan when an entry fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailurePolicy {
  /// Admit nothing new; running entries finish; everything unstarted is skipped.
  #[default]
  StopOnFirstFailure,
  /// Skip only the transitive dependents of a failed entry.
  BestEffort,
}

impl FromStr for FailurePolicy {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "stop" | "stop-on-first-failure" => Ok(Self::StopOnFirstFailure),
      "best-effort" | "continue" => Ok(Self::BestEffort),
      other => Err(format!("unknown failure policy '{other}' (expected stop or best-effort)")),
    }
  }
}

impl fmt::Display for FailurePolicy {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::StopOnFirstFailure => write!(f, "stop-on-first-failure"),
      Self::BestEffort => write!(f, "best-effort"),
    }
  }
}

/// Why an entry was skipped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "package")]
pub enum SkipReason {
  /// A dependency failed (or was itself skipped).
  DependencyFailed(String),
  /// Stop-on-first-failure halted admissions.
  Halted,
}

impl fmt::Display for SkipReason {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::DependencyFailed(name) => write!(f, "dependency {name} failed"),
      Self::Halted => write!(f, "halted after an earlier failure"),
    }
  }
}

/// Errors scoped to a single entry.
#[derive(Debug, Error)]
pub enum ExecuteError {
  #[error("placeholder error: {0}")]
  Placeholder(#[from] PlaceholderError),

  #[error("fetch failed for {url}: {message}")]
  FetchFailed { url: String, message: String },

  #[error("hash mismatch for {url}: expected {expected}, got {actual}")]
  HashMismatch {
    url: String,
    expected: String,
    actual: String,
  },

  /// A build or install step exited non-zero.
  #[error("command failed with exit code {code:?}: {cmd}")]
  CmdFailed {
    cmd: String,
    code: Option<i32>,
    stdout: String,
    stderr: String,
  },

  /// The post-install test failed.
  #[error("test failed: {0}")]
  TestFailed(Box<ExecuteError>),

  #[error("inreplace failed on {path}: {message}")]
  Inreplace { path: String, message: String },

  #[error("cannot install {path}: {message}")]
  InstallFile { path: String, message: String },

  #[error("failed to spawn {program}: {source}")]
  Spawn {
    program: String,
    #[source]
    source: std::io::Error,
  },

  #[error("io error: {0}")]
  Io(#[from] std::io::Error),

  #[error("receipt error: {0}")]
  Receipt(#[from] ReceiptError),

  #[error("entry task panicked: {0}")]
  Panicked(String),
}

impl ExecuteError {
  /// Captured `(stdout, stderr)` of the failing command, if any.
  pub fn captured_output(&self) -> Option<(&str, &str)> {
    match self {
      Self::CmdFailed { stdout, stderr, .. } => Some((stdout, stderr)),
      Self::TestFailed(inner) => inner.captured_output(),
      _ => None,
    }
  }

  pub fn is_test_failure(&self) -> bool {
    matches!(self, Self::TestFailed(_))
  }
}

/// The terminal outcome of one entry.
#[derive(Debug, Serialize)]
pub struct EntryReport {
  pub name: String,
  pub state: EntryState,
  /// Every state the entry passed through, in order, ending with `state`.
  pub history: Vec<EntryState>,
  #[serde(serialize_with = "serialize_error")]
  pub error: Option<ExecuteError>,
  pub skip_reason: Option<SkipReason>,
  #[serde(with = "duration_secs")]
  pub duration: Duration,
}

fn serialize_error<S: serde::Serializer>(error: &Option<ExecuteError>, serializer: S) -> Result<S::Ok, S::Error> {
  match error {
    Some(e) => serializer.serialize_some(&e.to_string()),
    None => serializer.serialize_none(),
  }
}

mod duration_secs {
  use std::time::Duration;

  pub fn serialize<S: serde::Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64(duration.as_secs_f64())
  }
}

impl EntryReport {
  pub(crate) fn skipped(name: &str, reason: SkipReason) -> Self {
    Self {
      name: name.to_string(),
      state: EntryState::Skipped,
      history: vec![EntryState::Pending, EntryState::Skipped],
      error: None,
      skip_reason: Some(reason),
      duration: Duration::ZERO,
    }
  }

  pub(crate) fn failed(name: &str, error: ExecuteError) -> Self {
    Self {
      name: name.to_string(),
      state: EntryState::Failed,
      history: vec![EntryState::Pending, EntryState::Failed],
      error: Some(error),
      skip_reason: None,
      duration: Duration::ZERO,
    }
  }
}

/// The outcome of executing a plan: one report per entry, in plan order.
#[derive(Debug, Default, Serialize)]
pub struct ExecutionReport {
  pub entries: Vec<EntryReport>,
}

impl ExecutionReport {
  pub fn get(&self, name: &str) -> Option<&EntryReport> {
    self.entries.iter().find(|e| e.name == name)
  }

  pub fn state_of(&self, name: &str) -> Option<EntryState> {
    self.get(name).map(|e| e.state)
  }

  pub fn is_success(&self) -> bool {
    self.entries.iter().all(|e| e.state == EntryState::Done)
  }

  pub fn count(&self, state: EntryState) -> usize {
    self.entries.iter().filter(|e| e.state == state).count()
  }

  pub fn failed(&self) -> impl Iterator<Item = &EntryReport> {
    self.entries.iter().filter(|e| e.state == EntryState::Failed)
  }
}

/// Configuration for plan execution.
#[derive(Debug, Clone)]
pub struct ExecuteConfig {
  /// Maximum number of entries executing at once.
  pub parallelism: usize,

  pub policy: FailurePolicy,

  /// Shell for `shell` steps. If None, `/bin/sh` (Unix) or PowerShell (Windows).
  pub shell: Option<String>,

  /// Root holding every package's opt prefix.
  pub prefix_root: PathBuf,

  /// Parent of the per-entry private work directories.
  pub work_root: PathBuf,

  /// Download cache for sources and patches.
  pub downloads_dir: PathBuf,

  /// Fetch, verify and unpack sources before building.
  pub fetch_sources: bool,

  /// Pour a matching bottle instead of building, when the recipe has one.
  pub pour_bottles: bool,

  /// Whether a failed test also fails the entry's dependents.
  pub tests_block_dependents: bool,

  /// `PATH` entries placed after dependency `bin` directories.
  pub base_path: String,
}

impl Default for ExecuteConfig {
  fn default() -> Self {
    Self {
      parallelism: num_cpus(),
      policy: FailurePolicy::default(),
      shell: None,
      prefix_root: prefix_dir(),
      work_root: work_dir(),
      downloads_dir: downloads_dir(),
      fetch_sources: true,
      pour_bottles: true,
      tests_block_dependents: false,
      base_path: default_base_path().to_string(),
    }
  }
}

fn num_cpus() -> usize {
  std::thread::available_parallelism().map(|p| p.get()).unwrap_or(4)
}

#[cfg(unix)]
fn default_base_path() -> &'static str {
  "/usr/local/bin:/usr/bin:/bin:/usr/sbin:/sbin"
}

#[cfg(windows)]
fn default_base_path() -> &'static str {
  r"C:\Windows\System32;C:\Windows"
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn policy_parsing() {
    assert_eq!("stop".parse::<FailurePolicy>().unwrap(), FailurePolicy::StopOnFirstFailure);
    assert_eq!("best-effort".parse::<FailurePolicy>().unwrap(), FailurePolicy::BestEffort);
    assert!("yolo".parse::<FailurePolicy>().is_err());
    assert_eq!(FailurePolicy::BestEffort.to_string(), "best-effort");
  }

  #[test]
  fn terminal_states() {
    assert!(EntryState::Done.is_terminal());
    assert!(EntryState::Skipped.is_terminal());
    assert!(!EntryState::Testing.is_terminal());
  }

  #[test]
  fn captured_output_through_test_failure() {
    let err = ExecuteError::TestFailed(Box::new(ExecuteError::CmdFailed {
      cmd: "mpv --version".to_string(),
      code: Some(1),
      stdout: "out".to_string(),
      stderr: "err".to_string(),
    }));
    assert!(err.is_test_failure());
    assert_eq!(err.captured_output(), Some(("out", "err")));
  }

  #[test]
  fn report_queries() {
    let report = ExecutionReport {
      entries: vec![EntryReport::skipped("x", SkipReason::Halted)],
    };
    assert_eq!(report.state_of("x"), Some(EntryState::Skipped));
    assert!(!report.is_success());
    assert_eq!(report.count(EntryState::Skipped), 1);
    assert!(ExecutionReport::default().is_success());
  }

  #[test]
  fn default_config() {
    let config = ExecuteConfig::default();
    assert!(config.parallelism >= 1);
    assert_eq!(config.policy, FailurePolicy::StopOnFirstFailure);
    assert!(!config.tests_block_dependents);
  }
}
