//! CLI output formatting utilities.
//!
//! Colored status lines, entry-state symbols and JSON output.

use std::time::Duration;

use anyhow::Context;
use owo_colors::{OwoColorize, Stream};

use cellar_lib::execute::EntryState;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputFormat {
  #[default]
  Text,
  Json,
}

impl OutputFormat {
  pub fn from_flag(json: bool) -> Self {
    if json { Self::Json } else { Self::Text }
  }

  pub fn is_json(self) -> bool {
    matches!(self, OutputFormat::Json)
  }
}

pub mod symbols {
  pub const SUCCESS: &str = "✓";
  pub const ERROR: &str = "✗";
  pub const WARNING: &str = "⚠";
  pub const INFO: &str = "•";
  pub const ARROW: &str = "→";
  pub const SKIP: &str = "-";
}

/// Whole milliseconds, rendered by humantime (`1s 500ms`).
pub fn format_duration(duration: Duration) -> String {
  let millis = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
  humantime::format_duration(Duration::from_millis(millis)).to_string()
}

pub fn state_symbol(state: EntryState) -> String {
  match state {
    EntryState::Done => symbols::SUCCESS
      .if_supports_color(Stream::Stdout, |s| s.green())
      .to_string(),
    EntryState::Failed => symbols::ERROR.if_supports_color(Stream::Stdout, |s| s.red()).to_string(),
    EntryState::Skipped => symbols::SKIP
      .if_supports_color(Stream::Stdout, |s| s.yellow())
      .to_string(),
    _ => symbols::INFO.to_string(),
  }
}

pub fn print_success(message: &str) {
  println!(
    "{} {}",
    symbols::SUCCESS.if_supports_color(Stream::Stdout, |s| s.green()),
    message
  );
}

pub fn print_error(message: &str) {
  eprintln!(
    "{} {}",
    symbols::ERROR.if_supports_color(Stream::Stderr, |s| s.red()),
    message.if_supports_color(Stream::Stderr, |s| s.red())
  );
}

pub fn print_warning(message: &str) {
  eprintln!(
    "{} {}",
    symbols::WARNING.if_supports_color(Stream::Stderr, |s| s.yellow()),
    message.if_supports_color(Stream::Stderr, |s| s.yellow())
  );
}

pub fn print_info(message: &str) {
  println!(
    "{} {}",
    symbols::INFO.if_supports_color(Stream::Stdout, |s| s.blue()),
    message
  );
}

pub fn print_stat(label: &str, value: &str) {
  println!("  {}: {}", label.if_supports_color(Stream::Stdout, |s| s.dimmed()), value);
}

/// Print the last `max_lines` lines of captured command output, indented.
pub fn print_tail(label: &str, output: &str, max_lines: usize) {
  let lines: Vec<&str> = output.lines().collect();
  if lines.is_empty() {
    return;
  }
  eprintln!("    {}:", label.if_supports_color(Stream::Stderr, |s| s.dimmed()));
  let skip = lines.len().saturating_sub(max_lines);
  if skip > 0 {
    eprintln!("      ... ({skip} earlier lines)");
  }
  for line in &lines[skip..] {
    eprintln!("      {line}");
  }
}

pub fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
  let json = serde_json::to_string_pretty(value).context("Failed to serialize to JSON")?;
  println!("{}", json);
  Ok(())
}
