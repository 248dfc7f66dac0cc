//! Placeholder parsing and substitution in recipe steps.
//!
//! Step arguments, scripts, paths and environment values may reference values
//! that are only known once an entry is being executed.
//!
//! # Placeholder Formats
//!
//! - `$${prefix}` - the entry's install prefix (`<cellar>/<name>`)
//! - `$${src}` - the unpacked source directory
//! - `$${work}` - the entry's private work directory
//! - `$${name}` / `$${version}` - the recipe identity
//! - `$${cellar}` - the root holding every package prefix
//! - `$${opt:<package>}` - the install prefix of a dependency
//!
//! # Shell Variables
//!
//! Single `$` characters pass through unchanged, so `$HOME` and `$PATH` in a
//! shell step work without escaping.
//!
//! # Escaping
//!
//! `$$${` produces a literal `$${`.
//!
//! # Example
//!
//! ```
//! use cellar_lib::placeholder::{parse, Placeholder, Segment, Var};
//!
//! let segments = parse("$${opt:ffmpeg}/lib:$LD_LIBRARY_PATH").unwrap();
//! assert_eq!(segments, vec![
//!     Segment::Placeholder(Placeholder::Opt("ffmpeg".to_string())),
//!     Segment::Literal("/lib:$LD_LIBRARY_PATH".to_string()),
//! ]);
//! assert_eq!(parse("$${prefix}").unwrap(), vec![Segment::Placeholder(Placeholder::Var(Var::Prefix))]);
//! ```

use thiserror::Error;

/// A per-entry variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Var {
  Prefix,
  Src,
  Work,
  Name,
  Version,
  Cellar,
}

impl Var {
  fn from_name(name: &str) -> Option<Self> {
    match name {
      "prefix" => Some(Self::Prefix),
      "src" => Some(Self::Src),
      "work" => Some(Self::Work),
      "name" => Some(Self::Name),
      "version" => Some(Self::Version),
      "cellar" => Some(Self::Cellar),
      _ => None,
    }
  }

  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Prefix => "prefix",
      Self::Src => "src",
      Self::Work => "work",
      Self::Name => "name",
      Self::Version => "version",
      Self::Cellar => "cellar",
    }
  }
}

/// A parsed placeholder reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Placeholder {
  Var(Var),
  /// `$${opt:<package>}`
  Opt(String),
}

/// A segment of parsed text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
  Literal(String),
  Placeholder(Placeholder),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlaceholderError {
  #[error("unclosed placeholder at position {0}")]
  Unclosed(usize),

  #[error("unknown placeholder: {0}")]
  Unknown(String),

  #[error("malformed placeholder: {0}")]
  Malformed(String),

  #[error("'{0}' is not available in this context")]
  Unavailable(&'static str),

  #[error("'{0}' is not a dependency of this recipe")]
  UnknownDependency(String),
}

/// Resolves placeholder values for one entry.
pub trait Resolver {
  fn resolve_var(&self, var: Var) -> Result<&str, PlaceholderError>;

  fn resolve_opt(&self, package: &str) -> Result<&str, PlaceholderError>;
}

/// Parse a string containing placeholders into segments.
///
/// # Errors
///
/// Returns an error if a placeholder is unclosed, empty or unknown.
pub fn parse(input: &str) -> Result<Vec<Segment>, PlaceholderError> {
  let mut segments = Vec::new();
  let mut literal = String::new();
  let mut chars = input.char_indices().peekable();

  while let Some((pos, ch)) = chars.next() {
    if ch != '$' {
      literal.push(ch);
      continue;
    }

    if chars.peek().map(|(_, c)| *c) != Some('$') {
      literal.push('$');
      continue;
    }
    chars.next();

    match chars.peek().map(|(_, c)| *c) {
      Some('$') => {
        chars.next();
        if chars.peek().map(|(_, c)| *c) == Some('{') {
          chars.next();
          literal.push_str("$${");
        } else {
          literal.push_str("$$$");
        }
      }
      Some('{') => {
        chars.next();
        if !literal.is_empty() {
          segments.push(Segment::Literal(std::mem::take(&mut literal)));
        }

        let mut content = String::new();
        let mut closed = false;
        for (_, c) in chars.by_ref() {
          if c == '}' {
            closed = true;
            break;
          }
          content.push(c);
        }
        if !closed {
          return Err(PlaceholderError::Unclosed(pos));
        }

        segments.push(Segment::Placeholder(parse_content(&content)?));
      }
      _ => literal.push_str("$$"),
    }
  }

  if !literal.is_empty() {
    segments.push(Segment::Literal(literal));
  }

  Ok(segments)
}

fn parse_content(content: &str) -> Result<Placeholder, PlaceholderError> {
  if let Some(var) = Var::from_name(content) {
    return Ok(Placeholder::Var(var));
  }

  match content.split_once(':') {
    Some(("opt", package)) if !package.is_empty() => Ok(Placeholder::Opt(package.to_string())),
    Some(("opt", _)) => Err(PlaceholderError::Malformed(format!("missing package in '{content}'"))),
    _ if content.is_empty() => Err(PlaceholderError::Malformed("empty placeholder".to_string())),
    _ => Err(PlaceholderError::Unknown(content.to_string())),
  }
}

/// Parse and substitute in one step.
pub fn substitute(input: &str, resolver: &impl Resolver) -> Result<String, PlaceholderError> {
  let segments = parse(input)?;
  substitute_segments(&segments, resolver)
}

pub fn substitute_segments(segments: &[Segment], resolver: &impl Resolver) -> Result<String, PlaceholderError> {
  let mut result = String::new();

  for segment in segments {
    match segment {
      Segment::Literal(s) => result.push_str(s),
      Segment::Placeholder(Placeholder::Var(var)) => result.push_str(resolver.resolve_var(*var)?),
      Segment::Placeholder(Placeholder::Opt(package)) => result.push_str(resolver.resolve_opt(package)?),
    }
  }

  Ok(result)
}
