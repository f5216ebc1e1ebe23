//! Variable placeholder parsing and substitution.
//!
//! Recipes reference build-environment variables with `${NAME}`. Plans are
//! built by substituting every such reference with its bound value, so a
//! single recipe can be reused across tool versions without edits.
//!
//! # Syntax
//!
//! - `${NAME}` - value of the build variable `NAME`
//!
//! Names consist of ASCII letters, digits and `_`.
//!
//! # Shell Variables
//!
//! A `$` that is not followed by `{` passes through unchanged, so shell
//! variables like `$HOME` and `$PATH` work naturally without any escaping.
//!
//! # Escaping
//!
//! Use `$${` to produce a literal `${` sequence, e.g. for shell parameter
//! expansion such as `$${HOME:-/root}`.
//!
//! # Example
//!
//! ```
//! use boxlua_lib::placeholder::{parse, Segment};
//!
//! let segments = parse("protoc-${VERSION}.zip:$HOME").unwrap();
//! assert_eq!(segments, vec![
//!     Segment::Literal("protoc-".to_string()),
//!     Segment::Variable("VERSION".to_string()),
//!     Segment::Literal(".zip:$HOME".to_string()),
//! ]);
//! ```

use std::collections::{BTreeMap, HashMap};

use thiserror::Error;

/// A segment of parsed text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
  /// Literal text (no placeholders)
  Literal(String),

  /// A `${NAME}` reference to be resolved
  Variable(String),
}

/// Errors that can occur during placeholder parsing or resolution.
#[derive(Debug, Clone, PartialEq, Eq, Error, serde::Serialize, serde::Deserialize)]
pub enum PlaceholderError {
  #[error("unclosed placeholder at position {0}")]
  Unclosed(usize),

  #[error("empty placeholder at position {0}")]
  Empty(usize),

  #[error("invalid variable name: '{0}'")]
  InvalidName(String),

  #[error("unresolved variable: {0}")]
  Unresolved(String),
}

/// Trait for resolving variable values during plan construction.
pub trait Resolver {
  /// Resolve a variable by name.
  fn resolve_var(&self, name: &str) -> Result<&str, PlaceholderError>;
}

impl Resolver for BTreeMap<String, String> {
  fn resolve_var(&self, name: &str) -> Result<&str, PlaceholderError> {
    self
      .get(name)
      .map(|s| s.as_str())
      .ok_or_else(|| PlaceholderError::Unresolved(name.to_string()))
  }
}

impl Resolver for HashMap<String, String> {
  fn resolve_var(&self, name: &str) -> Result<&str, PlaceholderError> {
    self
      .get(name)
      .map(|s| s.as_str())
      .ok_or_else(|| PlaceholderError::Unresolved(name.to_string()))
  }
}

/// Parse a string containing placeholders into segments.
///
/// # Errors
///
/// Returns an error if a placeholder is unclosed, empty, or names an invalid
/// variable.
pub fn parse(input: &str) -> Result<Vec<Segment>, PlaceholderError> {
  let mut segments = Vec::new();
  let mut literal = String::new();
  let mut chars = input.char_indices().peekable();

  while let Some((pos, ch)) = chars.next() {
    if ch != '$' {
      literal.push(ch);
      continue;
    }

    match chars.peek() {
      Some((_, '$')) => {
        chars.next(); // consume the second $

        match chars.peek() {
          Some((_, '{')) => {
            // Escaped: $${ -> ${ (literal)
            chars.next();
            literal.push_str("${");
          }
          _ => literal.push_str("$$"),
        }
      }
      Some((_, '{')) => {
        chars.next(); // consume the {

        if !literal.is_empty() {
          segments.push(Segment::Literal(std::mem::take(&mut literal)));
        }

        let mut name = String::new();
        let mut found_close = false;

        for (_, c) in chars.by_ref() {
          if c == '}' {
            found_close = true;
            break;
          }
          name.push(c);
        }

        if !found_close {
          return Err(PlaceholderError::Unclosed(pos));
        }
        if name.is_empty() {
          return Err(PlaceholderError::Empty(pos));
        }
        if !is_valid_name(&name) {
          return Err(PlaceholderError::InvalidName(name));
        }

        segments.push(Segment::Variable(name));
      }
      _ => {
        // Lone $, shell variables like $HOME pass through
        literal.push('$');
      }
    }
  }

  if !literal.is_empty() {
    segments.push(Segment::Literal(literal));
  }

  Ok(segments)
}

fn is_valid_name(name: &str) -> bool {
  name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Returns the names of all variables referenced by `input`, in order of
/// first appearance.
pub fn variables(input: &str) -> Result<Vec<String>, PlaceholderError> {
  let mut names: Vec<String> = Vec::new();
  for segment in parse(input)? {
    if let Segment::Variable(name) = segment
      && !names.contains(&name)
    {
      names.push(name);
    }
  }
  Ok(names)
}

/// Returns the placeholder text referencing the variable `name`.
pub fn reference(name: &str) -> String {
  format!("${{{}}}", name)
}

/// Substitute all placeholders in a string using the provided resolver.
///
/// # Errors
///
/// Returns an error if parsing fails or if any variable cannot be resolved.
pub fn substitute(input: &str, resolver: &impl Resolver) -> Result<String, PlaceholderError> {
  let segments = parse(input)?;
  substitute_segments(&segments, resolver)
}

/// Substitute placeholders in pre-parsed segments.
pub fn substitute_segments(segments: &[Segment], resolver: &impl Resolver) -> Result<String, PlaceholderError> {
  let mut result = String::new();

  for segment in segments {
    match segment {
      Segment::Literal(s) => result.push_str(s),
      Segment::Variable(name) => result.push_str(resolver.resolve_var(name)?),
    }
  }

  Ok(result)
}

#[cfg(test)]
mod tests {
  use super::*;

  fn vars(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
  }

  // ==========================================================================
  // Realistic Scenario Tests
  // ==========================================================================

  #[test]
  fn release_url_with_repeated_version() {
    let env = vars(&[("MKCERT_VERSION", "1.4.1")]);
    let url = "https://github.com/FiloSottile/mkcert/releases/download/v${MKCERT_VERSION}/mkcert-v${MKCERT_VERSION}-linux-amd64";

    assert_eq!(
      substitute(url, &env).unwrap(),
      "https://github.com/FiloSottile/mkcert/releases/download/v1.4.1/mkcert-v1.4.1-linux-amd64"
    );
  }

  #[test]
  fn shell_variables_pass_through() {
    let env = vars(&[("VERSION", "0.2.0")]);
    let cmd = "cd /tmp/ldnsd-${VERSION} && echo $HOME $PATH";

    assert_eq!(
      substitute(cmd, &env).unwrap(),
      "cd /tmp/ldnsd-0.2.0 && echo $HOME $PATH"
    );
  }

  #[test]
  fn escaped_placeholder_is_literal() {
    let env = vars(&[]);
    assert_eq!(
      substitute("echo $${HOME:-/root}", &env).unwrap(),
      "echo ${HOME:-/root}"
    );
  }

  #[test]
  fn double_dollar_without_brace_is_kept() {
    let env = vars(&[]);
    assert_eq!(substitute("echo $$", &env).unwrap(), "echo $$");
  }

  #[test]
  fn missing_variable_is_reported_by_name() {
    let env = vars(&[("OTHER", "x")]);
    let err = substitute("tar xzf ldnsd-${VERSION}.tar.gz", &env).unwrap_err();
    assert_eq!(err, PlaceholderError::Unresolved("VERSION".to_string()));
  }

  // ==========================================================================
  // Parse Errors
  // ==========================================================================

  #[test]
  fn unclosed_placeholder() {
    assert_eq!(parse("echo ${VERSION"), Err(PlaceholderError::Unclosed(5)));
  }

  #[test]
  fn empty_placeholder() {
    assert_eq!(parse("${}"), Err(PlaceholderError::Empty(0)));
  }

  #[test]
  fn invalid_name() {
    assert_eq!(
      parse("${HOME:-/root}"),
      Err(PlaceholderError::InvalidName("HOME:-/root".to_string()))
    );
  }

  // ==========================================================================
  // Helpers
  // ==========================================================================

  #[test]
  fn variables_deduplicates_in_order() {
    let names = variables("${B}-${A}-${B}").unwrap();
    assert_eq!(names, vec!["B".to_string(), "A".to_string()]);
  }

  #[test]
  fn reference_round_trips_through_parse() {
    assert_eq!(
      parse(&reference("VERSION")).unwrap(),
      vec![Segment::Variable("VERSION".to_string())]
    );
  }

  #[test]
  fn plain_text_is_single_literal() {
    assert_eq!(
      parse("apt update").unwrap(),
      vec![Segment::Literal("apt update".to_string())]
    );
    assert!(parse("").unwrap().is_empty());
  }
}
