use serde::{Deserialize, Serialize};
use std::fmt;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, LoadError>;

/// Where an exclusion (or a malformed record) was declared.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SourceLocation {
  pub unit: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub line: Option<usize>,
}

impl SourceLocation {
  pub fn new(unit: impl Into<String>, line: Option<usize>) -> Self {
    Self {
      unit: unit.into(),
      line,
    }
  }

  /// Location for entries built in memory rather than read from a unit.
  pub fn inline() -> Self {
    Self::new("<inline>", None)
  }
}

impl Default for SourceLocation {
  fn default() -> Self {
    Self::inline()
  }
}

impl fmt::Display for SourceLocation {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self.line {
      Some(line) => write!(f, "{}:{line}", self.unit),
      None => f.write_str(&self.unit),
    }
  }
}

#[derive(Debug, Error)]
pub enum LoadError {
  #[error("read {}: {source}", .path.display())]
  Io {
    path: PathBuf,
    #[source]
    source: io::Error,
  },
  #[error("{location}: {message}")]
  Malformed {
    location: SourceLocation,
    message: String,
  },
  #[error("duplicate exclusion for {suite}#{test_id} at {second} (first declared at {first})")]
  DuplicateTestId {
    suite: String,
    test_id: String,
    first: SourceLocation,
    second: SourceLocation,
  },
  #[error("suite {suite} is defined by both {} and {}", .first.display(), .second.display())]
  DuplicateSuite {
    suite: String,
    first: PathBuf,
    second: PathBuf,
  },
  #[error("excludes directory {} does not exist or is not a directory", .0.display())]
  InvalidRoot(PathBuf),
}

impl LoadError {
  pub(crate) fn malformed(unit: &str, line: Option<usize>, message: impl Into<String>) -> Self {
    LoadError::Malformed {
      location: SourceLocation::new(unit, line),
      message: message.into(),
    }
  }
}
