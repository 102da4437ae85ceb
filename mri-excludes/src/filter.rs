use anyhow::{anyhow, Result};
use globset::{Glob, GlobMatcher};
use regex::Regex;

/// Selects suites by name: a glob when the pattern compiles as one,
/// otherwise a regex.
#[derive(Debug, Clone)]
pub enum SuiteFilter {
  All,
  Glob(GlobMatcher),
  Regex(Regex),
}

pub fn build_filter(pattern: Option<&str>) -> Result<SuiteFilter> {
  let Some(raw) = pattern else {
    return Ok(SuiteFilter::All);
  };
  if let Ok(glob) = Glob::new(raw) {
    return Ok(SuiteFilter::Glob(glob.compile_matcher()));
  }
  let regex = Regex::new(raw).map_err(|err| anyhow!("invalid suite filter '{raw}': {err}"))?;
  Ok(SuiteFilter::Regex(regex))
}

impl SuiteFilter {
  pub fn matches(&self, suite: &str) -> bool {
    match self {
      SuiteFilter::All => true,
      SuiteFilter::Glob(glob) => glob.is_match(suite),
      SuiteFilter::Regex(re) => re.is_match(suite),
    }
  }
}
