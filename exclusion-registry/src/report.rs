use crate::registry::ExclusionRegistry;
use anyhow::Context;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::sync::Arc;

pub const REPORT_SCHEMA_VERSION: u32 = 1;

/// What a runner should do with one test.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision<'a> {
  Run,
  Skip { reason: &'a str },
}

impl<'a> Decision<'a> {
  pub fn is_skip(&self) -> bool {
    matches!(self, Decision::Skip { .. })
  }

  pub fn reason(&self) -> Option<&'a str> {
    match *self {
      Decision::Run => None,
      Decision::Skip { reason } => Some(reason),
    }
  }
}

/// Records every skip decision made during a run.
///
/// Shared by reference between workers; tests seen more than once are
/// counted once.
#[derive(Debug)]
pub struct SkipLedger {
  registry: Arc<ExclusionRegistry>,
  /// `(suite, test_id)` → whether it was skipped.
  seen: Mutex<BTreeMap<(String, String), bool>>,
}

impl SkipLedger {
  pub fn new(registry: Arc<ExclusionRegistry>) -> Self {
    Self {
      registry,
      seen: Mutex::new(BTreeMap::new()),
    }
  }

  pub fn registry(&self) -> &ExclusionRegistry {
    &self.registry
  }

  pub fn decide(&self, suite: &str, test_id: &str) -> Decision<'_> {
    let reason = self.registry.is_excluded(suite, test_id);
    self
      .seen
      .lock()
      .insert((suite.to_string(), test_id.to_string()), reason.is_some());
    match reason {
      Some(reason) => Decision::Skip { reason },
      None => Decision::Run,
    }
  }

  /// Builds the report. Exclusions never passed to [`SkipLedger::decide`]
  /// are listed as stale.
  pub fn finish(&self) -> SkipReport {
    let seen = self.seen.lock();
    let mut skipped = Vec::new();
    let mut ran = 0;
    for ((suite, test_id), was_skipped) in seen.iter() {
      if !*was_skipped {
        ran += 1;
        continue;
      }
      let reason = self
        .registry
        .is_excluded(suite, test_id)
        .unwrap_or_default()
        .to_string();
      skipped.push(SkippedTest {
        suite: suite.clone(),
        test_id: test_id.clone(),
        reason,
      });
    }

    let mut stale: Vec<StaleExclusion> = self
      .registry
      .entries()
      .filter(|entry| !seen.contains_key(&(entry.suite.to_string(), entry.test_id.to_string())))
      .map(|entry| StaleExclusion {
        suite: entry.suite.to_string(),
        test_id: entry.test_id.to_string(),
        reason: entry.reason.to_string(),
        declared_at: entry.location.to_string(),
      })
      .collect();
    stale.sort_by(|a, b| (&a.suite, &a.test_id).cmp(&(&b.suite, &b.test_id)));

    SkipReport {
      schema_version: REPORT_SCHEMA_VERSION,
      summary: SkipSummary {
        considered: seen.len(),
        skipped: skipped.len(),
        ran,
        configured: self.registry.len(),
        stale: stale.len(),
      },
      skipped,
      stale,
    }
  }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SkipSummary {
  pub considered: usize,
  pub skipped: usize,
  pub ran: usize,
  pub configured: usize,
  pub stale: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SkippedTest {
  pub suite: String,
  pub test_id: String,
  pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StaleExclusion {
  pub suite: String,
  pub test_id: String,
  pub reason: String,
  pub declared_at: String,
}

/// Skip report for one run; lists are sorted by suite then test id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SkipReport {
  pub schema_version: u32,
  pub summary: SkipSummary,
  pub skipped: Vec<SkippedTest>,
  pub stale: Vec<StaleExclusion>,
}

impl SkipReport {
  pub fn to_json_pretty(&self) -> anyhow::Result<String> {
    serde_json::to_string_pretty(self).context("format JSON report")
  }

  /// Writes pretty JSON to `path`, creating parent directories as needed.
  pub fn write_json(&self, path: &Path) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
      fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
    }

    let file = fs::File::create(path).with_context(|| format!("create {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    self
      .write_json_to(&mut writer)
      .with_context(|| format!("write report to {}", path.display()))?;
    writer
      .flush()
      .with_context(|| format!("flush {}", path.display()))
  }

  pub fn write_json_to<W: Write>(&self, writer: &mut W) -> anyhow::Result<()> {
    serde_json::to_writer_pretty(&mut *writer, self).context("write JSON report")?;
    writeln!(writer).context("write JSON report")?;
    Ok(())
  }

  pub fn write_json_to_stdout(&self) -> anyhow::Result<()> {
    let stdout = io::stdout();
    let mut handle = stdout.lock();
    self.write_json_to(&mut handle)
  }
}
