use crate::Source;
use anyhow::{bail, Context, Result};
use clap::Args;
use exclusion_registry::SkipLedger;
use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

#[derive(Args, Debug)]
pub struct AuditArgs {
  /// File listing the tests a run encountered, one `Suite#test` per line.
  #[arg(long, value_name = "PATH")]
  pub seen: PathBuf,

  /// Write the JSON skip report here instead of stdout.
  #[arg(long, value_name = "PATH")]
  pub report: Option<PathBuf>,

  /// Exit non-zero when any exclusion was never encountered.
  #[arg(long)]
  pub fail_on_stale: bool,
}

/// Splits `Suite#test` on the first `#`; suite names never contain one.
///
/// Test ids are taken verbatim; only the suite half is trimmed.
fn parse_seen(raw: &str) -> Result<Vec<(&str, &str)>> {
  let mut out = Vec::new();
  for (idx, line) in raw.lines().enumerate() {
    let line = line.trim_end_matches('\r');
    if line.trim().is_empty() {
      continue;
    }
    let Some((suite, test)) = line.split_once('#') else {
      bail!("line {}: expected `Suite#test`, found `{line}`", idx + 1);
    };
    let suite = suite.trim();
    if suite.is_empty() || test.is_empty() {
      bail!("line {}: expected `Suite#test`, found `{line}`", idx + 1);
    }
    out.push((suite, test));
  }
  Ok(out)
}

pub fn run_cli(source: &Source, args: AuditArgs) -> Result<ExitCode> {
  let raw =
    fs::read_to_string(&args.seen).with_context(|| format!("read {}", args.seen.display()))?;
  let seen = parse_seen(&raw).with_context(|| format!("parse {}", args.seen.display()))?;
  let loaded = source.load()?;

  let ledger = SkipLedger::new(Arc::new(loaded.registry));
  for (suite, test) in seen {
    ledger.decide(suite, test);
  }
  let report = ledger.finish();

  match &args.report {
    Some(path) => report.write_json(path)?,
    None => report.write_json_to_stdout()?,
  }

  let summary = &report.summary;
  eprintln!(
    "{} considered, {} skipped, {} ran; {} of {} exclusions stale",
    summary.considered, summary.skipped, summary.ran, summary.stale, summary.configured
  );
  for stale in &report.stale {
    eprintln!(
      "stale: {}#{} ({})",
      stale.suite, stale.test_id, stale.declared_at
    );
  }

  Ok(if args.fail_on_stale && summary.stale > 0 {
    ExitCode::FAILURE
  } else {
    ExitCode::SUCCESS
  })
}
