use crate::Source;
use anyhow::{bail, Context, Result};
use clap::Args;
use exclusion_registry::{
  discover_units, parse_unit, render_record, suite_name_for, DefinitionFormat, Record,
};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::info;

pub const DEFAULT_REASON: &str = "needs investigation";

#[derive(Args, Debug)]
pub struct AddArgs {
  /// Suite (test class) name; `::` separators map to directories.
  pub suite: String,
  /// Test identifier to exclude.
  pub test: String,
  /// Why the test is excluded.
  #[arg(long, default_value = DEFAULT_REASON)]
  pub reason: String,
}

/// Rejects suite names that would not map back to themselves on disk.
///
/// Each `::` segment becomes one path component. Hidden units are never
/// discovered, so a segment may not start with `.`.
fn check_suite_name(suite: &str) -> Result<()> {
  for segment in suite.split("::") {
    if segment.is_empty() {
      bail!("invalid suite name `{suite}`: empty segment");
    }
    if segment.contains(['/', '\\']) {
      bail!("invalid suite name `{suite}`: `{segment}` contains a path separator");
    }
    if segment.starts_with('.') {
      bail!("invalid suite name `{suite}`: `{segment}` starts with `.`");
    }
  }
  Ok(())
}

/// Path of the line-format unit a new suite gets.
fn unit_path_for(root: &Path, suite: &str) -> PathBuf {
  let mut path = root.to_path_buf();
  let mut segments = suite.split("::").peekable();
  while let Some(segment) = segments.next() {
    if segments.peek().is_some() {
      path.push(segment);
    } else {
      path.push(format!("{segment}.rb"));
    }
  }
  path
}

pub fn run_cli(source: &Source, args: AddArgs) -> Result<ExitCode> {
  check_suite_name(&args.suite)?;

  let loaded = source.load()?;
  if let Some(reason) = loaded.registry.is_excluded(&args.suite, &args.test) {
    bail!(
      "{}#{} is already excluded ({reason})",
      args.suite,
      args.test
    );
  }

  let units = discover_units(&source.excludes_dir)?;
  let existing = units.into_iter().find(|unit| unit.suite == args.suite);
  let path = match existing {
    Some(unit) if unit.format == DefinitionFormat::Manifest => bail!(
      "suite {} is defined by {}; edit it directly",
      args.suite,
      unit.path.display()
    ),
    Some(unit) => unit.path,
    None => unit_path_for(&source.excludes_dir, &args.suite),
  };
  if suite_name_for(&source.excludes_dir, &path).as_deref() != Some(args.suite.as_str()) {
    bail!(
      "{} would not be read back as suite {}",
      path.display(),
      args.suite
    );
  }

  let mut contents = match fs::read_to_string(&path) {
    Ok(raw) => raw,
    Err(err) if err.kind() == std::io::ErrorKind::NotFound => String::new(),
    Err(err) => return Err(err).with_context(|| format!("read {}", path.display())),
  };
  // Re-check the unit itself: best-effort loading may have skipped it.
  let label = path.display().to_string();
  let records = parse_unit(&label, &contents)?;
  if records.iter().any(|record| record.test_id == args.test) {
    bail!("{}#{} is already excluded in {label}", args.suite, args.test);
  }

  if !contents.is_empty() && !contents.ends_with('\n') {
    contents.push('\n');
  }
  contents.push_str(&render_record(&Record::new(args.test.as_str(), args.reason.as_str())));
  contents.push('\n');

  if let Some(parent) = path.parent() {
    fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
  }
  fs::write(&path, contents).with_context(|| format!("write {}", path.display()))?;
  info!(suite = %args.suite, test = %args.test, "added exclusion to {label}");
  println!("excluded {}#{} in {label}", args.suite, args.test);
  Ok(ExitCode::SUCCESS)
}
