use crate::filter::build_filter;
use crate::Source;
use anyhow::{Context, Result};
use clap::Args;
use serde::Serialize;
use std::process::ExitCode;

#[derive(Args, Debug)]
pub struct ListArgs {
  /// Only list suites matching this glob (or regex).
  #[arg(long, value_name = "PATTERN")]
  pub suite: Option<String>,

  /// Print JSON instead of text.
  #[arg(long)]
  pub json: bool,
}

#[derive(Debug, Serialize)]
struct SuiteListing<'a> {
  suite: &'a str,
  exclusions: Vec<ListedExclusion<'a>>,
}

#[derive(Debug, Serialize)]
struct ListedExclusion<'a> {
  test_id: &'a str,
  reason: &'a str,
}

pub fn run_cli(source: &Source, args: ListArgs) -> Result<ExitCode> {
  let filter = build_filter(args.suite.as_deref())?;
  let loaded = source.load()?;
  let registry = &loaded.registry;

  let listings: Vec<SuiteListing<'_>> = registry
    .suites()
    .filter(|suite| filter.matches(suite))
    .map(|suite| SuiteListing {
      suite,
      exclusions: registry
        .reasons_for(suite)
        .map(|(test_id, reason)| ListedExclusion { test_id, reason })
        .collect(),
    })
    .collect();

  if args.json {
    let json = serde_json::to_string_pretty(&listings).context("format JSON listing")?;
    println!("{json}");
    return Ok(ExitCode::SUCCESS);
  }

  for listing in &listings {
    println!("{} ({})", listing.suite, listing.exclusions.len());
    for exclusion in &listing.exclusions {
      println!("  {}: {}", exclusion.test_id, exclusion.reason);
    }
  }
  Ok(ExitCode::SUCCESS)
}
