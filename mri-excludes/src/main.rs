use anyhow::{Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand};
use exclusion_registry::{load_dir, LoadMode, LoadOptions, Loaded};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::Level;

mod add;
mod audit;
mod filter;
mod list;

#[derive(Parser, Debug)]
#[command(version, about = "Check, query, audit and edit MRI test exclusions")]
struct Cli {
  /// Directory holding one definition unit per suite.
  #[arg(
    long,
    value_name = "DIR",
    default_value = "test/mri/excludes",
    global = true
  )]
  excludes_dir: PathBuf,

  /// How to treat definition units that fail to load.
  #[arg(long, value_enum, default_value_t = LoadMode::Strict, global = true)]
  mode: LoadMode,

  /// Increase log verbosity (-v for debug, -vv for trace).
  #[arg(short, long, action = ArgAction::Count, global = true)]
  verbose: u8,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Load every definition unit and report problems.
  Check(CheckArgs),
  /// Print the reason a test is excluded (exit 1 if it is not).
  Query(QueryArgs),
  /// List configured exclusions.
  List(list::ListArgs),
  /// Replay the tests a run encountered and report skips and stale exclusions.
  Audit(audit::AuditArgs),
  /// Add an exclusion to a suite's definition unit.
  Add(add::AddArgs),
}

#[derive(Args, Debug)]
struct CheckArgs {
  /// Exit non-zero when best-effort loading skipped any unit.
  #[arg(long)]
  deny_failures: bool,
}

#[derive(Args, Debug)]
struct QueryArgs {
  /// Suite (test class) name, e.g. `TestThread`.
  suite: String,
  /// Test identifier, e.g. `test_pseudo_encoding_inspect(UTF-16)`.
  test: String,
}

/// Where definitions come from and how to load them.
#[derive(Debug, Clone)]
pub struct Source {
  pub excludes_dir: PathBuf,
  pub options: LoadOptions,
}

impl Source {
  /// Skipped units are reported by the loader's `warn` events.
  pub fn load(&self) -> Result<Loaded> {
    load_dir(&self.excludes_dir, &self.options)
      .with_context(|| format!("load exclusions from {}", self.excludes_dir.display()))
  }
}

fn main() -> ExitCode {
  match try_main() {
    Ok(code) => code,
    Err(err) => {
      eprintln!("error: {err:#}");
      ExitCode::FAILURE
    }
  }
}

fn try_main() -> Result<ExitCode> {
  let cli = Cli::parse();
  init_tracing(cli.verbose);

  let source = Source {
    excludes_dir: cli.excludes_dir,
    options: LoadOptions::new(cli.mode),
  };
  match cli.command {
    Command::Check(args) => run_check(&source, args),
    Command::Query(args) => run_query(&source, args),
    Command::List(args) => list::run_cli(&source, args),
    Command::Audit(args) => audit::run_cli(&source, args),
    Command::Add(args) => add::run_cli(&source, args),
  }
}

fn init_tracing(verbose: u8) {
  let level = match verbose {
    0 => Level::WARN,
    1 => Level::DEBUG,
    _ => Level::TRACE,
  };
  let _ = tracing_subscriber::fmt()
    .with_max_level(level)
    .with_writer(std::io::stderr)
    .with_target(false)
    .try_init();
}

fn run_check(source: &Source, args: CheckArgs) -> Result<ExitCode> {
  let loaded = source.load()?;
  let registry = &loaded.registry;
  println!(
    "{} exclusions across {} suites ({} units skipped)",
    registry.len(),
    registry.suites().count(),
    loaded.failures.len()
  );
  Ok(if args.deny_failures && !loaded.failures.is_empty() {
    ExitCode::FAILURE
  } else {
    ExitCode::SUCCESS
  })
}

fn run_query(source: &Source, args: QueryArgs) -> Result<ExitCode> {
  let loaded = source.load()?;
  Ok(match loaded.registry.is_excluded(&args.suite, &args.test) {
    Some(reason) => {
      println!("{reason}");
      ExitCode::SUCCESS
    }
    None => {
      println!("not excluded");
      ExitCode::FAILURE
    }
  })
}
