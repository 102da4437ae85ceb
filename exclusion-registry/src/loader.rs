use crate::definition::{parse_unit, Record};
use crate::error::{LoadError, Result};
use crate::manifest::parse_manifest;
use crate::registry::{ExclusionRegistry, SuiteDefinition};
use clap::ValueEnum;
use rayon::prelude::*;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// What to do when one definition unit fails to load.
#[derive(Debug, Clone, Copy, Default, ValueEnum, PartialEq, Eq)]
pub enum LoadMode {
  /// Any failing unit fails the whole load (default).
  #[default]
  Strict,
  /// A failing unit contributes no exclusions; the failure is logged and
  /// returned alongside the registry.
  BestEffort,
}

#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
  pub mode: LoadMode,
}

impl LoadOptions {
  pub fn new(mode: LoadMode) -> Self {
    Self { mode }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefinitionFormat {
  /// `exclude :test_name, "reason"` lines.
  Lines,
  /// `[[exclude]]` tables in TOML or JSON.
  Manifest,
}

impl DefinitionFormat {
  pub fn from_path(path: &Path) -> Option<Self> {
    match path.extension()?.to_str()? {
      "rb" | "txt" => Some(DefinitionFormat::Lines),
      "toml" | "json" => Some(DefinitionFormat::Manifest),
      _ => None,
    }
  }

  pub fn parse(self, unit: &str, raw: &str) -> Result<Vec<Record>> {
    match self {
      DefinitionFormat::Lines => parse_unit(unit, raw),
      DefinitionFormat::Manifest => parse_manifest(unit, raw),
    }
  }
}

/// A definition file and the suite it declares exclusions for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unit {
  pub suite: String,
  pub path: PathBuf,
  pub format: DefinitionFormat,
}

#[derive(Debug)]
pub struct UnitFailure {
  pub suite: String,
  pub path: PathBuf,
  pub error: LoadError,
}

#[derive(Debug)]
pub struct Loaded {
  pub registry: ExclusionRegistry,
  pub units: Vec<Unit>,
  /// Only populated in [`LoadMode::BestEffort`]; sorted by path.
  pub failures: Vec<UnitFailure>,
}

/// Derives the suite name from a unit path relative to the excludes root.
///
/// Directories become namespace segments: `Racc/TestScanner.rb` declares
/// exclusions for `Racc::TestScanner`.
pub fn suite_name_for(root: &Path, path: &Path) -> Option<String> {
  let rel = path.strip_prefix(root).ok()?;
  let mut segments = Vec::new();
  let mut components = rel.components().peekable();
  while let Some(component) = components.next() {
    let Component::Normal(raw) = component else {
      return None;
    };
    let segment = if components.peek().is_none() {
      Path::new(raw).file_stem()?.to_string_lossy().into_owned()
    } else {
      raw.to_string_lossy().into_owned()
    };
    if segment.is_empty() {
      return None;
    }
    segments.push(segment);
  }
  if segments.is_empty() {
    return None;
  }
  Some(segments.join("::"))
}

/// Lists definition units under `root`, sorted by path.
///
/// Hidden files and files with unrecognised extensions are ignored.
pub fn discover_units(root: &Path) -> Result<Vec<Unit>> {
  if !root.is_dir() {
    return Err(LoadError::InvalidRoot(root.to_path_buf()));
  }

  let mut units = Vec::new();
  let walker = WalkDir::new(root)
    .follow_links(false)
    .sort_by_file_name()
    .into_iter()
    .filter_entry(|entry| entry.depth() == 0 || !is_hidden(entry.file_name()));
  for entry in walker {
    let entry = entry.map_err(|err| {
      let path = err.path().unwrap_or(root).to_path_buf();
      LoadError::Io {
        path,
        source: err.into(),
      }
    })?;
    if !entry.file_type().is_file() {
      continue;
    }
    let path = entry.into_path();
    let Some(format) = DefinitionFormat::from_path(&path) else {
      debug!(path = %path.display(), "ignoring file with unrecognised extension");
      continue;
    };
    let Some(suite) = suite_name_for(root, &path) else {
      debug!(path = %path.display(), "ignoring file without a suite name");
      continue;
    };
    units.push(Unit {
      suite,
      path,
      format,
    });
  }

  units.sort_by(|a, b| a.path.cmp(&b.path));
  Ok(units)
}

fn is_hidden(name: &std::ffi::OsStr) -> bool {
  name.to_str().is_some_and(|name| name.starts_with('.'))
}

/// Reads and parses one unit, rejecting duplicate ids within it.
pub fn load_unit(unit: &Unit) -> Result<SuiteDefinition> {
  let raw = fs::read_to_string(&unit.path).map_err(|source| LoadError::Io {
    path: unit.path.clone(),
    source,
  })?;
  let label = unit.path.display().to_string();
  let records = unit.format.parse(&label, &raw)?;
  let definition = SuiteDefinition::new(unit.suite.clone(), label, records);
  definition.check_duplicates()?;
  debug!(
    suite = %definition.suite,
    exclusions = definition.records.len(),
    "loaded exclusion unit"
  );
  Ok(definition)
}

/// Loads every unit under `root` into a registry.
///
/// Units are parsed in parallel but merged in path order, so the result does
/// not depend on scheduling.
pub fn load_dir(root: &Path, options: &LoadOptions) -> Result<Loaded> {
  let discovered = discover_units(root)?;
  let mut failures = Vec::new();

  let mut claimed: BTreeMap<String, PathBuf> = BTreeMap::new();
  let mut units = Vec::with_capacity(discovered.len());
  for unit in discovered {
    if let Some(first) = claimed.get(&unit.suite) {
      let error = LoadError::DuplicateSuite {
        suite: unit.suite.clone(),
        first: first.clone(),
        second: unit.path.clone(),
      };
      match options.mode {
        LoadMode::Strict => return Err(error),
        LoadMode::BestEffort => {
          warn!(suite = %unit.suite, error = %error, "skipping exclusion unit");
          failures.push(UnitFailure {
            suite: unit.suite,
            path: unit.path,
            error,
          });
          continue;
        }
      }
    }
    claimed.insert(unit.suite.clone(), unit.path.clone());
    units.push(unit);
  }

  let parsed: Vec<Result<SuiteDefinition>> = units.par_iter().map(load_unit).collect();

  let mut definitions = Vec::with_capacity(parsed.len());
  let mut loaded_units = Vec::with_capacity(units.len());
  for (unit, result) in units.into_iter().zip(parsed) {
    match result {
      Ok(definition) => {
        definitions.push(definition);
        loaded_units.push(unit);
      }
      Err(error) => match options.mode {
        LoadMode::Strict => return Err(error),
        LoadMode::BestEffort => {
          warn!(suite = %unit.suite, error = %error, "skipping exclusion unit");
          failures.push(UnitFailure {
            suite: unit.suite,
            path: unit.path,
            error,
          });
        }
      },
    }
  }

  failures.sort_by(|a, b| a.path.cmp(&b.path));
  let registry = ExclusionRegistry::load(definitions)?;
  info!(
    suites = loaded_units.len(),
    exclusions = registry.len(),
    failures = failures.len(),
    "loaded exclusions from {}",
    root.display()
  );
  Ok(Loaded {
    registry,
    units: loaded_units,
    failures,
  })
}
