//! Registry of MRI tests excluded from a run, keyed by suite and test id.
//!
//! Definitions are read once per run by [`load_dir`], turned into an
//! immutable [`ExclusionRegistry`], and queried by the runner before each
//! test. [`SkipLedger`] records the decisions so every skip is reported with
//! its reason and unused exclusions can be spotted.

pub mod definition;
mod error;
mod loader;
mod manifest;
mod registry;
mod report;
mod shared;

pub use definition::{parse_unit, render_record, render_unit, Record};
pub use error::{LoadError, Result, SourceLocation};
pub use loader::{
  discover_units, load_dir, load_unit, suite_name_for, DefinitionFormat, LoadMode, LoadOptions,
  Loaded, Unit, UnitFailure,
};
pub use manifest::parse_manifest;
pub use registry::{ExclusionEntry, ExclusionRef, ExclusionRegistry, Reasons, SuiteDefinition};
pub use report::{
  Decision, SkipLedger, SkipReport, SkipSummary, SkippedTest, StaleExclusion,
  REPORT_SCHEMA_VERSION,
};
pub use shared::SharedRegistry;
