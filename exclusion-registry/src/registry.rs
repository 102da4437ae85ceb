use crate::definition::Record;
use crate::error::{LoadError, Result, SourceLocation};
use ahash::AHashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::iter::FusedIterator;
use std::slice;

/// A single `(suite, test_id, reason)` triple.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExclusionEntry {
  pub suite: String,
  pub test_id: String,
  pub reason: String,
  #[serde(default)]
  pub location: SourceLocation,
}

impl ExclusionEntry {
  pub fn new(
    suite: impl Into<String>,
    test_id: impl Into<String>,
    reason: impl Into<String>,
  ) -> Self {
    Self {
      suite: suite.into(),
      test_id: test_id.into(),
      reason: reason.into(),
      location: SourceLocation::inline(),
    }
  }
}

/// All records declared by one definition unit, attributed to a suite.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SuiteDefinition {
  pub suite: String,
  /// Name used in error messages and reports, usually the unit's path.
  pub unit: String,
  pub records: Vec<Record>,
}

impl SuiteDefinition {
  pub fn new(suite: impl Into<String>, unit: impl Into<String>, records: Vec<Record>) -> Self {
    Self {
      suite: suite.into(),
      unit: unit.into(),
      records,
    }
  }

  /// Rejects a unit that declares the same test id twice.
  pub fn check_duplicates(&self) -> Result<()> {
    let mut seen: AHashMap<&str, &Record> = AHashMap::new();
    for record in &self.records {
      if let Some(first) = seen.insert(record.test_id.as_str(), record) {
        return Err(LoadError::DuplicateTestId {
          suite: self.suite.clone(),
          test_id: record.test_id.clone(),
          first: SourceLocation::new(&self.unit, first.line),
          second: SourceLocation::new(&self.unit, record.line),
        });
      }
    }
    Ok(())
  }
}

#[derive(Debug, Clone)]
struct Exclusion {
  test_id: String,
  reason: String,
  location: SourceLocation,
}

#[derive(Debug, Clone, Default)]
struct SuiteExclusions {
  /// Declaration order.
  entries: Vec<Exclusion>,
  index: AHashMap<String, usize>,
}

impl SuiteExclusions {
  fn insert(&mut self, suite: &str, exclusion: Exclusion) -> Result<()> {
    if let Some(&existing) = self.index.get(&exclusion.test_id) {
      return Err(LoadError::DuplicateTestId {
        suite: suite.to_string(),
        test_id: exclusion.test_id,
        first: self.entries[existing].location.clone(),
        second: exclusion.location,
      });
    }
    self
      .index
      .insert(exclusion.test_id.clone(), self.entries.len());
    self.entries.push(exclusion);
    Ok(())
  }
}

/// Immutable lookup table answering "is this test excluded, and why?".
///
/// Built once through [`ExclusionRegistry::load`] or
/// [`ExclusionRegistry::from_entries`]; there is no way to mutate a built
/// registry, so it can be shared between worker threads without locking.
/// Duplicate test ids within a suite are rejected at load time.
#[derive(Debug, Clone, Default)]
pub struct ExclusionRegistry {
  suites: BTreeMap<String, SuiteExclusions>,
  total: usize,
}

impl ExclusionRegistry {
  pub fn empty() -> Self {
    Self::default()
  }

  /// Builds a registry from per-suite definitions.
  ///
  /// A definition with no records still registers its suite. Several
  /// definitions may name the same suite; their records are appended in the
  /// order given.
  pub fn load(definitions: impl IntoIterator<Item = SuiteDefinition>) -> Result<Self> {
    let mut registry = Self::default();
    for definition in definitions {
      let suite = registry
        .suites
        .entry(definition.suite.clone())
        .or_default();
      for record in definition.records {
        suite.insert(
          &definition.suite,
          Exclusion {
            test_id: record.test_id,
            reason: record.reason,
            location: SourceLocation::new(&definition.unit, record.line),
          },
        )?;
        registry.total += 1;
      }
    }
    Ok(registry)
  }

  /// Builds a registry from a flat list of triples.
  pub fn from_entries(entries: impl IntoIterator<Item = ExclusionEntry>) -> Result<Self> {
    let mut registry = Self::default();
    for entry in entries {
      let suite = registry.suites.entry(entry.suite.clone()).or_default();
      suite.insert(
        &entry.suite,
        Exclusion {
          test_id: entry.test_id,
          reason: entry.reason,
          location: entry.location,
        },
      )?;
      registry.total += 1;
    }
    Ok(registry)
  }

  /// Returns the reason if `test_id` is excluded in `suite`.
  ///
  /// Both keys are matched exactly. Unknown suites and suites with no
  /// exclusions both answer `None`.
  pub fn is_excluded(&self, suite: &str, test_id: &str) -> Option<&str> {
    let suite = self.suites.get(suite)?;
    let &idx = suite.index.get(test_id)?;
    Some(suite.entries[idx].reason.as_str())
  }

  pub fn location_of(&self, suite: &str, test_id: &str) -> Option<&SourceLocation> {
    let suite = self.suites.get(suite)?;
    let &idx = suite.index.get(test_id)?;
    Some(&suite.entries[idx].location)
  }

  /// All exclusions of `suite` in declaration order. Empty for unknown suites.
  pub fn reasons_for(&self, suite: &str) -> Reasons<'_> {
    let entries = self
      .suites
      .get(suite)
      .map(|suite| suite.entries.as_slice())
      .unwrap_or(&[]);
    Reasons {
      inner: entries.iter(),
    }
  }

  pub fn contains_suite(&self, suite: &str) -> bool {
    self.suites.contains_key(suite)
  }

  /// Suite names in sorted order, including suites without exclusions.
  pub fn suites(&self) -> impl Iterator<Item = &str> + '_ {
    self.suites.keys().map(String::as_str)
  }

  /// Every exclusion, suites sorted by name and entries in declaration order.
  pub fn entries(&self) -> impl Iterator<Item = ExclusionRef<'_>> + '_ {
    self.suites.iter().flat_map(|(suite, exclusions)| {
      exclusions.entries.iter().map(move |exclusion| ExclusionRef {
        suite: suite.as_str(),
        test_id: exclusion.test_id.as_str(),
        reason: exclusion.reason.as_str(),
        location: &exclusion.location,
      })
    })
  }

  /// Number of exclusions across all suites.
  pub fn len(&self) -> usize {
    self.total
  }

  pub fn is_empty(&self) -> bool {
    self.total == 0
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExclusionRef<'a> {
  pub suite: &'a str,
  pub test_id: &'a str,
  pub reason: &'a str,
  pub location: &'a SourceLocation,
}

/// Iterator over `(test_id, reason)` pairs of one suite.
#[derive(Debug, Clone)]
pub struct Reasons<'a> {
  inner: slice::Iter<'a, Exclusion>,
}

impl<'a> Iterator for Reasons<'a> {
  type Item = (&'a str, &'a str);

  fn next(&mut self) -> Option<Self::Item> {
    self
      .inner
      .next()
      .map(|exclusion| (exclusion.test_id.as_str(), exclusion.reason.as_str()))
  }

  fn size_hint(&self) -> (usize, Option<usize>) {
    self.inner.size_hint()
  }
}

impl ExactSizeIterator for Reasons<'_> {}

impl FusedIterator for Reasons<'_> {}

#[cfg(test)]
mod tests {
  use super::*;

  fn transcode() -> SuiteDefinition {
    SuiteDefinition::new(
      "TestTranscode",
      "TestTranscode.rb",
      vec![
        Record::new("test_fallback", "fallback not implemented"),
        Record::new("test_pseudo_encoding_inspect(UTF-16)", "needs investigation"),
        Record::new("test_pseudo_encoding_inspect(UTF-32)", "utf-32 differs"),
        Record::new("test_unicode_public_review_issue_121", ""),
      ],
    )
  }

  #[test]
  fn declared_exclusions_return_their_reason() {
    let registry = ExclusionRegistry::load([transcode()]).unwrap();
    assert_eq!(
      registry.is_excluded("TestTranscode", "test_fallback"),
      Some("fallback not implemented")
    );
    assert_eq!(
      registry.is_excluded("TestTranscode", "test_unicode_public_review_issue_121"),
      Some("")
    );
    assert_eq!(registry.len(), 4);
  }

  #[test]
  fn parameterized_ids_are_opaque_keys() {
    let registry = ExclusionRegistry::load([transcode()]).unwrap();
    assert_eq!(
      registry.is_excluded("TestTranscode", "test_pseudo_encoding_inspect(UTF-16)"),
      Some("needs investigation")
    );
    assert_eq!(
      registry.is_excluded("TestTranscode", "test_pseudo_encoding_inspect(UTF-32)"),
      Some("utf-32 differs")
    );
    assert_eq!(
      registry.is_excluded("TestTranscode", "test_pseudo_encoding_inspect"),
      None
    );
    assert_eq!(
      registry.is_excluded("TestTranscode", "test_pseudo_encoding_inspect(utf-16)"),
      None
    );
  }

  #[test]
  fn lookups_are_exact_on_suite_and_test() {
    let registry = ExclusionRegistry::load([transcode()]).unwrap();
    assert_eq!(registry.is_excluded("TestTranscod", "test_fallback"), None);
    assert_eq!(registry.is_excluded("TestTranscode", "test_fallback "), None);
    assert_eq!(registry.is_excluded("testtranscode", "test_fallback"), None);
  }

  #[test]
  fn empty_and_unknown_suites_are_not_excluded_but_distinguishable() {
    let registry = ExclusionRegistry::load([
      transcode(),
      SuiteDefinition::new("TestThread", "TestThread.rb", Vec::new()),
    ])
    .unwrap();

    assert_eq!(registry.is_excluded("TestThread", "test_exit"), None);
    assert_eq!(registry.is_excluded("TestMissing", "test_exit"), None);

    assert!(registry.contains_suite("TestThread"));
    assert!(!registry.contains_suite("TestMissing"));
    assert_eq!(registry.reasons_for("TestThread").count(), 0);
    assert_eq!(registry.reasons_for("TestMissing").count(), 0);
    assert_eq!(
      registry.suites().collect::<Vec<_>>(),
      vec!["TestThread", "TestTranscode"]
    );
  }

  #[test]
  fn reasons_for_preserves_declaration_order_and_restarts() {
    let registry = ExclusionRegistry::load([transcode()]).unwrap();
    let reasons = registry.reasons_for("TestTranscode");
    assert_eq!(reasons.len(), 4);

    let first: Vec<_> = reasons.clone().collect();
    let second: Vec<_> = reasons.collect();
    assert_eq!(first, second);
    assert_eq!(
      first,
      vec![
        ("test_fallback", "fallback not implemented"),
        ("test_pseudo_encoding_inspect(UTF-16)", "needs investigation"),
        ("test_pseudo_encoding_inspect(UTF-32)", "utf-32 differs"),
        ("test_unicode_public_review_issue_121", ""),
      ]
    );
    assert_eq!(
      registry.reasons_for("TestTranscode").collect::<Vec<_>>(),
      first
    );
  }

  #[test]
  fn duplicate_test_id_is_rejected_every_time() {
    let definition = SuiteDefinition::new(
      "TestThread",
      "TestThread.rb",
      vec![
        Record::new("test_exit", "exits the whole process").at_line(1),
        Record::new("test_list", "needs investigation").at_line(2),
        Record::new("test_exit", "hangs").at_line(3),
      ],
    );

    for _ in 0..3 {
      let err = ExclusionRegistry::load([definition.clone()]).unwrap_err();
      match err {
        LoadError::DuplicateTestId {
          suite,
          test_id,
          first,
          second,
        } => {
          assert_eq!(suite, "TestThread");
          assert_eq!(test_id, "test_exit");
          assert_eq!(first.to_string(), "TestThread.rb:1");
          assert_eq!(second.to_string(), "TestThread.rb:3");
        }
        other => panic!("unexpected error: {other}"),
      }
    }
    assert!(definition.check_duplicates().is_err());
  }

  #[test]
  fn same_id_in_different_suites_is_allowed() {
    let registry = ExclusionRegistry::from_entries([
      ExclusionEntry::new("TestThread", "test_new", "needs investigation"),
      ExclusionEntry::new("TestFiber", "test_new", "fibers differ"),
    ])
    .unwrap();
    assert_eq!(
      registry.is_excluded("TestThread", "test_new"),
      Some("needs investigation")
    );
    assert_eq!(
      registry.is_excluded("TestFiber", "test_new"),
      Some("fibers differ")
    );
  }

  #[test]
  fn loading_twice_answers_identically() {
    let one = ExclusionRegistry::load([transcode()]).unwrap();
    let two = ExclusionRegistry::load([transcode()]).unwrap();
    let left: Vec<_> = one.entries().collect();
    let right: Vec<_> = two.entries().collect();
    assert_eq!(left, right);
    for entry in left {
      assert_eq!(
        one.is_excluded(entry.suite, entry.test_id),
        two.is_excluded(entry.suite, entry.test_id)
      );
    }
  }

  #[test]
  fn concurrent_readers_observe_consistent_answers() {
    let registry = ExclusionRegistry::load([transcode()]).unwrap();
    let expected: Vec<(String, String, String)> = registry
      .entries()
      .map(|e| (e.suite.to_string(), e.test_id.to_string(), e.reason.to_string()))
      .collect();

    std::thread::scope(|scope| {
      for worker in 0..8 {
        let registry = &registry;
        let expected = &expected;
        scope.spawn(move || {
          for round in 0..500 {
            for (suite, test_id, reason) in expected {
              assert_eq!(registry.is_excluded(suite, test_id), Some(reason.as_str()));
            }
            let probe = format!("test_worker_{worker}_{round}");
            assert_eq!(registry.is_excluded("TestTranscode", &probe), None);
          }
        });
      }
    });
  }
}
