use crate::definition::Record;
use crate::error::{LoadError, Result};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
struct RawManifest {
  #[serde(default, alias = "excludes")]
  exclude: Vec<RawEntry>,
}

#[derive(Debug, Clone, Deserialize)]
struct RawEntry {
  #[serde(alias = "test")]
  id: Option<String>,
  reason: Option<String>,
}

/// Parses a TOML (or, failing that, JSON) manifest of `[[exclude]]` entries.
///
/// ```toml
/// [[exclude]]
/// id = "test_fallback"
/// reason = "fallback not implemented"
/// ```
pub fn parse_manifest(unit: &str, raw: &str) -> Result<Vec<Record>> {
  let manifest = match toml::from_str::<RawManifest>(raw) {
    Ok(manifest) => manifest,
    Err(toml_err) => serde_json::from_str::<RawManifest>(raw).map_err(|json_err| {
      LoadError::malformed(
        unit,
        None,
        format!("failed to parse manifest as TOML ({toml_err}) or JSON ({json_err})"),
      )
    })?,
  };

  manifest
    .exclude
    .into_iter()
    .enumerate()
    .map(|(idx, entry)| {
      let entry_no = idx + 1;
      let id = entry.id.ok_or_else(|| {
        LoadError::malformed(unit, None, format!("exclude entry {entry_no} missing `id`"))
      })?;
      let reason = entry.reason.ok_or_else(|| {
        LoadError::malformed(
          unit,
          None,
          format!("exclude entry {entry_no} (`{id}`) missing `reason`"),
        )
      })?;
      Ok(Record::new(id, reason))
    })
    .collect()
}
