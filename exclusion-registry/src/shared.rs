use crate::error::Result;
use crate::loader::{load_dir, LoadOptions, UnitFailure};
use crate::registry::ExclusionRegistry;
use parking_lot::RwLock;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// Hands out snapshots of the current registry and swaps in reloaded ones.
///
/// The lock only guards the pointer: readers clone the `Arc` and then query
/// the snapshot without holding anything. A reload never touches a registry
/// that readers may still be using.
#[derive(Debug, Default)]
pub struct SharedRegistry {
  current: RwLock<Arc<ExclusionRegistry>>,
}

impl SharedRegistry {
  pub fn new(registry: ExclusionRegistry) -> Self {
    Self {
      current: RwLock::new(Arc::new(registry)),
    }
  }

  pub fn snapshot(&self) -> Arc<ExclusionRegistry> {
    Arc::clone(&self.current.read())
  }

  /// Installs `registry` and returns the one it replaced.
  pub fn replace(&self, registry: ExclusionRegistry) -> Arc<ExclusionRegistry> {
    let next = Arc::new(registry);
    std::mem::replace(&mut *self.current.write(), next)
  }

  /// Rebuilds from `root` and swaps only if the load succeeds.
  ///
  /// Returns the units skipped under best-effort loading.
  pub fn reload_from(&self, root: &Path, options: &LoadOptions) -> Result<Vec<UnitFailure>> {
    let loaded = load_dir(root, options)?;
    let exclusions = loaded.registry.len();
    self.replace(loaded.registry);
    info!(exclusions, "swapped in reloaded exclusions");
    Ok(loaded.failures)
  }
}
