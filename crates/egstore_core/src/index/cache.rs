//! Per-kind composite index cache.

use crate::index::{CompositeIndex, IndexChangeListener};
use parking_lot::RwLock;
use std::collections::HashMap;

/// Caches the composite indexes of each `(app, kind)` pair.
///
/// Writes look up the indexes of their entity's kind on every put and
/// delete. Registered with the [`super::IndexManager`], the cache drops an
/// app's entries whenever one of its indexes changes.
#[derive(Debug, Default)]
pub struct KindIndexCache {
    entries: RwLock<HashMap<(String, String), Vec<CompositeIndex>>>,
}

impl KindIndexCache {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached indexes of `kind`, calling `load` on a miss.
    ///
    /// `load` returns every index of the app; only those of `kind` are kept.
    pub fn get_or_load<F>(&self, app: &str, kind: &str, load: F) -> Vec<CompositeIndex>
    where
        F: FnOnce() -> Vec<CompositeIndex>,
    {
        let key = (app.to_string(), kind.to_string());
        if let Some(indexes) = self.entries.read().get(&key) {
            return indexes.clone();
        }
        let mut entries = self.entries.write();
        entries
            .entry(key)
            .or_insert_with(|| {
                load()
                    .into_iter()
                    .filter(|index| index.definition.kind == kind)
                    .collect()
            })
            .clone()
    }

    /// Number of cached `(app, kind)` pairs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Returns true if nothing is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl IndexChangeListener for KindIndexCache {
    fn on_index_change(&self, app_id: &str) {
        self.entries.write().retain(|(app, _), _| app != app_id);
    }
}
