//! Session cache of fetched artifact sets.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use hf_core::ResultId;

use crate::types::{CategoryCatalog, StepArtifactSet};

/// Artifact sets keyed by (result, internal step), plus each result's catalog.
///
/// A cached set is never replaced: the first insert for a key wins and later
/// inserts hand back the cached copy.
#[derive(Debug, Default)]
pub struct ArtifactStore {
    sets: HashMap<ResultId, BTreeMap<u64, Arc<StepArtifactSet>>>,
    catalogs: HashMap<ResultId, Arc<CategoryCatalog>>,
}

impl ArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_step(&self, result_id: &ResultId, step: u64) -> bool {
        self.sets
            .get(result_id)
            .is_some_and(|steps| steps.contains_key(&step))
    }

    pub fn get(&self, result_id: &ResultId, step: u64) -> Option<Arc<StepArtifactSet>> {
        self.sets.get(result_id)?.get(&step).cloned()
    }

    pub fn insert(&mut self, set: StepArtifactSet) -> Arc<StepArtifactSet> {
        let steps = self.sets.entry(set.result_id.clone()).or_default();
        steps.entry(set.step).or_insert_with(|| Arc::new(set)).clone()
    }

    /// Cached sets with `from <= step <= to`, ascending.
    pub fn range(&self, result_id: &ResultId, from: u64, to: u64) -> Vec<Arc<StepArtifactSet>> {
        if from > to {
            return Vec::new();
        }
        self.sets
            .get(result_id)
            .map(|steps| steps.range(from..=to).map(|(_, s)| s.clone()).collect())
            .unwrap_or_default()
    }

    pub fn catalog(&self, result_id: &ResultId) -> Option<Arc<CategoryCatalog>> {
        self.catalogs.get(result_id).cloned()
    }

    pub fn put_catalog(&mut self, result_id: ResultId, catalog: CategoryCatalog) -> Arc<CategoryCatalog> {
        let catalog = Arc::new(catalog);
        self.catalogs.insert(result_id, catalog.clone());
        catalog
    }

    pub fn clear_result(&mut self, result_id: &ResultId) {
        self.sets.remove(result_id);
        self.catalogs.remove(result_id);
    }

    pub fn clear(&mut self) {
        self.sets.clear();
        self.catalogs.clear();
    }

    /// Total cached sets across all results.
    pub fn len(&self) -> usize {
        self.sets.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
