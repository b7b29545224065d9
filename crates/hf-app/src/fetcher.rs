//! On-demand retrieval of per-step artifacts.

use std::collections::HashMap;
use std::sync::Arc;

use hf_core::steps::{FRAME_RATE, to_display, to_internal};
use hf_core::{ResultId, StepDomain};
use hf_gateway::Gateway;
use hf_results::{ArtifactStore, CategoryCatalog, StepArtifactSet};
use tracing::debug;

use crate::artifacts::{Catalogs, sets_from_step};
use crate::error::{AppError, AppResult};

/// Fetches artifact sets by display step and caches them for the session.
///
/// Steps are validated against the result's [`StepDomain`] before any
/// request is made; invalid steps fail with `OutOfRange` and are never
/// retried.
pub struct ArtifactFetcher {
    gateway: Arc<dyn Gateway>,
    store: ArtifactStore,
    domains: HashMap<ResultId, StepDomain>,
}

impl ArtifactFetcher {
    pub fn new(gateway: Arc<dyn Gateway>) -> Self {
        Self {
            gateway,
            store: ArtifactStore::new(),
            domains: HashMap::new(),
        }
    }

    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    pub fn register_domain(&mut self, result_id: ResultId, domain: StepDomain) {
        self.domains.insert(result_id, domain);
    }

    pub fn domain(&self, result_id: &ResultId) -> Option<StepDomain> {
        self.domains.get(result_id).copied()
    }

    /// Learn a result's step domain from its detail.
    pub async fn load_domain(&mut self, result_id: &ResultId) -> AppResult<StepDomain> {
        if let Some(domain) = self.domain(result_id) {
            return Ok(domain);
        }
        let detail = self.gateway.result_detail(result_id).await?;
        let domain = StepDomain::new(detail.final_step)?;
        self.domains.insert(result_id.clone(), domain);
        Ok(domain)
    }

    fn require_domain(&self, result_id: &ResultId) -> AppResult<StepDomain> {
        self.domain(result_id).ok_or_else(|| {
            AppError::invalid_state(
                "fetch artifacts",
                format!("step range of result {result_id} is unknown"),
            )
        })
    }

    /// Category catalog of a result, loaded once.
    pub async fn categories(&mut self, result_id: &ResultId) -> AppResult<Arc<CategoryCatalog>> {
        if let Some(catalog) = self.store.catalog(result_id) {
            return Ok(catalog);
        }
        let categories = self.gateway.categories(result_id).await?;
        let catalog = CategoryCatalog::from_pairs(categories.into_iter().map(|c| (c.id, c.name)));
        debug!(result = %result_id, categories = catalog.len(), "category catalog loaded");
        Ok(self.store.put_catalog(result_id.clone(), catalog))
    }

    /// Catalogs already loaded for `result_ids`.
    pub fn catalogs(&self, result_ids: &[ResultId]) -> Catalogs {
        result_ids
            .iter()
            .filter_map(|id| self.store.catalog(id).map(|c| (id.clone(), c)))
            .collect()
    }

    pub async fn fetch_step(&mut self, result_id: &ResultId, display_step: i64) -> AppResult<Arc<StepArtifactSet>> {
        let step = self.require_domain(result_id)?.check_display(display_step)?;
        if let Some(set) = self.store.get(result_id, step) {
            debug!(result = %result_id, step, "artifact cache hit");
            return Ok(set);
        }

        self.categories(result_id).await?;
        self.load_range(result_id, step, step).await?;
        Ok(self.cached_or_empty(result_id, step))
    }

    /// Cached set of a step; an empty set when the server had nothing for it.
    fn cached_or_empty(&mut self, result_id: &ResultId, step: u64) -> Arc<StepArtifactSet> {
        match self.store.get(result_id, step) {
            Some(set) => set,
            None => self.store.insert(StepArtifactSet {
                result_id: result_id.clone(),
                step,
                artifacts: Vec::new(),
            }),
        }
    }

    /// Ordered artifact sets for an inclusive display range, one per display
    /// step.
    pub async fn fetch_range(
        &mut self,
        result_id: &ResultId,
        from: i64,
        to: i64,
    ) -> AppResult<Vec<Arc<StepArtifactSet>>> {
        let (start, end) = self.require_domain(result_id)?.check_display_range(from, to)?;
        let displays = to_display(start)..=to_display(end);
        let complete = displays
            .clone()
            .all(|display| self.store.has_step(result_id, to_internal(display)));
        if complete {
            debug!(result = %result_id, start, end, "artifact range cache hit");
        } else {
            self.categories(result_id).await?;
            self.load_range(result_id, start, end).await?;
            for display in displays {
                self.cached_or_empty(result_id, to_internal(display));
            }
        }
        Ok(self.store.range(result_id, start, end))
    }

    async fn load_range(&mut self, result_id: &ResultId, start: u64, end: u64) -> AppResult<()> {
        let batch = self.gateway.images_in_range(result_id, start, end).await?;
        let catalogs = self.catalogs(std::slice::from_ref(result_id));
        let mut loaded = 0usize;
        // Only frame steps are shown; the server may also send the steps between.
        for step in batch.steps {
            if step.step % FRAME_RATE != 0 {
                continue;
            }
            for set in sets_from_step(step, result_id, &catalogs) {
                if &set.result_id == result_id {
                    self.store.insert(set);
                    loaded += 1;
                }
            }
        }
        debug!(result = %result_id, start, end, loaded, "artifacts fetched");
        Ok(())
    }

    /// Drop every cached artifact; called when a viewing session ends.
    pub fn end_session(&mut self) {
        self.store.clear();
    }
}
