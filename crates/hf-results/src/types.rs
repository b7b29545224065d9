//! Artifact data types.

use std::collections::BTreeMap;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use hf_core::{CategoryId, ResultId, to_display};
use serde::{Deserialize, Serialize};

use crate::ResultsResult;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ArtifactPayload {
    /// Base64-encoded JPEG.
    Image { encoded: String },
    Metric { value: f64 },
}

/// One category's output at one step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    pub category_id: CategoryId,
    pub category_name: Option<String>,
    pub payload: ArtifactPayload,
}

impl Artifact {
    /// Category name, or a stable fallback when the catalog does not know it.
    pub fn label(&self) -> String {
        self.category_name
            .clone()
            .unwrap_or_else(|| format!("category-{}", self.category_id))
    }

    pub fn is_image(&self) -> bool {
        matches!(self.payload, ArtifactPayload::Image { .. })
    }

    /// Raw JPEG bytes of an image artifact; `None` for metrics.
    pub fn decode_image(&self) -> ResultsResult<Option<Vec<u8>>> {
        match &self.payload {
            ArtifactPayload::Image { encoded } => Ok(Some(STANDARD.decode(encoded)?)),
            ArtifactPayload::Metric { .. } => Ok(None),
        }
    }
}

/// Everything rendered for one step of one result. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepArtifactSet {
    pub result_id: ResultId,
    /// Internal step.
    pub step: u64,
    pub artifacts: Vec<Artifact>,
}

impl StepArtifactSet {
    pub fn display_step(&self) -> u64 {
        to_display(self.step)
    }

    pub fn artifact(&self, category_id: CategoryId) -> Option<&Artifact> {
        self.artifacts.iter().find(|a| a.category_id == category_id)
    }

    /// Copy holding only the artifacts of `category_ids`.
    pub fn only_categories(&self, category_ids: &[CategoryId]) -> StepArtifactSet {
        StepArtifactSet {
            result_id: self.result_id.clone(),
            step: self.step,
            artifacts: self
                .artifacts
                .iter()
                .filter(|a| category_ids.contains(&a.category_id))
                .cloned()
                .collect(),
        }
    }

    pub fn images(&self) -> impl Iterator<Item = &Artifact> {
        self.artifacts.iter().filter(|a| a.is_image())
    }

    pub fn metrics(&self) -> impl Iterator<Item = (&Artifact, f64)> {
        self.artifacts.iter().filter_map(|a| match a.payload {
            ArtifactPayload::Metric { value } => Some((a, value)),
            ArtifactPayload::Image { .. } => None,
        })
    }
}

/// Category names of one result.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CategoryCatalog {
    names: BTreeMap<CategoryId, String>,
}

impl CategoryCatalog {
    pub fn from_pairs<I, S>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (CategoryId, S)>,
        S: Into<String>,
    {
        Self {
            names: pairs.into_iter().map(|(id, n)| (id, n.into())).collect(),
        }
    }

    pub fn name(&self, id: CategoryId) -> Option<&str> {
        self.names.get(&id).map(String::as_str)
    }

    pub fn ids(&self) -> impl Iterator<Item = CategoryId> + '_ {
        self.names.keys().copied()
    }

    /// Ids whose name contains any of `needles`, case-insensitively.
    pub fn matching(&self, needles: &[String]) -> Vec<CategoryId> {
        let needles: Vec<String> = needles.iter().map(|n| n.to_lowercase()).collect();
        self.names
            .iter()
            .filter(|(_, name)| {
                let name = name.to_lowercase();
                needles.iter().any(|n| name.contains(n.as_str()))
            })
            .map(|(id, _)| *id)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}
