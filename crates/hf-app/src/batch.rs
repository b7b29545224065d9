//! Batch files: a project and the runs to submit for it.
//!
//! ```yaml
//! project_id: 12
//! runs:
//!   - node_id: 1
//!     model_id: 4
//!     experiment_id: 9
//!     final_step: 1440
//! ```

use std::path::Path;

use hf_core::{ExperimentId, ModelId, NodeId, ProjectId};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};
use crate::registry::{DEFAULT_FINAL_STEP, RunConfig};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchRun {
    pub node_id: NodeId,
    pub model_id: ModelId,
    pub experiment_id: ExperimentId,
    #[serde(default = "default_final_step")]
    pub final_step: u64,
}

fn default_final_step() -> u64 {
    DEFAULT_FINAL_STEP
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchFile {
    pub project_id: ProjectId,
    pub runs: Vec<BatchRun>,
}

impl BatchFile {
    pub fn run_configs(&self) -> Vec<RunConfig> {
        self.runs
            .iter()
            .map(|r| RunConfig::new(r.node_id, r.model_id, r.experiment_id, r.final_step))
            .collect()
    }
}

pub fn load_batch(path: &Path) -> AppResult<BatchFile> {
    let content = std::fs::read_to_string(path).map_err(|e| AppError::FileRead {
        path: path.to_path_buf(),
        source: e,
    })?;
    let batch: BatchFile = serde_yaml::from_str(&content)
        .map_err(|e| AppError::Config(format!("Failed to parse batch YAML: {}", e)))?;
    if batch.runs.is_empty() {
        return Err(AppError::InvalidInput(format!(
            "{} lists no runs",
            path.display()
        )));
    }
    Ok(batch)
}
