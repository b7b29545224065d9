//! Gateway wire types.
//!
//! JSON responses are wrapped as `{ "data": ... }`; failures carry
//! `{ "message": ... }`. Field names are camelCase on the wire.

use hf_core::{CategoryId, ExperimentId, ModelId, NodeId, ProjectId, ResultId, RunOrder};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize)]
pub struct Envelope<T> {
    pub data: T,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ErrorBody {
    #[serde(default)]
    pub message: Option<String>,
}

/// One run slot of a batched submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationRequest {
    pub order: RunOrder,
    pub node_id: NodeId,
    pub project_id: ProjectId,
    pub experiments: Vec<ExperimentRequest>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExperimentRequest {
    pub id: ExperimentId,
    pub model_id: ModelId,
    pub final_step: u64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SubmitBody<'a> {
    pub simulation_requests: &'a [SimulationRequest],
}

/// Per-order answer to a submission. A missing result id means the server
/// did not start that run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitAccepted {
    pub order: RunOrder,
    #[serde(default)]
    pub experiment_result_id: Option<ResultId>,
}

/// Raw progress of one result.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressReport {
    pub status: i32,
    #[serde(default)]
    pub current_step: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Category {
    pub id: CategoryId,
    pub name: String,
}

/// Rendered output of one category at one step.
///
/// Image categories carry a base64 JPEG, metric categories a number.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryImage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub experiment_result_id: Option<ResultId>,
    pub category_id: CategoryId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encoded_image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepImages {
    pub step: u64,
    #[serde(default)]
    pub categories: Vec<CategoryImage>,
}

/// Payload of both the step-range endpoint and each animation message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StepBatch {
    #[serde(default)]
    pub steps: Vec<StepImages>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultDetail {
    #[serde(default)]
    pub download_url: Option<String>,
    pub final_step: u64,
    #[serde(default)]
    pub experiment_name: String,
    #[serde(default)]
    pub model_name: String,
}

/// Parameters of one animation stream. Steps are internal steps, both ends
/// inclusive.
#[derive(Debug, Clone, PartialEq)]
pub struct AnimationRequest {
    pub result_ids: Vec<ResultId>,
    pub start_step: u64,
    pub end_step: u64,
    pub duration_nanos_per_step: u64,
    pub category_ids: Option<Vec<CategoryId>>,
}
