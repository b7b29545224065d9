//! In-memory registry of the runs of one batch.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use hf_core::steps::{FRAME_RATE, validate_final_step};
use hf_core::{ExperimentId, ModelId, NodeId, ProjectId, ResultId, RunOrder};
use hf_gateway::{
    ExperimentRequest, Gateway, GatewayResult, ProgressReport, SimulationRequest, SubmitAccepted,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{AppError, AppResult};
use crate::lifecycle::{FailureDetail, RunLifecycle, ServerStatus};
use crate::poller::{PollOutcome, PollReport};
use crate::progress::{RunProgressEvent, progress_percent};

/// One simulated day.
pub const DEFAULT_FINAL_STEP: u64 = 32 * FRAME_RATE;

/// User-editable settings of one run slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RunConfig {
    pub node_id: Option<NodeId>,
    pub model_id: Option<ModelId>,
    pub experiment_id: Option<ExperimentId>,
    pub final_step: u64,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            node_id: None,
            model_id: None,
            experiment_id: None,
            final_step: DEFAULT_FINAL_STEP,
        }
    }
}

impl RunConfig {
    pub fn new(
        node_id: NodeId,
        model_id: ModelId,
        experiment_id: ExperimentId,
        final_step: u64,
    ) -> Self {
        Self {
            node_id: Some(node_id),
            model_id: Some(model_id),
            experiment_id: Some(experiment_id),
            final_step,
        }
    }

    fn to_request(&self, order: RunOrder, project_id: ProjectId) -> AppResult<SimulationRequest> {
        let missing = |field: &str| AppError::InvalidConfig(order, format!("{field} is not set"));
        let node_id = self.node_id.ok_or_else(|| missing("node"))?;
        let model_id = self.model_id.ok_or_else(|| missing("model"))?;
        let experiment_id = self.experiment_id.ok_or_else(|| missing("experiment"))?;
        let final_step = validate_final_step(self.final_step)?;

        Ok(SimulationRequest {
            order,
            node_id,
            project_id,
            experiments: vec![ExperimentRequest {
                id: experiment_id,
                model_id,
                final_step,
            }],
        })
    }
}

/// Partial update of a [`RunConfig`]; `None` fields are left alone.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunConfigPatch {
    pub node_id: Option<NodeId>,
    pub model_id: Option<ModelId>,
    pub experiment_id: Option<ExperimentId>,
    pub final_step: Option<u64>,
}

impl RunConfigPatch {
    fn apply_to(&self, config: &mut RunConfig) -> AppResult<()> {
        if let Some(final_step) = self.final_step {
            config.final_step = validate_final_step(final_step)?;
        }
        if let Some(node_id) = self.node_id {
            config.node_id = Some(node_id);
        }
        if let Some(model_id) = self.model_id {
            // The experiment list depends on the model.
            if config.model_id != Some(model_id) {
                config.experiment_id = None;
            }
            config.model_id = Some(model_id);
        }
        if let Some(experiment_id) = self.experiment_id {
            config.experiment_id = Some(experiment_id);
        }
        Ok(())
    }
}

/// Tracked state of one run. Read by consumers through snapshots only.
#[derive(Debug, Clone, PartialEq)]
pub struct RunEntry {
    pub order: RunOrder,
    pub config: RunConfig,
    pub result_id: Option<ResultId>,
    pub lifecycle: RunLifecycle,
    pub current_step: Option<i64>,
    pub progress_percent: f64,
    pub download_url: Option<String>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub last_poll_seq: u64,
}

impl RunEntry {
    fn new(order: RunOrder, config: RunConfig) -> Self {
        Self {
            order,
            config,
            result_id: None,
            lifecycle: RunLifecycle::Configuring,
            current_step: None,
            progress_percent: 0.0,
            download_url: None,
            submitted_at: None,
            finished_at: None,
            last_poll_seq: 0,
        }
    }

    fn finish(&mut self, lifecycle: RunLifecycle) {
        self.lifecycle = lifecycle;
        self.finished_at = Some(Utc::now());
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BatchPhase {
    Open,
    Submitting,
    Launched,
}

/// Reopens a batch whose submission never completed.
struct SubmissionGuard<'a> {
    registry: &'a mut RunRegistry,
}

impl Drop for SubmissionGuard<'_> {
    fn drop(&mut self) {
        if self.registry.phase == BatchPhase::Submitting {
            warn!("batch submission abandoned; reopening the batch");
            self.registry.phase = BatchPhase::Open;
        }
    }
}

/// Runs of one batch keyed by their client-assigned order.
#[derive(Debug)]
pub struct RunRegistry {
    project_id: ProjectId,
    entries: BTreeMap<RunOrder, RunEntry>,
    next_order: RunOrder,
    phase: BatchPhase,
}

impl RunRegistry {
    pub fn new(project_id: ProjectId) -> Self {
        Self {
            project_id,
            entries: BTreeMap::new(),
            next_order: RunOrder::first(),
            phase: BatchPhase::Open,
        }
    }

    pub fn project_id(&self) -> ProjectId {
        self.project_id
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, order: RunOrder) -> Option<&RunEntry> {
        self.entries.get(&order)
    }

    /// True once the batch has been submitted successfully.
    pub fn is_launched(&self) -> bool {
        self.phase == BatchPhase::Launched
    }

    pub fn snapshot(&self) -> Vec<RunEntry> {
        self.entries.values().cloned().collect()
    }

    pub fn add_run(&mut self, config: RunConfig) -> AppResult<RunOrder> {
        if self.phase != BatchPhase::Open {
            return Err(AppError::invalid_state(
                "add run",
                "the batch has already been submitted",
            ));
        }
        let order = self.next_order;
        self.next_order = order.next();
        self.entries.insert(order, RunEntry::new(order, config));
        debug!(%order, "run added");
        Ok(order)
    }

    /// Stop tracking a run. A submitted run keeps going on the server.
    pub fn remove_run(&mut self, order: RunOrder) -> AppResult<RunEntry> {
        if self.phase == BatchPhase::Submitting {
            return Err(AppError::invalid_state(
                "remove run",
                "a batch submission is in flight",
            ));
        }
        let entry = self
            .entries
            .remove(&order)
            .ok_or(AppError::RunNotFound(order))?;
        debug!(%order, state = entry.lifecycle.label(), "run removed");
        Ok(entry)
    }

    pub fn update_config(&mut self, order: RunOrder, patch: &RunConfigPatch) -> AppResult<&RunEntry> {
        if self.phase != BatchPhase::Open {
            return Err(AppError::invalid_state(
                "update run",
                "the batch has already been submitted",
            ));
        }
        let entry = self
            .entries
            .get_mut(&order)
            .ok_or(AppError::RunNotFound(order))?;
        if entry.lifecycle != RunLifecycle::Configuring {
            return Err(AppError::invalid_state(
                "update run",
                format!("run {order} is {}", entry.lifecycle),
            ));
        }
        patch.apply_to(&mut entry.config)?;
        Ok(&*entry)
    }

    /// Validate every configuring run and lock the registry for submission.
    pub fn begin_submission(&mut self) -> AppResult<Vec<SimulationRequest>> {
        if self.phase != BatchPhase::Open {
            return Err(AppError::invalid_state(
                "submit",
                "the batch has already been submitted",
            ));
        }
        let requests = self
            .entries
            .values()
            .filter(|e| e.lifecycle == RunLifecycle::Configuring)
            .map(|e| e.config.to_request(e.order, self.project_id))
            .collect::<AppResult<Vec<_>>>()?;
        if requests.is_empty() {
            return Err(AppError::invalid_state("submit", "no runs are configured"));
        }
        self.phase = BatchPhase::Submitting;
        Ok(requests)
    }

    /// Apply the gateway's answer to the submission started by
    /// [`begin_submission`](Self::begin_submission).
    ///
    /// An outright failure leaves every run `Configuring` and reopens the
    /// registry. A run the response has no result id for goes
    /// `Failed(MissingResult)` while the others proceed.
    pub fn finish_submission(
        &mut self,
        outcome: GatewayResult<Vec<SubmitAccepted>>,
    ) -> AppResult<Vec<(RunOrder, ResultId)>> {
        if self.phase != BatchPhase::Submitting {
            return Err(AppError::invalid_state(
                "finish submission",
                "no submission is in flight",
            ));
        }
        let accepted = match outcome {
            Ok(accepted) => accepted,
            Err(err) => {
                self.phase = BatchPhase::Open;
                warn!(error = %err, "batch submission failed");
                return Err(AppError::Submission(err.user_message()));
            }
        };

        let mut result_ids: HashMap<RunOrder, ResultId> = accepted
            .into_iter()
            .filter_map(|a| a.experiment_result_id.map(|id| (a.order, id)))
            .collect();
        let now = Utc::now();
        let mut launched = Vec::new();

        for entry in self.entries.values_mut() {
            if entry.lifecycle != RunLifecycle::Configuring {
                continue;
            }
            entry.submitted_at = Some(now);
            match result_ids.remove(&entry.order) {
                Some(result_id) => {
                    entry.lifecycle = RunLifecycle::Submitted;
                    entry.result_id = Some(result_id.clone());
                    launched.push((entry.order, result_id));
                }
                None => {
                    warn!(order = %entry.order, "submission response has no result id");
                    entry.finish(RunLifecycle::Failed(FailureDetail::MissingResult));
                }
            }
        }

        self.phase = BatchPhase::Launched;
        info!(runs = launched.len(), "batch submitted");
        Ok(launched)
    }

    /// Submit every configuring run in one gateway request.
    ///
    /// Dropping the returned future before the gateway answers reopens the
    /// batch, as if the submission had failed.
    pub async fn submit_all(&mut self, gateway: &dyn Gateway) -> AppResult<Vec<(RunOrder, ResultId)>> {
        let requests = self.begin_submission()?;
        let mut guard = SubmissionGuard { registry: self };
        let outcome = gateway.submit(&requests).await;
        guard.registry.finish_submission(outcome)
    }

    /// Apply one poll report. Returns `None` for reports that no longer
    /// apply: removed runs, terminal runs and out-of-order sequence numbers.
    pub fn apply_report(&mut self, report: PollReport) -> Option<RunProgressEvent> {
        let entry = self.entries.get_mut(&report.order)?;
        if entry.lifecycle.is_terminal() || report.seq <= entry.last_poll_seq {
            debug!(order = %report.order, seq = report.seq, "stale poll report dropped");
            return None;
        }
        entry.last_poll_seq = report.seq;
        let previous = entry.lifecycle.clone();

        match report.outcome {
            PollOutcome::Transport(message) => {
                entry.finish(RunLifecycle::Failed(FailureDetail::Transport(message)));
            }
            PollOutcome::Progress(progress) => apply_progress(entry, progress),
            PollOutcome::Completed {
                progress,
                download_url,
            } => {
                apply_progress(entry, progress);
                entry.download_url = download_url;
            }
        }

        if entry.lifecycle != previous {
            info!(
                order = %entry.order,
                from = previous.label(),
                to = entry.lifecycle.label(),
                "run state changed"
            );
        }

        Some(RunProgressEvent {
            order: entry.order,
            result_id: entry.result_id.clone(),
            previous,
            lifecycle: entry.lifecycle.clone(),
            current_step: entry.current_step,
            progress_percent: entry.progress_percent,
            download_url: entry.download_url.clone(),
        })
    }

    /// Move an active run to `Stopping`, returning its result id and the
    /// state to revert to if the stop request fails.
    pub fn mark_stopping(&mut self, order: RunOrder) -> AppResult<(ResultId, RunLifecycle)> {
        let entry = self
            .entries
            .get_mut(&order)
            .ok_or(AppError::RunNotFound(order))?;
        let stoppable = matches!(
            entry.lifecycle,
            RunLifecycle::Submitted | RunLifecycle::Running | RunLifecycle::Saving
        );
        let result_id = match (&entry.result_id, stoppable) {
            (Some(id), true) => id.clone(),
            _ => {
                return Err(AppError::invalid_state(
                    "stop run",
                    format!("run {order} is {}", entry.lifecycle),
                ));
            }
        };
        let previous = std::mem::replace(&mut entry.lifecycle, RunLifecycle::Stopping);
        Ok((result_id, previous))
    }

    /// Undo [`mark_stopping`](Self::mark_stopping) unless a poll report
    /// already moved the run on.
    pub fn revert_stopping(&mut self, order: RunOrder, previous: RunLifecycle) {
        if let Some(entry) = self.entries.get_mut(&order) {
            if entry.lifecycle == RunLifecycle::Stopping {
                entry.lifecycle = previous;
            }
        }
    }

    /// True when every run is `Completed` or `Failed`; false when empty.
    pub fn all_reached_terminal(&self) -> bool {
        !self.entries.is_empty() && self.entries.values().all(|e| e.lifecycle.is_terminal())
    }

    /// Forget every run and reopen for a new batch.
    pub fn reset(&mut self) {
        self.entries.clear();
        self.next_order = RunOrder::first();
        self.phase = BatchPhase::Open;
    }
}

fn apply_progress(entry: &mut RunEntry, progress: ProgressReport) {
    let next = ServerStatus::from(progress.status).lifecycle();
    if progress.current_step.is_some() {
        entry.current_step = progress.current_step;
    }
    entry.progress_percent = progress_percent(entry.current_step, entry.config.final_step);

    match next {
        // A stop request is in flight; do not fall back to running.
        RunLifecycle::Submitted | RunLifecycle::Running
            if entry.lifecycle == RunLifecycle::Stopping => {}
        RunLifecycle::Completed => {
            entry.progress_percent = 100.0;
            entry.finish(next);
        }
        terminal if terminal.is_terminal() => entry.finish(terminal),
        other => entry.lifecycle = other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hf_gateway::GatewayError;

    fn configured(registry: &mut RunRegistry) -> RunOrder {
        registry.add_run(RunConfig::new(1, 2, 3, 90)).unwrap()
    }

    fn accepted(order: u32, id: Option<&str>) -> SubmitAccepted {
        SubmitAccepted {
            order: RunOrder::new(order).unwrap(),
            experiment_result_id: id.map(ResultId::from),
        }
    }

    fn progress(order: RunOrder, seq: u64, status: i32, step: i64) -> PollReport {
        PollReport {
            order,
            seq,
            outcome: PollOutcome::Progress(ProgressReport {
                status,
                current_step: Some(step),
            }),
        }
    }

    fn launched_registry() -> (RunRegistry, RunOrder) {
        let mut registry = RunRegistry::new(7);
        let order = configured(&mut registry);
        registry.begin_submission().unwrap();
        registry
            .finish_submission(Ok(vec![accepted(1, Some("r1"))]))
            .unwrap();
        (registry, order)
    }

    #[test]
    fn orders_increase_from_one() {
        let mut registry = RunRegistry::new(7);
        let a = configured(&mut registry);
        let b = configured(&mut registry);
        registry.remove_run(a).unwrap();
        let c = configured(&mut registry);
        assert_eq!((a.get(), b.get(), c.get()), (1, 2, 3));
    }

    #[test]
    fn model_change_clears_experiment() {
        let mut registry = RunRegistry::new(7);
        let order = configured(&mut registry);

        let patch = RunConfigPatch {
            model_id: Some(9),
            ..RunConfigPatch::default()
        };
        let entry = registry.update_config(order, &patch).unwrap();
        assert_eq!(entry.config.model_id, Some(9));
        assert_eq!(entry.config.experiment_id, None);

        let patch = RunConfigPatch {
            model_id: Some(10),
            experiment_id: Some(11),
            ..RunConfigPatch::default()
        };
        let entry = registry.update_config(order, &patch).unwrap();
        assert_eq!(entry.config.experiment_id, Some(11));
    }

    #[test]
    fn final_step_must_be_frame_multiple() {
        let mut registry = RunRegistry::new(7);
        let order = configured(&mut registry);
        let patch = |step| RunConfigPatch {
            final_step: Some(step),
            ..RunConfigPatch::default()
        };
        assert!(registry.update_config(order, &patch(100)).is_err());
        assert!(matches!(
            registry.update_config(order, &patch(200_000)),
            Err(AppError::OutOfRange(_))
        ));
        assert!(registry.update_config(order, &patch(135)).is_ok());
    }

    #[test]
    fn incomplete_config_blocks_submission() {
        let mut registry = RunRegistry::new(7);
        registry.add_run(RunConfig::default()).unwrap();
        assert!(matches!(
            registry.begin_submission(),
            Err(AppError::InvalidConfig(_, _))
        ));
        // Still open: nothing was locked.
        assert!(registry.add_run(RunConfig::default()).is_ok());
    }

    #[test]
    fn failed_submission_changes_nothing() {
        let mut registry = RunRegistry::new(7);
        let order = configured(&mut registry);
        registry.begin_submission().unwrap();

        let err = registry
            .finish_submission(Err(GatewayError::Api {
                status: 503,
                message: "No free node".into(),
            }))
            .unwrap_err();

        assert!(matches!(err, AppError::Submission(ref m) if m == "No free node"));
        assert_eq!(
            registry.get(order).unwrap().lifecycle,
            RunLifecycle::Configuring
        );
        assert!(registry.update_config(order, &RunConfigPatch::default()).is_ok());
    }

    #[test]
    fn missing_result_id_fails_only_that_run() {
        let mut registry = RunRegistry::new(7);
        let a = configured(&mut registry);
        let b = configured(&mut registry);
        registry.begin_submission().unwrap();

        let launched = registry
            .finish_submission(Ok(vec![accepted(1, Some("r1")), accepted(2, None)]))
            .unwrap();

        assert_eq!(launched, vec![(a, ResultId::from("r1"))]);
        assert_eq!(registry.get(a).unwrap().lifecycle, RunLifecycle::Submitted);
        assert_eq!(
            registry.get(b).unwrap().lifecycle,
            RunLifecycle::Failed(FailureDetail::MissingResult)
        );
    }

    #[test]
    fn submission_locks_the_batch() {
        let mut registry = RunRegistry::new(7);
        let order = configured(&mut registry);
        registry.begin_submission().unwrap();

        assert!(matches!(
            registry.remove_run(order),
            Err(AppError::InvalidState { .. })
        ));
        assert!(registry.add_run(RunConfig::default()).is_err());

        registry
            .finish_submission(Ok(vec![accepted(1, Some("r1"))]))
            .unwrap();
        assert!(registry.add_run(RunConfig::default()).is_err());
        assert!(registry.update_config(order, &RunConfigPatch::default()).is_err());
        // Removing a launched run only detaches it.
        assert!(registry.remove_run(order).is_ok());
    }

    #[test]
    fn stale_reports_are_dropped() {
        let (mut registry, order) = launched_registry();

        assert!(registry.apply_report(progress(order, 2, 3, 45)).is_some());
        assert!(registry.apply_report(progress(order, 1, 2, 0)).is_none());

        let entry = registry.get(order).unwrap();
        assert_eq!(entry.lifecycle, RunLifecycle::Saving);
        assert_eq!(entry.last_poll_seq, 2);
        assert_eq!(entry.progress_percent, 50.0);
    }

    #[test]
    fn terminal_state_absorbs_reports() {
        let (mut registry, order) = launched_registry();
        let event = registry
            .apply_report(PollReport {
                order,
                seq: 1,
                outcome: PollOutcome::Completed {
                    progress: ProgressReport {
                        status: 5,
                        current_step: Some(89),
                    },
                    download_url: Some("http://files/r1.zip".into()),
                },
            })
            .unwrap();

        assert!(event.lifecycle_changed());
        assert_eq!(event.progress_percent, 100.0);
        assert!(registry.all_reached_terminal());
        assert!(registry.apply_report(progress(order, 2, 2, 0)).is_none());
        assert_eq!(
            registry.get(order).unwrap().download_url.as_deref(),
            Some("http://files/r1.zip")
        );
        assert!(registry.get(order).unwrap().finished_at.is_some());
    }

    #[test]
    fn stopping_ignores_running_reports() {
        let (mut registry, order) = launched_registry();
        registry.apply_report(progress(order, 1, 2, 10)).unwrap();
        let (id, previous) = registry.mark_stopping(order).unwrap();
        assert_eq!(id, ResultId::from("r1"));
        assert_eq!(previous, RunLifecycle::Running);

        registry.apply_report(progress(order, 2, 2, 20)).unwrap();
        let entry = registry.get(order).unwrap();
        assert_eq!(entry.lifecycle, RunLifecycle::Stopping);
        assert_eq!(entry.current_step, Some(20));

        registry.apply_report(progress(order, 3, 3, 20)).unwrap();
        assert_eq!(registry.get(order).unwrap().lifecycle, RunLifecycle::Saving);
    }

    #[test]
    fn revert_only_applies_while_stopping() {
        let (mut registry, order) = launched_registry();
        let (_, previous) = registry.mark_stopping(order).unwrap();
        registry.revert_stopping(order, previous);
        assert_eq!(registry.get(order).unwrap().lifecycle, RunLifecycle::Submitted);

        let (_, previous) = registry.mark_stopping(order).unwrap();
        registry.apply_report(progress(order, 1, 3, 45)).unwrap();
        registry.revert_stopping(order, previous);
        assert_eq!(registry.get(order).unwrap().lifecycle, RunLifecycle::Saving);
    }

    #[test]
    fn transport_failure_and_unknown_status_are_terminal() {
        let mut registry = RunRegistry::new(7);
        let a = configured(&mut registry);
        let b = configured(&mut registry);
        registry.begin_submission().unwrap();
        registry
            .finish_submission(Ok(vec![accepted(1, Some("r1")), accepted(2, Some("r2"))]))
            .unwrap();

        registry.apply_report(PollReport {
            order: a,
            seq: 1,
            outcome: PollOutcome::Transport("connection reset".into()),
        });
        assert!(!registry.all_reached_terminal());
        registry.apply_report(progress(b, 1, 4, 0));

        assert_eq!(
            registry.get(a).unwrap().lifecycle,
            RunLifecycle::Failed(FailureDetail::Transport("connection reset".into()))
        );
        assert_eq!(
            registry.get(b).unwrap().lifecycle,
            RunLifecycle::Failed(FailureDetail::UnexpectedStatus(4))
        );
        assert!(registry.all_reached_terminal());
    }

    #[test]
    fn empty_registry_is_not_terminal_and_reset_reopens() {
        let (mut registry, _) = launched_registry();
        registry.reset();
        assert!(!registry.all_reached_terminal());
        assert!(!registry.is_launched());
        assert_eq!(configured(&mut registry).get(), 1);
    }
}
