//! Owning controller of a run batch.

use std::collections::HashMap;
use std::sync::Arc;

use hf_core::{ProjectId, ResultId, RunOrder};
use hf_gateway::Gateway;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::error::{AppError, AppResult};
use crate::poller::{PollReport, PollSettings, PollerHandle, ProgressPoller, spawn_poller};
use crate::progress::RunProgressEvent;
use crate::registry::{RunConfig, RunConfigPatch, RunEntry, RunRegistry};

const REPORT_CHANNEL_CAPACITY: usize = 64;

/// Owns the [`RunRegistry`] and one poll task per active run.
///
/// Poll tasks send reports over a channel; the supervisor is the only
/// writer of the registry. Dropping the supervisor cancels every poll task.
pub struct RunSupervisor {
    registry: RunRegistry,
    gateway: Arc<dyn Gateway>,
    settings: PollSettings,
    pollers: HashMap<RunOrder, PollerHandle>,
    reports_tx: mpsc::Sender<PollReport>,
    reports_rx: mpsc::Receiver<PollReport>,
}

impl RunSupervisor {
    pub fn new(gateway: Arc<dyn Gateway>, project_id: ProjectId, settings: PollSettings) -> Self {
        let (reports_tx, reports_rx) = mpsc::channel(REPORT_CHANNEL_CAPACITY);
        Self {
            registry: RunRegistry::new(project_id),
            gateway,
            settings,
            pollers: HashMap::new(),
            reports_tx,
            reports_rx,
        }
    }

    pub fn registry(&self) -> &RunRegistry {
        &self.registry
    }

    pub fn snapshot(&self) -> Vec<RunEntry> {
        self.registry.snapshot()
    }

    /// Number of poll tasks still owned.
    pub fn active_pollers(&self) -> usize {
        self.pollers.len()
    }

    pub fn add_run(&mut self, config: RunConfig) -> AppResult<RunOrder> {
        self.registry.add_run(config)
    }

    pub fn update_config(&mut self, order: RunOrder, patch: &RunConfigPatch) -> AppResult<&RunEntry> {
        self.registry.update_config(order, patch)
    }

    /// Remove a run and cancel its poll task.
    pub fn remove_run(&mut self, order: RunOrder) -> AppResult<RunEntry> {
        let entry = self.registry.remove_run(order)?;
        if let Some(handle) = self.pollers.remove(&order) {
            handle.cancel();
        }
        Ok(entry)
    }

    /// Submit the batch and start polling every launched run.
    pub async fn submit_all(&mut self) -> AppResult<Vec<(RunOrder, ResultId)>> {
        let launched = self.registry.submit_all(self.gateway.as_ref()).await?;
        for (order, result_id) in &launched {
            let final_step = self
                .registry
                .get(*order)
                .map(|e| e.config.final_step)
                .unwrap_or_default();
            let poller = ProgressPoller::new(
                *order,
                result_id.clone(),
                final_step,
                self.gateway.clone(),
                self.settings,
            );
            self.pollers
                .insert(*order, spawn_poller(poller, self.reports_tx.clone()));
        }
        Ok(launched)
    }

    /// Ask the server to stop a run. On failure the run reverts to its
    /// previous state.
    pub async fn stop_run(&mut self, order: RunOrder) -> AppResult<()> {
        let (result_id, previous) = self.registry.mark_stopping(order)?;
        match self.gateway.stop(&result_id).await {
            Ok(()) => {
                info!(%order, result = %result_id, "stop requested");
                Ok(())
            }
            Err(err) => {
                warn!(%order, error = %err, "stop request failed");
                self.registry.revert_stopping(order, previous);
                Err(AppError::from(err))
            }
        }
    }

    /// Apply the next poll report. Returns `None` when no poll task is left
    /// and no report is pending.
    pub async fn next_update(&mut self) -> Option<RunProgressEvent> {
        loop {
            let report = if self.pollers.is_empty() {
                self.reports_rx.try_recv().ok()?
            } else {
                self.reports_rx.recv().await?
            };
            let order = report.order;
            let event = self.registry.apply_report(report);
            let finished = self
                .registry
                .get(order)
                .is_none_or(|entry| entry.lifecycle.is_terminal());
            if finished {
                self.pollers.remove(&order);
            }
            if event.is_some() {
                return event;
            }
        }
    }

    /// Apply reports until every run is terminal, calling `on_event` for
    /// each applied report.
    pub async fn run_until_terminal<F>(&mut self, mut on_event: F) -> AppResult<()>
    where
        F: FnMut(&RunProgressEvent),
    {
        while !self.registry.all_reached_terminal() {
            match self.next_update().await {
                Some(event) => on_event(&event),
                None => {
                    return Err(AppError::invalid_state(
                        "wait for runs",
                        "no submitted run is being polled",
                    ));
                }
            }
        }
        Ok(())
    }

    /// Cancel polling and start a fresh batch.
    pub fn reset(&mut self) {
        self.shutdown();
        while self.reports_rx.try_recv().is_ok() {}
        self.registry.reset();
    }

    /// Cancel every poll task. The registry is kept as is.
    pub fn shutdown(&mut self) {
        for (_, handle) in self.pollers.drain() {
            handle.cancel();
        }
    }
}

impl Drop for RunSupervisor {
    fn drop(&mut self) {
        self.shutdown();
    }
}
