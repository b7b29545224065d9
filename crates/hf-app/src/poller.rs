//! Progress polling of submitted runs.
//!
//! Each submitted run gets one task that queries progress, sends the report
//! to the supervisor over a channel and sleeps. The task never touches the
//! registry. Ticks are serialized: the next query is issued only after the
//! previous one resolved and its report was handed off.

use std::sync::Arc;
use std::time::Duration;

use hf_core::{ResultId, RunOrder};
use hf_gateway::{Gateway, ProgressReport};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::lifecycle::ServerStatus;

/// Poll intervals in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollSettings {
    pub interval_ms: u64,
    /// While saving with no step advance.
    pub saving_interval_ms: u64,
    /// While saving with the final step reached.
    pub finishing_interval_ms: u64,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            interval_ms: 2000,
            saving_interval_ms: 1000,
            finishing_interval_ms: 500,
        }
    }
}

impl PollSettings {
    pub fn next_delay(&self, status: ServerStatus, step_advanced: bool, at_final_step: bool) -> Duration {
        let ms = match status {
            ServerStatus::Saving if at_final_step => self.finishing_interval_ms,
            ServerStatus::Saving if !step_advanced => self.saving_interval_ms,
            _ => self.interval_ms,
        };
        Duration::from_millis(ms)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    Progress(ProgressReport),
    /// Status 5 plus the result of the single follow-up detail request.
    Completed {
        progress: ProgressReport,
        download_url: Option<String>,
    },
    Transport(String),
}

/// Message from a poll task to the supervisor. `seq` increases by one per
/// tick of the same run.
#[derive(Debug, Clone, PartialEq)]
pub struct PollReport {
    pub order: RunOrder,
    pub seq: u64,
    pub outcome: PollOutcome,
}

/// Poll state of one run.
pub struct ProgressPoller {
    order: RunOrder,
    result_id: ResultId,
    final_step: u64,
    gateway: Arc<dyn Gateway>,
    settings: PollSettings,
    seq: u64,
    last_step: Option<i64>,
    finished: bool,
}

impl ProgressPoller {
    pub fn new(
        order: RunOrder,
        result_id: ResultId,
        final_step: u64,
        gateway: Arc<dyn Gateway>,
        settings: PollSettings,
    ) -> Self {
        Self {
            order,
            result_id,
            final_step,
            gateway,
            settings,
            seq: 0,
            last_step: None,
            finished: false,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Run one progress query. Returns the report and the delay before the
    /// next tick, or `None` once polling has finished.
    pub async fn tick(&mut self) -> Option<(PollReport, Duration)> {
        if self.finished {
            return None;
        }
        self.seq += 1;

        let progress = match self.gateway.progress(&self.result_id).await {
            Ok(progress) => progress,
            Err(err) => {
                warn!(order = %self.order, error = %err, "progress query failed");
                self.finished = true;
                let report = self.report(PollOutcome::Transport(err.user_message()));
                return Some((report, Duration::ZERO));
            }
        };

        let status = ServerStatus::from(progress.status);
        debug!(
            order = %self.order,
            seq = self.seq,
            status = progress.status,
            step = ?progress.current_step,
            "progress"
        );

        let outcome = match status {
            ServerStatus::Completed => {
                self.finished = true;
                let download_url = match self.gateway.result_detail(&self.result_id).await {
                    Ok(detail) => detail.download_url,
                    Err(err) => {
                        warn!(order = %self.order, error = %err, "result detail unavailable");
                        None
                    }
                };
                PollOutcome::Completed {
                    progress,
                    download_url,
                }
            }
            ServerStatus::Unknown(_) => {
                self.finished = true;
                PollOutcome::Progress(progress)
            }
            _ => PollOutcome::Progress(progress),
        };

        let step_advanced = match (progress.current_step, self.last_step) {
            (Some(now), Some(before)) => now > before,
            (Some(_), None) => true,
            (None, _) => false,
        };
        let at_final_step = progress
            .current_step
            .is_some_and(|step| step >= 0 && step as u64 + 1 >= self.final_step);
        if progress.current_step.is_some() {
            self.last_step = progress.current_step;
        }

        let delay = self.settings.next_delay(status, step_advanced, at_final_step);
        Some((self.report(outcome), delay))
    }

    fn report(&self, outcome: PollOutcome) -> PollReport {
        PollReport {
            order: self.order,
            seq: self.seq,
            outcome,
        }
    }

    /// Poll until a terminal status or until the receiver is gone.
    pub async fn run(mut self, reports: mpsc::Sender<PollReport>) {
        while let Some((report, delay)) = self.tick().await {
            if reports.send(report).await.is_err() {
                break;
            }
            if self.finished {
                break;
            }
            tokio::time::sleep(delay).await;
        }
        debug!(order = %self.order, polls = self.seq, "poller finished");
    }
}

/// Owned handle of a running poll task. Dropping it cancels the task.
#[derive(Debug)]
pub struct PollerHandle {
    order: RunOrder,
    task: JoinHandle<()>,
}

impl PollerHandle {
    pub fn order(&self) -> RunOrder {
        self.order
    }

    pub fn cancel(&self) {
        self.task.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for PollerHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

pub fn spawn_poller(poller: ProgressPoller, reports: mpsc::Sender<PollReport>) -> PollerHandle {
    let order = poller.order;
    PollerHandle {
        order,
        task: tokio::spawn(poller.run(reports)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_follows_saving_state() {
        let settings = PollSettings::default();
        assert_eq!(
            settings.next_delay(ServerStatus::Running, false, false),
            Duration::from_millis(2000)
        );
        assert_eq!(
            settings.next_delay(ServerStatus::Saving, true, false),
            Duration::from_millis(2000)
        );
        assert_eq!(
            settings.next_delay(ServerStatus::Saving, false, false),
            Duration::from_millis(1000)
        );
        assert_eq!(
            settings.next_delay(ServerStatus::Saving, false, true),
            Duration::from_millis(500)
        );
        assert_eq!(
            settings.next_delay(ServerStatus::Running, false, true),
            Duration::from_millis(2000)
        );
    }

    #[test]
    fn settings_fill_missing_fields_from_defaults() {
        let settings: PollSettings = serde_yaml::from_str("interval_ms: 3000").unwrap();
        assert_eq!(settings.interval_ms, 3000);
        assert_eq!(settings.finishing_interval_ms, 500);
    }
}
