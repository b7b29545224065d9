//! Application layer for herdflow.
//!
//! Tracks batches of simulation runs through their lifecycle, fetches
//! per-step artifacts and drives live playback. The CLI consumes this crate
//! only through the types re-exported here.

pub mod animation;
pub mod artifacts;
pub mod batch;
pub mod config;
pub mod error;
pub mod fetcher;
pub mod lifecycle;
pub mod playback;
pub mod poller;
pub mod progress;
pub mod registry;
pub mod supervisor;

pub use animation::{
    AnimationController, AnimationFrame, CategoryFilter, Pace, SessionId, SessionRequest,
};
pub use batch::{BatchFile, BatchRun, load_batch};
pub use config::{AppConfig, PlaybackSettings, load_config};
pub use error::{AppError, AppResult};
pub use fetcher::ArtifactFetcher;
pub use lifecycle::{FailureDetail, RunLifecycle, ServerStatus};
pub use playback::{PlaybackController, PlaybackState};
pub use poller::{PollOutcome, PollReport, PollSettings, PollerHandle, ProgressPoller, spawn_poller};
pub use progress::{RunProgressEvent, progress_percent};
pub use registry::{RunConfig, RunConfigPatch, RunEntry, RunRegistry};
pub use supervisor::RunSupervisor;
