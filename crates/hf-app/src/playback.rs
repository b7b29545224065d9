//! Per-viewer playback over one or more results.

use std::collections::HashMap;
use std::sync::Arc;

use hf_core::steps::{FRAME_RATE, to_display, to_internal};
use hf_core::{ResultId, StepDomain};
use hf_gateway::Gateway;
use hf_results::StepArtifactSet;
use tracing::debug;

use crate::animation::{
    AnimationController, AnimationFrame, CategoryFilter, Pace, SessionId, SessionRequest,
};
use crate::error::{AppError, AppResult};
use crate::fetcher::ArtifactFetcher;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    Paused,
    Playing,
}

/// Play, pause, seek and speed control for a set of results viewed together.
///
/// While paused, frames come from the fetcher; while playing, from one
/// animation session covering every result. A seek always closes the
/// session before fetching.
pub struct PlaybackController {
    fetcher: ArtifactFetcher,
    animation: AnimationController,
    result_ids: Vec<ResultId>,
    domain: StepDomain,
    current_step: u64,
    pace: Pace,
    filter: CategoryFilter,
    state: PlaybackState,
    session: Option<SessionId>,
    frames: HashMap<ResultId, Arc<StepArtifactSet>>,
}

impl PlaybackController {
    /// Viewer over results whose step domains are already known.
    pub fn new(gateway: Arc<dyn Gateway>, targets: Vec<(ResultId, StepDomain)>, pace: Pace) -> AppResult<Self> {
        let domain = StepDomain::union(targets.iter().map(|(_, d)| *d))
            .ok_or_else(|| AppError::InvalidInput("nothing to play back".to_string()))?;
        let mut fetcher = ArtifactFetcher::new(gateway.clone());
        let mut result_ids = Vec::with_capacity(targets.len());
        for (result_id, domain) in targets {
            fetcher.register_domain(result_id.clone(), domain);
            result_ids.push(result_id);
        }
        Ok(Self {
            fetcher,
            animation: AnimationController::new(gateway),
            result_ids,
            domain,
            current_step: 0,
            pace,
            filter: CategoryFilter::All,
            state: PlaybackState::Paused,
            session: None,
            frames: HashMap::new(),
        })
    }

    /// Viewer over results, loading each step domain from the gateway.
    pub async fn open(gateway: Arc<dyn Gateway>, result_ids: Vec<ResultId>, pace: Pace) -> AppResult<Self> {
        let mut fetcher = ArtifactFetcher::new(gateway.clone());
        let mut targets = Vec::with_capacity(result_ids.len());
        for result_id in result_ids {
            let domain = fetcher.load_domain(&result_id).await?;
            targets.push((result_id, domain));
        }
        Self::new(gateway, targets, pace)
    }

    pub fn with_filter(mut self, filter: CategoryFilter) -> Self {
        self.filter = filter;
        self
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    pub fn domain(&self) -> StepDomain {
        self.domain
    }

    pub fn pace(&self) -> Pace {
        self.pace
    }

    pub fn result_ids(&self) -> &[ResultId] {
        &self.result_ids
    }

    /// Current internal step.
    pub fn current_step(&self) -> u64 {
        self.current_step
    }

    pub fn current_display_step(&self) -> u64 {
        to_display(self.current_step)
    }

    /// Latest frame shown for a result.
    pub fn frame(&self, result_id: &ResultId) -> Option<&Arc<StepArtifactSet>> {
        self.frames.get(result_id)
    }

    pub fn animation(&self) -> &AnimationController {
        &self.animation
    }

    pub fn fetcher(&self) -> &ArtifactFetcher {
        &self.fetcher
    }

    fn last_frame_step(&self) -> u64 {
        to_internal(self.domain.last_display())
    }

    async fn load_catalogs(&mut self) -> AppResult<()> {
        for result_id in &self.result_ids {
            self.fetcher.categories(result_id).await?;
        }
        Ok(())
    }

    /// Stream from the current step to the last step.
    pub async fn play(&mut self) -> AppResult<()> {
        if self.state == PlaybackState::Playing {
            return Ok(());
        }
        self.load_catalogs().await?;
        let request = SessionRequest::new(
            self.result_ids[0].clone(),
            self.current_step,
            self.last_frame_step(),
            self.pace,
        )
        .with_results(self.result_ids.clone())
        .with_filter(self.filter.clone())
        .with_catalogs(self.fetcher.catalogs(&self.result_ids));

        let session = self.animation.start(request).await?;
        self.session = Some(session);
        self.state = PlaybackState::Playing;
        Ok(())
    }

    /// Close the session and keep the current step.
    pub fn pause(&mut self) {
        if let Some(session) = self.session.take() {
            self.animation.stop_session(session);
        }
        self.state = PlaybackState::Paused;
    }

    /// Jump to a display step and fetch it for every result that has it.
    pub async fn seek(&mut self, display_step: i64) -> AppResult<Vec<Arc<StepArtifactSet>>> {
        let step = self.domain.check_display(display_step)?;
        self.pause();

        let mut fetched = Vec::with_capacity(self.result_ids.len());
        for result_id in &self.result_ids {
            let has_step = self
                .fetcher
                .domain(result_id)
                .is_some_and(|d| d.contains_internal(step));
            if !has_step {
                continue;
            }
            fetched.push(self.fetcher.fetch_step(result_id, display_step).await?);
        }
        let shown = self.apply_filter(fetched)?;

        // Results without this step show nothing, not an older frame.
        self.frames = shown
            .iter()
            .map(|set| (set.result_id.clone(), set.clone()))
            .collect();
        self.current_step = step;
        debug!(step, display = display_step, shown = shown.len(), "seek");
        Ok(shown)
    }

    /// Restrict fetched sets to the categories the filter selects.
    fn apply_filter(&self, sets: Vec<Arc<StepArtifactSet>>) -> AppResult<Vec<Arc<StepArtifactSet>>> {
        let catalogs = self.fetcher.catalogs(&self.result_ids);
        let Some(ids) = self.filter.resolve(&catalogs)? else {
            return Ok(sets);
        };
        Ok(sets
            .into_iter()
            .map(|set| Arc::new(set.only_categories(&ids)))
            .collect())
    }

    /// One display step ahead; no-op at the last step. Paused only.
    pub async fn step_forward(&mut self) -> AppResult<Option<Vec<Arc<StepArtifactSet>>>> {
        self.require_paused("step forward")?;
        let next = self.current_step + FRAME_RATE;
        if next > self.last_frame_step() {
            return Ok(None);
        }
        self.seek(to_display(next) as i64).await.map(Some)
    }

    /// One display step back; no-op at step 0. Paused only.
    pub async fn step_back(&mut self) -> AppResult<Option<Vec<Arc<StepArtifactSet>>>> {
        self.require_paused("step back")?;
        let Some(previous) = self.current_step.checked_sub(FRAME_RATE) else {
            return Ok(None);
        };
        self.seek(to_display(previous) as i64).await.map(Some)
    }

    pub async fn go_to_start(&mut self) -> AppResult<Vec<Arc<StepArtifactSet>>> {
        self.seek(0).await
    }

    pub async fn go_to_end(&mut self) -> AppResult<Vec<Arc<StepArtifactSet>>> {
        self.seek(self.domain.last_display() as i64).await
    }

    /// Change the speed; a running session restarts from the current step.
    pub async fn set_speed(&mut self, ms_per_step: u64) -> AppResult<()> {
        self.pace = Pace::from_millis(ms_per_step)?;
        if self.state == PlaybackState::Playing {
            self.pause();
            self.play().await?;
        }
        Ok(())
    }

    /// Next streamed frame while playing. At stream end or on error the
    /// controller is paused again.
    pub async fn next_frame(&mut self) -> AppResult<Option<AnimationFrame>> {
        let Some(session) = self.session else {
            return Ok(None);
        };
        match self.animation.next_frame(session).await {
            Ok(Some(frame)) => {
                self.current_step = frame.step;
                self.frames = frame
                    .sets
                    .iter()
                    .map(|set| (set.result_id.clone(), set.clone()))
                    .collect();
                Ok(Some(frame))
            }
            Ok(None) => {
                self.pause();
                Ok(None)
            }
            Err(err) => {
                self.pause();
                Err(err)
            }
        }
    }

    /// Close any session and drop cached artifacts.
    pub fn shutdown(&mut self) {
        self.pause();
        self.animation.stop_all();
        self.fetcher.end_session();
        self.frames.clear();
    }

    fn require_paused(&self, operation: &'static str) -> AppResult<()> {
        match self.state {
            PlaybackState::Paused => Ok(()),
            PlaybackState::Playing => Err(AppError::invalid_state(
                operation,
                "playback is running; pause first",
            )),
        }
    }
}

impl Drop for PlaybackController {
    fn drop(&mut self) {
        self.animation.stop_all();
    }
}
