//! Live animation sessions over the gateway's server-push stream.
//!
//! A session covers one or more result ids and is the only open stream for
//! each of them. Sessions are replaced, never stacked: starting a session
//! for a result id closes the session that currently covers it first.
//!
//! Frames are published in the order the server sent them, one frame per
//! step, with every artifact of that step present.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use hf_core::{CategoryId, HfError, ResultId, to_display};
use hf_gateway::{AnimationFeed, AnimationRequest, Gateway};
use hf_results::StepArtifactSet;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::artifacts::{Catalogs, sets_from_step};
use crate::error::{AppError, AppResult};

pub type SessionId = Uuid;

/// Playback speed in milliseconds per step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Pace(u64);

impl Pace {
    pub const MIN_MS: u64 = 1;
    pub const MAX_MS: u64 = 1501;
    pub const DEFAULT: Pace = Pace(100);

    pub fn from_millis(ms: u64) -> AppResult<Self> {
        if !(Self::MIN_MS..=Self::MAX_MS).contains(&ms) {
            return Err(AppError::OutOfRange(HfError::OutOfRange {
                what: "speed (ms per step)",
                value: ms as i64,
                min: Self::MIN_MS as i64,
                max: Self::MAX_MS as i64,
            }));
        }
        Ok(Self(ms))
    }

    pub fn millis(self) -> u64 {
        self.0
    }

    pub fn nanos_per_step(self) -> u64 {
        self.0 * 1_000_000
    }
}

impl Default for Pace {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Which categories a session streams.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum CategoryFilter {
    #[default]
    All,
    Ids(Vec<CategoryId>),
    /// Categories whose name contains one of these, case-insensitively.
    NameContains(Vec<String>),
}

impl CategoryFilter {
    /// The categories shown by the multi-result viewer.
    pub fn viewer_default() -> Self {
        CategoryFilter::NameContains(vec!["simulator".to_string(), "pigpen".to_string()])
    }

    pub(crate) fn resolve(&self, catalogs: &Catalogs) -> AppResult<Option<Vec<CategoryId>>> {
        match self {
            CategoryFilter::All => Ok(None),
            CategoryFilter::Ids(ids) => Ok(Some(ids.clone())),
            CategoryFilter::NameContains(needles) => {
                let mut ids: Vec<CategoryId> = catalogs
                    .values()
                    .flat_map(|catalog| catalog.matching(needles))
                    .collect();
                ids.sort_unstable();
                ids.dedup();
                if ids.is_empty() {
                    return Err(AppError::InvalidInput(format!(
                        "no category name contains any of {needles:?}"
                    )));
                }
                Ok(Some(ids))
            }
        }
    }
}

/// Parameters of a new session. Steps are internal, both ends inclusive.
#[derive(Debug, Clone)]
pub struct SessionRequest {
    pub result_ids: Vec<ResultId>,
    pub from_step: u64,
    pub to_step: u64,
    pub pace: Pace,
    pub filter: CategoryFilter,
    pub catalogs: Catalogs,
}

impl SessionRequest {
    pub fn new(result_id: ResultId, from_step: u64, to_step: u64, pace: Pace) -> Self {
        Self {
            result_ids: vec![result_id],
            from_step,
            to_step,
            pace,
            filter: CategoryFilter::All,
            catalogs: Catalogs::new(),
        }
    }

    pub fn with_results(mut self, result_ids: Vec<ResultId>) -> Self {
        self.result_ids = result_ids;
        self
    }

    pub fn with_filter(mut self, filter: CategoryFilter) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_catalogs(mut self, catalogs: Catalogs) -> Self {
        self.catalogs = catalogs;
        self
    }
}

/// Everything streamed for one step, one set per result id.
#[derive(Debug, Clone)]
pub struct AnimationFrame {
    pub session: SessionId,
    pub step: u64,
    pub sets: Vec<Arc<StepArtifactSet>>,
}

impl AnimationFrame {
    pub fn display_step(&self) -> u64 {
        to_display(self.step)
    }

    pub fn set_for(&self, result_id: &ResultId) -> Option<&Arc<StepArtifactSet>> {
        self.sets.iter().find(|s| &s.result_id == result_id)
    }
}

struct Session {
    result_ids: Vec<ResultId>,
    from_step: u64,
    to_step: u64,
    pace: Pace,
    catalogs: Catalogs,
    feed: AnimationFeed,
    pending: VecDeque<AnimationFrame>,
    current_step: Option<u64>,
}

/// Opens, drains and closes animation sessions.
pub struct AnimationController {
    gateway: Arc<dyn Gateway>,
    sessions: HashMap<SessionId, Session>,
    by_result: HashMap<ResultId, SessionId>,
    opens: u64,
    closes: u64,
}

impl AnimationController {
    pub fn new(gateway: Arc<dyn Gateway>) -> Self {
        Self {
            gateway,
            sessions: HashMap::new(),
            by_result: HashMap::new(),
            opens: 0,
            closes: 0,
        }
    }

    /// Sessions opened so far.
    pub fn opens(&self) -> u64 {
        self.opens
    }

    /// Sessions closed so far.
    pub fn closes(&self) -> u64 {
        self.closes
    }

    pub fn active_sessions(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_streaming(&self, result_id: &ResultId) -> bool {
        self.by_result.contains_key(result_id)
    }

    pub fn session_for(&self, result_id: &ResultId) -> Option<SessionId> {
        self.by_result.get(result_id).copied()
    }

    /// Last step published by a session.
    pub fn current_step(&self, session: SessionId) -> Option<u64> {
        self.sessions.get(&session)?.current_step
    }

    pub fn pace(&self, session: SessionId) -> Option<Pace> {
        self.sessions.get(&session).map(|s| s.pace)
    }

    /// Open a session, closing any session covering one of its result ids.
    pub async fn start(&mut self, request: SessionRequest) -> AppResult<SessionId> {
        for result_id in &request.result_ids {
            self.stop(result_id);
        }
        self.open(request).await
    }

    /// Open a session unless one of its result ids is already streaming.
    pub async fn try_start(&mut self, request: SessionRequest) -> AppResult<SessionId> {
        if let Some(busy) = request.result_ids.iter().find(|id| self.is_streaming(id)) {
            return Err(AppError::AlreadyStreaming(busy.clone()));
        }
        self.open(request).await
    }

    async fn open(&mut self, request: SessionRequest) -> AppResult<SessionId> {
        if request.result_ids.is_empty() {
            return Err(AppError::InvalidInput(
                "an animation needs at least one result".to_string(),
            ));
        }
        if request.from_step > request.to_step {
            return Err(AppError::InvalidInput(format!(
                "animation starts at step {} after its end {}",
                request.from_step, request.to_step
            )));
        }
        let category_ids = request.filter.resolve(&request.catalogs)?;

        let feed = self
            .gateway
            .open_animation(&AnimationRequest {
                result_ids: request.result_ids.clone(),
                start_step: request.from_step,
                end_step: request.to_step,
                duration_nanos_per_step: request.pace.nanos_per_step(),
                category_ids,
            })
            .await?;

        let id = Uuid::new_v4();
        self.opens += 1;
        for result_id in &request.result_ids {
            self.by_result.insert(result_id.clone(), id);
        }
        info!(
            session = %id,
            results = request.result_ids.len(),
            from = request.from_step,
            to = request.to_step,
            pace_ms = request.pace.millis(),
            "animation session opened"
        );
        self.sessions.insert(
            id,
            Session {
                result_ids: request.result_ids,
                from_step: request.from_step,
                to_step: request.to_step,
                pace: request.pace,
                catalogs: request.catalogs,
                feed,
                pending: VecDeque::new(),
                current_step: None,
            },
        );
        Ok(id)
    }

    /// Close the session covering `result_id`. Does nothing when idle.
    pub fn stop(&mut self, result_id: &ResultId) -> bool {
        match self.by_result.get(result_id).copied() {
            Some(session) => self.stop_session(session),
            None => false,
        }
    }

    /// Close a session by id. Does nothing if it is already closed.
    pub fn stop_session(&mut self, session: SessionId) -> bool {
        let Some(mut closed) = self.sessions.remove(&session) else {
            return false;
        };
        closed.feed.close();
        for result_id in &closed.result_ids {
            if self.by_result.get(result_id) == Some(&session) {
                self.by_result.remove(result_id);
            }
        }
        self.closes += 1;
        debug!(
            session = %session,
            from = closed.from_step,
            to = closed.to_step,
            reached = ?closed.current_step,
            "animation session closed"
        );
        true
    }

    pub fn stop_all(&mut self) {
        let ids: Vec<SessionId> = self.sessions.keys().copied().collect();
        for id in ids {
            self.stop_session(id);
        }
    }

    /// Next frame of a session, in the order the server sent it.
    ///
    /// `Ok(None)` once the stream ended or the session is closed; the session
    /// is closed on stream end and on error. There is no reconnect.
    pub async fn next_frame(&mut self, session: SessionId) -> AppResult<Option<AnimationFrame>> {
        loop {
            let Some(active) = self.sessions.get_mut(&session) else {
                return Ok(None);
            };
            if let Some(frame) = active.pending.pop_front() {
                active.current_step = Some(frame.step);
                return Ok(Some(frame));
            }

            let next = active.feed.next_batch().await;
            match next {
                Some(Ok(batch)) => {
                    let fallback = active.result_ids[0].clone();
                    for step in batch.steps {
                        let number = step.step;
                        let sets = sets_from_step(step, &fallback, &active.catalogs)
                            .into_iter()
                            .map(Arc::new)
                            .collect();
                        active.pending.push_back(AnimationFrame {
                            session,
                            step: number,
                            sets,
                        });
                    }
                }
                Some(Err(err)) => {
                    warn!(session = %session, error = %err, "animation stream failed");
                    self.stop_session(session);
                    return Err(AppError::from(err));
                }
                None => {
                    info!(session = %session, "animation stream ended");
                    self.stop_session(session);
                    return Ok(None);
                }
            }
        }
    }
}

impl Drop for AnimationController {
    fn drop(&mut self) {
        self.stop_all();
    }
}
