//! The gateway contract and the animation feed handle.

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::BoxStream;
use hf_core::ResultId;

use crate::error::GatewayResult;
use crate::types::{
    AnimationRequest, Category, ProgressReport, ResultDetail, SimulationRequest, StepBatch,
    SubmitAccepted,
};

/// Ordered step batches pushed by the server for one animation.
pub type BatchStream = BoxStream<'static, GatewayResult<StepBatch>>;

/// Operations of the remote simulation gateway.
///
/// All steps are internal steps.
#[async_trait]
pub trait Gateway: Send + Sync {
    /// Submit a batch of runs in one request.
    async fn submit(&self, requests: &[SimulationRequest]) -> GatewayResult<Vec<SubmitAccepted>>;

    async fn progress(&self, result_id: &ResultId) -> GatewayResult<ProgressReport>;

    /// Ask the server to stop a running simulation.
    async fn stop(&self, result_id: &ResultId) -> GatewayResult<()>;

    async fn categories(&self, result_id: &ResultId) -> GatewayResult<Vec<Category>>;

    /// Rendered artifacts for `start_step..=end_step`.
    async fn images_in_range(
        &self,
        result_id: &ResultId,
        start_step: u64,
        end_step: u64,
    ) -> GatewayResult<StepBatch>;

    async fn result_detail(&self, result_id: &ResultId) -> GatewayResult<ResultDetail>;

    /// Open a server-push connection streaming steps at the requested pace.
    async fn open_animation(&self, request: &AnimationRequest) -> GatewayResult<AnimationFeed>;
}

/// Owned handle of one open animation connection.
///
/// Closing drops the underlying stream, which tears down the connection.
/// `Drop` closes too, so a forgotten feed never keeps streaming.
pub struct AnimationFeed {
    batches: BatchStream,
    close_hook: Option<Box<dyn FnOnce() + Send>>,
    closed: bool,
}

impl AnimationFeed {
    pub fn new(batches: BatchStream) -> Self {
        Self {
            batches,
            close_hook: None,
            closed: false,
        }
    }

    /// Run `hook` exactly once when the feed is closed.
    pub fn with_close_hook(mut self, hook: impl FnOnce() + Send + 'static) -> Self {
        self.close_hook = Some(Box::new(hook));
        self
    }

    /// Next batch as sent by the server; `None` once the stream ended or the
    /// feed was closed.
    pub async fn next_batch(&mut self) -> Option<GatewayResult<StepBatch>> {
        if self.closed {
            return None;
        }
        self.batches.next().await
    }

    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.batches = futures::stream::empty().boxed();
        if let Some(hook) = self.close_hook.take() {
            hook();
        }
    }
}

impl Drop for AnimationFeed {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for AnimationFeed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnimationFeed")
            .field("closed", &self.closed)
            .finish()
    }
}
