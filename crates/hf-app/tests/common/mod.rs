//! Scripted in-process gateway shared by the integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::StreamExt;
use hf_core::{FRAME_RATE, ResultId};
use hf_gateway::{
    AnimationFeed, AnimationRequest, Category, CategoryImage, Gateway, GatewayError,
    GatewayResult, ProgressReport, ResultDetail, SimulationRequest, StepBatch, StepImages,
    SubmitAccepted,
};

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Submit(usize),
    Progress(ResultId),
    Stop(ResultId),
    Categories(ResultId),
    Images {
        result_id: ResultId,
        start: u64,
        end: u64,
    },
    Detail(ResultId),
    OpenAnimation {
        result_ids: Vec<ResultId>,
        start: u64,
        end: u64,
        nanos: u64,
        categories: Option<Vec<i64>>,
    },
    CloseAnimation,
}

/// Progress answer for one poll; the last one of a script repeats.
#[derive(Debug, Clone)]
pub enum Scripted {
    Status(i32, Option<i64>),
    Fail(&'static str),
}

#[derive(Default)]
pub struct MockGateway {
    calls: Arc<Mutex<Vec<Call>>>,
    progress: Mutex<HashMap<ResultId, VecDeque<Scripted>>>,
    submit_error: Mutex<Option<String>>,
    missing_results: Mutex<Vec<u32>>,
    stop_error: Mutex<Option<String>>,
    final_steps: Mutex<HashMap<ResultId, u64>>,
    /// Animation stream fails after this many batches.
    animation_fails_after: Mutex<Option<usize>>,
    submit_hangs: Mutex<bool>,
    /// Range queries answer every internal step, not only frame steps.
    dense_images: Mutex<bool>,
    /// Steps also carry category 3 as a metric.
    with_metric: Mutex<bool>,
    images_fail_for: Mutex<Option<ResultId>>,
}

impl MockGateway {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn script_progress(&self, result_id: &str, script: Vec<Scripted>) {
        self.progress
            .lock()
            .unwrap()
            .insert(ResultId::from(result_id), script.into());
    }

    pub fn fail_submit(&self, message: &str) {
        *self.submit_error.lock().unwrap() = Some(message.to_string());
    }

    pub fn omit_result_for(&self, order: u32) {
        self.missing_results.lock().unwrap().push(order);
    }

    pub fn fail_stop(&self, message: &str) {
        *self.stop_error.lock().unwrap() = Some(message.to_string());
    }

    pub fn clear_stop_failure(&self) {
        *self.stop_error.lock().unwrap() = None;
    }

    pub fn set_final_step(&self, result_id: &str, final_step: u64) {
        self.final_steps
            .lock()
            .unwrap()
            .insert(ResultId::from(result_id), final_step);
    }

    pub fn fail_animation_after(&self, batches: usize) {
        *self.animation_fails_after.lock().unwrap() = Some(batches);
    }

    pub fn hang_submit(&self) {
        *self.submit_hangs.lock().unwrap() = true;
    }

    pub fn answer_every_step(&self) {
        *self.dense_images.lock().unwrap() = true;
    }

    pub fn include_metric(&self) {
        *self.with_metric.lock().unwrap() = true;
    }

    pub fn fail_images_for(&self, result_id: &str) {
        *self.images_fail_for.lock().unwrap() = Some(ResultId::from(result_id));
    }

    fn metric(&self) -> bool {
        *self.with_metric.lock().unwrap()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }

    pub fn progress_calls(&self, result_id: &str) -> usize {
        let id = ResultId::from(result_id);
        self.calls()
            .iter()
            .filter(|c| matches!(c, Call::Progress(r) if *r == id))
            .count()
    }

    pub fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.calls().iter().filter(|c| pred(c)).count()
    }
}

fn step_images(
    result_ids: &[ResultId],
    step: u64,
    tag_results: bool,
    with_metric: bool,
    category_ids: Option<&[i64]>,
) -> StepImages {
    let last = if with_metric { 3 } else { 2 };
    let categories = result_ids
        .iter()
        .flat_map(|result_id| {
            (1..=last).map(move |category_id| CategoryImage {
                experiment_result_id: tag_results.then(|| result_id.clone()),
                category_id,
                encoded_image: (category_id != 3).then(|| "/9j/".to_string()),
                value: (category_id == 3).then_some(12.0),
            })
        })
        .filter(|image| category_ids.is_none_or(|ids| ids.contains(&image.category_id)))
        .collect();
    StepImages { step, categories }
}

#[async_trait]
impl Gateway for MockGateway {
    async fn submit(&self, requests: &[SimulationRequest]) -> GatewayResult<Vec<SubmitAccepted>> {
        self.record(Call::Submit(requests.len()));
        let hangs = *self.submit_hangs.lock().unwrap();
        if hangs {
            futures::future::pending::<()>().await;
        }
        if let Some(message) = self.submit_error.lock().unwrap().clone() {
            return Err(GatewayError::Api {
                status: 400,
                message,
            });
        }
        let missing = self.missing_results.lock().unwrap().clone();
        Ok(requests
            .iter()
            .map(|r| SubmitAccepted {
                order: r.order,
                experiment_result_id: (!missing.contains(&r.order.get()))
                    .then(|| ResultId::from(format!("r{}", r.order.get()))),
            })
            .collect())
    }

    async fn progress(&self, result_id: &ResultId) -> GatewayResult<ProgressReport> {
        self.record(Call::Progress(result_id.clone()));
        let mut scripts = self.progress.lock().unwrap();
        let script = scripts.entry(result_id.clone()).or_default();
        let next = if script.len() > 1 {
            script.pop_front()
        } else {
            script.front().cloned()
        };
        match next {
            Some(Scripted::Status(status, current_step)) => Ok(ProgressReport {
                status,
                current_step,
            }),
            Some(Scripted::Fail(message)) => Err(GatewayError::Transport(message.to_string())),
            None => Ok(ProgressReport {
                status: 0,
                current_step: None,
            }),
        }
    }

    async fn stop(&self, result_id: &ResultId) -> GatewayResult<()> {
        self.record(Call::Stop(result_id.clone()));
        match self.stop_error.lock().unwrap().clone() {
            Some(message) => Err(GatewayError::Transport(message)),
            None => Ok(()),
        }
    }

    async fn categories(&self, result_id: &ResultId) -> GatewayResult<Vec<Category>> {
        self.record(Call::Categories(result_id.clone()));
        Ok(vec![
            Category {
                id: 1,
                name: "Simulator".to_string(),
            },
            Category {
                id: 2,
                name: "Pigpen 1".to_string(),
            },
            Category {
                id: 3,
                name: "Infected count".to_string(),
            },
        ])
    }

    async fn images_in_range(
        &self,
        result_id: &ResultId,
        start_step: u64,
        end_step: u64,
    ) -> GatewayResult<StepBatch> {
        self.record(Call::Images {
            result_id: result_id.clone(),
            start: start_step,
            end: end_step,
        });
        if self.images_fail_for.lock().unwrap().as_ref() == Some(result_id) {
            return Err(GatewayError::Transport("images unavailable".to_string()));
        }
        let ids = [result_id.clone()];
        let stride = if *self.dense_images.lock().unwrap() {
            1
        } else {
            FRAME_RATE as usize
        };
        Ok(StepBatch {
            steps: (start_step..=end_step)
                .step_by(stride)
                .map(|step| step_images(&ids, step, false, self.metric(), None))
                .collect(),
        })
    }

    async fn result_detail(&self, result_id: &ResultId) -> GatewayResult<ResultDetail> {
        self.record(Call::Detail(result_id.clone()));
        let final_step = self
            .final_steps
            .lock()
            .unwrap()
            .get(result_id)
            .copied()
            .unwrap_or(90);
        Ok(ResultDetail {
            download_url: Some(format!("http://files.local/{result_id}.zip")),
            final_step,
            experiment_name: "Outbreak".to_string(),
            model_name: "SEIR".to_string(),
        })
    }

    async fn open_animation(&self, request: &AnimationRequest) -> GatewayResult<AnimationFeed> {
        self.record(Call::OpenAnimation {
            result_ids: request.result_ids.clone(),
            start: request.start_step,
            end: request.end_step,
            nanos: request.duration_nanos_per_step,
            categories: request.category_ids.clone(),
        });
        let tag_results = request.result_ids.len() > 1;
        let with_metric = self.metric();
        let mut batches: Vec<GatewayResult<StepBatch>> = (request.start_step..=request.end_step)
            .step_by(FRAME_RATE as usize)
            .map(|step| {
                Ok(StepBatch {
                    steps: vec![step_images(
                        &request.result_ids,
                        step,
                        tag_results,
                        with_metric,
                        request.category_ids.as_deref(),
                    )],
                })
            })
            .collect();
        if let Some(after) = *self.animation_fails_after.lock().unwrap() {
            batches.truncate(after);
            batches.push(Err(GatewayError::Stream("connection reset".to_string())));
        }

        let calls = self.calls.clone();
        Ok(AnimationFeed::new(futures::stream::iter(batches).boxed())
            .with_close_hook(move || calls.lock().unwrap().push(Call::CloseAnimation)))
    }
}
