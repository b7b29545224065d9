//! reqwest implementation of the gateway.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use hf_core::ResultId;
use reqwest::{RequestBuilder, Response, Url};
use reqwest_eventsource::{Event, EventSource, retry};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::config::GatewayConfig;
use crate::error::{GatewayError, GatewayResult};
use crate::gateway::{AnimationFeed, Gateway};
use crate::types::{
    AnimationRequest, Category, Envelope, ErrorBody, ProgressReport, ResultDetail,
    SimulationRequest, StepBatch, SubmitAccepted, SubmitBody,
};

/// Gateway reached over HTTP, with animations over server-sent events.
#[derive(Clone)]
pub struct HttpGateway {
    client: reqwest::Client,
    base_url: Url,
    api_key: Option<String>,
    request_timeout: Duration,
}

impl HttpGateway {
    pub fn new(config: &GatewayConfig) -> GatewayResult<Self> {
        let base_url = Url::parse(&config.base_url)
            .map_err(|e| GatewayError::InvalidUrl(format!("{}: {}", config.base_url, e)))?;
        if base_url.cannot_be_a_base() {
            return Err(GatewayError::InvalidUrl(config.base_url.clone()));
        }

        // No client-wide timeout: it would also cut long animation streams.
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_millis(config.connect_timeout_ms))
            .build()?;

        Ok(Self {
            client,
            base_url,
            api_key: config.api_key.clone(),
            request_timeout: Duration::from_millis(config.request_timeout_ms),
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, segments: &[&str]) -> GatewayResult<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| GatewayError::InvalidUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        match &self.api_key {
            Some(key) => builder.bearer_auth(key),
            None => builder,
        }
    }

    async fn send(&self, builder: RequestBuilder) -> GatewayResult<Response> {
        let response = self
            .authorized(builder)
            .timeout(self.request_timeout)
            .send()
            .await?;
        ensure_success(response).await
    }

    async fn get_data<T: DeserializeOwned>(
        &self,
        segments: &[&str],
        query: &[(&str, String)],
    ) -> GatewayResult<T> {
        let url = self.endpoint(segments)?;
        let response = self.send(self.client.get(url).query(query)).await?;
        read_data(response).await
    }
}

async fn ensure_success(response: Response) -> GatewayResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorBody>(&body)
        .ok()
        .and_then(|b| b.message)
        .unwrap_or_else(|| {
            status
                .canonical_reason()
                .unwrap_or("request failed")
                .to_string()
        });
    Err(GatewayError::Api {
        status: status.as_u16(),
        message,
    })
}

async fn read_data<T: DeserializeOwned>(response: Response) -> GatewayResult<T> {
    let body = response.text().await?;
    let envelope: Envelope<T> = serde_json::from_str(&body)?;
    Ok(envelope.data)
}

fn join_ids<T: ToString>(ids: &[T]) -> String {
    ids.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

#[async_trait]
impl Gateway for HttpGateway {
    async fn submit(&self, requests: &[SimulationRequest]) -> GatewayResult<Vec<SubmitAccepted>> {
        let url = self.endpoint(&["simulations", "cluster"])?;
        debug!(runs = requests.len(), "submitting simulation batch");
        let body = SubmitBody {
            simulation_requests: requests,
        };
        let response = self.send(self.client.post(url).json(&body)).await?;
        read_data(response).await
    }

    async fn progress(&self, result_id: &ResultId) -> GatewayResult<ProgressReport> {
        self.get_data(&["experiment_results", result_id.as_str(), "progress"], &[])
            .await
    }

    async fn stop(&self, result_id: &ResultId) -> GatewayResult<()> {
        let url = self.endpoint(&["experiment_results", result_id.as_str(), "simulation"])?;
        self.send(self.client.delete(url)).await?;
        Ok(())
    }

    async fn categories(&self, result_id: &ResultId) -> GatewayResult<Vec<Category>> {
        self.get_data(
            &["experiment_result_categories"],
            &[("experiment_result_id", result_id.to_string())],
        )
        .await
    }

    async fn images_in_range(
        &self,
        result_id: &ResultId,
        start_step: u64,
        end_step: u64,
    ) -> GatewayResult<StepBatch> {
        self.get_data(
            &["experiment_result_images"],
            &[
                ("experiment_result_id", result_id.to_string()),
                ("start_step", start_step.to_string()),
                ("end_step", end_step.to_string()),
            ],
        )
        .await
    }

    async fn result_detail(&self, result_id: &ResultId) -> GatewayResult<ResultDetail> {
        self.get_data(&["experiment_results", result_id.as_str()], &[])
            .await
    }

    async fn open_animation(&self, request: &AnimationRequest) -> GatewayResult<AnimationFeed> {
        let url = self.endpoint(&["experiment_result_images", "multi_experiment_animation"])?;
        let mut query = vec![
            ("experiment_result_id", join_ids(&request.result_ids)),
            ("start_step", request.start_step.to_string()),
            ("end_step", request.end_step.to_string()),
            ("duration", request.duration_nanos_per_step.to_string()),
        ];
        if let Some(category_ids) = &request.category_ids {
            query.push(("category_ids", join_ids(category_ids)));
        }

        let builder = self.authorized(self.client.get(url).query(&query));
        let mut source =
            EventSource::new(builder).map_err(|e| GatewayError::Stream(e.to_string()))?;
        // Reconnecting is the caller's decision.
        source.set_retry_policy(Box::new(retry::Never));

        debug!(
            results = %query[0].1,
            start = request.start_step,
            end = request.end_step,
            "opening animation stream"
        );

        let batches = async_stream::stream! {
            while let Some(event) = source.next().await {
                match event {
                    Ok(Event::Open) => continue,
                    Ok(Event::Message(message)) => {
                        yield serde_json::from_str::<StepBatch>(&message.data)
                            .map_err(GatewayError::from);
                    }
                    Err(reqwest_eventsource::Error::StreamEnded) => break,
                    Err(err) => {
                        warn!(error = %err, "animation stream failed");
                        yield Err(GatewayError::Stream(err.to_string()));
                        break;
                    }
                }
            }
            source.close();
        };

        Ok(AnimationFeed::new(Box::pin(batches)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gateway(base: &str) -> HttpGateway {
        HttpGateway::new(&GatewayConfig {
            base_url: base.to_string(),
            ..GatewayConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn endpoint_keeps_base_path() {
        let gw = gateway("http://example.com/api");
        let url = gw.endpoint(&["experiment_results", "7", "progress"]).unwrap();
        assert_eq!(url.as_str(), "http://example.com/api/experiment_results/7/progress");

        let gw = gateway("http://example.com/api/");
        let url = gw.endpoint(&["simulations", "cluster"]).unwrap();
        assert_eq!(url.as_str(), "http://example.com/api/simulations/cluster");
    }

    #[test]
    fn rejects_unparseable_base() {
        let result = HttpGateway::new(&GatewayConfig {
            base_url: "not a url".to_string(),
            ..GatewayConfig::default()
        });
        assert!(matches!(result, Err(GatewayError::InvalidUrl(_))));
    }

    #[test]
    fn ids_join_with_commas() {
        let ids = vec![ResultId::from("1"), ResultId::from("2")];
        assert_eq!(join_ids(&ids), "1,2");
    }
}
