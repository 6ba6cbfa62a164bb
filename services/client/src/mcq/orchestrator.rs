//! services/client/src/mcq/orchestrator.rs
//!
//! The top-level coordinator for one generation request: submits it,
//! chooses between the realtime fast/push paths and the timeout ceiling,
//! keeps the progress store up to date, and settles the caller's future.

use crate::error::{ServiceError, GENERATION_CANCELLED, GENERATION_FAILED};
use crate::mcq::channel::RealtimeChannel;
use crate::mcq::progress::ProgressStore;
use crate::telemetry::analytics::AnalyticsService;
use chrono::Utc;
use mcq_core::domain::{
    AnalyticsEventKind, ContentSource, Difficulty, GenerationMetadata, GenerationProgress,
    GenerationRequest, GenerationResponse, GenerationStatus, ProgressPatch, ProgressStatus,
    RealtimeMessage,
};
use mcq_core::ports::GenerationApi;
use std::sync::Arc;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// The hard ceiling on how long a caller waits for a generation result.
pub const GENERATION_TIMEOUT: Duration = Duration::from_secs(5 * 60);

const DEFAULT_NUM_QUESTIONS: u32 = 5;

pub struct GenerationOrchestrator {
    api: Arc<dyn GenerationApi>,
    channel: Arc<RealtimeChannel>,
    progress: ProgressStore,
    analytics: Option<Arc<AnalyticsService>>,
    timeout: Duration,
}

impl GenerationOrchestrator {
    pub fn new(
        api: Arc<dyn GenerationApi>,
        channel: Arc<RealtimeChannel>,
        progress: ProgressStore,
    ) -> Self {
        Self {
            api,
            channel,
            progress,
            analytics: None,
            timeout: GENERATION_TIMEOUT,
        }
    }

    /// Wires an analytics service; generation outcomes are then recorded as
    /// events without ever blocking or failing the main flow.
    pub fn with_analytics(mut self, analytics: Arc<AnalyticsService>) -> Self {
        self.analytics = Some(analytics);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn progress_store(&self) -> &ProgressStore {
        &self.progress
    }

    /// Submits a generation request and waits for its result.
    pub async fn generate(
        &self,
        request: GenerationRequest,
    ) -> Result<GenerationResponse, ServiceError> {
        self.generate_with_cancel(request, &CancellationToken::new())
            .await
    }

    /// Like `generate`, but the caller may cancel the wait early; cancelling
    /// performs the same cleanup as the timeout path. Work already scheduled
    /// on the server is not recalled.
    pub async fn generate_with_cancel(
        &self,
        request: GenerationRequest,
        cancel: &CancellationToken,
    ) -> Result<GenerationResponse, ServiceError> {
        let started = Utc::now();
        self.track(AnalyticsEventKind::McqGenerationStarted, &request);

        let ack = match self.api.submit_generation(&request).await {
            Ok(ack) => ack,
            Err(e) => {
                self.track(AnalyticsEventKind::McqGenerationFailed, &request);
                return Err(e.into());
            }
        };

        // Fast path: the submission response already contains the finished
        // result, so there is nothing to wait for and nothing to subscribe to.
        if matches!(ack.status, Some(GenerationStatus::Completed)) {
            let response = GenerationResponse {
                status: GenerationStatus::Completed,
                questions: ack.questions.unwrap_or_default(),
                error: None,
                request_id: ack.request_id.clone(),
            };
            if let Some(request_id) = ack.request_id {
                self.progress.add_progress(GenerationProgress {
                    request_id,
                    status: ProgressStatus::Completed,
                    progress: 100.0,
                    start_time: started,
                    end_time: Some(Utc::now()),
                    error: None,
                    metadata: metadata_for(&request),
                });
            }
            self.record_completion(started, &response);
            return Ok(response);
        }

        let Some(request_id) = ack.request_id else {
            self.track(AnalyticsEventKind::McqGenerationFailed, &request);
            return Err(ServiceError::generation_failed(
                "submission response carried neither a result nor a request id",
            ));
        };
        info!("generation {request_id} accepted; awaiting realtime result");

        self.progress.add_progress(GenerationProgress {
            request_id: request_id.clone(),
            status: ProgressStatus::Processing,
            progress: 0.0,
            start_time: started,
            end_time: None,
            error: None,
            metadata: metadata_for(&request),
        });

        let mut subscription = self.channel.subscribe(&request_id);
        let deadline = tokio::time::sleep(self.timeout);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                () = &mut deadline => {
                    subscription.unsubscribe();
                    self.fail_progress(&request_id, "MCQ generation timed out");
                    self.track(AnalyticsEventKind::McqGenerationFailed, &request);
                    return Err(ServiceError::timeout("MCQ generation timed out"));
                }
                () = cancel.cancelled() => {
                    subscription.unsubscribe();
                    self.fail_progress(&request_id, "MCQ generation cancelled");
                    return Err(ServiceError::new(
                        GENERATION_CANCELLED,
                        "MCQ generation was cancelled",
                    ));
                }
                message = subscription.next() => match message {
                    Some(RealtimeMessage::McqProgress(payload)) => {
                        self.progress.update_progress(&request_id, &ProgressPatch {
                            status: Some(ProgressStatus::Processing),
                            progress: payload.progress,
                            ..Default::default()
                        });
                    }
                    Some(RealtimeMessage::McqComplete(payload)) => {
                        subscription.unsubscribe();
                        self.progress.update_progress(&request_id, &ProgressPatch {
                            status: Some(ProgressStatus::Completed),
                            progress: Some(100.0),
                            end_time: Some(Utc::now()),
                            ..Default::default()
                        });
                        let response = GenerationResponse {
                            status: GenerationStatus::Completed,
                            questions: payload.questions.unwrap_or_default(),
                            error: None,
                            request_id: Some(request_id),
                        };
                        self.record_completion(started, &response);
                        return Ok(response);
                    }
                    Some(RealtimeMessage::McqError(payload)) => {
                        subscription.unsubscribe();
                        let message = payload
                            .error
                            .unwrap_or_else(|| "MCQ generation failed".to_string());
                        self.fail_progress(&request_id, &message);
                        self.track(AnalyticsEventKind::McqGenerationFailed, &request);
                        return Err(ServiceError::new(GENERATION_FAILED, message));
                    }
                    // File extraction updates share the channel but belong to
                    // the ingestion pipeline, not to this wait.
                    Some(RealtimeMessage::FileProgress(_)) => {}
                    None => {
                        // Subscription was torn down underneath us (e.g. the
                        // channel gave up or a newer subscriber took over).
                        // The ceiling is the safety net against hanging.
                        warn!("realtime subscription for {request_id} closed; waiting out the ceiling");
                        deadline.await;
                        self.fail_progress(&request_id, "MCQ generation timed out");
                        self.track(AnalyticsEventKind::McqGenerationFailed, &request);
                        return Err(ServiceError::timeout("MCQ generation timed out"));
                    }
                },
            }
        }
    }

    fn fail_progress(&self, request_id: &str, message: &str) {
        self.progress.update_progress(
            request_id,
            &ProgressPatch {
                status: Some(ProgressStatus::Error),
                end_time: Some(Utc::now()),
                error: Some(message.to_string()),
                ..Default::default()
            },
        );
    }

    fn track(&self, kind: AnalyticsEventKind, request: &GenerationRequest) {
        if let Some(analytics) = &self.analytics {
            let mut metadata = serde_json::Map::new();
            metadata.insert("contentLength".into(), request.content.len().into());
            analytics.track_event(kind, metadata, None);
        }
    }

    fn record_completion(&self, started: chrono::DateTime<Utc>, response: &GenerationResponse) {
        if let Some(analytics) = &self.analytics {
            analytics.track_mcq_generation(started, &response.questions, serde_json::Map::new());
        }
    }
}

fn metadata_for(request: &GenerationRequest) -> GenerationMetadata {
    GenerationMetadata {
        content_length: request.content.len(),
        num_questions: request.num_questions.unwrap_or(DEFAULT_NUM_QUESTIONS),
        difficulty: request.difficulty.unwrap_or(Difficulty::Medium),
        source: ContentSource::Text,
    }
}
