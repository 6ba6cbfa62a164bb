//! services/client/src/telemetry/feedback.rs
//!
//! Collects user feedback on generated questions and submits it upstream
//! in small batches, mirroring the analytics buffering discipline.

use crate::telemetry::analytics::AnalyticsService;
use chrono::Utc;
use mcq_core::domain::{AnalyticsEventKind, FeedbackItem, FeedbackKind, FeedbackMetadata};
use mcq_core::ports::GenerationApi;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};
use uuid::Uuid;

pub const FEEDBACK_BATCH_SIZE: usize = 5;

pub struct FeedbackService {
    api: Arc<dyn GenerationApi>,
    queue: Arc<Mutex<Vec<FeedbackItem>>>,
    analytics: Option<Arc<AnalyticsService>>,
    batch_size: usize,
}

impl FeedbackService {
    pub fn new(api: Arc<dyn GenerationApi>) -> Self {
        Self {
            api,
            queue: Arc::new(Mutex::new(Vec::new())),
            analytics: None,
            batch_size: FEEDBACK_BATCH_SIZE,
        }
    }

    /// Cross-reports every submission as an analytics event.
    pub fn with_analytics(mut self, analytics: Arc<AnalyticsService>) -> Self {
        self.analytics = Some(analytics);
        self
    }

    /// Queues one feedback entry and returns its assigned id. Submission
    /// happens in the background once a batch has accumulated.
    pub fn submit(
        &self,
        kind: FeedbackKind,
        rating: u8,
        comment: Option<String>,
        metadata: FeedbackMetadata,
    ) -> Uuid {
        let item = FeedbackItem {
            id: Uuid::new_v4(),
            kind,
            rating,
            comment,
            metadata,
            created_at: Utc::now(),
        };
        let id = item.id;

        if let Some(analytics) = &self.analytics {
            let mut event = serde_json::Map::new();
            event.insert(
                "feedbackType".into(),
                serde_json::to_value(kind).unwrap_or(serde_json::Value::Null),
            );
            event.insert("rating".into(), rating.into());
            analytics.track_event(AnalyticsEventKind::FeedbackSubmitted, event, None);
        }

        let full = {
            let mut queue = self.queue.lock().unwrap();
            queue.push(item);
            queue.len() >= self.batch_size
        };
        if full {
            let api = Arc::clone(&self.api);
            let queue = Arc::clone(&self.queue);
            tokio::spawn(async move { Self::drain(api, queue).await });
        }
        id
    }

    /// Pushes everything buffered right now. Intended for shutdown.
    pub async fn flush(&self) {
        Self::drain(Arc::clone(&self.api), Arc::clone(&self.queue)).await;
    }

    pub fn pending(&self) -> usize {
        self.queue.lock().unwrap().len()
    }

    async fn drain(api: Arc<dyn GenerationApi>, queue: Arc<Mutex<Vec<FeedbackItem>>>) {
        let items = std::mem::take(&mut *queue.lock().unwrap());
        if items.is_empty() {
            return;
        }
        let count = items.len();
        if let Err(e) = api.push_feedback(&items).await {
            warn!("failed to push {count} feedback entries, requeueing: {e}");
            let mut queue = queue.lock().unwrap();
            let mut restored = items;
            restored.append(&mut queue);
            *queue = restored;
        } else {
            debug!("pushed {count} feedback entries");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use mcq_core::domain::{
        AnalyticsEvent, FileProcessingStatus, GenerationRequest, SourceFile, SubmitAck,
    };
    use mcq_core::ports::PortResult;
    use tokio::sync::mpsc;

    struct CollectingSink {
        feedback: Mutex<Vec<FeedbackItem>>,
        analytics: Mutex<Vec<AnalyticsEvent>>,
    }

    impl CollectingSink {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                feedback: Mutex::new(Vec::new()),
                analytics: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl GenerationApi for CollectingSink {
        async fn submit_generation(&self, _request: &GenerationRequest) -> PortResult<SubmitAck> {
            unimplemented!("not exercised here")
        }

        async fn upload_file(
            &self,
            _file: &SourceFile,
            _progress: mpsc::UnboundedSender<f32>,
        ) -> PortResult<String> {
            unimplemented!("not exercised here")
        }

        async fn processing_status(
            &self,
            _processing_id: &str,
        ) -> PortResult<FileProcessingStatus> {
            unimplemented!("not exercised here")
        }

        async fn push_analytics(&self, events: &[AnalyticsEvent]) -> PortResult<()> {
            self.analytics.lock().unwrap().extend(events.iter().cloned());
            Ok(())
        }

        async fn push_feedback(&self, feedback: &[FeedbackItem]) -> PortResult<()> {
            self.feedback.lock().unwrap().extend(feedback.iter().cloned());
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn fifth_submission_flushes_the_batch() {
        let sink = CollectingSink::new();
        let service = FeedbackService::new(Arc::clone(&sink) as Arc<dyn GenerationApi>);

        let mut ids = Vec::new();
        for rating in 1..=5 {
            ids.push(service.submit(
                FeedbackKind::QuestionQuality,
                rating,
                None,
                FeedbackMetadata::default(),
            ));
        }
        tokio::task::yield_now().await;

        let pushed = sink.feedback.lock().unwrap();
        assert_eq!(pushed.len(), 5);
        assert_eq!(
            pushed.iter().map(|f| f.id).collect::<Vec<_>>(),
            ids,
            "entries keep submission order and their assigned ids"
        );
        assert_eq!(service.pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn partial_batch_waits_until_an_explicit_flush() {
        let sink = CollectingSink::new();
        let service = FeedbackService::new(Arc::clone(&sink) as Arc<dyn GenerationApi>);

        service.submit(
            FeedbackKind::UiExperience,
            4,
            Some("smooth".to_string()),
            FeedbackMetadata::default(),
        );
        assert_eq!(service.pending(), 1);
        assert!(sink.feedback.lock().unwrap().is_empty());

        service.flush().await;
        assert_eq!(sink.feedback.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn submissions_are_cross_reported_to_analytics() {
        let sink = CollectingSink::new();
        let analytics = Arc::new(AnalyticsService::new(
            Arc::clone(&sink) as Arc<dyn GenerationApi>
        ));
        let service = FeedbackService::new(Arc::clone(&sink) as Arc<dyn GenerationApi>)
            .with_analytics(Arc::clone(&analytics));

        service.submit(
            FeedbackKind::QuestionDifficulty,
            2,
            None,
            FeedbackMetadata {
                question_id: Some("q-1".to_string()),
                ..Default::default()
            },
        );
        analytics.flush().await;

        let events = sink.analytics.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, AnalyticsEventKind::FeedbackSubmitted);
        assert_eq!(events[0].metadata["rating"], 2);
        assert_eq!(events[0].metadata["feedbackType"], "question_difficulty");
    }
}
