//! services/client/src/telemetry/analytics.rs
//!
//! Buffers client-observed events and ships them to the backend in
//! batches, either when the buffer fills or on a periodic flush.

use chrono::{DateTime, Utc};
use mcq_core::domain::{AnalyticsEvent, AnalyticsEventKind, Difficulty, McqQuestion};
use mcq_core::ports::GenerationApi;
use std::sync::{Arc, Mutex, Weak};
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tracing::{debug, warn};

pub const DEFAULT_BATCH_SIZE: usize = 10;
pub const FLUSH_INTERVAL: Duration = Duration::from_secs(30);

struct AnalyticsInner {
    api: Arc<dyn GenerationApi>,
    queue: Mutex<Vec<AnalyticsEvent>>,
    batch_size: usize,
}

impl AnalyticsInner {
    async fn flush(&self) {
        let events = std::mem::take(&mut *self.queue.lock().unwrap());
        if events.is_empty() {
            return;
        }
        let count = events.len();
        if let Err(e) = self.api.push_analytics(&events).await {
            warn!("failed to push {count} analytics events, requeueing: {e}");
            // Put the failed batch back ahead of anything tracked while the
            // push was in flight, preserving event order for the next try.
            let mut queue = self.queue.lock().unwrap();
            let mut restored = events;
            restored.append(&mut queue);
            *queue = restored;
        } else {
            debug!("pushed {count} analytics events");
        }
    }
}

/// Event tracking is synchronous and infallible from the caller's point of
/// view; delivery happens in the background and failures only cost a retry.
pub struct AnalyticsService {
    inner: Arc<AnalyticsInner>,
    flusher: JoinHandle<()>,
}

impl Drop for AnalyticsService {
    fn drop(&mut self) {
        self.flusher.abort();
    }
}

impl AnalyticsService {
    pub fn new(api: Arc<dyn GenerationApi>) -> Self {
        Self::with_batch_size(api, DEFAULT_BATCH_SIZE)
    }

    pub fn with_batch_size(api: Arc<dyn GenerationApi>, batch_size: usize) -> Self {
        let inner = Arc::new(AnalyticsInner {
            api,
            queue: Mutex::new(Vec::new()),
            batch_size,
        });
        let flusher = Self::spawn_flusher(Arc::downgrade(&inner));
        Self { inner, flusher }
    }

    /// Records one event. A full buffer triggers an immediate background
    /// flush; otherwise the periodic flusher picks the event up.
    pub fn track_event(
        &self,
        kind: AnalyticsEventKind,
        metadata: serde_json::Map<String, serde_json::Value>,
        duration_ms: Option<u64>,
    ) {
        let event = AnalyticsEvent {
            kind,
            timestamp: Utc::now(),
            metadata,
            duration_ms,
        };
        let full = {
            let mut queue = self.inner.queue.lock().unwrap();
            queue.push(event);
            queue.len() >= self.inner.batch_size
        };
        if full {
            let inner = Arc::clone(&self.inner);
            tokio::spawn(async move { inner.flush().await });
        }
    }

    /// Records a completed generation along with summary statistics about
    /// the produced questions.
    pub fn track_mcq_generation(
        &self,
        started: DateTime<Utc>,
        questions: &[McqQuestion],
        mut metadata: serde_json::Map<String, serde_json::Value>,
    ) {
        let duration = (Utc::now() - started).num_milliseconds().max(0) as u64;
        metadata.insert("questionCount".into(), questions.len().into());
        metadata.insert(
            "avgQuestionLength".into(),
            average_question_length(questions).into(),
        );
        metadata.insert(
            "difficultyDistribution".into(),
            difficulty_distribution(questions),
        );
        self.track_event(
            AnalyticsEventKind::McqGenerationCompleted,
            metadata,
            Some(duration),
        );
    }

    /// Pushes everything buffered right now. Intended for shutdown; the
    /// background paths normally make explicit flushing unnecessary.
    pub async fn flush(&self) {
        self.inner.flush().await;
    }

    pub fn pending(&self) -> usize {
        self.inner.queue.lock().unwrap().len()
    }

    fn spawn_flusher(inner: Weak<AnalyticsInner>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(FLUSH_INTERVAL);
            tick.tick().await; // the first tick completes immediately
            loop {
                tick.tick().await;
                let Some(inner) = inner.upgrade() else {
                    break;
                };
                inner.flush().await;
            }
        })
    }
}

fn average_question_length(questions: &[McqQuestion]) -> u64 {
    if questions.is_empty() {
        return 0;
    }
    let total: usize = questions.iter().map(|q| q.question.len()).sum();
    (total / questions.len()) as u64
}

fn difficulty_distribution(questions: &[McqQuestion]) -> serde_json::Value {
    let mut easy = 0;
    let mut medium = 0;
    let mut hard = 0;
    for question in questions {
        match question.difficulty {
            Difficulty::Easy => easy += 1,
            Difficulty::Medium => medium += 1,
            Difficulty::Hard => hard += 1,
        }
    }
    serde_json::json!({ "easy": easy, "medium": medium, "hard": hard })
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use mcq_core::domain::{
        FeedbackItem, FileProcessingStatus, GenerationRequest, McqOption, SourceFile, SubmitAck,
    };
    use mcq_core::ports::{PortError, PortResult};
    use std::sync::atomic::{AtomicBool, Ordering};
    use tokio::sync::mpsc;

    /// Records every pushed batch; optionally fails the first push.
    struct CollectingSink {
        batches: Mutex<Vec<Vec<AnalyticsEvent>>>,
        fail_next: AtomicBool,
    }

    impl CollectingSink {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                batches: Mutex::new(Vec::new()),
                fail_next: AtomicBool::new(false),
            })
        }

        fn failing_once() -> Arc<Self> {
            let sink = Self::new();
            sink.fail_next.store(true, Ordering::SeqCst);
            sink
        }

        fn pushed(&self) -> Vec<AnalyticsEvent> {
            self.batches.lock().unwrap().iter().flatten().cloned().collect()
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
            if self.fail_next.swap(false, Ordering::SeqCst) {
                return Err(PortError::Unexpected("analytics sink offline".to_string()));
            }
            self.batches.lock().unwrap().push(events.to_vec());
            Ok(())
        }

        async fn push_feedback(&self, _feedback: &[FeedbackItem]) -> PortResult<()> {
            Ok(())
        }
    }

    fn question(text: &str, difficulty: Difficulty) -> McqQuestion {
        McqQuestion {
            id: "q".to_string(),
            question: text.to_string(),
            options: vec![McqOption {
                id: "a".to_string(),
                text: "yes".to_string(),
                is_correct: true,
            }],
            explanation: String::new(),
            difficulty,
            topic: None,
            tags: vec![],
        }
    }

    #[tokio::test(start_paused = true)]
    async fn filling_the_buffer_triggers_an_immediate_flush() {
        let sink = CollectingSink::new();
        let analytics =
            AnalyticsService::new(Arc::clone(&sink) as Arc<dyn GenerationApi>);

        for _ in 0..DEFAULT_BATCH_SIZE {
            analytics.track_event(
                AnalyticsEventKind::QuestionAnswered,
                serde_json::Map::new(),
                None,
            );
        }
        tokio::task::yield_now().await;

        assert_eq!(sink.pushed().len(), DEFAULT_BATCH_SIZE);
        assert_eq!(analytics.pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn periodic_flusher_ships_a_partial_buffer() {
        let sink = CollectingSink::new();
        let analytics =
            AnalyticsService::new(Arc::clone(&sink) as Arc<dyn GenerationApi>);

        analytics.track_event(
            AnalyticsEventKind::FileUploadStarted,
            serde_json::Map::new(),
            None,
        );
        tokio::time::sleep(FLUSH_INTERVAL + Duration::from_secs(1)).await;

        assert_eq!(sink.pushed().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_batch_is_requeued_ahead_of_newer_events() {
        let sink = CollectingSink::failing_once();
        let analytics =
            AnalyticsService::with_batch_size(Arc::clone(&sink) as Arc<dyn GenerationApi>, 100);

        analytics.track_event(
            AnalyticsEventKind::McqGenerationStarted,
            serde_json::Map::new(),
            None,
        );
        analytics.flush().await; // fails, requeues

        analytics.track_event(
            AnalyticsEventKind::McqGenerationCompleted,
            serde_json::Map::new(),
            None,
        );
        analytics.flush().await;

        let pushed = sink.pushed();
        assert_eq!(pushed.len(), 2);
        assert_eq!(pushed[0].kind, AnalyticsEventKind::McqGenerationStarted);
        assert_eq!(pushed[1].kind, AnalyticsEventKind::McqGenerationCompleted);
    }

    #[tokio::test(start_paused = true)]
    async fn generation_summary_carries_question_statistics() {
        let sink = CollectingSink::new();
        let analytics =
            AnalyticsService::new(Arc::clone(&sink) as Arc<dyn GenerationApi>);

        let questions = vec![
            question("What is ownership?", Difficulty::Easy),
            question("Explain the borrow checker.", Difficulty::Hard),
        ];
        analytics.track_mcq_generation(Utc::now(), &questions, serde_json::Map::new());
        analytics.flush().await;

        let pushed = sink.pushed();
        assert_eq!(pushed.len(), 1);
        let event = &pushed[0];
        assert_eq!(event.kind, AnalyticsEventKind::McqGenerationCompleted);
        assert_eq!(event.metadata["questionCount"], 2);
        assert_eq!(
            event.metadata["difficultyDistribution"],
            serde_json::json!({ "easy": 1, "medium": 0, "hard": 1 })
        );
        assert!(event.duration_ms.is_some());
    }
}
