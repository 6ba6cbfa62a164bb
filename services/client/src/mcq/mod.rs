//! services/client/src/mcq/mod.rs
//!
//! The MCQ generation subsystem: caching, request batching, progress
//! tracking, the realtime channel, the generation orchestrator, and the
//! file ingestion pipeline, fronted by [`McqService`].

pub mod batcher;
pub mod cache;
pub mod channel;
pub mod files;
pub mod orchestrator;
pub mod progress;

pub use batcher::RequestBatcher;
pub use cache::{generate_key, FingerprintCache};
pub use channel::{ProgressSubscription, RealtimeChannel};
pub use files::FileIngestion;
pub use orchestrator::GenerationOrchestrator;
pub use progress::ProgressStore;

use crate::error::ServiceError;
use futures::FutureExt;
use mcq_core::domain::{FileStatus, GenerationProgress, GenerationRequest, GenerationResponse, SourceFile};
use std::sync::Arc;

/// The application-facing entry point. Identical requests issued while a
/// previous result is still fresh are answered from the cache; the rest are
/// coalesced through the batcher and dispatched in arrival order.
pub struct McqService {
    cache: FingerprintCache<GenerationResponse>,
    batcher: RequestBatcher<GenerationRequest, Result<GenerationResponse, ServiceError>>,
    files: FileIngestion,
    progress: ProgressStore,
}

impl McqService {
    pub fn new(orchestrator: Arc<GenerationOrchestrator>, files: FileIngestion) -> Self {
        let progress = orchestrator.progress_store().clone();
        let batcher = RequestBatcher::new(move |requests: Vec<GenerationRequest>| {
            let orchestrator = Arc::clone(&orchestrator);
            async move {
                // One request is in flight at a time; queued requests wait
                // their turn rather than racing the backend.
                let mut results = Vec::with_capacity(requests.len());
                for request in requests {
                    results.push(orchestrator.generate(request).await);
                }
                Ok(results)
            }
            .boxed()
        });
        Self {
            cache: FingerprintCache::new(),
            batcher,
            files,
            progress,
        }
    }

    /// Generates questions for `request`, serving repeats from the cache.
    pub async fn generate(
        &self,
        request: GenerationRequest,
    ) -> Result<GenerationResponse, ServiceError> {
        let key = generate_key(&request);
        if let Some(cached) = self.cache.get(&key) {
            return Ok(cached);
        }

        let response = self.batcher.add(request).await??;
        self.cache.set(key, response.clone());
        Ok(response)
    }

    /// Uploads a document and resolves with its extracted text, suitable as
    /// the `content` of a follow-up [`generate`](Self::generate) call.
    pub async fn ingest_file(
        &self,
        file: &SourceFile,
        on_progress: impl Fn(FileStatus, f32) + Send + Sync + 'static,
    ) -> Result<String, ServiceError> {
        self.files.process(file, &on_progress).await
    }

    pub fn current_progress(&self) -> Option<GenerationProgress> {
        self.progress.current()
    }

    pub fn progress_history(&self) -> Vec<GenerationProgress> {
        self.progress.history()
    }

    pub fn clear_progress_history(&self) {
        self.progress.clear_history();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcq::channel::RealtimeChannel;
    use async_trait::async_trait;
    use mcq_core::domain::{
        AnalyticsEvent, FeedbackItem, FileProcessingStatus, GenerationStatus, SubmitAck,
    };
    use mcq_core::ports::{GenerationApi, PortResult, RealtimeConnection, RealtimeTransport};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::mpsc;

    /// Resolves every submission inline and counts how many it saw.
    struct CountingApi {
        submissions: AtomicUsize,
    }

    #[async_trait]
    impl GenerationApi for CountingApi {
        async fn submit_generation(&self, _request: &GenerationRequest) -> PortResult<SubmitAck> {
            let n = self.submissions.fetch_add(1, Ordering::SeqCst);
            Ok(SubmitAck {
                status: Some(GenerationStatus::Completed),
                request_id: Some(format!("req-{n}")),
                questions: Some(vec![]),
            })
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

        async fn push_analytics(&self, _events: &[AnalyticsEvent]) -> PortResult<()> {
            Ok(())
        }

        async fn push_feedback(&self, _feedback: &[FeedbackItem]) -> PortResult<()> {
            Ok(())
        }
    }

    struct IdleTransport;

    #[async_trait]
    impl RealtimeTransport for IdleTransport {
        async fn connect(&self) -> PortResult<Box<dyn RealtimeConnection>> {
            futures::future::pending().await
        }
    }

    fn service(api: Arc<CountingApi>) -> McqService {
        let channel = Arc::new(RealtimeChannel::new(Arc::new(IdleTransport)));
        let orchestrator = Arc::new(GenerationOrchestrator::new(
            Arc::clone(&api) as Arc<dyn GenerationApi>,
            channel,
            ProgressStore::new(),
        ));
        let files = FileIngestion::new(api as Arc<dyn GenerationApi>);
        McqService::new(orchestrator, files)
    }

    #[tokio::test(start_paused = true)]
    async fn identical_requests_hit_the_cache_after_the_first() {
        let api = Arc::new(CountingApi {
            submissions: AtomicUsize::new(0),
        });
        let service = service(Arc::clone(&api));

        let request = GenerationRequest::from_content("Ownership and borrowing");
        let first = service.generate(request.clone()).await.unwrap();
        let second = service.generate(request).await.unwrap();

        assert_eq!(first.request_id, second.request_id);
        assert_eq!(api.submissions.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn distinct_requests_each_reach_the_backend() {
        let api = Arc::new(CountingApi {
            submissions: AtomicUsize::new(0),
        });
        let service = service(Arc::clone(&api));

        service
            .generate(GenerationRequest::from_content("Lifetimes"))
            .await
            .unwrap();
        service
            .generate(GenerationRequest::from_content("Trait objects"))
            .await
            .unwrap();

        assert_eq!(api.submissions.load(Ordering::SeqCst), 2);
    }
}
