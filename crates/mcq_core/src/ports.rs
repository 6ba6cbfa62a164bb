//! crates/mcq_core/src/ports.rs
//!
//! Defines the service contracts (traits) for the coordination layer.
//! These traits form the boundary of the hexagonal architecture, allowing the core
//! to be independent of specific external implementations like HTTP clients or
//! websocket libraries.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::domain::{
    AnalyticsEvent, FeedbackItem, FileProcessingStatus, GenerationRequest, RealtimeMessage,
    SourceFile, SubmitAck,
};

//=========================================================================================
// Generic Port Error and Result Types
//=========================================================================================

/// A generic error type for all port operations.
/// This abstracts away the specific errors from external services (e.g., HTTP, websocket).
#[derive(Debug, thiserror::Error)]
pub enum PortError {
    /// A structured error the server supplied; passed through to callers verbatim.
    #[error("{message} ({code})")]
    Api {
        code: String,
        message: String,
        details: Option<serde_json::Value>,
    },
    #[error("Unauthorized")]
    Unauthorized,
    #[error("Request timed out")]
    Timeout,
    #[error("An unexpected error occurred: {0}")]
    Unexpected(String),
}

/// A convenience type alias for `Result<T, PortError>`.
pub type PortResult<T> = Result<T, PortError>;

//=========================================================================================
// Service Ports (Traits)
//=========================================================================================

/// The HTTP surface of the generation service the coordination layer consumes.
#[async_trait]
pub trait GenerationApi: Send + Sync {
    /// Submits a generation request. The ack either contains the finished
    /// result (fast path) or a request id for realtime correlation.
    async fn submit_generation(&self, request: &GenerationRequest) -> PortResult<SubmitAck>;

    /// Uploads a document for text extraction, reporting proportional upload
    /// progress (0-100) on `progress`. Resolves to the processing id.
    async fn upload_file(
        &self,
        file: &SourceFile,
        progress: mpsc::UnboundedSender<f32>,
    ) -> PortResult<String>;

    /// Fetches the extraction status for a previously uploaded document.
    async fn processing_status(&self, processing_id: &str) -> PortResult<FileProcessingStatus>;

    /// Fire-and-forget analytics sink.
    async fn push_analytics(&self, events: &[AnalyticsEvent]) -> PortResult<()>;

    /// Fire-and-forget feedback sink.
    async fn push_feedback(&self, feedback: &[FeedbackItem]) -> PortResult<()>;
}

/// One established duplex connection. `recv` returning `None` means the
/// connection is closed; a `Some(Err(..))` is a malformed frame that the
/// caller may skip without tearing the connection down.
#[async_trait]
pub trait RealtimeConnection: Send {
    async fn recv(&mut self) -> Option<PortResult<RealtimeMessage>>;
    async fn send(&mut self, message: &RealtimeMessage) -> PortResult<()>;
}

/// Factory for realtime connections; the reconnecting channel dials through
/// this on every (re)connect attempt.
#[async_trait]
pub trait RealtimeTransport: Send + Sync {
    async fn connect(&self) -> PortResult<Box<dyn RealtimeConnection>>;
}

/// Supplies the bearer credential attached to outgoing authenticated calls.
/// Refresh and invalidation are owned by an external collaborator.
pub trait TokenProvider: Send + Sync {
    fn bearer_token(&self) -> Option<String>;
}

/// Persistence for the progress store's serialized state, so history
/// survives client restarts.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    async fn load(&self) -> PortResult<Option<String>>;
    async fn save(&self, snapshot: &str) -> PortResult<()>;
}
