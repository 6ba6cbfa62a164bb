//! crates/mcq_core/src/domain.rs
//!
//! Defines the pure, core data structures for the MCQ generation client.
//! These structs double as the wire shapes exchanged with the generation
//! service, so they carry serde attributes matching the server's camelCase
//! JSON conventions.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

//=========================================================================================
// Generation Request / Response
//=========================================================================================

/// Requested difficulty of the generated questions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
}

/// The parameters of one generation request. Immutable once submitted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationRequest {
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_questions: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub difficulty: Option<Difficulty>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub style: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
}

impl GenerationRequest {
    /// A request with only content set; the server applies its own defaults.
    pub fn from_content(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            num_questions: None,
            difficulty: None,
            style: None,
            topic: None,
        }
    }
}

/// One answer option of a multiple-choice question.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct McqOption {
    pub id: String,
    pub text: String,
    pub is_correct: bool,
}

/// A single generated multiple-choice question.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct McqQuestion {
    pub id: String,
    pub question: String,
    pub options: Vec<McqOption>,
    pub explanation: String,
    pub difficulty: Difficulty,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Terminal status of a generation operation as reported by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GenerationStatus {
    Completed,
    Processing,
    Failed,
}

/// The result shape handed back to callers of the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationResponse {
    pub status: GenerationStatus,
    #[serde(default)]
    pub questions: Vec<McqQuestion>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

/// The server's acknowledgment of a submission.
///
/// The fast path carries a completed result inline; the normal path carries
/// only the request id that later realtime messages are correlated with.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitAck {
    #[serde(default)]
    pub status: Option<GenerationStatus>,
    #[serde(default)]
    pub request_id: Option<String>,
    #[serde(default)]
    pub questions: Option<Vec<McqQuestion>>,
}

//=========================================================================================
// Generation Progress (store records)
//=========================================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProgressStatus {
    Pending,
    Processing,
    Completed,
    Error,
}

/// Where the generation content came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentSource {
    Text,
    File,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationMetadata {
    pub content_length: usize,
    pub num_questions: u32,
    pub difficulty: Difficulty,
    pub source: ContentSource,
}

/// The progress record of one long-running generation operation.
/// Mutated in place (by request id) as updates arrive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationProgress {
    pub request_id: String,
    pub status: ProgressStatus,
    pub progress: f32,
    pub start_time: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub metadata: GenerationMetadata,
}

/// A partial update merged into an existing progress record.
/// Fields left as `None` keep the record's prior value.
#[derive(Debug, Clone, Default)]
pub struct ProgressPatch {
    pub status: Option<ProgressStatus>,
    pub progress: Option<f32>,
    pub end_time: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl GenerationProgress {
    pub fn apply(&mut self, patch: &ProgressPatch) {
        if let Some(status) = patch.status {
            self.status = status;
        }
        if let Some(progress) = patch.progress {
            self.progress = progress;
        }
        if let Some(end_time) = patch.end_time {
            self.end_time = Some(end_time);
        }
        if let Some(error) = &patch.error {
            self.error = Some(error.clone());
        }
    }
}

//=========================================================================================
// Realtime Protocol
//=========================================================================================

/// A push notification for a long-running operation, JSON-encoded as
/// `{ "type": "...", "payload": { ... } }` on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum RealtimeMessage {
    McqProgress(RealtimePayload),
    McqComplete(RealtimePayload),
    McqError(RealtimePayload),
    FileProgress(RealtimePayload),
}

/// The payload of a realtime message. `type` determines which of the
/// optional fields are populated.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimePayload {
    pub request_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub questions: Option<Vec<McqQuestion>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

impl RealtimeMessage {
    pub fn payload(&self) -> &RealtimePayload {
        match self {
            RealtimeMessage::McqProgress(payload)
            | RealtimeMessage::McqComplete(payload)
            | RealtimeMessage::McqError(payload)
            | RealtimeMessage::FileProgress(payload) => payload,
        }
    }

    /// The operation this message belongs to.
    pub fn request_id(&self) -> &str {
        &self.payload().request_id
    }
}

//=========================================================================================
// File Ingestion
//=========================================================================================

/// An uploaded document candidate held in memory.
#[derive(Debug, Clone)]
pub struct SourceFile {
    pub name: String,
    pub mime_type: String,
    pub bytes: Bytes,
}

impl SourceFile {
    pub fn new(name: impl Into<String>, mime_type: impl Into<String>, bytes: Bytes) -> Self {
        Self {
            name: name.into(),
            mime_type: mime_type.into(),
            bytes,
        }
    }

    pub fn size(&self) -> usize {
        self.bytes.len()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileStatus {
    Uploading,
    Processing,
    Completed,
    Error,
}

/// One status snapshot of an upload/extraction operation, both the poll
/// response shape and the progress update forwarded to callers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileProcessingStatus {
    pub status: FileStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

//=========================================================================================
// Telemetry
//=========================================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalyticsEventKind {
    McqGenerationStarted,
    McqGenerationCompleted,
    McqGenerationFailed,
    QuestionAnswered,
    FileUploadStarted,
    FileUploadCompleted,
    FileUploadFailed,
    FeedbackSubmitted,
}

/// A client-observed event buffered for the analytics sink.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsEvent {
    #[serde(rename = "type")]
    pub kind: AnalyticsEventKind,
    pub timestamp: DateTime<Utc>,
    pub metadata: serde_json::Map<String, serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackKind {
    QuestionQuality,
    QuestionDifficulty,
    GenerationSpeed,
    UiExperience,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub question_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generation_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<serde_json::Map<String, serde_json::Value>>,
}

/// One user feedback entry buffered for batched submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackItem {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub kind: FeedbackKind,
    pub rating: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    pub metadata: FeedbackMetadata,
    pub created_at: DateTime<Utc>,
}
