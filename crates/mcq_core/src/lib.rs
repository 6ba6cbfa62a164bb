pub mod domain;
pub mod ports;

pub use domain::{
    AnalyticsEvent, AnalyticsEventKind, ContentSource, Difficulty, FeedbackItem, FeedbackKind,
    FeedbackMetadata, FileProcessingStatus, FileStatus, GenerationMetadata, GenerationProgress,
    GenerationRequest, GenerationResponse, GenerationStatus, McqOption, McqQuestion, ProgressPatch,
    ProgressStatus, RealtimeMessage, RealtimePayload, SourceFile, SubmitAck,
};
pub use ports::{
    GenerationApi, PortError, PortResult, RealtimeConnection, RealtimeTransport, SnapshotStore,
    TokenProvider,
};
