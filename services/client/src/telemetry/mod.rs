//! services/client/src/telemetry/mod.rs

pub mod analytics;
pub mod feedback;

pub use analytics::AnalyticsService;
pub use feedback::FeedbackService;
