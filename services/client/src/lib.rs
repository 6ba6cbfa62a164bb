//! services/client/src/lib.rs

pub mod adapters;
pub mod config;
pub mod error;
pub mod mcq;
pub mod telemetry;

// Re-export the facade and the error shape callers branch on, so the binary
// and downstream users don't have to reach into the module tree.
pub use error::{ClientError, ServiceError};
pub use mcq::McqService;
