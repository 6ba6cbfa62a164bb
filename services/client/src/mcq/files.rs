//! services/client/src/mcq/files.rs
//!
//! Turns an uploaded document into extracted text ready for generation:
//! validation, upload with progress, then polling the server-side
//! extraction job until it reaches a terminal state.

use crate::error::{ServiceError, FILE_PROCESSING_FAILED, FILE_PROCESSING_TIMEOUT, INVALID_FILE};
use mcq_core::domain::{FileStatus, SourceFile};
use mcq_core::ports::GenerationApi;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::Duration;
use tracing::{debug, info};

pub const MAX_FILE_SIZE: usize = 10 * 1024 * 1024;
pub const ALLOWED_MIME_TYPES: [&str; 3] = [
    "application/pdf",
    "text/plain",
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
];

const POLL_INTERVAL: Duration = Duration::from_secs(2);
const MAX_POLL_ATTEMPTS: u32 = 30;

/// A progress callback observing the pipeline. `status` is the phase the
/// pipeline is in; `progress` is 0..=100 within that phase.
pub type ProgressFn = dyn Fn(FileStatus, f32) + Send + Sync;

pub struct FileIngestion {
    api: Arc<dyn GenerationApi>,
}

impl FileIngestion {
    pub fn new(api: Arc<dyn GenerationApi>) -> Self {
        Self { api }
    }

    /// Checks a file against the MIME allow-list and the size cap without
    /// touching the network.
    pub fn validate(file: &SourceFile) -> Result<(), ServiceError> {
        if !ALLOWED_MIME_TYPES.contains(&file.mime_type.as_str()) {
            return Err(ServiceError::new(
                INVALID_FILE,
                "Invalid file type. Please upload PDF, TXT, or DOCX files.",
            ));
        }
        if file.size() > MAX_FILE_SIZE {
            return Err(ServiceError::new(
                INVALID_FILE,
                "File too large. Maximum size is 10MB.",
            ));
        }
        Ok(())
    }

    /// Runs the full pipeline and resolves with the extracted text. The
    /// callback sees uploading progress as the bytes go out, then the
    /// server's processing progress while extraction runs.
    pub async fn process(
        &self,
        file: &SourceFile,
        on_progress: &ProgressFn,
    ) -> Result<String, ServiceError> {
        Self::validate(file)?;
        info!("uploading {} ({} bytes)", file.name, file.size());

        let processing_id = self.upload(file, on_progress).await?;
        debug!("upload complete, processing id {processing_id}");
        on_progress(FileStatus::Processing, 0.0);

        self.poll_processing(&processing_id, on_progress).await
    }

    // Bridges upload progress from the port's channel to the caller's
    // callback while the upload future itself is still in flight.
    async fn upload(
        &self,
        file: &SourceFile,
        on_progress: &ProgressFn,
    ) -> Result<String, ServiceError> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let upload = self.api.upload_file(file, tx);
        tokio::pin!(upload);

        loop {
            tokio::select! {
                outcome = &mut upload => {
                    // Drain whatever progress arrived with the final chunk.
                    while let Ok(percent) = rx.try_recv() {
                        on_progress(FileStatus::Uploading, percent);
                    }
                    return outcome.map_err(ServiceError::from);
                }
                Some(percent) = rx.recv() => {
                    on_progress(FileStatus::Uploading, percent);
                }
            }
        }
    }

    async fn poll_processing(
        &self,
        processing_id: &str,
        on_progress: &ProgressFn,
    ) -> Result<String, ServiceError> {
        for _ in 0..MAX_POLL_ATTEMPTS {
            tokio::time::sleep(POLL_INTERVAL).await;
            let status = self.api.processing_status(processing_id).await?;
            match status.status {
                FileStatus::Completed => {
                    on_progress(FileStatus::Completed, 100.0);
                    return status.text.ok_or_else(|| {
                        ServiceError::new(
                            FILE_PROCESSING_FAILED,
                            "File processing completed without extracted text",
                        )
                    });
                }
                FileStatus::Error => {
                    return Err(ServiceError::new(
                        FILE_PROCESSING_FAILED,
                        status
                            .error
                            .unwrap_or_else(|| "File processing failed".to_string()),
                    ));
                }
                _ => {
                    if let Some(percent) = status.progress {
                        on_progress(FileStatus::Processing, percent);
                    }
                }
            }
        }
        Err(ServiceError::new(
            FILE_PROCESSING_TIMEOUT,
            "File processing timed out",
        ))
    }
}
