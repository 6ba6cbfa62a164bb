//! services/client/src/adapters/http.rs
//!
//! This module contains the adapter for the generation backend's REST API.
//! It implements the `GenerationApi` port from the `mcq_core` crate.

use crate::error::ClientError;
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use mcq_core::domain::{
    AnalyticsEvent, FeedbackItem, FileProcessingStatus, GenerationRequest, SourceFile, SubmitAck,
};
use mcq_core::ports::{GenerationApi, PortError, PortResult, TokenProvider};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::Duration;
use tracing::debug;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const UPLOAD_CHUNK_SIZE: usize = 64 * 1024;

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// An adapter that implements the `GenerationApi` port against the backend's
/// JSON-over-HTTP endpoints.
#[derive(Clone)]
pub struct HttpGenerationApi {
    client: reqwest::Client,
    base_url: String,
    token: Arc<dyn TokenProvider>,
}

impl HttpGenerationApi {
    pub fn new(
        base_url: impl Into<String>,
        token: Arc<dyn TokenProvider>,
    ) -> Result<Self, ClientError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.token.bearer_token() {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }
}

//=========================================================================================
// Response Decoding
//=========================================================================================

/// The backend's structured error body: `{ "error": { "code", "message",
/// "details"? } }`.
#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    code: String,
    message: String,
    #[serde(default)]
    details: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UploadAck {
    processing_id: String,
}

fn transport_error(e: reqwest::Error) -> PortError {
    if e.is_timeout() {
        PortError::Timeout
    } else {
        PortError::Unexpected(e.to_string())
    }
}

/// Turns an HTTP response into a decoded body, mapping error statuses onto
/// the port's error taxonomy.
async fn decode<T: serde::de::DeserializeOwned>(response: reqwest::Response) -> PortResult<T> {
    let status = response.status();
    if status == reqwest::StatusCode::UNAUTHORIZED {
        return Err(PortError::Unauthorized);
    }
    if !status.is_success() {
        let raw = response.text().await.map_err(transport_error)?;
        return Err(match serde_json::from_str::<ApiErrorBody>(&raw) {
            Ok(body) => PortError::Api {
                code: body.error.code,
                message: body.error.message,
                details: body.error.details,
            },
            Err(_) => PortError::Unexpected(format!("HTTP {status}: {raw}")),
        });
    }
    response.json::<T>().await.map_err(transport_error)
}

//=========================================================================================
// `GenerationApi` Trait Implementation
//=========================================================================================

#[async_trait]
impl GenerationApi for HttpGenerationApi {
    async fn submit_generation(&self, request: &GenerationRequest) -> PortResult<SubmitAck> {
        debug!("submitting generation ({} bytes of content)", request.content.len());
        let response = self
            .authorize(self.client.post(self.url("/api/mcq/generate")))
            .json(request)
            .send()
            .await
            .map_err(transport_error)?;
        decode(response).await
    }

    /// Streams the file body chunk by chunk so cumulative upload progress
    /// can be reported while the request is in flight.
    async fn upload_file(
        &self,
        file: &SourceFile,
        progress: mpsc::UnboundedSender<f32>,
    ) -> PortResult<String> {
        let total = file.size();
        let bytes = file.bytes.clone();
        let mut sent = 0usize;
        let chunks = (0..total)
            .step_by(UPLOAD_CHUNK_SIZE)
            .map(move |offset| bytes.slice(offset..usize::min(offset + UPLOAD_CHUNK_SIZE, total)))
            .collect::<Vec<Bytes>>();
        let body = futures::stream::iter(chunks).map(move |chunk| {
            sent += chunk.len();
            let percent = (sent as f32 / total.max(1) as f32) * 100.0;
            let _ = progress.send(percent);
            Ok::<Bytes, std::io::Error>(chunk)
        });

        let part = reqwest::multipart::Part::stream_with_length(
            reqwest::Body::wrap_stream(body),
            total as u64,
        )
        .file_name(file.name.clone())
        .mime_str(&file.mime_type)
        .map_err(transport_error)?;
        let form = reqwest::multipart::Form::new().part("file", part);

        let response = self
            .authorize(self.client.post(self.url("/api/mcq/upload")))
            .multipart(form)
            .send()
            .await
            .map_err(transport_error)?;
        let ack: UploadAck = decode(response).await?;
        Ok(ack.processing_id)
    }

    async fn processing_status(&self, processing_id: &str) -> PortResult<FileProcessingStatus> {
        let response = self
            .authorize(
                self.client
                    .get(self.url(&format!("/api/mcq/process-status/{processing_id}"))),
            )
            .send()
            .await
            .map_err(transport_error)?;
        decode(response).await
    }

    async fn push_analytics(&self, events: &[AnalyticsEvent]) -> PortResult<()> {
        let response = self
            .authorize(self.client.post(self.url("/api/analytics/events")))
            .json(&serde_json::json!({ "events": events }))
            .send()
            .await
            .map_err(transport_error)?;
        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(PortError::Unauthorized);
        }
        if !status.is_success() {
            return Err(PortError::Unexpected(format!(
                "analytics push failed with HTTP {status}"
            )));
        }
        Ok(())
    }

    async fn push_feedback(&self, feedback: &[FeedbackItem]) -> PortResult<()> {
        let response = self
            .authorize(self.client.post(self.url("/api/feedback/batch")))
            .json(&serde_json::json!({ "feedback": feedback }))
            .send()
            .await
            .map_err(transport_error)?;
        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(PortError::Unauthorized);
        }
        if !status.is_success() {
            return Err(PortError::Unexpected(format!(
                "feedback push failed with HTTP {status}"
            )));
        }
        Ok(())
    }
}
