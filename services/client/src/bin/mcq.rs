//! services/client/src/bin/mcq.rs
//!
//! Command-line front end: reads study content from a file argument (PDF
//! and DOCX files go through the upload pipeline, plain text is read
//! locally) or from stdin, generates questions, and prints them.

use bytes::Bytes;
use client_lib::{
    adapters::{FileSnapshotStore, HttpGenerationApi, StaticTokenProvider, WsTransport},
    config::Config,
    error::ClientError,
    mcq::{FileIngestion, GenerationOrchestrator, ProgressStore, RealtimeChannel},
    telemetry::AnalyticsService,
    McqService,
};
use mcq_core::domain::{FileStatus, GenerationRequest, SourceFile};
use mcq_core::ports::TokenProvider;
use std::io::Read;
use std::path::Path;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), ClientError> {
    // --- 1. Load Configuration & Set Up Logging ---
    let config = Config::from_env()?;
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(config.log_level.to_string()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // --- 2. Initialize Adapters ---
    let token: Arc<dyn TokenProvider> = Arc::new(StaticTokenProvider::from_optional(
        config.bearer_token.clone(),
    ));
    let api: Arc<dyn mcq_core::ports::GenerationApi> = Arc::new(HttpGenerationApi::new(
        config.api_base_url.clone(),
        Arc::clone(&token),
    )?);
    let channel = Arc::new(RealtimeChannel::new(Arc::new(WsTransport::new(
        config.ws_url.clone(),
        Arc::clone(&token),
    ))));
    channel.start();

    // --- 3. Restore Progress History & Wire the Service ---
    let progress =
        ProgressStore::with_snapshot(Arc::new(FileSnapshotStore::new(&config.progress_path)));
    progress.restore().await;

    let analytics = Arc::new(AnalyticsService::new(Arc::clone(&api)));
    let orchestrator = Arc::new(
        GenerationOrchestrator::new(Arc::clone(&api), Arc::clone(&channel), progress)
            .with_timeout(config.generation_timeout)
            .with_analytics(Arc::clone(&analytics)),
    );
    let service = McqService::new(orchestrator, FileIngestion::new(Arc::clone(&api)));

    // --- 4. Obtain Content ---
    let content = match std::env::args().nth(1) {
        Some(path) => load_content(&service, Path::new(&path)).await?,
        None => {
            let mut buffer = String::new();
            std::io::stdin().read_to_string(&mut buffer)?;
            buffer
        }
    };

    // --- 5. Generate and Print ---
    info!("generating questions from {} bytes of content", content.len());
    let response = service
        .generate(GenerationRequest::from_content(content))
        .await
        .map_err(ClientError::Service)?;

    for (i, question) in response.questions.iter().enumerate() {
        println!("{}. {}", i + 1, question.question);
        for option in &question.options {
            let marker = if option.is_correct { '*' } else { ' ' };
            println!("  {marker} [{}] {}", option.id, option.text);
        }
        if !question.explanation.is_empty() {
            println!("     {}", question.explanation);
        }
        println!();
    }

    // --- 6. Flush Telemetry Before Exit ---
    analytics.flush().await;
    Ok(())
}

/// Reads `.txt` files locally; anything else goes through the server-side
/// extraction pipeline.
async fn load_content(service: &McqService, path: &Path) -> Result<String, ClientError> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();
    if extension == "txt" || extension.is_empty() {
        return Ok(std::fs::read_to_string(path)?);
    }

    let mime_type = match extension.as_str() {
        "pdf" => "application/pdf",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        other => {
            return Err(ClientError::Internal(format!(
                "unsupported file extension '.{other}'"
            )))
        }
    };
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("upload")
        .to_string();
    let file = SourceFile::new(name, mime_type, Bytes::from(std::fs::read(path)?));

    let text = service
        .ingest_file(&file, |status, percent| {
            let phase = match status {
                FileStatus::Uploading => "uploading",
                FileStatus::Processing => "processing",
                FileStatus::Completed => "done",
                FileStatus::Error => "error",
            };
            info!("{phase}: {percent:.0}%");
        })
        .await
        .map_err(ClientError::Service)?;
    Ok(text)
}
