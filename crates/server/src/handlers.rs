//! Message handlers
//!
//! Parsing, validation and admission run inline on the session's reader
//! task, so duplicate or over-cap submissions are rejected while earlier
//! jobs are still in flight. Admitted jobs run in their own task with the
//! heavy section on a blocking worker; they keep running to completion if
//! the session goes away, persisting their result to the client-supplied
//! path.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use serde_json::{json, Map, Value};

use clipsight_core::{AnalyzeRequest, Error, JobKind, Result, TranscribeRequest};
use clipsight_pipeline::analyzer::save_json;
use clipsight_pipeline::{
    AnalysisProgress, AnalysisService, ProgressSender, TranscriptionProgress, TranscriptionService,
};

use crate::connection::{ConnectionRegistry, Session};
use crate::messages::{MessageType, RequestParser};
use crate::metrics::record_job_duration;
use crate::state::{JobGuard, ServiceState};

pub struct MessageHandlers {
    registry: Arc<ConnectionRegistry>,
    state: Arc<ServiceState>,
    analysis: Arc<AnalysisService>,
    transcription: Arc<TranscriptionService>,
    parser: RequestParser,
    external_host: bool,
}

impl MessageHandlers {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        state: Arc<ServiceState>,
        analysis: Arc<AnalysisService>,
        transcription: Arc<TranscriptionService>,
        parser: RequestParser,
        external_host: bool,
    ) -> Self {
        Self {
            registry,
            state,
            analysis,
            transcription,
            parser,
            external_host,
        }
    }

    /// Health check: state snapshot plus the live connection count.
    pub async fn handle_health(&self, session: &Arc<Session>) -> Result<()> {
        let snapshot = self.state.health_snapshot();
        let mut payload = to_object(serde_json::to_value(&snapshot)?);
        payload.insert(
            "active_connections".to_string(),
            json!(self.registry.connection_count()),
        );
        self.registry
            .send(session, MessageType::Status, payload, None)
            .await;
        Ok(())
    }

    pub async fn handle_analyze(
        &self,
        session: &Arc<Session>,
        payload: &Map<String, Value>,
    ) -> Result<()> {
        let request = match self.parser.parse_analyze(payload) {
            Ok(request) => request,
            Err(Error::InvalidRequest(message)) => {
                self.send_error(session, &message).await;
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        if let Err(e) = RequestParser::validate_video_path(&request.video_path) {
            self.send_job_error(session, MessageType::AnalysisError, &e.to_string(), &request.job_id)
                .await;
            return Ok(());
        }

        let guard = match self.state.begin(JobKind::Analyze, &request.video_path) {
            Ok(guard) => guard,
            Err(e) => {
                self.send_job_error(
                    session,
                    MessageType::AnalysisError,
                    &e.to_string(),
                    &request.job_id,
                )
                .await;
                return Ok(());
            }
        };

        let registry = self.registry.clone();
        let session = session.clone();
        let service = self.analysis.clone();
        let external_host = self.external_host;
        tokio::spawn(async move {
            run_analysis_job(registry, session, service, request, guard, external_host).await;
        });
        Ok(())
    }

    pub async fn handle_transcribe(
        &self,
        session: &Arc<Session>,
        payload: &Map<String, Value>,
    ) -> Result<()> {
        let request = match self.parser.parse_transcribe(payload) {
            Ok(request) => request,
            Err(Error::InvalidRequest(message)) => {
                self.send_error(session, &message).await;
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        if let Err(e) = RequestParser::validate_video_path(&request.video_path) {
            self.send_job_error(
                session,
                MessageType::TranscriptionError,
                &e.to_string(),
                &request.job_id,
            )
            .await;
            return Ok(());
        }

        let guard = match self.state.begin(JobKind::Transcribe, &request.video_path) {
            Ok(guard) => guard,
            Err(e) => {
                self.send_job_error(
                    session,
                    MessageType::TranscriptionError,
                    &e.to_string(),
                    &request.job_id,
                )
                .await;
                return Ok(());
            }
        };

        let registry = self.registry.clone();
        let session = session.clone();
        let service = self.transcription.clone();
        let external_host = self.external_host;
        tokio::spawn(async move {
            run_transcription_job(registry, session, service, request, guard, external_host).await;
        });
        Ok(())
    }

    pub async fn send_error(&self, session: &Arc<Session>, message: &str) {
        let mut payload = Map::new();
        payload.insert("message".to_string(), json!(message));
        self.registry
            .send(session, MessageType::Error, payload, None)
            .await;
    }

    async fn send_job_error(
        &self,
        session: &Arc<Session>,
        kind: MessageType,
        message: &str,
        job_id: &str,
    ) {
        let mut payload = Map::new();
        payload.insert("message".to_string(), json!(message));
        self.registry.send(session, kind, payload, Some(job_id)).await;
    }
}

async fn run_analysis_job(
    registry: Arc<ConnectionRegistry>,
    session: Arc<Session>,
    service: Arc<AnalysisService>,
    request: AnalyzeRequest,
    guard: JobGuard,
    external_host: bool,
) {
    let job_start = Instant::now();
    let (progress_tx, mut progress_rx) = ProgressSender::<AnalysisProgress>::channel();

    // Session-side forwarder: drains the job's channel in FIFO order. Sends
    // to a closed session report false and the events are simply discarded.
    let forwarder = {
        let registry = registry.clone();
        let session = session.clone();
        let job_id = request.job_id.clone();
        tokio::spawn(async move {
            while let Some(event) = progress_rx.recv().await {
                let Ok(Value::Object(payload)) = serde_json::to_value(&event) else {
                    continue;
                };
                registry
                    .send(&session, MessageType::AnalysisProgress, payload, Some(&job_id))
                    .await;
            }
        })
    };

    let worker = {
        let service = service.clone();
        let request = request.clone();
        tokio::task::spawn_blocking(move || service.process(&request, Some(&progress_tx)))
    };
    let result = worker.await;
    let _ = forwarder.await;

    match result {
        Ok(result) => {
            record_job_duration(JobKind::Analyze, job_start.elapsed().as_secs_f64());

            if let Some(error) = &result.error {
                let mut payload = Map::new();
                payload.insert("message".to_string(), json!(format!("Analysis failed: {error}")));
                registry
                    .send(
                        &session,
                        MessageType::AnalysisError,
                        payload,
                        Some(&request.job_id),
                    )
                    .await;
                guard.finish(false);
                return;
            }

            let payload = if external_host {
                to_object(serde_json::to_value(&result).unwrap_or(Value::Null))
            } else {
                if let Err(e) = save_json(&result, Path::new(&request.json_file_path)) {
                    tracing::error!(error = %e, "Failed to persist analysis result");
                    let mut payload = Map::new();
                    payload.insert("message".to_string(), json!(e.to_string()));
                    registry
                        .send(
                            &session,
                            MessageType::AnalysisError,
                            payload,
                            Some(&request.job_id),
                        )
                        .await;
                    guard.finish(false);
                    return;
                }
                Map::new()
            };

            registry
                .send(
                    &session,
                    MessageType::AnalysisCompleted,
                    payload,
                    Some(&request.job_id),
                )
                .await;
            guard.finish(true);
            tracing::info!(video = %request.video_path, "Analysis complete");
        }
        Err(e) => {
            tracing::error!(error = %e, "Analysis worker aborted");
            let mut payload = Map::new();
            payload.insert("message".to_string(), json!("Internal error"));
            registry
                .send(
                    &session,
                    MessageType::AnalysisError,
                    payload,
                    Some(&request.job_id),
                )
                .await;
            // Guard drop records the failure.
        }
    }
}

async fn run_transcription_job(
    registry: Arc<ConnectionRegistry>,
    session: Arc<Session>,
    service: Arc<TranscriptionService>,
    request: TranscribeRequest,
    guard: JobGuard,
    external_host: bool,
) {
    let job_start = Instant::now();
    let (progress_tx, mut progress_rx) = ProgressSender::<TranscriptionProgress>::channel();

    let forwarder = {
        let registry = registry.clone();
        let session = session.clone();
        let job_id = request.job_id.clone();
        let video_path = request.video_path.clone();
        tokio::spawn(async move {
            while let Some(event) = progress_rx.recv().await {
                let Ok(Value::Object(mut payload)) = serde_json::to_value(&event) else {
                    continue;
                };
                payload.insert("video_path".to_string(), json!(video_path));
                registry
                    .send(
                        &session,
                        MessageType::TranscriptionProgress,
                        payload,
                        Some(&job_id),
                    )
                    .await;
            }
        })
    };

    let worker = {
        let service = service.clone();
        let request = request.clone();
        tokio::task::spawn_blocking(move || service.process(&request, Some(&progress_tx)))
    };
    let result = worker.await;
    let _ = forwarder.await;

    match result {
        Ok(Ok(result)) => {
            record_job_duration(JobKind::Transcribe, job_start.elapsed().as_secs_f64());

            let payload = if external_host {
                to_object(serde_json::to_value(&result).unwrap_or(Value::Null))
            } else {
                if let Err(e) = save_json(&result, Path::new(&request.json_file_path)) {
                    tracing::error!(error = %e, "Failed to persist transcription result");
                    let mut payload = Map::new();
                    payload.insert("message".to_string(), json!(e.to_string()));
                    payload.insert("video_path".to_string(), json!(request.video_path));
                    registry
                        .send(
                            &session,
                            MessageType::TranscriptionError,
                            payload,
                            Some(&request.job_id),
                        )
                        .await;
                    guard.finish(false);
                    return;
                }
                Map::new()
            };

            registry
                .send(
                    &session,
                    MessageType::TranscriptionCompleted,
                    payload,
                    Some(&request.job_id),
                )
                .await;
            guard.finish(true);
            tracing::info!(video = %request.video_path, "Transcription complete");
        }
        Ok(Err(e)) => {
            tracing::error!(video = %request.video_path, error = %e, "Transcription failed");
            let mut payload = Map::new();
            payload.insert("message".to_string(), json!(e.to_string()));
            payload.insert("video_path".to_string(), json!(request.video_path));
            registry
                .send(
                    &session,
                    MessageType::TranscriptionError,
                    payload,
                    Some(&request.job_id),
                )
                .await;
            guard.finish(false);
        }
        Err(e) => {
            tracing::error!(error = %e, "Transcription worker aborted");
            let mut payload = Map::new();
            payload.insert("message".to_string(), json!("Internal error"));
            registry
                .send(
                    &session,
                    MessageType::TranscriptionError,
                    payload,
                    Some(&request.job_id),
                )
                .await;
            // Guard drop records the failure.
        }
    }
}

fn to_object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}
