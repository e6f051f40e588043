//! C2: the five-step ingestion pipeline that turns a normalized webhook
//! update into durable rows and (for messages) a queued classify job.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Notify;
use tracing::{info, warn};
use warden_storage::{ApprovalRepo, ArtifactRepo, JobRepo, MessageRepo, Pool, ThreadRepo};
use warden_types::{ApprovalStatus, Id, JobMode, Message, MessageRole, PersistError};

use crate::model::{ChannelUpdate, InboundCallback, InboundMessage};
use crate::transport::ChatTransport;

/// Lets the execute handler (C4, in `warden-core`) learn about an approval
/// resolution without `warden-channels` depending on `warden-core` — the
/// concrete `watch`-channel registry lives there and implements this trait.
#[async_trait]
pub trait ApprovalNotifier: Send + Sync {
    async fn notify(&self, approval_id: Id, status: ApprovalStatus);
}

/// No-op notifier for callers that only poll the durable row (the coarse
/// fallback path, or tests) and don't need the low-latency wake.
pub struct NoopApprovalNotifier;

#[async_trait]
impl ApprovalNotifier for NoopApprovalNotifier {
    async fn notify(&self, _approval_id: Id, _status: ApprovalStatus) {}
}

pub struct Ingestion {
    pool: Arc<Pool>,
    transport: Arc<dyn ChatTransport>,
    wake: Arc<Notify>,
    approval_notifier: Arc<dyn ApprovalNotifier>,
}

impl Ingestion {
    pub fn new(
        pool: Arc<Pool>,
        transport: Arc<dyn ChatTransport>,
        wake: Arc<Notify>,
        approval_notifier: Arc<dyn ApprovalNotifier>,
    ) -> Self {
        Self { pool, transport, wake, approval_notifier }
    }

    pub async fn ingest(&self, platform: &str, update: ChannelUpdate) -> anyhow::Result<()> {
        match update {
            ChannelUpdate::Message(m) => self.handle_message(platform, m).await,
            ChannelUpdate::Callback(c) => self.handle_callback(platform, c).await,
            ChannelUpdate::Ignored => Ok(()),
        }
    }

    async fn handle_message(&self, platform: &str, inbound: InboundMessage) -> anyhow::Result<()> {
        let threads = ThreadRepo::new(&self.pool);
        let messages = MessageRepo::new(&self.pool);
        let artifacts = ArtifactRepo::new(&self.pool);
        let jobs = JobRepo::new(&self.pool);
        let approvals = ApprovalRepo::new(&self.pool);

        let thread = threads.get_or_create(platform, &inbound.external_chat_id).await?;

        // Step 1: supersede any pending approval on this thread before
        // anything else — a fresh message always clears the slate.
        approvals.supersede_pending_for_thread(thread.id).await?;

        // Step 2: durably record the message.
        let message = Message {
            id: Id::new_v4(),
            thread_id: thread.id,
            external_message_id: Some(inbound.external_message_id.clone()),
            role: MessageRole::User,
            author_id: inbound.author_id.clone(),
            text: inbound.text.clone(),
            raw_payload: inbound.raw.clone(),
            created_at: chrono::Utc::now(),
        };
        messages.insert(&message).await?;

        // Step 3: one pending artifact row per attachment, carrying the
        // platform file reference the media processor (C5) will resolve.
        for attachment in &inbound.attachments {
            artifacts.insert_pending(message.id, attachment.kind, Some(&attachment.file_ref)).await?;
        }

        // Step 4: enqueue the classify job that kicks off the reactive
        // state machine (C3).
        jobs.enqueue(thread.id, message.id, JobMode::Classify, serde_json::json!({})).await?;

        // Step 5: bump the thread's `updated_at` and wake the worker.
        threads.touch(thread.id).await?;
        self.wake.notify_one();

        info!(thread_id = %thread.id, message_id = %message.id, "ingested inbound message");
        Ok(())
    }

    /// Resolves an `approval:<id>` callback. Acks the callback query
    /// unconditionally (Telegram expects a response within a few seconds
    /// regardless of outcome) and clears the inline keyboard on success.
    async fn handle_callback(&self, _platform: &str, callback: InboundCallback) -> anyhow::Result<()> {
        let approvals = ApprovalRepo::new(&self.pool);
        let jobs = JobRepo::new(&self.pool);

        let Some(approval_id) = callback.data.strip_prefix("approval:").and_then(|s| s.parse::<Id>().ok()) else {
            warn!(data = %callback.data, "callback with unrecognized payload");
            self.transport.answer_callback_query(&callback.callback_query_id, None).await?;
            return Ok(());
        };

        // The only button the ingestion protocol defines carries an
        // `approval:<id>` payload and always resolves to `approved` —
        // rejection happens via timeout or supersession, not a button.
        let decision = ApprovalStatus::Approved;

        match approvals.resolve(approval_id, decision).await {
            Ok(approval) => {
                if let Some(message_id) = &callback.prompt_message_id {
                    let _ = self.transport.edit_reply_markup(&callback.external_chat_id, message_id, None).await;
                }
                if let Some(job_id) = approval.job_id {
                    // Defensive: normally the approval is created by the
                    // execute handler after the classify->execute
                    // transition already happened, so this is a no-op.
                    match jobs.flip_to_execute(job_id).await {
                        Ok(true) => self.wake.notify_one(),
                        Ok(false) => {}
                        Err(e) => warn!(error = %e, "failed to flip job to execute after approval"),
                    }
                }
                self.approval_notifier.notify(approval_id, decision).await;
                self.transport
                    .answer_callback_query(&callback.callback_query_id, Some(if decision == ApprovalStatus::Approved { "Approved" } else { "Rejected" }))
                    .await?;
            }
            Err(PersistError::Conflict(_)) => {
                self.transport.answer_callback_query(&callback.callback_query_id, Some("Already resolved")).await?;
            }
            Err(e) => {
                warn!(error = %e, "failed to resolve approval");
                self.transport.answer_callback_query(&callback.callback_query_id, Some("Error")).await?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::InboundAttachment;
    use serde_json::Value;
    use std::sync::Mutex;
    use warden_types::ArtifactKind;

    struct RecordingTransport {
        sent: Mutex<Vec<(String, String)>>,
        answered: Mutex<Vec<String>>,
    }

    impl RecordingTransport {
        fn new() -> Self {
            Self { sent: Mutex::new(Vec::new()), answered: Mutex::new(Vec::new()) }
        }
    }

    #[async_trait]
    impl ChatTransport for RecordingTransport {
        fn platform(&self) -> &str {
            "telegram"
        }
        async fn send(&self, chat_id: &str, text: &str, _reply_markup: Option<Value>) -> anyhow::Result<String> {
            self.sent.lock().unwrap().push((chat_id.to_string(), text.to_string()));
            Ok("1".to_string())
        }
        async fn edit_text(&self, _chat_id: &str, _message_id: &str, _text: &str) -> anyhow::Result<()> {
            Ok(())
        }
        async fn edit_reply_markup(&self, _chat_id: &str, _message_id: &str, _markup: Option<Value>) -> anyhow::Result<()> {
            Ok(())
        }
        async fn answer_callback_query(&self, id: &str, _text: Option<&str>) -> anyhow::Result<()> {
            self.answered.lock().unwrap().push(id.to_string());
            Ok(())
        }
        async fn set_reaction(&self, _chat_id: &str, _message_id: &str, _reaction: &str) -> anyhow::Result<()> {
            Ok(())
        }
    }

    async fn fixture() -> (Arc<Pool>, Ingestion) {
        let dir = tempfile::tempdir().unwrap();
        let pool = Arc::new(Pool::open(dir.path().join("warden.db"), 1, 2).unwrap());
        let transport = Arc::new(RecordingTransport::new());
        let ingestion = Ingestion::new(pool.clone(), transport, Arc::new(Notify::new()), Arc::new(NoopApprovalNotifier));
        (pool, ingestion)
    }

    #[tokio::test]
    async fn ingesting_a_message_enqueues_a_classify_job() {
        let (pool, ingestion) = fixture().await;
        let update = ChannelUpdate::Message(InboundMessage {
            external_chat_id: "1001".into(),
            external_message_id: "55".into(),
            author_id: Some("u1".into()),
            text: Some("what's the weather".into()),
            attachments: vec![],
            raw: serde_json::json!({}),
        });

        ingestion.ingest("telegram", update).await.unwrap();

        let thread = ThreadRepo::new(&pool).get_or_create("telegram", "1001").await.unwrap();
        let recent = MessageRepo::new(&pool).recent_for_thread(thread.id, 10).await.unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].text.as_deref(), Some("what's the weather"));

        let job = JobRepo::new(&pool).lease_next().await.unwrap().unwrap();
        assert_eq!(job.mode, JobMode::Classify);
    }

    #[tokio::test]
    async fn attachments_become_pending_artifacts() {
        let (pool, ingestion) = fixture().await;
        let update = ChannelUpdate::Message(InboundMessage {
            external_chat_id: "1002".into(),
            external_message_id: "56".into(),
            author_id: None,
            text: None,
            attachments: vec![InboundAttachment { kind: ArtifactKind::ImageJson, file_ref: "f1".into() }],
            raw: serde_json::json!({}),
        });
        ingestion.ingest("telegram", update).await.unwrap();

        let thread = ThreadRepo::new(&pool).get_or_create("telegram", "1002").await.unwrap();
        let recent = MessageRepo::new(&pool).recent_for_thread(thread.id, 10).await.unwrap();
        let artifacts = ArtifactRepo::new(&pool).for_message(recent[0].id).await.unwrap();
        assert_eq!(artifacts.len(), 1);
        assert_eq!(artifacts[0].uri.as_deref(), Some("f1"));
    }

    #[tokio::test]
    async fn new_message_supersedes_pending_approval_in_same_thread() {
        let (pool, ingestion) = fixture().await;
        let thread = ThreadRepo::new(&pool).get_or_create("telegram", "1003").await.unwrap();
        let approval = ApprovalRepo::new(&pool).create(thread.id, None, "deploy?").await.unwrap();

        let update = ChannelUpdate::Message(InboundMessage {
            external_chat_id: "1003".into(),
            external_message_id: "57".into(),
            author_id: None,
            text: Some("never mind".into()),
            attachments: vec![],
            raw: serde_json::json!({}),
        });
        ingestion.ingest("telegram", update).await.unwrap();

        let refetched = ApprovalRepo::new(&pool).get(approval.id).await.unwrap();
        assert_eq!(refetched.status, ApprovalStatus::Superseded);
    }

    #[tokio::test]
    async fn callback_resolves_approval_and_acks_query() {
        let (pool, ingestion) = fixture().await;
        let thread = ThreadRepo::new(&pool).get_or_create("telegram", "1004").await.unwrap();
        let approval = ApprovalRepo::new(&pool).create(thread.id, None, "restart?").await.unwrap();

        let update = ChannelUpdate::Callback(InboundCallback {
            external_chat_id: "1004".into(),
            callback_query_id: "cbq1".into(),
            data: format!("approval:{}", approval.id),
            prompt_message_id: Some("99".into()),
        });
        ingestion.ingest("telegram", update).await.unwrap();

        let refetched = ApprovalRepo::new(&pool).get(approval.id).await.unwrap();
        assert_eq!(refetched.status, ApprovalStatus::Approved);
    }
}
