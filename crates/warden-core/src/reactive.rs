//! The reactive job state machine (§4.3): drains `reactive_jobs` and runs
//! each one through `classify` -> (optional approval wait) -> `execute`,
//! or the simpler `answer` shortcut. `plan` mode is named in the schema
//! but never defined by a handler, so it fails loudly instead of silently
//! no-opping.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::Notify;
use tracing::{info, warn, Level};
use warden_channels::ChatTransport;
use warden_observability::{emit_event, ObservabilityEvent, ProcessKind};
use warden_providers::{ChatMessage, ProviderRegistry, ProviderRole};
use warden_storage::{ApprovalRepo, JobRepo, LedgerRepo, MessageRepo, Pool, TaskRepo, ThreadRepo};
use warden_types::{
    ApprovalStatus, Id, JobMode, JobStatus, Message, MessageRole, Priority, ReactiveJob, Task,
    TaskSource, TaskStatus, TokenScope, WardenError,
};

use crate::approval::{ApprovalWaiter, WaitOutcome};
use crate::config::CoreConfig;
use crate::context::build_window;
use crate::json_extract::extract_first_json_object;

const CLASSIFY_SYSTEM_PROMPT: &str = "You triage an incoming chat message. Reply with a single JSON object: \
{\"summary\": string, \"confidence\": number between 0 and 1, \"intent\": \"question\"|\"command\"|\"task\"|\"other\", \
\"needs_confirmation\": boolean, \"plan\": object or null, \"task\": {\"title\": string, \"description\": string} or null}.";

const FAILURE_NOTICE: &str = "<b>Something went wrong</b> handling that. I've logged it and you can try again.";

const EXECUTE_SYSTEM_PROMPT: &str = "You are the assistant replying in this conversation. \
Use the conversation history and the approved plan to produce the final reply text.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    Question,
    Command,
    Task,
    Other,
}

impl Intent {
    fn from_str(s: &str) -> Self {
        match s {
            "question" => Intent::Question,
            "command" => Intent::Command,
            "task" => Intent::Task,
            // An intent the classifier invents that isn't in the closed
            // set is never treated as a parse failure — it just degrades
            // to `Other` so a model drifting off the schema doesn't fail
            // the whole job.
            _ => Intent::Other,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Classification {
    pub summary: String,
    pub confidence: f64,
    pub intent: Intent,
    pub needs_confirmation: bool,
    pub plan: Option<Value>,
    pub task: Option<TaskDraft>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TaskDraft {
    #[serde(default = "default_task_title")]
    pub title: String,
    #[serde(default)]
    pub description: String,
}

fn default_task_title() -> String {
    "Untitled task".to_string()
}

/// Required fields (`summary`, `confidence`) missing or malformed is a
/// fatal classification error, not a silent fallback (§4.8).
fn parse_classification(value: &Value) -> Result<Classification, WardenError> {
    let summary = value
        .get("summary")
        .and_then(Value::as_str)
        .ok_or_else(|| WardenError::BusinessInvariantViolated("classification missing required field `summary`".into()))?
        .to_string();
    let confidence = value
        .get("confidence")
        .and_then(Value::as_f64)
        .ok_or_else(|| WardenError::BusinessInvariantViolated("classification missing required field `confidence`".into()))?
        .clamp(0.0, 1.0);
    let intent = value.get("intent").and_then(Value::as_str).map(Intent::from_str).unwrap_or(Intent::Other);
    let needs_confirmation = value.get("needs_confirmation").and_then(Value::as_bool).unwrap_or(false);
    let plan = value.get("plan").filter(|v| !v.is_null()).cloned();
    let task = value
        .get("task")
        .filter(|v| !v.is_null())
        .map(|v| serde_json::from_value(v.clone()))
        .transpose()
        .map_err(|e| WardenError::BusinessInvariantViolated(format!("malformed task draft: {e}")))?;

    Ok(Classification { summary, confidence, intent, needs_confirmation, plan, task })
}

#[derive(Debug, Deserialize)]
struct ExecutePayload {
    summary: String,
    #[serde(default)]
    plan: Option<Value>,
    #[serde(default)]
    task: Option<TaskDraft>,
    needs_confirmation: bool,
}

#[derive(Debug, Deserialize)]
struct AnswerPayload {
    text: String,
}

pub struct ReactiveWorker {
    pool: Arc<Pool>,
    providers: ProviderRegistry,
    transport: Arc<dyn ChatTransport>,
    approvals: Arc<ApprovalWaiter>,
    wake: Arc<Notify>,
    config: CoreConfig,
}

impl ReactiveWorker {
    pub fn new(
        pool: Arc<Pool>,
        providers: ProviderRegistry,
        transport: Arc<dyn ChatTransport>,
        approvals: Arc<ApprovalWaiter>,
        wake: Arc<Notify>,
        config: CoreConfig,
    ) -> Self {
        Self { pool, providers, transport, approvals, wake, config }
    }

    pub async fn run(self: Arc<Self>) {
        loop {
            let jobs = JobRepo::new(&self.pool);
            match jobs.lease_next().await {
                Ok(Some(job)) => self.handle_job(job).await,
                Ok(None) => {
                    let sleep = tokio::time::sleep(Duration::from_millis(self.config.reactive_poll_max_ms));
                    tokio::select! {
                        _ = self.wake.notified() => {}
                        _ = sleep => {}
                    }
                }
                Err(e) => {
                    warn!(error = %e, "failed to lease next job");
                    tokio::time::sleep(Duration::from_millis(self.config.reactive_poll_max_ms)).await;
                }
            }
        }
    }

    async fn handle_job(&self, job: ReactiveJob) {
        let jobs = JobRepo::new(&self.pool);
        let result = match job.mode {
            JobMode::Classify => self.handle_classify(&job).await,
            JobMode::Execute => self.handle_execute(&job).await,
            JobMode::Answer => self.handle_answer(&job).await,
            JobMode::Plan => Err(WardenError::BusinessInvariantViolated(
                "plan-mode jobs have no handler".into(),
            )),
        };

        let finish_status = match &result {
            Ok(()) => JobStatus::Done,
            Err(e) => {
                warn!(job_id = %job.id, mode = ?job.mode, error = %e, "job failed");
                self.notify_failure(job.thread_id).await;
                JobStatus::Failed
            }
        };
        let job_id_str = job.id.to_string();
        emit_event(
            if result.is_err() { Level::ERROR } else { Level::INFO },
            ProcessKind::ReactiveWorker,
            ObservabilityEvent {
                event: "job_finished",
                component: "reactive_worker",
                correlation_id: None,
                session_id: None,
                run_id: None,
                message_id: Some(&job_id_str),
                provider_id: None,
                model_id: None,
                status: Some(finish_status_label(finish_status)),
                error_code: None,
                detail: result.as_ref().err().map(|e| e.to_string()).as_deref(),
            },
        );
        if let Err(e) = jobs.finish(job.id, finish_status).await {
            warn!(job_id = %job.id, error = %e, "failed to record job completion");
        }
    }

    async fn handle_classify(&self, job: &ReactiveJob) -> Result<(), WardenError> {
        let window = build_window(&self.pool, job.thread_id, self.config.context_window).await?;
        let provider = self.providers.for_role(ProviderRole::Classifier);

        let result = provider
            .call(CLASSIFY_SYSTEM_PROMPT, &window, 512, Duration::from_secs(self.config.classify_timeout_secs))
            .await
            .map_err(|e| WardenError::TransientIo(e.to_string()))?;

        self.record_usage(TokenScope::Reactive, provider.id(), result.usage.input, result.usage.output, "classify", job.id)
            .await;

        let value = extract_first_json_object(&result.text)
            .ok_or_else(|| WardenError::BusinessInvariantViolated("classifier reply contained no JSON object".into()))?;
        let classification = parse_classification(&value)?;

        info!(job_id = %job.id, intent = ?classification.intent, confidence = classification.confidence, "classified message");

        let payload = json!({
            "summary": classification.summary,
            "plan": classification.plan,
            "task": classification.task,
            "needs_confirmation": classification.needs_confirmation,
        });
        let jobs = JobRepo::new(&self.pool);
        jobs.enqueue(job.thread_id, job.trigger_message_id, JobMode::Execute, payload).await?;
        self.wake.notify_one();
        Ok(())
    }

    async fn handle_execute(&self, job: &ReactiveJob) -> Result<(), WardenError> {
        let payload: ExecutePayload = serde_json::from_value(job.payload.clone())
            .map_err(|e| WardenError::BusinessInvariantViolated(format!("malformed execute payload: {e}")))?;

        if payload.needs_confirmation {
            match self.await_approval(job, &payload.summary).await? {
                ApprovalOutcome::Approved => {}
                ApprovalOutcome::Declined(reply) => {
                    self.reply(job.thread_id, &reply).await?;
                    return Ok(());
                }
            }
        }

        if let Some(draft) = &payload.task {
            self.create_task(draft).await?;
        }

        let window = build_window(&self.pool, job.thread_id, self.config.context_window).await?;
        let mut messages = window;
        messages.push(ChatMessage::user(format!(
            "Plan summary: {}\nPlan detail: {}",
            payload.summary,
            payload.plan.as_ref().map(Value::to_string).unwrap_or_else(|| "none".to_string())
        )));

        let provider = self.providers.executor();
        let result = provider
            .call(EXECUTE_SYSTEM_PROMPT, &messages, 1024, Duration::from_secs(self.config.executor_timeout_secs))
            .await
            .map_err(|e| WardenError::TransientIo(e.to_string()))?;

        self.record_usage(TokenScope::Reactive, provider.id(), result.usage.input, result.usage.output, "execute", job.id)
            .await;

        self.reply(job.thread_id, &result.text).await
    }

    async fn handle_answer(&self, job: &ReactiveJob) -> Result<(), WardenError> {
        let payload: AnswerPayload = serde_json::from_value(job.payload.clone())
            .map_err(|e| WardenError::BusinessInvariantViolated(format!("malformed answer payload: {e}")))?;
        self.reply(job.thread_id, &payload.text).await
    }

    async fn await_approval(&self, job: &ReactiveJob, proposal_text: &str) -> Result<ApprovalOutcome, WardenError> {
        let approvals = ApprovalRepo::new(&self.pool);
        let threads = ThreadRepo::new(&self.pool);
        let thread = threads.get(job.thread_id).await?;

        let approval = approvals.create(job.thread_id, Some(job.id), proposal_text).await?;
        self.approvals.register(approval.id).await;

        let markup = json!({
            "inline_keyboard": [[{ "text": "Approve", "callback_data": format!("approval:{}", approval.id) }]],
        });
        let prompt_text = format!("{proposal_text}\n\nReply or tap Approve to proceed.");
        let prompt_message_id = self
            .transport
            .send(&thread.external_chat_id, &prompt_text, Some(markup))
            .await
            .map_err(|e| WardenError::TransientIo(e.to_string()))?;
        approvals.attach_prompt_message(approval.id, &prompt_message_id).await?;

        let poll_approvals = ApprovalRepo::new(&self.pool);
        let outcome = self
            .approvals
            .wait_for(approval.id, Duration::from_secs(self.config.approval_timeout_secs), || async {
                match poll_approvals.get(approval.id).await {
                    Ok(a) if a.status != ApprovalStatus::Pending => Some(a.status),
                    _ => None,
                }
            })
            .await;
        self.approvals.unregister(approval.id).await;

        match outcome {
            WaitOutcome::Resolved(ApprovalStatus::Approved) => Ok(ApprovalOutcome::Approved),
            WaitOutcome::Resolved(ApprovalStatus::Rejected) => {
                Ok(ApprovalOutcome::Declined("Understood, I won't proceed.".to_string()))
            }
            WaitOutcome::Resolved(ApprovalStatus::Superseded) => {
                Ok(ApprovalOutcome::Declined(String::new()))
            }
            WaitOutcome::Resolved(ApprovalStatus::Pending) | WaitOutcome::TimedOut => {
                // Timeout: reject the durable row so a late callback can't
                // resurrect a decision nobody is waiting on anymore.
                let _ = approvals.resolve(approval.id, ApprovalStatus::Rejected).await;
                Ok(ApprovalOutcome::Declined(
                    "I didn't hear back in time, so I've left this unconfirmed.".to_string(),
                ))
            }
        }
    }

    async fn create_task(&self, draft: &TaskDraft) -> Result<(), WardenError> {
        let tasks = TaskRepo::new(&self.pool);
        let task = Task {
            id: Id::new_v4(),
            title: draft.title.clone(),
            description: draft.description.clone(),
            priority: Priority::Medium,
            status: TaskStatus::Pending,
            source: TaskSource::Master,
            goal_criteria: None,
            attempts: 0,
            max_attempts: Task::DEFAULT_MAX_ATTEMPTS,
            last_result: None,
            parent_id: None,
            order_index: 0,
            depth: 0,
            goal_id: None,
            created_at: chrono::Utc::now(),
            started_at: None,
            completed_at: None,
        };
        tasks.insert(&task).await?;
        Ok(())
    }

    /// Best-effort failure notice to the thread's chat (§4.3): the job is
    /// already being marked `failed` regardless of whether this send
    /// succeeds, so a transport error here is only logged.
    async fn notify_failure(&self, thread_id: Id) {
        let threads = ThreadRepo::new(&self.pool);
        let thread = match threads.get(thread_id).await {
            Ok(thread) => thread,
            Err(e) => {
                warn!(thread_id = %thread_id, error = %e, "failed to look up thread for failure notice");
                return;
            }
        };
        if let Err(e) = self.transport.send(&thread.external_chat_id, FAILURE_NOTICE, None).await {
            warn!(thread_id = %thread_id, error = %e, "failed to send failure notice");
        }
    }

    async fn reply(&self, thread_id: Id, text: &str) -> Result<(), WardenError> {
        if text.is_empty() {
            return Ok(());
        }
        let threads = ThreadRepo::new(&self.pool);
        let thread = threads.get(thread_id).await?;
        let external_message_id = self
            .transport
            .send(&thread.external_chat_id, text, None)
            .await
            .map_err(|e| WardenError::TransientIo(e.to_string()))?;

        let message = Message {
            id: Id::new_v4(),
            thread_id,
            external_message_id: Some(external_message_id),
            role: MessageRole::Assistant,
            author_id: None,
            text: Some(text.to_string()),
            raw_payload: json!({}),
            created_at: chrono::Utc::now(),
        };
        MessageRepo::new(&self.pool).insert(&message).await?;
        Ok(())
    }

    async fn record_usage(&self, scope: TokenScope, provider_id: &str, input: u64, output: u64, stage: &str, job_id: Id) {
        let ledger = LedgerRepo::new(&self.pool);
        let meta = json!({ "job_id": job_id.to_string(), "stage": stage });
        if let Err(e) = ledger.record(scope, provider_id, input as i64, output as i64, meta).await {
            warn!(job_id = %job_id, error = %e, "failed to record token usage");
        }
    }
}

enum ApprovalOutcome {
    Approved,
    Declined(String),
}

fn finish_status_label(status: JobStatus) -> &'static str {
    match status {
        JobStatus::Done => "done",
        JobStatus::Failed => "failed",
        JobStatus::Queued => "queued",
        JobStatus::Running => "running",
        JobStatus::Canceled => "canceled",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use warden_providers::{CompletionResult, Provider, ProviderError, TokenUsage};
    use warden_storage::ThreadRepo;
    use warden_types::ArtifactKind;

    struct ScriptedProvider {
        id: &'static str,
        reply: String,
    }

    #[async_trait]
    impl Provider for ScriptedProvider {
        fn id(&self) -> &str {
            self.id
        }
        async fn call(
            &self,
            _system: &str,
            _messages: &[ChatMessage],
            _max_tokens: u32,
            _timeout: Duration,
        ) -> Result<CompletionResult, ProviderError> {
            Ok(CompletionResult { text: self.reply.clone(), tool_calls: vec![], usage: TokenUsage { input: 10, output: 5 } })
        }
    }

    struct RecordingTransport {
        sent: Mutex<Vec<(String, String)>>,
    }

    impl RecordingTransport {
        fn new() -> Self {
            Self { sent: Mutex::new(Vec::new()) }
        }
    }

    #[async_trait]
    impl ChatTransport for RecordingTransport {
        fn platform(&self) -> &str {
            "telegram"
        }
        async fn send(&self, chat_id: &str, text: &str, _markup: Option<Value>) -> anyhow::Result<String> {
            self.sent.lock().unwrap().push((chat_id.to_string(), text.to_string()));
            Ok(format!("msg-{}", self.sent.lock().unwrap().len()))
        }
        async fn edit_text(&self, _chat_id: &str, _message_id: &str, _text: &str) -> anyhow::Result<()> {
            Ok(())
        }
        async fn edit_reply_markup(&self, _chat_id: &str, _message_id: &str, _markup: Option<Value>) -> anyhow::Result<()> {
            Ok(())
        }
        async fn answer_callback_query(&self, _id: &str, _text: Option<&str>) -> anyhow::Result<()> {
            Ok(())
        }
        async fn set_reaction(&self, _chat_id: &str, _message_id: &str, _reaction: &str) -> anyhow::Result<()> {
            Ok(())
        }
    }

    async fn fixture_pool() -> Arc<Pool> {
        let dir = tempfile::tempdir().unwrap();
        Arc::new(Pool::open(dir.path().join("warden.db"), 1, 2).unwrap())
    }

    fn test_config() -> CoreConfig {
        CoreConfig {
            context_window: 30,
            classify_timeout_secs: 5,
            executor_timeout_secs: 5,
            approval_timeout_secs: 1,
            reactive_poll_min_ms: 5,
            reactive_poll_max_ms: 10,
            media_poll_interval_secs: 5,
            media_batch_size: 10,
            media_max_attempts: 3,
            blob_store_root: std::env::temp_dir(),
        }
    }

    #[test]
    fn parse_classification_requires_summary_and_confidence() {
        assert!(parse_classification(&json!({"confidence": 0.5})).is_err());
        assert!(parse_classification(&json!({"summary": "hi"})).is_err());
    }

    #[test]
    fn parse_classification_clamps_confidence_and_coerces_unknown_intent() {
        let value = json!({"summary": "hi", "confidence": 5.0, "intent": "banana"});
        let c = parse_classification(&value).unwrap();
        assert_eq!(c.confidence, 1.0);
        assert_eq!(c.intent, Intent::Other);
        assert!(!c.needs_confirmation);
    }

    #[tokio::test]
    async fn classify_job_enqueues_execute_and_marks_itself_done() {
        let pool = fixture_pool().await;
        let thread = ThreadRepo::new(&pool).get_or_create("telegram", "1").await.unwrap();
        let message = Message {
            id: Id::new_v4(),
            thread_id: thread.id,
            external_message_id: None,
            role: MessageRole::User,
            author_id: None,
            text: Some("what's 2+2".into()),
            raw_payload: json!({}),
            created_at: chrono::Utc::now(),
        };
        MessageRepo::new(&pool).insert(&message).await.unwrap();
        let job = JobRepo::new(&pool).enqueue(thread.id, message.id, JobMode::Classify, json!({})).await.unwrap();

        let classifier = Arc::new(ScriptedProvider {
            id: "fast",
            reply: r#"{"summary": "arithmetic question", "confidence": 0.95, "intent": "question", "needs_confirmation": false}"#.to_string(),
        });
        let executor = Arc::new(ScriptedProvider { id: "capable", reply: "4".to_string() });
        let worker = ReactiveWorker::new(
            pool.clone(),
            ProviderRegistry::new(classifier, executor),
            Arc::new(RecordingTransport::new()),
            Arc::new(ApprovalWaiter::new(Duration::from_millis(5))),
            Arc::new(Notify::new()),
            test_config(),
        );

        worker.handle_job(job).await;

        let execute_job = JobRepo::new(&pool).lease_next().await.unwrap().unwrap();
        assert_eq!(execute_job.mode, JobMode::Execute);
    }

    #[tokio::test]
    async fn execute_job_without_confirmation_sends_reply_immediately() {
        let pool = fixture_pool().await;
        let thread = ThreadRepo::new(&pool).get_or_create("telegram", "2").await.unwrap();
        let message = Message {
            id: Id::new_v4(),
            thread_id: thread.id,
            external_message_id: None,
            role: MessageRole::User,
            author_id: None,
            text: Some("hi".into()),
            raw_payload: json!({}),
            created_at: chrono::Utc::now(),
        };
        MessageRepo::new(&pool).insert(&message).await.unwrap();
        let job = JobRepo::new(&pool)
            .enqueue(thread.id, message.id, JobMode::Execute, json!({"summary": "greeting", "needs_confirmation": false}))
            .await
            .unwrap();

        let classifier = Arc::new(ScriptedProvider { id: "fast", reply: String::new() });
        let executor = Arc::new(ScriptedProvider { id: "capable", reply: "Hello there!".to_string() });
        let transport = Arc::new(RecordingTransport::new());
        let worker = ReactiveWorker::new(
            pool.clone(),
            ProviderRegistry::new(classifier, executor),
            transport.clone(),
            Arc::new(ApprovalWaiter::new(Duration::from_millis(5))),
            Arc::new(Notify::new()),
            test_config(),
        );

        worker.handle_job(job.clone()).await;

        let finished = JobRepo::new(&pool).get(job.id).await.unwrap();
        assert_eq!(finished.status, JobStatus::Done);
        assert_eq!(transport.sent.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn execute_job_needing_confirmation_times_out_and_declines() {
        let pool = fixture_pool().await;
        let thread = ThreadRepo::new(&pool).get_or_create("telegram", "3").await.unwrap();
        let message = Message {
            id: Id::new_v4(),
            thread_id: thread.id,
            external_message_id: None,
            role: MessageRole::User,
            author_id: None,
            text: Some("deploy it".into()),
            raw_payload: json!({}),
            created_at: chrono::Utc::now(),
        };
        MessageRepo::new(&pool).insert(&message).await.unwrap();
        let job = JobRepo::new(&pool)
            .enqueue(thread.id, message.id, JobMode::Execute, json!({"summary": "deploy to prod?", "needs_confirmation": true}))
            .await
            .unwrap();

        let classifier = Arc::new(ScriptedProvider { id: "fast", reply: String::new() });
        let executor = Arc::new(ScriptedProvider { id: "capable", reply: "deployed".to_string() });
        let transport = Arc::new(RecordingTransport::new());
        let mut config = test_config();
        config.approval_timeout_secs = 0;
        let worker = ReactiveWorker::new(
            pool.clone(),
            ProviderRegistry::new(classifier, executor),
            transport.clone(),
            Arc::new(ApprovalWaiter::new(Duration::from_millis(5))),
            Arc::new(Notify::new()),
            config,
        );

        worker.handle_job(job.clone()).await;

        let finished = JobRepo::new(&pool).get(job.id).await.unwrap();
        assert_eq!(finished.status, JobStatus::Done);
        // The approval prompt plus the decline message.
        assert_eq!(transport.sent.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn answer_job_sends_payload_text_verbatim() {
        let pool = fixture_pool().await;
        let thread = ThreadRepo::new(&pool).get_or_create("telegram", "4").await.unwrap();
        let message = Message {
            id: Id::new_v4(),
            thread_id: thread.id,
            external_message_id: None,
            role: MessageRole::User,
            author_id: None,
            text: Some("status?".into()),
            raw_payload: json!({}),
            created_at: chrono::Utc::now(),
        };
        MessageRepo::new(&pool).insert(&message).await.unwrap();
        let job = JobRepo::new(&pool)
            .enqueue(thread.id, message.id, JobMode::Answer, json!({"text": "all systems nominal"}))
            .await
            .unwrap();

        let transport = Arc::new(RecordingTransport::new());
        let worker = ReactiveWorker::new(
            pool.clone(),
            ProviderRegistry::new(
                Arc::new(ScriptedProvider { id: "fast", reply: String::new() }),
                Arc::new(ScriptedProvider { id: "capable", reply: String::new() }),
            ),
            transport.clone(),
            Arc::new(ApprovalWaiter::new(Duration::from_millis(5))),
            Arc::new(Notify::new()),
            test_config(),
        );

        worker.handle_job(job).await;
        assert_eq!(transport.sent.lock().unwrap()[0].1, "all systems nominal");
    }

    #[tokio::test]
    async fn plan_mode_job_fails_loudly() {
        let pool = fixture_pool().await;
        let thread = ThreadRepo::new(&pool).get_or_create("telegram", "5").await.unwrap();
        let message = Message {
            id: Id::new_v4(),
            thread_id: thread.id,
            external_message_id: None,
            role: MessageRole::User,
            author_id: None,
            text: None,
            raw_payload: json!({}),
            created_at: chrono::Utc::now(),
        };
        MessageRepo::new(&pool).insert(&message).await.unwrap();
        let job = JobRepo::new(&pool).enqueue(thread.id, message.id, JobMode::Plan, json!({})).await.unwrap();

        let worker = ReactiveWorker::new(
            pool.clone(),
            ProviderRegistry::new(
                Arc::new(ScriptedProvider { id: "fast", reply: String::new() }),
                Arc::new(ScriptedProvider { id: "capable", reply: String::new() }),
            ),
            Arc::new(RecordingTransport::new()),
            Arc::new(ApprovalWaiter::new(Duration::from_millis(5))),
            Arc::new(Notify::new()),
            test_config(),
        );

        worker.handle_job(job.clone()).await;
        let finished = JobRepo::new(&pool).get(job.id).await.unwrap();
        assert_eq!(finished.status, JobStatus::Failed);
    }

    #[test]
    fn artifact_kind_dispatch_stays_exhaustive() {
        // Compile-time guard: if a new ArtifactKind variant is added, the
        // media dispatch match in `media.rs` must be updated too.
        let _ = ArtifactKind::FileMeta;
    }
}
