//! Action Handlers (C9): the six-entry closed dispatch table the Decision
//! Engine (C8) hands validated decisions to. Every handler returns a
//! dictionary; the scheduler folds it into a Memory (C10) cycle summary.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use warden_channels::{ChannelsConfig, ChatTransport};
use warden_storage::{ApprovalRepo, Pool, TaskRepo, ThreadRepo};
use warden_types::{ApprovalStatus, Id, WardenError};

use crate::config::OrchestratorConfig;
use crate::decision::Action;

pub struct ActionContext {
    pub pool: Arc<Pool>,
    pub transport: Arc<dyn ChatTransport>,
    pub channels: ChannelsConfig,
    pub config: OrchestratorConfig,
}

/// Dispatches a validated decision's `details` to its handler. Exhaustive
/// over `Action` so a new variant fails to compile here rather than
/// silently falling through.
pub async fn dispatch(action: Action, details: &Value, ctx: &ActionContext) -> Result<Value, WardenError> {
    match action {
        Action::DevelopSkill => develop_skill(details).await,
        Action::WorkOnTask => work_on_task(details, ctx).await,
        Action::Meditate => meditate(details).await,
        Action::Communicate => communicate(details, ctx).await,
        Action::AskMaster => ask_master(details, ctx).await,
        Action::ProactiveOutreach => proactive_outreach(details, ctx).await,
    }
}

fn require_str<'a>(details: &'a Value, key: &str) -> Result<&'a str, WardenError> {
    details
        .get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| WardenError::BusinessInvariantViolated(format!("details missing string `{key}`")))
}

async fn develop_skill(details: &Value) -> Result<Value, WardenError> {
    let skill_name = require_str(details, "skill_name")?;
    let approach = require_str(details, "approach")?;
    tracing::info!(skill_name, approach, "skill development initiated");
    Ok(json!({
        "skill_name": skill_name,
        "status": "initiated",
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

/// Stub transition only (validate -> running -> done); the real work for
/// a task is done by the scheduler's C6 path, never by this handler.
async fn work_on_task(details: &Value, ctx: &ActionContext) -> Result<Value, WardenError> {
    let task_id_str = require_str(details, "task_id")?;
    let task_id: Id = task_id_str
        .parse()
        .map_err(|_| WardenError::InputMalformed(format!("`{task_id_str}` is not a task id")))?;

    let tasks = TaskRepo::new(&ctx.pool);
    tasks.get(task_id).await?;
    tasks.mark_running(task_id).await?;
    tasks.finish(task_id, true, "delegated to the scheduler's task executor").await?;

    Ok(json!({ "task_id": task_id_str, "status": "done" }))
}

async fn meditate(details: &Value) -> Result<Value, WardenError> {
    let duration = details
        .get("duration")
        .and_then(Value::as_f64)
        .ok_or_else(|| WardenError::BusinessInvariantViolated("details missing numeric `duration`".into()))?;
    let slept = duration.max(0.0).min(600.0);
    tokio::time::sleep(Duration::from_secs_f64(slept)).await;
    Ok(json!({ "slept_secs": slept }))
}

async fn communicate(details: &Value, ctx: &ActionContext) -> Result<Value, WardenError> {
    let recipient = require_str(details, "recipient")?;
    let message = require_str(details, "message")?;
    let priority = require_str(details, "priority")?;

    let chat_ids: Vec<String> = if recipient == "master" {
        ctx.channels.operator_chat_ids.clone()
    } else {
        vec![recipient.to_string()]
    };
    if chat_ids.is_empty() {
        return Err(WardenError::BusinessInvariantViolated("no operator chat configured to communicate with".into()));
    }

    let prefixed = format!("[{}] {message}", priority.to_uppercase());
    for chat_id in &chat_ids {
        ctx.transport
            .send(chat_id, &prefixed, None)
            .await
            .map_err(|e| WardenError::TransientIo(e.to_string()))?;
    }

    Ok(json!({ "recipients": chat_ids, "message": prefixed }))
}

/// Sends a question to the operator, opens a placeholder approval (no
/// sibling `ReactiveJob` — `job_id` stays `None`, per the approval table's
/// dual use), and polls the durable row until it resolves or times out.
async fn ask_master(details: &Value, ctx: &ActionContext) -> Result<Value, WardenError> {
    let question = require_str(details, "question")?;
    let context = details.get("context").and_then(Value::as_str).unwrap_or("");

    let operator_chat_id = ctx
        .channels
        .operator_chat_ids
        .first()
        .ok_or_else(|| WardenError::BusinessInvariantViolated("no operator chat configured for ask_master".into()))?;

    let threads = ThreadRepo::new(&ctx.pool);
    let thread = threads.get_or_create(ctx.transport.platform(), operator_chat_id).await?;

    let proposal_text = if context.is_empty() { question.to_string() } else { format!("{question}\n\n{context}") };
    let approvals = ApprovalRepo::new(&ctx.pool);
    let approval = approvals.create(thread.id, None, &proposal_text).await?;

    ctx.transport
        .send(operator_chat_id, &proposal_text, None)
        .await
        .map_err(|e| WardenError::TransientIo(e.to_string()))?;

    let deadline = tokio::time::Instant::now() + Duration::from_secs(ctx.config.ask_master_timeout_secs);
    let resolution = loop {
        let current = approvals.get(approval.id).await?;
        if current.status != ApprovalStatus::Pending {
            break Some(current.status);
        }
        if tokio::time::Instant::now() >= deadline {
            break None;
        }
        tokio::time::sleep(Duration::from_secs(1)).await;
    };

    match resolution {
        Some(status) => Ok(json!({ "status": "answered", "resolution": status })),
        None => Ok(json!({ "status": "timeout" })),
    }
}

/// Sends a message with no implicit approval — the caller (the Decision
/// Engine's certainty gate) already decided this doesn't need one.
async fn proactive_outreach(details: &Value, ctx: &ActionContext) -> Result<Value, WardenError> {
    let chat_id = require_str(details, "chat_id")?;
    let message = require_str(details, "message")?;
    let purpose = require_str(details, "purpose")?;

    ctx.transport
        .send(chat_id, message, None)
        .await
        .map_err(|e| WardenError::TransientIo(e.to_string()))?;

    Ok(json!({ "chat_id": chat_id, "sent": true, "purpose": purpose }))
}
