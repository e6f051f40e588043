//! Task/Goal Executor (C6): runs one task per call through the executor
//! backend, handles decomposition and goal verification, and applies the
//! parent-completion cascade and self-modification restart signal.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;
use warden_core::json_extract::extract_first_json_object;
use warden_providers::{ChatMessage, ProviderRegistry};
use warden_storage::{GoalRepo, LedgerRepo, Pool, TaskRepo};
use warden_types::{Id, PersistError, Priority, Task, TaskSource, TaskStatus, TokenScope, WardenError};

use crate::config::OrchestratorConfig;
use crate::self_modification::{hash_source_tree, restart_triggered};

const EXECUTOR_SYSTEM_PROMPT: &str = "You are an autonomous agent working through a task queue. \
Do the work described and reply with your output. If the task is large enough to benefit from being \
split up, you may instead reply with a JSON object {\"decompose\": true, \"subtasks\": [{\"title\": string, \
\"description\": string, \"goal_criteria\": string}, ...]} containing at least two subtasks.";

const VERIFY_SYSTEM_PROMPT: &str =
    "You verify whether a completed task's output satisfies its stated goal criteria. Reply with YES or NO \
on the first line, followed by a short justification.";

#[derive(Debug, Deserialize)]
struct SubtaskDraft {
    title: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    goal_criteria: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DecompositionBlock {
    #[serde(default)]
    decompose: bool,
    #[serde(default)]
    subtasks: Vec<SubtaskDraft>,
}

#[derive(Debug, Clone)]
pub struct TaskRunResult {
    pub task_id: Id,
    pub goal_id: Option<Id>,
    pub status: TaskStatus,
    pub restart_requested: bool,
    pub summary: String,
}

pub struct TaskExecutor {
    pool: Arc<Pool>,
    providers: ProviderRegistry,
    config: OrchestratorConfig,
}

impl TaskExecutor {
    pub fn new(pool: Arc<Pool>, providers: ProviderRegistry, config: OrchestratorConfig) -> Self {
        Self { pool, providers, config }
    }

    /// Picks and runs the next pending task (§4.6's selection rule, already
    /// implemented by `TaskRepo::next_pending`). Returns `None` when the
    /// queue is empty.
    pub async fn run_next(&self) -> Result<Option<TaskRunResult>, WardenError> {
        let tasks = TaskRepo::new(&self.pool);
        let Some(task) = tasks.next_pending().await? else {
            return Ok(None);
        };
        Ok(Some(self.run_task(task).await?))
    }

    async fn run_task(&self, task: Task) -> Result<TaskRunResult, WardenError> {
        let tasks = TaskRepo::new(&self.pool);
        tasks.mark_running(task.id).await?;

        let before_hash = hash_source_tree(&self.config.source_root);
        let prompt = build_task_prompt(&task);
        let provider = self.providers.executor();
        let call = provider
            .call(EXECUTOR_SYSTEM_PROMPT, &[ChatMessage::user(prompt)], 1536, Duration::from_secs(self.config.task_attempt_timeout_secs))
            .await;

        let completion = match call {
            Ok(c) => c,
            Err(e) => {
                let status = tasks.finish(task.id, false, &format!("executor error: {e}")).await?;
                self.apply_terminal_outcome(&task, status).await?;
                return Ok(TaskRunResult {
                    task_id: task.id,
                    goal_id: task.goal_id,
                    status,
                    restart_requested: false,
                    summary: e.to_string(),
                });
            }
        };
        self.record_usage(provider.id(), completion.usage.input, completion.usage.output, "execute", task.id).await;

        let after_hash = hash_source_tree(&self.config.source_root);
        let structured = extract_first_json_object(&completion.text);
        let explicit_restart =
            structured.as_ref().and_then(|v| v.get("restart_requested")).and_then(Value::as_bool).unwrap_or(false);
        let restart_requested = restart_triggered(&before_hash, &after_hash, explicit_restart);

        if task.depth == 0 {
            if let Some(drafts) = structured.as_ref().and_then(parse_decomposition) {
                self.create_subtasks(&task, &drafts).await?;
                let titles = drafts.iter().map(|d| d.title.as_str()).collect::<Vec<_>>().join(", ");
                let last_result = format!("Decomposed into {} subtasks: {titles}", drafts.len());
                tasks.revert_to_pending(task.id, &last_result).await?;
                return Ok(TaskRunResult {
                    task_id: task.id,
                    goal_id: task.goal_id,
                    status: TaskStatus::Pending,
                    restart_requested,
                    summary: last_result,
                });
            }
        }

        let output = structured
            .as_ref()
            .and_then(|v| v.get("output"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| completion.text.clone());
        let backend_succeeded = structured
            .as_ref()
            .and_then(|v| v.get("success"))
            .and_then(Value::as_bool)
            .unwrap_or(true);

        let (succeeded, result_text) = if !backend_succeeded {
            (false, output)
        } else if let Some(criteria) = &task.goal_criteria {
            let achieved = self.verify_goal(&task, &output, criteria).await?;
            if achieved {
                (true, output)
            } else {
                (false, format!("goal criteria not met: {criteria}"))
            }
        } else {
            (true, output)
        };

        let status = tasks.finish(task.id, succeeded, &result_text).await?;
        self.apply_terminal_outcome(&task, status).await?;

        Ok(TaskRunResult { task_id: task.id, goal_id: task.goal_id, status, restart_requested, summary: result_text })
    }

    /// Applies goal-counter bookkeeping and the parent-completion cascade
    /// once a task reaches a terminal status.
    async fn apply_terminal_outcome(&self, task: &Task, status: TaskStatus) -> Result<(), WardenError> {
        match status {
            TaskStatus::Completed | TaskStatus::Failed => {
                if let Some(goal_id) = task.goal_id {
                    GoalRepo::new(&self.pool).record_task_outcome(goal_id, status == TaskStatus::Completed).await?;
                }
                if let Some(parent_id) = task.parent_id {
                    self.cascade_complete_parent(parent_id).await?;
                }
                Ok(())
            }
            TaskStatus::Pending | TaskStatus::Running => Ok(()),
        }
    }

    /// Completes `parent_id` once none of its children are pending/running
    /// anymore, then walks up to the grandparent and so on (§4.6).
    async fn cascade_complete_parent(&self, mut parent_id: Id) -> Result<(), WardenError> {
        let tasks = TaskRepo::new(&self.pool);
        loop {
            let children = tasks.children(parent_id).await?;
            if children.iter().any(|c| matches!(c.status, TaskStatus::Pending | TaskStatus::Running)) {
                return Ok(());
            }
            let parent = tasks.get(parent_id).await?;
            let result = format!("All {} subtasks completed.", children.len());
            let status = tasks.finish(parent_id, true, &result).await?;
            if let Some(goal_id) = parent.goal_id {
                GoalRepo::new(&self.pool).record_task_outcome(goal_id, status == TaskStatus::Completed).await?;
            }
            match parent.parent_id {
                Some(next) => parent_id = next,
                None => return Ok(()),
            }
        }
    }

    async fn create_subtasks(&self, parent: &Task, drafts: &[SubtaskDraft]) -> Result<(), PersistError> {
        let tasks = TaskRepo::new(&self.pool);
        for (index, draft) in drafts.iter().enumerate() {
            let subtask = Task {
                id: Id::new_v4(),
                title: draft.title.clone(),
                description: draft.description.clone().unwrap_or_default(),
                priority: parent.priority,
                status: TaskStatus::Pending,
                source: parent.source,
                goal_criteria: draft.goal_criteria.clone(),
                attempts: 0,
                max_attempts: Task::DEFAULT_MAX_ATTEMPTS,
                last_result: None,
                parent_id: Some(parent.id),
                order_index: index as i64,
                depth: parent.depth + 1,
                goal_id: parent.goal_id,
                created_at: chrono::Utc::now(),
                started_at: None,
                completed_at: None,
            };
            tasks.insert(&subtask).await?;
        }
        Ok(())
    }

    /// Second, cheap LLM call ("verifier") deciding whether a task's
    /// output satisfies its `goal_criteria`.
    async fn verify_goal(&self, task: &Task, output: &str, criteria: &str) -> Result<bool, WardenError> {
        let provider = self.providers.verifier();
        let prompt = format!(
            "Task: {}\nGoal criteria: {criteria}\nOutput produced:\n{output}\n\nWas the goal criteria satisfied?",
            task.title
        );
        let result = provider
            .call(VERIFY_SYSTEM_PROMPT, &[ChatMessage::user(prompt)], 128, Duration::from_secs(self.config.task_attempt_timeout_secs))
            .await
            .map_err(|e| WardenError::TransientIo(e.to_string()))?;
        self.record_usage(provider.id(), result.usage.input, result.usage.output, "verify", task.id).await;
        Ok(parse_yes_no(&result.text))
    }

    async fn record_usage(&self, provider_id: &str, input: u64, output: u64, stage: &str, task_id: Id) {
        let ledger = LedgerRepo::new(&self.pool);
        let meta = serde_json::json!({ "task_id": task_id.to_string(), "stage": stage });
        if let Err(e) = ledger.record(TokenScope::Proactive, provider_id, input as i64, output as i64, meta).await {
            tracing::warn!(error = %e, "failed to record token usage");
        }
    }
}

fn build_task_prompt(task: &Task) -> String {
    format!(
        "Title: {}\nDescription: {}\nPriority: {:?}\nSource: {:?}\nAttempt: {} of {}\nGoal criteria: {}\nLast result: {}",
        task.title,
        task.description,
        task.priority,
        task.source,
        task.attempts + 1,
        task.max_attempts,
        task.goal_criteria.as_deref().unwrap_or("none"),
        task.last_result.as_deref().unwrap_or("none"),
    )
}

fn parse_decomposition(value: &Value) -> Option<Vec<SubtaskDraft>> {
    let block: DecompositionBlock = serde_json::from_value(value.clone()).ok()?;
    if block.decompose && block.subtasks.len() >= 2 {
        Some(block.subtasks)
    } else {
        None
    }
}

/// Robust YES/NO parse (§4.6): a leading `YES`/`NO` on the first line
/// wins; otherwise fall back to whichever token appears more often.
fn parse_yes_no(text: &str) -> bool {
    let first_line = text.lines().next().unwrap_or("").trim().to_uppercase();
    if first_line.starts_with("YES") {
        return true;
    }
    if first_line.starts_with("NO") {
        return false;
    }
    let lower = text.to_lowercase();
    lower.matches("yes").count() > lower.matches("no").count()
}
