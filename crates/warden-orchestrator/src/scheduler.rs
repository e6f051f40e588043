//! Proactive Scheduler (C7): the single cooperative loop driving everything
//! that is not a direct reaction to an inbound chat message. Each tick picks
//! exactly one of: wait out a rate-limit cooldown, meditate under budget
//! floor, run the next pending task, attend to a goal needing attention, or
//! ask the LLM for a decision and dispatch it.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::json;
use tokio::sync::{Mutex, Notify};
use tracing::{info, warn, Level};
use warden_channels::{ChannelsConfig, ChatTransport};
use warden_observability::{emit_event, ObservabilityEvent, ProcessKind};
use warden_providers::{ChatMessage, ProviderRegistry};
use warden_storage::{GoalRepo, Pool};
use warden_types::TokenScope;

use crate::actions::{dispatch, ActionContext};
use crate::budget::{proactive_status, BudgetStatus};
use crate::config::OrchestratorConfig;
use crate::decision::parse_decision;
use crate::memory::{record_aroma, record_cycle, recent_cycles, CycleSummary};
use crate::self_modification::restart_triggered;
use crate::task_executor::TaskExecutor;

const DECISION_SYSTEM_PROMPT: &str = "You are an autonomous agent deciding what to do next during an idle cycle. \
Reply with a single JSON object: {\"action\": \"develop_skill\"|\"work_on_task\"|\"communicate\"|\"meditate\"|\"ask_master\"|\"proactive_outreach\", \
\"certainty\": number between 0 and 1, \"significance\": number between 0 and 1, \"type\": \"internal\"|\"external\", \"details\": object}.";

/// Result of one scheduler tick, surfaced to tests and the composition root.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    RateLimited,
    Meditated,
    RanTask,
    AttendedGoal,
    Decided,
    RestartRequested,
}

pub struct ProactiveScheduler {
    pool: Arc<Pool>,
    providers: ProviderRegistry,
    transport: Arc<dyn ChatTransport>,
    channels: ChannelsConfig,
    config: OrchestratorConfig,
    wake: Arc<Notify>,
    rate_limit_until: Mutex<Option<DateTime<Utc>>>,
}

impl ProactiveScheduler {
    pub fn new(
        pool: Arc<Pool>,
        providers: ProviderRegistry,
        transport: Arc<dyn ChatTransport>,
        channels: ChannelsConfig,
        config: OrchestratorConfig,
        wake: Arc<Notify>,
    ) -> Self {
        Self { pool, providers, transport, channels, config, wake, rate_limit_until: Mutex::new(None) }
    }

    /// Runs forever until a self-modification restart is detected, at which
    /// point the scheduler exits cleanly and the process supervisor is
    /// expected to relaunch the binary.
    pub async fn run(self: Arc<Self>) {
        loop {
            match self.tick().await {
                Ok(TickOutcome::RestartRequested) => {
                    info!("proactive scheduler exiting for self-modification restart");
                    return;
                }
                Ok(outcome) => {
                    let interval = self.next_interval().await;
                    info!(?outcome, interval_secs = interval.as_secs(), "proactive cycle complete");
                    tokio::select! {
                        _ = self.wake.notified() => {}
                        _ = tokio::time::sleep(interval) => {}
                    }
                }
                Err(e) => {
                    warn!(error = %e, "proactive cycle failed");
                    tokio::time::sleep(Duration::from_secs(self.config.scheduler_min_interval_secs)).await;
                }
            }
        }
    }

    async fn tick(&self) -> Result<TickOutcome, warden_types::WardenError> {
        if let Some(until) = *self.rate_limit_until.lock().await {
            if Utc::now() < until {
                let remaining = (until - Utc::now()).num_seconds().max(0);
                tokio::time::sleep(Duration::from_secs(remaining as u64)).await;
                self.notify_operator(&format!("Rate limit cooldown lifted at {until}.")).await;
            }
            *self.rate_limit_until.lock().await = None;
        }

        let budget = proactive_status(&self.pool, &self.config).await?;
        if budget.remaining <= self.config.proactive_budget_floor {
            self.notify_operator(&format!(
                "Proactive budget floor reached ({} of {} remaining); meditating.",
                budget.remaining, budget.limit
            ))
            .await;
            record_cycle(&self.pool, CycleSummary {
                action: "meditate".into(),
                certainty: 1.0,
                significance: 0.0,
                result_status: "budget_floor".into(),
                result_summary: "under budget floor".into(),
            })
            .await?;
            return Ok(TickOutcome::Meditated);
        }

        let executor = TaskExecutor::new(self.pool.clone(), self.providers.clone(), self.config.clone());
        if let Some(result) = executor.run_next().await? {
            if result.restart_requested {
                self.announce_restart().await;
                return Ok(TickOutcome::RestartRequested);
            }
            if let Some(goal_id) = result.goal_id {
                self.notify_if_goal_needs_attention(goal_id).await?;
            }
            record_cycle(&self.pool, CycleSummary {
                action: "work_on_task".into(),
                certainty: 1.0,
                significance: 0.0,
                result_status: format!("{:?}", result.status),
                result_summary: result.summary,
            })
            .await?;
            return Ok(TickOutcome::RanTask);
        }

        if self.attend_to_goals_needing_attention().await? {
            return Ok(TickOutcome::AttendedGoal);
        }

        self.decide_and_dispatch(&budget).await
    }

    async fn attend_to_goals_needing_attention(&self) -> Result<bool, warden_types::WardenError> {
        let goals = GoalRepo::new(&self.pool).active().await?;
        for goal in goals {
            if goal.needs_attention() {
                let verdict = if goal.failed_tasks > 0 { "has failures" } else { "is ready for verification" };
                self.notify_operator(&format!("Goal \"{}\" {verdict}.", goal.title)).await;
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn notify_if_goal_needs_attention(&self, goal_id: uuid::Uuid) -> Result<(), warden_types::WardenError> {
        let goal = GoalRepo::new(&self.pool).get(goal_id).await?;
        if goal.needs_attention() {
            let verdict = if goal.failed_tasks > 0 { "has failures" } else { "just became verifiable" };
            self.notify_operator(&format!("Goal \"{}\" {verdict}.", goal.title)).await;
        }
        Ok(())
    }

    async fn decide_and_dispatch(&self, budget: &BudgetStatus) -> Result<TickOutcome, warden_types::WardenError> {
        let prompt = self.build_proactive_prompt(budget).await?;
        let provider = self.providers.classifier();
        let call = provider.call(DECISION_SYSTEM_PROMPT, &[ChatMessage::user(prompt)], 512, Duration::from_secs(60)).await;

        let completion = match call {
            Ok(c) => c,
            Err(warden_providers::ProviderError::RateLimited { reset_at }) => {
                let until = reset_at.unwrap_or_else(|| Utc::now() + chrono::Duration::seconds(self.config.rate_limit_default_cooldown_secs as i64));
                *self.rate_limit_until.lock().await = Some(until);
                self.notify_operator(&format!("Rate limited; cooling down until {until}.")).await;
                return Ok(TickOutcome::RateLimited);
            }
            Err(e) => {
                warn!(error = %e, "proactive decision call failed");
                return Ok(TickOutcome::Meditated);
            }
        };
        warden_storage::LedgerRepo::new(&self.pool)
            .record(TokenScope::Proactive, provider.id(), completion.usage.input as i64, completion.usage.output as i64, json!({ "stage": "decide" }))
            .await?;

        let decision = match parse_decision(&completion.text) {
            Ok(d) => d,
            Err(e) => {
                warn!(error = %e, "failed to parse proactive decision, skipping cycle");
                return Ok(TickOutcome::Meditated);
            }
        };

        if !decision.is_autonomous() {
            let summary = format!(
                "Proposed action `{}` (certainty {:.2}). Details: {}",
                decision.action.as_str(),
                decision.certainty,
                decision.details
            );
            self.notify_operator(&summary).await;
            record_cycle(&self.pool, CycleSummary {
                action: decision.action.as_str().into(),
                certainty: decision.certainty,
                significance: decision.significance,
                result_status: "approval_pending".into(),
                result_summary: summary,
            })
            .await?;
            return Ok(TickOutcome::Decided);
        }

        let ctx = ActionContext {
            pool: self.pool.clone(),
            transport: self.transport.clone(),
            channels: self.channels.clone(),
            config: self.config.clone(),
        };
        let outcome = dispatch(decision.action, &decision.details, &ctx).await;
        let (status, summary) = match &outcome {
            Ok(value) => ("done".to_string(), value.to_string()),
            Err(e) => ("error".to_string(), e.to_string()),
        };

        if decision.is_notable() {
            self.notify_operator(&format!("Executed `{}` autonomously: {summary}", decision.action.as_str())).await;
        }

        record_cycle(&self.pool, CycleSummary {
            action: decision.action.as_str().into(),
            certainty: decision.certainty,
            significance: decision.significance,
            result_status: status,
            result_summary: summary.clone(),
        })
        .await?;
        record_aroma(&self.pool, decision.action.as_str(), &summary).await?;

        Ok(TickOutcome::Decided)
    }

    async fn build_proactive_prompt(&self, budget: &BudgetStatus) -> Result<String, warden_types::WardenError> {
        let recent = recent_cycles(&self.pool, crate::memory::DEFAULT_RECENT_LIMIT).await?;
        Ok(format!(
            "Budget: {}/{} tokens used today (ratio {:.2}).\nRecent cycles: {}\nWhat should you do next?",
            budget.used_today, budget.limit, budget.ratio, json!(recent)
        ))
    }

    async fn notify_operator(&self, text: &str) {
        for chat_id in &self.channels.operator_chat_ids {
            if let Err(e) = self.transport.send(chat_id, text, None).await {
                warn!(error = %e, "failed to notify operator");
            }
        }
        emit_event(
            Level::INFO,
            ProcessKind::ProactiveScheduler,
            ObservabilityEvent {
                event: "operator_notified",
                component: "proactive_scheduler",
                correlation_id: None,
                session_id: None,
                run_id: None,
                message_id: None,
                provider_id: None,
                model_id: None,
                status: None,
                error_code: None,
                detail: Some(text),
            },
        );
    }

    async fn announce_restart(&self) {
        self.notify_operator("Self-modification detected; restarting shortly.").await;
        tokio::time::sleep(Duration::from_secs(self.config.restart_delay_secs)).await;
    }

    /// Dynamic interval function (§4.7), piecewise by today's proactive
    /// budget-utilization ratio `u`.
    async fn next_interval(&self) -> Duration {
        let status = match proactive_status(&self.pool, &self.config).await {
            Ok(s) => s,
            Err(_) => return Duration::from_secs(self.config.scheduler_min_interval_secs),
        };
        let min = self.config.scheduler_min_interval_secs as f64;
        let max = self.config.scheduler_max_interval_secs as f64;
        let u = status.ratio.clamp(0.0, 1.0);

        let seconds = if u < 0.5 {
            min + (300.0 - min) * u
        } else if u < 0.8 {
            300.0 + (1800.0 - 300.0) * (u - 0.5) / 0.3
        } else {
            1800.0 + (max - 1800.0) * (u - 0.8) / 0.2
        };

        Duration::from_secs_f64(seconds.clamp(min, max))
    }
}

/// Pure helper kept standalone so it is unit-testable without a database:
/// recomputes the dynamic interval for a given ratio and bounds.
pub fn dynamic_interval_secs(ratio: f64, min: f64, max: f64) -> f64 {
    let u = ratio.clamp(0.0, 1.0);
    let seconds = if u < 0.5 {
        min + (300.0 - min) * u
    } else if u < 0.8 {
        300.0 + (1800.0 - 300.0) * (u - 0.5) / 0.3
    } else {
        1800.0 + (max - 1800.0) * (u - 0.8) / 0.2
    };
    seconds.clamp(min, max)
}

/// Self-modification digest comparison, exposed at module level for the
/// composition root to call once at boot if it wants a baseline; the
/// scheduler itself always compares per-attempt via the task executor.
pub fn source_changed(before_hash: &str, after_hash: &str) -> bool {
    restart_triggered(before_hash, after_hash, false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dynamic_interval_is_short_at_low_utilization() {
        let secs = dynamic_interval_secs(0.1, 60.0, 3600.0);
        assert!(secs > 60.0 && secs < 300.0);
    }

    #[test]
    fn dynamic_interval_grows_in_the_middle_band() {
        let secs = dynamic_interval_secs(0.65, 60.0, 3600.0);
        assert!(secs > 300.0 && secs < 1800.0);
    }

    #[test]
    fn dynamic_interval_saturates_near_the_daily_limit() {
        let secs = dynamic_interval_secs(0.99, 60.0, 3600.0);
        assert!(secs > 1800.0 && secs <= 3600.0);
    }

    #[test]
    fn dynamic_interval_clamps_to_configured_bounds() {
        assert_eq!(dynamic_interval_secs(0.0, 60.0, 3600.0), 60.0);
        assert_eq!(dynamic_interval_secs(1.0, 60.0, 3600.0), 3600.0);
    }
}
