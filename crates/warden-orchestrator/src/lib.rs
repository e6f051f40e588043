//! The proactive half of the runtime (§4.6–§4.11): the priority+hierarchy
//! task/goal executor, the budget-throttled scheduler loop, the decision
//! engine that turns an idle-cycle LLM reply into a gated action, the six
//! action handlers it dispatches to, append-only memory, and the token
//! ledger both loops write through. The reactive half lives in `warden-core`.

pub mod actions;
pub mod budget;
pub mod config;
pub mod decision;
pub mod memory;
pub mod scheduler;
pub mod self_modification;
pub mod task_executor;

pub use actions::{dispatch, ActionContext};
pub use budget::{proactive_status, remaining, BudgetStatus};
pub use config::OrchestratorConfig;
pub use decision::{parse_decision, Action, Decision, DecisionType};
pub use memory::{record_aroma, record_cycle, recent_aroma, recent_cycles, CycleSummary};
pub use scheduler::{ProactiveScheduler, TickOutcome};
pub use self_modification::{hash_source_tree, restart_triggered};
pub use task_executor::{TaskExecutor, TaskRunResult};
