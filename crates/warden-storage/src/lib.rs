//! Typed SQLite repositories backing the durable job/approval/task state
//! machines (C1). Callers go through `Pool` + one repository per entity
//! rather than hand-writing SQL at the call site.

pub mod approvals;
pub mod artifacts;
mod codec;
pub mod deployments;
mod err;
pub mod goals;
pub mod jobs;
pub mod ledger;
pub mod memory;
pub mod messages;
pub mod pool;
mod schema;
pub mod tasks;
pub mod threads;

pub use approvals::ApprovalRepo;
pub use artifacts::ArtifactRepo;
pub use codec::today_midnight_utc;
pub use deployments::DeploymentRepo;
pub use goals::GoalRepo;
pub use jobs::JobRepo;
pub use ledger::LedgerRepo;
pub use memory::{MemoryEntry, MemoryKind, MemoryRepo};
pub use messages::MessageRepo;
pub use pool::{Pool, PooledConnection};
pub use tasks::TaskRepo;
pub use threads::ThreadRepo;
