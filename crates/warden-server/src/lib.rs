//! HTTP Surface (C12): webhook ingestion plus a handful of operator-facing
//! endpoints. Everything else (the reactive state machine, the proactive
//! scheduler) runs as a separate long-lived task in the same process — this
//! crate only terminates inbound HTTP and answers read/admin queries.

use std::sync::Arc;

use tokio::sync::Notify;
use warden_channels::{ApprovalNotifier, ChannelsConfig, ChatTransport, Ingestion};
use warden_storage::Pool;

mod http;

pub use http::serve;

/// Shared state every handler reads from. Cheap to clone — every field is
/// an `Arc` or a small value type, mirroring the source project's
/// `AppState` shape.
#[derive(Clone)]
pub struct AppState {
    pub pool: Arc<Pool>,
    pub transport: Arc<dyn ChatTransport>,
    pub channels: ChannelsConfig,
    pub ingestion: Arc<Ingestion>,
}

impl AppState {
    pub fn new(
        pool: Arc<Pool>,
        transport: Arc<dyn ChatTransport>,
        channels: ChannelsConfig,
        wake: Arc<Notify>,
        approval_notifier: Arc<dyn ApprovalNotifier>,
    ) -> Self {
        let ingestion = Arc::new(Ingestion::new(pool.clone(), transport.clone(), wake, approval_notifier));
        Self { pool, transport, channels, ingestion }
    }
}
