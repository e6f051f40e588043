//! Chat ingestion (C2) and outbound transport (§6.1/§6.2). Inbound updates
//! arrive as webhook payloads (the HTTP surface lives in `warden-server`);
//! this crate normalizes them, runs the five-step ingestion pipeline, and
//! speaks the outbound send/edit/react protocol back to the platform.

pub mod config;
pub mod ingest;
pub mod model;
pub mod telegram;
pub mod transport;

pub use config::ChannelsConfig;
pub use ingest::{ApprovalNotifier, Ingestion};
pub use model::{ChannelUpdate, InboundAttachment, InboundCallback, InboundMessage};
pub use transport::{split_message, ChatTransport};
