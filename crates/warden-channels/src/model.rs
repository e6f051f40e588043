//! Normalized shape of an inbound webhook update (§6.1), independent of the
//! platform-specific JSON it was parsed from. `telegram::parse_update` is
//! the only thing that knows Telegram's wire format; everything downstream
//! of this module works with `ChannelUpdate`.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use warden_types::ArtifactKind;

/// An attachment on an inbound message, already classified to the
/// extraction backend (C5) that will process it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundAttachment {
    pub kind: ArtifactKind,
    /// Platform file reference (Telegram `file_id`) needed to download the
    /// blob later; opaque to this crate.
    pub file_ref: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    pub external_chat_id: String,
    pub external_message_id: String,
    pub author_id: Option<String>,
    pub text: Option<String>,
    #[serde(default)]
    pub attachments: Vec<InboundAttachment>,
    /// The full platform payload, preserved for `Message::raw_payload`.
    pub raw: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundCallback {
    pub external_chat_id: String,
    pub callback_query_id: String,
    /// The button's `callback_data`, e.g. `"approval:<uuid>"`.
    pub data: String,
    /// Message id of the prompt the button is attached to, so it can be
    /// edited (reply markup cleared) once resolved.
    pub prompt_message_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum ChannelUpdate {
    Message(InboundMessage),
    Callback(InboundCallback),
    /// Recognized by the platform but nothing this runtime acts on (e.g. a
    /// channel post edit, a poll answer). Ingestion drops these silently.
    Ignored,
}
