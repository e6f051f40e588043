//! Telegram adapter. Inbound updates arrive over the webhook `warden-server`
//! terminates (`POST /webhook/telegram`, per §6.1) and are normalized by
//! `parse_update`; this module's `TelegramTransport` only speaks the
//! outbound half of the Bot API (`sendMessage`/`editMessageText`/
//! `editMessageReplyMarkup`/`answerCallbackQuery`/`setMessageReaction`).

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use tracing::warn;
use warden_types::ArtifactKind;

use crate::model::{ChannelUpdate, InboundAttachment, InboundCallback, InboundMessage};
use crate::transport::{split_message, ChatTransport, MAX_MESSAGE_CHARS};

const TELEGRAM_API: &str = "https://api.telegram.org/bot";

pub struct TelegramTransport {
    bot_token: String,
    client: Client,
}

impl TelegramTransport {
    pub fn new(bot_token: impl Into<String>) -> Self {
        Self {
            bot_token: bot_token.into(),
            client: Client::builder().timeout(Duration::from_secs(15)).build().expect("reqwest client"),
        }
    }

    fn api_url(&self, method: &str) -> String {
        format!("{}{}/{}", TELEGRAM_API, self.bot_token, method)
    }

    async fn post(&self, method: &str, body: Value) -> anyhow::Result<Value> {
        let resp = self.client.post(self.api_url(method)).json(&body).send().await?;
        let status = resp.status();
        let payload: Value = resp.json().await.unwrap_or(Value::Null);
        if !status.is_success() || payload.get("ok").and_then(Value::as_bool) == Some(false) {
            warn!(method, %status, ?payload, "telegram api call failed");
            anyhow::bail!("telegram {method} failed: {status}");
        }
        Ok(payload)
    }
}

#[async_trait]
impl ChatTransport for TelegramTransport {
    fn platform(&self) -> &str {
        "telegram"
    }

    async fn send(&self, chat_id: &str, text: &str, reply_markup: Option<Value>) -> anyhow::Result<String> {
        let chunks = split_message(text, MAX_MESSAGE_CHARS);
        let mut last_id = String::new();
        let last_index = chunks.len().saturating_sub(1);
        for (i, chunk) in chunks.into_iter().enumerate() {
            let mut body = serde_json::json!({ "chat_id": chat_id, "text": chunk });
            // Only the final chunk carries the reply markup (approval buttons
            // belong on the message the reply is attached to).
            if i == last_index {
                if let Some(markup) = &reply_markup {
                    body["reply_markup"] = markup.clone();
                }
            }
            let resp = self.post("sendMessage", body).await?;
            if let Some(id) = resp["result"]["message_id"].as_i64() {
                last_id = id.to_string();
            }
        }
        Ok(last_id)
    }

    async fn edit_text(&self, chat_id: &str, message_id: &str, text: &str) -> anyhow::Result<()> {
        let body = serde_json::json!({ "chat_id": chat_id, "message_id": message_id, "text": text });
        self.post("editMessageText", body).await?;
        Ok(())
    }

    async fn edit_reply_markup(&self, chat_id: &str, message_id: &str, markup: Option<Value>) -> anyhow::Result<()> {
        let body = serde_json::json!({
            "chat_id": chat_id,
            "message_id": message_id,
            "reply_markup": markup.unwrap_or_else(|| serde_json::json!({"inline_keyboard": []})),
        });
        self.post("editMessageReplyMarkup", body).await?;
        Ok(())
    }

    async fn answer_callback_query(&self, callback_query_id: &str, text: Option<&str>) -> anyhow::Result<()> {
        let mut body = serde_json::json!({ "callback_query_id": callback_query_id });
        if let Some(text) = text {
            body["text"] = Value::String(text.to_string());
        }
        self.post("answerCallbackQuery", body).await?;
        Ok(())
    }

    async fn set_reaction(&self, chat_id: &str, message_id: &str, reaction: &str) -> anyhow::Result<()> {
        let body = serde_json::json!({
            "chat_id": chat_id,
            "message_id": message_id,
            "reaction": [{"type": "emoji", "emoji": reaction}],
        });
        self.post("setMessageReaction", body).await?;
        Ok(())
    }
}

/// Normalizes a raw Telegram webhook update into a `ChannelUpdate`. Unknown
/// or irrelevant updates (channel posts, poll answers, edited messages
/// without new content) come back as `ChannelUpdate::Ignored`.
pub fn parse_update(body: &Value) -> anyhow::Result<ChannelUpdate> {
    if let Some(callback) = body.get("callback_query") {
        let data = callback.get("data").and_then(Value::as_str).unwrap_or_default().to_string();
        let callback_query_id = callback.get("id").and_then(Value::as_str).unwrap_or_default().to_string();
        let chat_id = callback["message"]["chat"]["id"].as_i64().map(|i| i.to_string()).unwrap_or_default();
        let prompt_message_id = callback["message"]["message_id"].as_i64().map(|i| i.to_string());
        return Ok(ChannelUpdate::Callback(InboundCallback {
            external_chat_id: chat_id,
            callback_query_id,
            data,
            prompt_message_id,
        }));
    }

    let Some(msg) = body.get("message") else {
        return Ok(ChannelUpdate::Ignored);
    };

    let external_chat_id = msg["chat"]["id"].as_i64().map(|i| i.to_string()).unwrap_or_default();
    let external_message_id = msg["message_id"].as_i64().map(|i| i.to_string()).unwrap_or_default();
    let author_id = msg["from"]["id"].as_i64().map(|i| i.to_string());
    let text = msg.get("text").and_then(Value::as_str).map(str::to_string);
    let caption = msg.get("caption").and_then(Value::as_str).map(str::to_string);

    let mut attachments = Vec::new();
    if let Some(photos) = msg.get("photo").and_then(Value::as_array) {
        if let Some(largest) = photos.last() {
            if let Some(file_id) = largest.get("file_id").and_then(Value::as_str) {
                attachments.push(InboundAttachment { kind: ArtifactKind::ImageJson, file_ref: file_id.to_string() });
            }
        }
    }
    if let Some(file_id) = msg.get("voice").and_then(|v| v["file_id"].as_str()) {
        attachments.push(InboundAttachment { kind: ArtifactKind::VoiceTranscript, file_ref: file_id.to_string() });
    }
    if let Some(file_id) = msg.get("audio").and_then(|v| v["file_id"].as_str()) {
        attachments.push(InboundAttachment { kind: ArtifactKind::VoiceTranscript, file_ref: file_id.to_string() });
    }
    if let Some(file_id) = msg.get("video_note").and_then(|v| v["file_id"].as_str()) {
        attachments.push(InboundAttachment { kind: ArtifactKind::VoiceTranscript, file_ref: file_id.to_string() });
    }
    if let Some(doc) = msg.get("document") {
        if let Some(file_id) = doc["file_id"].as_str() {
            let ocr_extensions = [".pdf", ".doc", ".docx", ".txt", ".rtf"];
            let name = doc["file_name"].as_str().unwrap_or_default().to_lowercase();
            let kind = if ocr_extensions.iter().any(|ext| name.ends_with(ext)) {
                ArtifactKind::OcrText
            } else {
                ArtifactKind::FileMeta
            };
            attachments.push(InboundAttachment { kind, file_ref: file_id.to_string() });
        }
    }
    if let Some(file_id) = msg.get("video").and_then(|v| v["file_id"].as_str()) {
        attachments.push(InboundAttachment { kind: ArtifactKind::FileMeta, file_ref: file_id.to_string() });
    }

    if text.is_none() && caption.is_none() && attachments.is_empty() {
        return Ok(ChannelUpdate::Ignored);
    }

    Ok(ChannelUpdate::Message(InboundMessage {
        external_chat_id,
        external_message_id,
        author_id,
        text: text.or(caption),
        attachments,
        raw: msg.clone(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_plain_text_message() {
        let update = serde_json::json!({
            "update_id": 1,
            "message": {
                "message_id": 10,
                "chat": {"id": 555},
                "from": {"id": 99},
                "text": "hello there",
            }
        });
        let parsed = parse_update(&update).unwrap();
        match parsed {
            ChannelUpdate::Message(m) => {
                assert_eq!(m.external_chat_id, "555");
                assert_eq!(m.text.as_deref(), Some("hello there"));
                assert!(m.attachments.is_empty());
            }
            other => panic!("expected Message, got {other:?}"),
        }
    }

    #[test]
    fn parses_a_callback_query() {
        let update = serde_json::json!({
            "update_id": 2,
            "callback_query": {
                "id": "cbq1",
                "data": "approval:abc",
                "message": {"message_id": 42, "chat": {"id": 555}},
            }
        });
        let parsed = parse_update(&update).unwrap();
        match parsed {
            ChannelUpdate::Callback(c) => {
                assert_eq!(c.data, "approval:abc");
                assert_eq!(c.prompt_message_id.as_deref(), Some("42"));
            }
            other => panic!("expected Callback, got {other:?}"),
        }
    }

    #[test]
    fn classifies_a_photo_attachment() {
        let update = serde_json::json!({
            "update_id": 3,
            "message": {
                "message_id": 11,
                "chat": {"id": 555},
                "from": {"id": 99},
                "caption": "look at this",
                "photo": [{"file_id": "small"}, {"file_id": "large"}],
            }
        });
        let parsed = parse_update(&update).unwrap();
        match parsed {
            ChannelUpdate::Message(m) => {
                assert_eq!(m.attachments.len(), 1);
                assert_eq!(m.attachments[0].kind, ArtifactKind::ImageJson);
                assert_eq!(m.attachments[0].file_ref, "large");
            }
            other => panic!("expected Message, got {other:?}"),
        }
    }

    #[test]
    fn empty_update_is_ignored() {
        let update = serde_json::json!({"update_id": 4, "channel_post": {"message_id": 1}});
        assert!(matches!(parse_update(&update).unwrap(), ChannelUpdate::Ignored));
    }
}
