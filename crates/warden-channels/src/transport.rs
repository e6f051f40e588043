//! Outbound side of §6.2: a platform-agnostic `ChatTransport` contract plus
//! the 4096-character message splitter every implementation shares.

use async_trait::async_trait;
use serde_json::Value;

/// Telegram's hard per-message character cap; other platforms' limits are
/// higher, so this is the conservative default `split_message` uses.
pub const MAX_MESSAGE_CHARS: usize = 4096;

#[async_trait]
pub trait ChatTransport: Send + Sync {
    fn platform(&self) -> &str;

    /// Sends `text`, splitting into multiple messages at safe breakpoints
    /// if it exceeds the platform limit. Returns the id of the *last* sent
    /// message (the one `edit_text`/`edit_reply_markup` should target).
    async fn send(&self, chat_id: &str, text: &str, reply_markup: Option<Value>) -> anyhow::Result<String>;

    async fn edit_text(&self, chat_id: &str, message_id: &str, text: &str) -> anyhow::Result<()>;

    async fn edit_reply_markup(&self, chat_id: &str, message_id: &str, markup: Option<Value>) -> anyhow::Result<()>;

    async fn answer_callback_query(&self, callback_query_id: &str, text: Option<&str>) -> anyhow::Result<()>;

    async fn set_reaction(&self, chat_id: &str, message_id: &str, reaction: &str) -> anyhow::Result<()>;
}

/// Splits `text` into chunks of at most `limit` characters, preferring to
/// break on a paragraph boundary, then a sentence boundary, then a space,
/// falling back to a hard cut only when none of those exist in the window.
pub fn split_message(text: &str, limit: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    if chars.len() <= limit || limit == 0 {
        return vec![text.to_string()];
    }

    let mut parts = Vec::new();
    let mut start = 0;
    while start < chars.len() {
        let remaining = chars.len() - start;
        if remaining <= limit {
            let tail: String = chars[start..].iter().collect();
            parts.push(tail.trim_start().to_string());
            break;
        }

        let window: String = chars[start..start + limit].iter().collect();
        let cut = window
            .rfind("\n\n")
            .map(|b| window[..b].chars().count() + 2)
            .or_else(|| window.rfind(". ").map(|b| window[..b].chars().count() + 2))
            .or_else(|| window.rfind('\n').map(|b| window[..b].chars().count() + 1))
            .or_else(|| window.rfind(' ').map(|b| window[..b].chars().count() + 1))
            .unwrap_or(limit)
            .clamp(1, limit);

        let piece: String = chars[start..start + cut].iter().collect();
        parts.push(piece.trim_end().to_string());
        start += cut;
        while start < chars.len() && chars[start].is_whitespace() && chars[start] != '\n' {
            start += 1;
        }
    }
    parts
}
