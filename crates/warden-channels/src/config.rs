//! Configuration for `warden-channels`. Env-var-first, mirroring the
//! per-section `from_env()` constructor pattern the rest of the runtime
//! uses (C14).

use anyhow::bail;

#[derive(Debug, Clone)]
pub struct ChannelsConfig {
    pub telegram_bot_token: String,
    /// Chat ids whose messages are treated as `TaskSource::Master` input
    /// and who receive proactive outreach / `ask_master` prompts (§4.7,
    /// §4.9). Empty means no operator chat is configured — proactive
    /// outreach then has nowhere to send to.
    pub operator_chat_ids: Vec<String>,
    /// Shared secret Telegram is configured to send back in the webhook
    /// path (`/webhook/telegram/<secret>`) or `X-Telegram-Bot-Api-Secret-Token`
    /// header; `warden-server` rejects requests that don't match.
    pub webhook_secret: Option<String>,
}

/// Parses a comma-separated id list, trimming whitespace and dropping
/// empty entries.
pub fn parse_chat_ids(raw: &str) -> Vec<String> {
    raw.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect()
}

impl ChannelsConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let telegram_bot_token = std::env::var("WARDEN_TELEGRAM_BOT_TOKEN")
            .map_err(|_| anyhow::anyhow!("WARDEN_TELEGRAM_BOT_TOKEN not set"))?;
        if telegram_bot_token.trim().is_empty() {
            bail!("WARDEN_TELEGRAM_BOT_TOKEN is empty");
        }

        let operator_chat_ids = std::env::var("WARDEN_OPERATOR_CHAT_IDS")
            .map(|s| parse_chat_ids(&s))
            .unwrap_or_default();

        let webhook_secret = std::env::var("WARDEN_WEBHOOK_SECRET").ok().filter(|s| !s.trim().is_empty());

        Ok(Self { telegram_bot_token, operator_chat_ids, webhook_secret })
    }

    pub fn is_operator_chat(&self, chat_id: &str) -> bool {
        self.operator_chat_ids.iter().any(|id| id == chat_id)
    }
}
