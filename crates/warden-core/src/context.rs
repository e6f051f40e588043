//! Builds the conversation window (§4.3) the classify and execute handlers
//! feed to their providers: the last `limit` messages of a thread, oldest
//! first, with each message's artifact state folded into its text.

use warden_storage::{ArtifactRepo, MessageRepo, Pool};
use warden_providers::ChatMessage;
use warden_types::{Id, MessageRole, PersistError};

use crate::media::artifact_summary;

pub async fn build_window(pool: &Pool, thread_id: Id, limit: i64) -> Result<Vec<ChatMessage>, PersistError> {
    let messages_repo = MessageRepo::new(pool);
    let artifacts_repo = ArtifactRepo::new(pool);

    let mut recent = messages_repo.recent_for_thread(thread_id, limit).await?;
    recent.reverse();

    let mut window = Vec::with_capacity(recent.len());
    for message in recent {
        let mut text = message.text.clone().unwrap_or_default();
        let artifacts = artifacts_repo.for_message(message.id).await?;
        for artifact in &artifacts {
            if let Some(summary) = artifact_summary(artifact) {
                if !text.is_empty() {
                    text.push('\n');
                }
                text.push_str(&summary);
            }
        }
        window.push(match message.role {
            MessageRole::User => ChatMessage::user(text),
            MessageRole::Assistant => ChatMessage::assistant(text),
            // The classifier/executor only ever sees the user/assistant
            // turns; a system row (if one is ever inserted) reads as an
            // assistant aside rather than a distinct protocol role.
            MessageRole::System => ChatMessage::assistant(text),
        });
    }
    Ok(window)
}

#[cfg(test)]
mod tests {
    use super::*;
    use warden_storage::ThreadRepo;
    use warden_types::{ArtifactKind, Message};

    async fn test_pool() -> Pool {
        let dir = tempfile::tempdir().unwrap();
        Pool::open(dir.path().join("warden.db"), 1, 2).unwrap()
    }

    #[tokio::test]
    async fn window_is_chronological_and_includes_artifact_summaries() {
        let pool = test_pool().await;
        let thread = ThreadRepo::new(&pool).get_or_create("telegram", "1").await.unwrap();
        let messages = MessageRepo::new(&pool);
        let artifacts = ArtifactRepo::new(&pool);

        for (i, text) in ["first", "second"].iter().enumerate() {
            let message = Message {
                id: Id::new_v4(),
                thread_id: thread.id,
                external_message_id: None,
                role: MessageRole::User,
                author_id: None,
                text: Some(text.to_string()),
                raw_payload: serde_json::json!({}),
                created_at: chrono::Utc::now() + chrono::Duration::seconds(i as i64),
            };
            messages.insert(&message).await.unwrap();
            if i == 1 {
                let artifact = artifacts.insert_pending(message.id, ArtifactKind::ImageJson, Some("f1")).await.unwrap();
                artifacts.complete(artifact.id, serde_json::json!({"description": "a cat"}), None).await.unwrap();
            }
        }

        let window = build_window(&pool, thread.id, 10).await.unwrap();
        assert_eq!(window.len(), 2);
        assert_eq!(window[0].content, "first");
        assert!(window[1].content.contains("second"));
        assert!(window[1].content.contains("[Image]: a cat"));
    }

    #[tokio::test]
    async fn window_respects_limit() {
        let pool = test_pool().await;
        let thread = ThreadRepo::new(&pool).get_or_create("telegram", "2").await.unwrap();
        let messages = MessageRepo::new(&pool);
        for i in 0..5 {
            let message = Message {
                id: Id::new_v4(),
                thread_id: thread.id,
                external_message_id: None,
                role: MessageRole::User,
                author_id: None,
                text: Some(format!("msg {i}")),
                raw_payload: serde_json::json!({}),
                created_at: chrono::Utc::now() + chrono::Duration::seconds(i),
            };
            messages.insert(&message).await.unwrap();
        }
        let window = build_window(&pool, thread.id, 2).await.unwrap();
        assert_eq!(window.len(), 2);
        assert_eq!(window[0].content, "msg 3");
        assert_eq!(window[1].content, "msg 4");
    }
}
