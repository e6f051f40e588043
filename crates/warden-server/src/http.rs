//! The C12 HTTP surface: webhook ingestion plus a handful of
//! operator-facing read/admin endpoints. Kept deliberately small — this
//! crate terminates HTTP, it doesn't run business logic.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, warn};
use warden_storage::{ApprovalRepo, JobRepo, LedgerRepo, MessageRepo};
use warden_types::{ApprovalStatus, JobStatus, TokenScope};

use crate::AppState;

pub fn app_router(state: AppState) -> Router {
    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);

    Router::new()
        .route("/webhook/{platform}", post(webhook))
        .route("/health", get(health))
        .route("/stats", get(stats))
        .route("/admin/approvals", get(list_approvals))
        .route("/admin/approvals/{id}/reply", post(reply_approval))
        .layer(cors)
        .with_state(state)
}

pub async fn serve(addr: SocketAddr, state: AppState) -> anyhow::Result<()> {
    let app = app_router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "warden-server listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install ctrl-c handler");
    };
    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install sigterm handler")
            .recv()
            .await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

struct ApiError(StatusCode, String);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.0, Json(json!({ "error": self.1 }))).into_response()
    }
}

fn webhook_authorized(state: &AppState, headers: &HeaderMap) -> bool {
    let Some(secret) = &state.channels.webhook_secret else {
        return true;
    };
    headers
        .get("x-telegram-bot-api-secret-token")
        .and_then(|v| v.to_str().ok())
        .map(|v| v == secret)
        .unwrap_or(false)
}

async fn webhook(
    State(state): State<AppState>,
    Path(platform): Path<String>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> StatusCode {
    if !webhook_authorized(&state, &headers) {
        warn!(%platform, "rejected webhook with bad or missing secret");
        return StatusCode::UNAUTHORIZED;
    }

    let update = match platform.as_str() {
        "telegram" => warden_channels::telegram::parse_update(&body),
        other => {
            warn!(platform = other, "webhook for unsupported platform");
            return StatusCode::OK;
        }
    };

    match update {
        Ok(update) => {
            let ingestion = state.ingestion.clone();
            tokio::spawn(async move {
                if let Err(e) = ingestion.ingest(&platform, update).await {
                    error!(error = %e, "failed to ingest webhook update");
                }
            });
        }
        Err(e) => warn!(error = %e, "failed to parse webhook payload"),
    }

    StatusCode::OK
}

async fn health(State(state): State<AppState>) -> Response {
    match state.pool.get().await {
        Ok(_) => Json(json!({ "status": "ok", "db": "reachable" })).into_response(),
        Err(e) => {
            error!(error = %e, "health check failed to acquire a db connection");
            (StatusCode::SERVICE_UNAVAILABLE, Json(json!({ "status": "degraded", "db": "unreachable" }))).into_response()
        }
    }
}

#[derive(Serialize)]
struct StatsResponse {
    message_count: i64,
    tokens_today: TokensToday,
    jobs_today: JobsToday,
}

#[derive(Serialize)]
struct TokensToday {
    proactive: i64,
    reactive: i64,
}

#[derive(Serialize)]
struct JobsToday {
    queued: i64,
    running: i64,
    done: i64,
    failed: i64,
    canceled: i64,
}

async fn stats(State(state): State<AppState>) -> Result<Json<StatsResponse>, ApiError> {
    let messages = MessageRepo::new(&state.pool);
    let ledger = LedgerRepo::new(&state.pool);
    let jobs = JobRepo::new(&state.pool);
    let since = warden_storage::today_midnight_utc();

    let message_count = messages.count_all().await.map_err(storage_err)?;
    let proactive = ledger.usage_since(TokenScope::Proactive, since).await.map_err(storage_err)?;
    let reactive = ledger.usage_since(TokenScope::Reactive, since).await.map_err(storage_err)?;
    let queued = jobs.count_by_status(JobStatus::Queued).await.map_err(storage_err)?;
    let running = jobs.count_by_status(JobStatus::Running).await.map_err(storage_err)?;
    let done = jobs.count_by_status(JobStatus::Done).await.map_err(storage_err)?;
    let failed = jobs.count_by_status(JobStatus::Failed).await.map_err(storage_err)?;
    let canceled = jobs.count_by_status(JobStatus::Canceled).await.map_err(storage_err)?;

    Ok(Json(StatsResponse {
        message_count,
        tokens_today: TokensToday { proactive, reactive },
        jobs_today: JobsToday { queued, running, done, failed, canceled },
    }))
}

async fn list_approvals(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let pending = ApprovalRepo::new(&state.pool).pending().await.map_err(storage_err)?;
    Ok(Json(json!({ "approvals": pending })))
}

#[derive(Deserialize)]
struct ReplyApprovalRequest {
    approve: bool,
}

async fn reply_approval(
    State(state): State<AppState>,
    Path(id): Path<uuid::Uuid>,
    Json(body): Json<ReplyApprovalRequest>,
) -> Result<Json<Value>, ApiError> {
    let status = if body.approve { ApprovalStatus::Approved } else { ApprovalStatus::Rejected };
    let approval = ApprovalRepo::new(&state.pool).resolve(id, status).await.map_err(storage_err)?;

    if let Some(job_id) = approval.job_id {
        if let Err(e) = JobRepo::new(&state.pool).flip_to_execute(job_id).await {
            warn!(error = %e, "failed to flip job to execute after admin approval reply");
        }
    }

    Ok(Json(json!({ "approval": approval })))
}

fn storage_err(e: warden_types::PersistError) -> ApiError {
    match e {
        warden_types::PersistError::NotFound => ApiError(StatusCode::NOT_FOUND, "not found".into()),
        warden_types::PersistError::Conflict(msg) => ApiError(StatusCode::CONFLICT, msg),
        other => ApiError(StatusCode::INTERNAL_SERVER_ERROR, other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tokio::sync::Notify;
    use warden_channels::{ChannelsConfig, NoopApprovalNotifier};
    use warden_storage::{Pool, ThreadRepo};

    struct SilentTransport;

    #[async_trait::async_trait]
    impl warden_channels::ChatTransport for SilentTransport {
        fn platform(&self) -> &str {
            "telegram"
        }
        async fn send(&self, _chat_id: &str, _text: &str, _reply_markup: Option<Value>) -> anyhow::Result<String> {
            Ok("1".into())
        }
        async fn edit_text(&self, _chat_id: &str, _message_id: &str, _text: &str) -> anyhow::Result<()> {
            Ok(())
        }
        async fn edit_reply_markup(&self, _chat_id: &str, _message_id: &str, _markup: Option<Value>) -> anyhow::Result<()> {
            Ok(())
        }
        async fn answer_callback_query(&self, _id: &str, _text: Option<&str>) -> anyhow::Result<()> {
            Ok(())
        }
        async fn set_reaction(&self, _chat_id: &str, _message_id: &str, _reaction: &str) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn fixture() -> AppState {
        let dir = tempfile::tempdir().unwrap();
        let pool = Arc::new(Pool::open(dir.path().join("warden.db"), 1, 2).unwrap());
        let transport = Arc::new(SilentTransport);
        let channels = ChannelsConfig { telegram_bot_token: "t".into(), operator_chat_ids: vec![], webhook_secret: None };
        AppState::new(pool, transport, channels, Arc::new(Notify::new()), Arc::new(NoopApprovalNotifier))
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let state = fixture();
        let response = health(State(state)).await.into_response();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn stats_reflects_a_seeded_message() {
        let state = fixture();
        let thread = ThreadRepo::new(&state.pool).get_or_create("telegram", "1").await.unwrap();
        MessageRepo::new(&state.pool)
            .insert(&warden_types::Message {
                id: uuid::Uuid::new_v4(),
                thread_id: thread.id,
                external_message_id: None,
                role: warden_types::MessageRole::User,
                author_id: None,
                text: Some("hi".into()),
                raw_payload: json!({}),
                created_at: chrono::Utc::now(),
            })
            .await
            .unwrap();

        let Json(body) = stats(State(state)).await.unwrap();
        assert_eq!(body.message_count, 1);
    }

    #[tokio::test]
    async fn webhook_rejects_when_secret_does_not_match() {
        let mut state = fixture();
        state.channels.webhook_secret = Some("s3cret".into());
        let mut headers = HeaderMap::new();
        headers.insert("x-telegram-bot-api-secret-token", "wrong".parse().unwrap());

        let status = webhook(State(state), Path("telegram".into()), headers, Json(json!({}))).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn reply_approval_approves_and_clears_pending_listing() {
        let state = fixture();
        let thread = ThreadRepo::new(&state.pool).get_or_create("telegram", "2").await.unwrap();
        let approval = ApprovalRepo::new(&state.pool).create(thread.id, None, "deploy?").await.unwrap();

        let Json(_) = reply_approval(State(state.clone()), Path(approval.id), Json(ReplyApprovalRequest { approve: true }))
            .await
            .unwrap();

        let Json(listing) = list_approvals(State(state)).await.unwrap();
        assert_eq!(listing["approvals"].as_array().unwrap().len(), 0);
    }
}
