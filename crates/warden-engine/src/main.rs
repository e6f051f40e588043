//! Composition root (C15): wires the persistence pool, provider registry,
//! chat transport, and the three long-lived background actors (reactive
//! worker, media processor, proactive scheduler) plus the HTTP surface
//! into one process. Boot-time recovery fails any job stuck `running`
//! from an unclean prior shutdown (§5) before anything starts leasing.

mod config;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::sync::Notify;
use tracing::info;

use warden_channels::{ChannelsConfig, TelegramTransport};
use warden_core::{
    ApprovalWaiter, CoreConfig, ImageAnalysisBackend, LocalFsBlobStore, MediaBackends, MediaProcessor, OcrBackend,
    ReactiveWorker, VoiceTranscriptionBackend,
};
use warden_observability::{init_process_logging, ProcessKind};
use warden_orchestrator::{OrchestratorConfig, ProactiveScheduler, TaskExecutor};
use warden_providers::ProviderRegistry;
use warden_server::AppState;
use warden_storage::{JobRepo, Pool};

use crate::config::{build_provider, load_yaml_base_layer, EngineConfig};

#[derive(Parser, Debug)]
#[command(name = "warden-engine")]
#[command(about = "Headless autonomous chat-agent runtime")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the full process: HTTP surface plus the reactive worker, media
    /// processor, and proactive scheduler background actors.
    Serve,
    /// Run one task-executor attempt against the next pending task and
    /// exit, for operator debugging of the proactive task queue.
    RunTask,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_path = std::env::var("WARDEN_CONFIG_FILE").map(PathBuf::from).unwrap_or_else(|_| PathBuf::from("./warden.yaml"));
    load_yaml_base_layer(&config_path).context("failed to load YAML base config layer")?;

    let engine_config = EngineConfig::from_env()?;

    let logs_dir = engine_config.state_dir.join("logs");
    let (_guard, log_info) = init_process_logging(ProcessKind::Engine, &logs_dir, 14)?;
    info!(logs_dir = %log_info.logs_dir, "warden-engine starting");

    match cli.command {
        Command::Serve => serve(engine_config).await,
        Command::RunTask => run_task_once(engine_config).await,
    }
}

struct Runtime {
    pool: Arc<Pool>,
    channels: ChannelsConfig,
    core_config: CoreConfig,
    orchestrator_config: OrchestratorConfig,
    providers: ProviderRegistry,
    transport: Arc<TelegramTransport>,
    wake: Arc<Notify>,
    approvals: Arc<ApprovalWaiter>,
}

async fn build_runtime(engine_config: &EngineConfig) -> anyhow::Result<Runtime> {
    let pool = Arc::new(
        Pool::open(engine_config.db_path(), engine_config.pool_min, engine_config.pool_max)
            .context("failed to open storage pool")?,
    );

    let recovered = JobRepo::new(&pool).recover_stuck_running().await.context("boot recovery failed")?;
    if recovered > 0 {
        tracing::warn!(count = recovered, "recovered jobs left `running` by an unclean shutdown");
    }

    let channels = ChannelsConfig::from_env().context("invalid channels configuration")?;
    let core_config = CoreConfig::from_env().context("invalid core configuration")?;
    let orchestrator_config = OrchestratorConfig::from_env().context("invalid orchestrator configuration")?;

    let classifier = build_provider("classifier").context("failed to build classifier provider")?;
    let executor = build_provider("executor").context("failed to build executor provider")?;
    let providers = ProviderRegistry::new(classifier, executor);

    let transport = Arc::new(TelegramTransport::new(channels.telegram_bot_token.clone()));
    let wake = Arc::new(Notify::new());
    let approvals = Arc::new(ApprovalWaiter::new(Duration::from_secs(2)));

    Ok(Runtime { pool, channels, core_config, orchestrator_config, providers, transport, wake, approvals })
}

async fn serve(engine_config: EngineConfig) -> anyhow::Result<()> {
    let runtime = build_runtime(&engine_config).await?;

    let blobs: Arc<dyn warden_core::BlobStore> = Arc::new(LocalFsBlobStore::new(runtime.core_config.blob_store_root.clone()));
    let media_backends = MediaBackends {
        voice: Arc::new(VoiceTranscriptionBackend::new(
            runtime.providers.classifier(),
            Duration::from_secs(runtime.core_config.classify_timeout_secs),
        )),
        image: Arc::new(ImageAnalysisBackend::new(
            runtime.providers.classifier(),
            Duration::from_secs(runtime.core_config.classify_timeout_secs),
        )),
        ocr: Arc::new(OcrBackend::new(
            runtime.providers.classifier(),
            Duration::from_secs(runtime.core_config.classify_timeout_secs),
        )),
    };

    let reactive_worker = Arc::new(ReactiveWorker::new(
        runtime.pool.clone(),
        runtime.providers.clone(),
        runtime.transport.clone(),
        runtime.approvals.clone(),
        runtime.wake.clone(),
        runtime.core_config.clone(),
    ));

    let media_processor = Arc::new(MediaProcessor::new(
        runtime.pool.clone(),
        media_backends,
        blobs,
        runtime.core_config.clone(),
    ));

    let scheduler = Arc::new(ProactiveScheduler::new(
        runtime.pool.clone(),
        runtime.providers.clone(),
        runtime.transport.clone(),
        runtime.channels.clone(),
        runtime.orchestrator_config.clone(),
        runtime.wake.clone(),
    ));

    let reactive_handle = tokio::spawn(reactive_worker.run());
    let media_handle = tokio::spawn(media_processor.run());
    let scheduler_handle = tokio::spawn(scheduler.run());

    let app_state = AppState::new(
        runtime.pool.clone(),
        runtime.transport.clone(),
        runtime.channels.clone(),
        runtime.wake.clone(),
        runtime.approvals.clone(),
    );
    let addr: SocketAddr = engine_config.bind_addr.parse().context("invalid WARDEN_BIND_ADDR")?;
    info!(%addr, "warden-engine http surface listening");

    // `serve` only returns once it has caught SIGINT/SIGTERM, so reaching
    // here means a graceful shutdown was requested. The background actors
    // have no cooperative shutdown signal wired in (§5's grace window is
    // satisfied by letting them run to their next suspension point and
    // then dropping with the process) — abort them once the socket is
    // closed so the process can actually exit.
    warden_server::serve(addr, app_state).await?;

    reactive_handle.abort();
    media_handle.abort();
    scheduler_handle.abort();

    Ok(())
}

async fn run_task_once(engine_config: EngineConfig) -> anyhow::Result<()> {
    let runtime = build_runtime(&engine_config).await?;
    let executor = TaskExecutor::new(runtime.pool.clone(), runtime.providers.clone(), runtime.orchestrator_config.clone());
    match executor.run_next().await? {
        Some(result) => println!("{}", serde_json::to_string_pretty(&result_to_json(&result))?),
        None => println!("no pending task"),
    }
    Ok(())
}

fn result_to_json(result: &warden_orchestrator::TaskRunResult) -> serde_json::Value {
    serde_json::json!({
        "task_id": result.task_id,
        "status": format!("{:?}", result.status),
        "summary": result.summary,
    })
}
