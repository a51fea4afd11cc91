//! Pod restart agent - Slack alerts for restarted containers
//!
//! Watches every pod in the cluster and reports container restarts with
//! the pod status, recent warning events and the previous container log.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::Client;
use restart_agent::{api, config::AgentConfig};
use restart_lib::{
    cluster::{KubeClusterSource, PodEventHandler, PodStore, PodWatcher},
    controller::Controller,
    diagnostics::DiagnosticsAssembler,
    filter::ChangeFilter,
    health::HealthRegistry,
    ledger::MuteLedger,
    observability::StructuredLogger,
    queue::WorkQueue,
    reconciler::Reconciler,
    slack::SlackNotifier,
};
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::broadcast;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const AGENT_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser)]
#[command(name = "pod-restart-agent")]
#[command(about = "Report Kubernetes container restarts to Slack", version)]
struct Cli {
    /// Path to a kubeconfig file; in-cluster or inferred config when unset
    #[arg(long, env = "KUBECONFIG")]
    kubeconfig: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting pod-restart-agent");

    let config = AgentConfig::load()?;
    info!(cluster = %config.cluster_name, channel = %config.slack_channel, "Agent configured");

    let client = kube_client(cli.kubeconfig.as_deref()).await?;

    let health_registry = HealthRegistry::new();
    health_registry.register_all().await;

    let logger = StructuredLogger::new(&config.cluster_name);
    logger.log_startup(AGENT_VERSION, config.workers, config.mute_seconds);

    let store = Arc::new(PodStore::new());
    let queue = WorkQueue::new();
    let handler = PodEventHandler::new(
        Arc::clone(&store),
        ChangeFilter::new(config.filter_config()?),
        queue.clone(),
    );
    let watcher = PodWatcher::new(client.clone(), handler, health_registry.clone());

    let assembler = DiagnosticsAssembler::new(Arc::new(KubeClusterSource::new(client)));
    let notifier = Arc::new(SlackNotifier::new(config.slack_config())?);
    let ledger = Arc::new(MuteLedger::new(config.mute_window()));
    let reconciler = Reconciler::new(
        Arc::clone(&store),
        ledger,
        assembler,
        notifier,
        config.reconcile_settings()?,
    )
    .with_health(health_registry.clone());

    let controller = Controller::new(
        queue,
        store,
        Arc::new(reconciler),
        health_registry.clone(),
        logger.clone(),
    )
    .with_watcher(watcher)
    .with_workers(config.workers);

    let (shutdown_tx, _) = broadcast::channel(1);

    let app_state = Arc::new(api::AppState::new(health_registry.clone()));
    let api_handle = tokio::spawn(api::serve(config.health_listen_address, app_state, shutdown_tx.subscribe()));
    let controller_handle = tokio::spawn(controller.run(shutdown_tx.clone()));

    let reason = wait_for_signal().await?;
    logger.log_shutdown(reason);
    let _ = shutdown_tx.send(());

    if let Err(e) = controller_handle.await {
        error!(error = %e, "Controller task failed");
    }
    api_handle.await??;

    info!("Shutdown complete");
    Ok(())
}

/// Build a client from an explicit kubeconfig or the inferred environment
async fn kube_client(kubeconfig: Option<&Path>) -> Result<Client> {
    let config = match kubeconfig {
        Some(path) => {
            let kubeconfig = Kubeconfig::read_from(path)?;
            kube::Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default()).await?
        }
        None => kube::Config::infer().await?,
    };
    info!(cluster_url = %config.cluster_url, "Connecting to Kubernetes API");
    Ok(Client::try_from(config)?)
}

async fn wait_for_signal() -> Result<&'static str> {
    let mut terminate = signal(SignalKind::terminate())?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result?;
            Ok("SIGINT received")
        }
        _ = terminate.recv() => Ok("SIGTERM received"),
    }
}
