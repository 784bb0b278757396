//! Entry point for the agent-side plugin intake subsystem.
//!
//! Loads configuration, starts the attachment registrar, and spawns one
//! [`vigil_agent::InspectionWorker`] per attachment the registrar reports
//! over its spawn channel — the registrar never owns inspection loops
//! directly (§4.6/§4.7 stay two components), this is just the wiring
//! between them.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::mpsc;
use tracing::{error, info};

use vigil_agent::{
    AlwaysAcceptManager, AttachmentRegistrar, HttpManager, InspectionWorker, RegisteredInstance,
    WorkerMetrics,
};
use vigil_common::observability::init_tracing;
use vigil_config::IntakeConfig;

#[derive(Parser, Debug)]
#[command(
    name = "vigil-agent",
    about = "Agent-side plugin intake subsystem for inline HTTP inspection"
)]
struct Cli {
    /// TOML configuration file. A missing file falls back to built-in
    /// defaults; every field still gets a value (§10.3).
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Emit JSON logs instead of the pretty human-readable formatter.
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    let config = Arc::new(
        IntakeConfig::load(cli.config.as_deref()).context("failed to load intake configuration")?,
    );
    info!(
        registration_ipc_path = %config.registration_ipc_path.display(),
        fail_open_mode = config.fail_open_mode,
        "loaded intake configuration"
    );

    let metrics = Arc::new(WorkerMetrics::new());
    let http_manager: Arc<dyn HttpManager> = Arc::new(AlwaysAcceptManager);

    let (spawn_tx, mut spawn_rx) = mpsc::unbounded_channel::<RegisteredInstance>();

    let registrar = Arc::new(AttachmentRegistrar::new(
        config.registration_ipc_path.clone(),
        config.keep_alive_ipc_path.clone(),
        Duration::from_secs(config.expiration_check_seconds),
        spawn_tx,
    ));
    tokio::spawn(Arc::clone(&registrar).run());

    tokio::spawn(flush_metrics_periodically(
        Arc::clone(&metrics),
        Duration::from_secs(config.metric_reporting_interval_secs),
    ));

    let mut spawned_instances = HashSet::new();

    loop {
        tokio::select! {
            received = spawn_rx.recv() => {
                let Some(instance) = received else {
                    // Every sender lives inside the registrar task above
                    // for the process lifetime; this only fires if that
                    // task has panicked.
                    error!("registrar spawn channel closed, exiting");
                    return Ok(());
                };
                spawn_worker_if_new(
                    instance,
                    &mut spawned_instances,
                    Arc::clone(&config),
                    Arc::clone(&metrics),
                    Arc::clone(&http_manager),
                );
            }
            _ = tokio::signal::ctrl_c() => {
                info!("received shutdown signal, exiting");
                return Ok(());
            }
        }
    }
}

/// Binds and runs a new [`InspectionWorker`] for `instance`, unless one has
/// already been spawned for this instance id — re-registration of a worker
/// already being served reaches the running worker's own handshake accept
/// loop directly, it does not need a second listener.
fn spawn_worker_if_new(
    instance: RegisteredInstance,
    spawned_instances: &mut HashSet<String>,
    config: Arc<IntakeConfig>,
    metrics: Arc<WorkerMetrics>,
    http_manager: Arc<dyn HttpManager>,
) {
    if !spawned_instances.insert(instance.instance_unique_id.clone()) {
        return;
    }

    let instance_unique_id = instance.instance_unique_id;
    let handler_path = instance.handler_path;
    let ring_path = config.ring_base_dir.join(&instance_unique_id);

    tokio::spawn(async move {
        let mut worker = match InspectionWorker::new(
            instance_unique_id.clone(),
            handler_path,
            ring_path,
            config,
            metrics,
            http_manager,
        ) {
            Ok(worker) => worker,
            Err(e) => {
                error!(worker = %instance_unique_id, error = %e, "failed to start inspection worker");
                return;
            }
        };
        info!(worker = %instance_unique_id, "inspection worker listening");
        worker.run().await;
    });
}

/// The Timer routine for metric flush (§5): logs the aggregated counter
/// snapshot on the configured period. Exporting it as Prometheus text is
/// the `WorkerMetrics::to_prometheus` caller's job (a scrape endpoint, out
/// of scope here); this just keeps the numbers visible in the log stream.
async fn flush_metrics_periodically(metrics: Arc<WorkerMetrics>, period: Duration) {
    let mut ticker = tokio::time::interval(period);
    loop {
        ticker.tick().await;
        let snapshot = metrics.snapshot();
        info!(?snapshot, "periodic metrics flush");
    }
}
