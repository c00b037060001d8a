//! stratus controller: route, crash and task completion loops

mod emit;

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::Pod;
use kube::Client;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{info, warn};

use stratus_common::clients::{EventsClient, JobClient, PodClient, SecretsClient, WorkloadClient};
use stratus_common::kube_clients::{
    source_type_watch, KubeEventsClient, KubeJobClient, KubePodClient, KubeSecretsClient,
    KubeWorkloadClient,
};
use stratus_common::model::SourceType;
use stratus_common::telemetry::{init_telemetry, TelemetryConfig};
use stratus_common::Config;
use stratus_crash::CrashWatcher;
use stratus_route::{run_change_watcher, run_collector, Collector, RouteChangeHandler};
use stratus_task::{CompletionReconciler, Deleter};

/// stratus - Cloud Foundry workloads on Kubernetes
#[derive(Parser, Debug)]
#[command(name = "stratus-controller", version, about, long_about = None)]
struct Cli {
    /// Path to the YAML configuration file; defaults apply when omitted
    #[arg(short = 'c', long = "config", env = "STRATUS_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_telemetry(TelemetryConfig {
        service_name: "stratus-controller".to_string(),
        ..Default::default()
    })?;

    let config = match cli.config {
        Some(path) => Config::from_file(&path)?,
        None => Config::default(),
    };
    info!(
        namespace = %config.workloads_namespace,
        namespaced = config.namespaced,
        "configuration loaded"
    );

    let client = Client::try_default().await?;
    run(client, config).await
}

async fn run(client: Client, config: Config) -> anyhow::Result<()> {
    let namespace = config.watch_namespace().map(str::to_string);

    let workloads: Arc<dyn WorkloadClient> =
        Arc::new(KubeWorkloadClient::new(client.clone(), namespace.clone()));
    let pods: Arc<dyn PodClient> = Arc::new(KubePodClient::new(client.clone(), namespace.clone()));
    let jobs: Arc<dyn JobClient> = Arc::new(KubeJobClient::new(client.clone(), namespace.clone()));
    let secrets: Arc<dyn SecretsClient> = Arc::new(KubeSecretsClient::new(client.clone()));
    let events: Arc<dyn EventsClient> = Arc::new(KubeEventsClient::new(client.clone()));

    let capacity = config.channel_capacity;
    let (collected_tx, collected_rx) = mpsc::channel(capacity);
    let (changed_tx, changed_rx) = mpsc::channel(capacity);
    let (crash_tx, crash_rx) = mpsc::channel(capacity);
    let (completion_tx, completion_rx) = mpsc::channel(capacity);

    let mut tasks = JoinSet::new();
    tasks.spawn(emit::print_lines("route", collected_rx));
    tasks.spawn(emit::print_lines("route-change", changed_rx));
    tasks.spawn(emit::print_lines("crash", crash_rx));
    tasks.spawn(emit::print_lines("task-completion", completion_rx));

    let collector = Collector::new(pods.clone(), workloads.clone());
    tasks.spawn(run_collector(
        collector,
        collected_tx,
        config.route_collector_interval(),
    ));

    let handler = RouteChangeHandler::new(pods.clone(), workloads.clone());
    let ns = namespace.as_deref();
    tasks.spawn(run_change_watcher(
        handler,
        source_type_watch::<StatefulSet>(&client, ns, SourceType::App),
        source_type_watch::<Pod>(&client, ns, SourceType::App),
        changed_tx,
    ));

    let crash_pods = source_type_watch::<Pod>(&client, ns, SourceType::App);
    tasks.spawn(async move {
        CrashWatcher::new(events).run(crash_pods, crash_tx).await;
    });

    let deleter = Arc::new(Deleter::new(jobs.clone(), secrets));
    let task_jobs = source_type_watch::<Job>(&client, ns, SourceType::Task);
    let sweep_interval = config.task_sweep_interval();
    let reconciler =
        CompletionReconciler::new(jobs, deleter, completion_tx, config.completed_task_ttl());
    tasks.spawn(async move {
        reconciler.run(task_jobs, sweep_interval).await;
    });

    info!("stratus controller running");

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result?;
            info!("shutdown requested");
        }
        Some(finished) = tasks.join_next() => {
            if let Err(e) = finished {
                warn!(error = %e, "background loop panicked");
            }
            warn!("background loop exited, shutting down");
        }
    }

    tasks.shutdown().await;
    info!("stratus controller stopped");
    Ok(())
}
