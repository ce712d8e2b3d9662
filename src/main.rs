//! # Ingress Annotation Controller
//!
//! Binary entry point: wires the watch substrate, the work queue, and the
//! worker pool together, then runs until a shutdown signal.
//!
//! Bootstrap order matters: the metrics server starts first so probes work
//! during startup, watch pumps begin filling the caches next, and workers
//! only start once both caches have synced so early syncs do not mistake
//! "not cached yet" for "does not exist".

use std::sync::atomic::Ordering;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use k8s_openapi::api::core::v1::Service;
use k8s_openapi::api::networking::v1::Ingress;
use kube::{Api, Client};
use kube_runtime::reflector::reflector;
use kube_runtime::watcher;
use kube_runtime::WatchStreamExt;
use tracing::{error, info, warn};

use ingress_annotation_controller::api::{IngressClient, KubeIngressClient, ObjectCache};
use ingress_annotation_controller::backoff::FibonacciBackoff;
use ingress_annotation_controller::constants::{
    DEFAULT_ANNOTATION_KEY, DEFAULT_METRICS_PORT, DEFAULT_WORKER_COUNT,
};
use ingress_annotation_controller::controller::{Controller, NotificationHandler};
use ingress_annotation_controller::metrics;
use ingress_annotation_controller::reconciler::Reconciler;
use ingress_annotation_controller::server::{start_server, ServerState};
use ingress_annotation_controller::watch;
use ingress_annotation_controller::workqueue::WorkQueue;

#[derive(Parser, Debug)]
#[command(
    name = "ingress-annotation-controller",
    about = "Exposes annotated Services through managed Ingress resources"
)]
struct Args {
    /// Namespace to watch; watches all namespaces when omitted
    #[arg(long, env = "WATCH_NAMESPACE")]
    namespace: Option<String>,

    /// Number of parallel reconciliation workers
    #[arg(long, default_value_t = DEFAULT_WORKER_COUNT)]
    workers: usize,

    /// Annotation that marks a Service for ingress management
    #[arg(long, default_value = DEFAULT_ANNOTATION_KEY)]
    annotation: String,

    /// HTTP port for metrics and health probes
    #[arg(long, env = "METRICS_PORT", default_value_t = DEFAULT_METRICS_PORT)]
    metrics_port: u16,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ingress_annotation_controller=info".into()),
        )
        .init();

    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        warn!("rustls crypto provider was already installed");
    }

    info!("starting ingress annotation controller");

    metrics::register_metrics()?;

    let server_state = Arc::new(ServerState::default());
    {
        let state = Arc::clone(&server_state);
        let port = args.metrics_port;
        tokio::spawn(async move {
            if let Err(err) = start_server(port, state).await {
                error!("HTTP server error: {err}");
            }
        });
    }

    let client = Client::try_default()
        .await
        .context("failed to build kubernetes client")?;

    let (services_api, ingresses_api) = match args.namespace.as_deref() {
        Some(namespace) => (
            Api::<Service>::namespaced(client.clone(), namespace),
            Api::<Ingress>::namespaced(client.clone(), namespace),
        ),
        None => (
            Api::<Service>::all(client.clone()),
            Api::<Ingress>::all(client.clone()),
        ),
    };

    let (service_store, service_writer) = kube_runtime::reflector::store::<Service>();
    let (ingress_store, ingress_writer) = kube_runtime::reflector::store::<Ingress>();

    let service_events = reflector(
        service_writer,
        watcher(services_api, watcher::Config::default()).default_backoff(),
    );
    let ingress_events = reflector(
        ingress_writer,
        watcher(ingresses_api, watcher::Config::default()).default_backoff(),
    );

    let reconciler = Reconciler::new(
        Arc::new(service_store.clone()) as Arc<dyn ObjectCache<Service>>,
        Arc::new(ingress_store.clone()) as Arc<dyn ObjectCache<Ingress>>,
        Arc::new(KubeIngressClient::new(client)) as Arc<dyn IngressClient>,
        args.annotation,
    );
    let controller = Arc::new(Controller::new(
        WorkQueue::new(FibonacciBackoff::default()),
        reconciler,
    ));

    // Each pump delivers notifications from its own task; enqueueing is
    // safe under concurrent callers.
    tokio::spawn(watch::pump(
        service_events,
        Arc::clone(&controller) as Arc<dyn NotificationHandler<Service>>,
    ));
    tokio::spawn(watch::pump(
        ingress_events,
        Arc::clone(&controller) as Arc<dyn NotificationHandler<Ingress>>,
    ));

    service_store
        .wait_until_ready()
        .await
        .context("service cache failed to sync")?;
    ingress_store
        .wait_until_ready()
        .await
        .context("ingress cache failed to sync")?;
    info!("caches synced");

    server_state.is_ready.store(true, Ordering::Relaxed);

    controller.run(args.workers, shutdown_signal()).await;

    info!("controller stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
