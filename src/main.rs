// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

use anyhow::{Context as _, Result};
use axum::{
    http::{header, StatusCode},
    response::IntoResponse,
    routing::get,
    Router,
};
use clap::Parser;
use futures::StreamExt;
use k8s_openapi::api::core::v1::Secret;
use kube::{
    api::ListParams,
    runtime::{controller::Action, reflector, watcher, watcher::Config, Controller, WatchStreamExt},
    Api, Client, Resource, ResourceExt,
};
use kube_lease_manager::LeaseManagerBuilder;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};
use topohub::{
    config::AgentConfig,
    constants::{
        ERROR_REQUEUE_DURATION_SECS, EVENT_QUEUE_CAPACITY, KIND_BINDING_IP, KIND_HOST_ENDPOINT,
        KIND_HOST_OPERATION, KIND_REDFISH_STATUS, KIND_SSH_STATUS, KIND_SUBNET,
        LEADER_LEASE_DURATION_SECS, LEADER_LEASE_GRACE_SECS, LEADER_LEASE_NAME,
        REQUEUE_SHORT_SECS, REQUEUE_SSH_SECS, STARTUP_BINDING_REPLAY_DELAY, TOKIO_WORKER_THREADS,
    },
    context::{Context, Stores},
    crd::{BindingIp, HostEndpoint, HostOperation, RedfishStatus, SshStatus, Subnet},
    dhcp::ManualBinding,
    labels::SECRET_CREDENTIAL,
    metrics,
    reconcilers::{
        admit_binding, finalizers::is_deleting, reconcile_bindingip, reconcile_hostendpoint,
        reconcile_hostoperation, reconcile_redfishstatus, reconcile_secret, reconcile_sshstatus,
        reconcile_subnet, retry::retry_api_call,
    },
};
use tracing::{debug, error, info, warn};

#[derive(Debug, thiserror::Error)]
#[error(transparent)]
struct ReconcileError(#[from] anyhow::Error);

/// Bare-metal fleet agent: DHCP servers, BMC and SSH host status.
#[derive(Debug, Parser)]
#[command(name = "topohub", version, about)]
struct Args {
    /// Metrics listen address, overrides `METRICS_BIND_ADDRESS`.
    #[arg(long)]
    metrics_address: Option<String>,

    /// Log output format (`text` or `json`), overrides `RUST_LOG_FORMAT`.
    #[arg(long)]
    log_format: Option<String>,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(TOKIO_WORKER_THREADS)
        .thread_name("topohub-agent")
        .enable_all()
        .build()?;

    runtime.block_on(async_main(args))
}

fn init_logging(format: Option<&str>) {
    // RUST_LOG picks the level (default info), RUST_LOG_FORMAT picks json or text.
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let log_format = format.map_or_else(
        || std::env::var("RUST_LOG_FORMAT").unwrap_or_else(|_| "text".to_string()),
        str::to_string,
    );

    match log_format.to_lowercase().as_str() {
        "json" => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_file(true)
                .with_line_number(true)
                .with_thread_names(true)
                .with_target(false)
                .json()
                .init();
        }
        _ => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_file(true)
                .with_line_number(true)
                .with_thread_names(true)
                .with_target(false)
                .with_ansi(true)
                .compact()
                .init();
        }
    }
}

async fn async_main(args: Args) -> Result<()> {
    init_logging(args.log_format.as_deref());
    info!("Starting topohub agent");

    let mut config = AgentConfig::from_env().context("Failed to load agent configuration")?;
    if let Some(address) = args.metrics_address {
        config.metrics_bind_address = address;
    }
    config
        .ensure_storage_dirs()
        .context("Failed to create storage directories")?;
    let config = Arc::new(config);
    info!(
        node = %config.node_name,
        namespace = %config.pod_namespace,
        storage = %config.storage_path.display(),
        interface = %config.feature.dhcp_server_interface,
        "Configuration loaded"
    );

    // Redfish and the API server both talk TLS through rustls with the ring provider.
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        debug!("TLS crypto provider already installed");
    }

    debug!("Initializing Kubernetes client");
    let client = Client::try_default().await?;

    // The metrics endpoint is served by followers too, so probes see a live process.
    let metrics_address = config.metrics_bind_address.clone();
    let metrics_server = tokio::spawn(async move {
        if let Err(e) = run_metrics_server(metrics_address).await {
            error!("Metrics server failed: {e:#}");
        }
    });

    let leases = LeaseManagerBuilder::new(client.clone(), LEADER_LEASE_NAME)
        .with_namespace(config.pod_namespace.clone())
        .with_identity(config.node_name.clone())
        .with_duration(LEADER_LEASE_DURATION_SECS)
        .with_grace(LEADER_LEASE_GRACE_SECS)
        .build()
        .await
        .context("Failed to create leader lease manager")?;
    let (mut leader, lease_task) = leases.watch().await;

    info!(lease = LEADER_LEASE_NAME, "Waiting for leadership");
    while !*leader.borrow_and_update() {
        leader
            .changed()
            .await
            .context("Leader lease watch closed before election")?;
    }
    info!(node = %config.node_name, "Acquired leadership");
    metrics::record_leader_elected(&config.node_name);

    let stores = Stores {
        host_endpoints: spawn_host_endpoint_reflector(client.clone()),
    };
    let (lease_tx, lease_rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);
    let ctx = Arc::new(Context::new(
        client.clone(),
        Arc::clone(&config),
        stores,
        lease_tx.clone(),
    ));
    let (stop_tx, stop_rx) = watch::channel(false);

    start_subnets(&ctx).await?;
    {
        let ctx = Arc::clone(&ctx);
        tokio::spawn(async move { ctx.subnets.run_binding_router().await });
    }
    {
        let ctx = Arc::clone(&ctx);
        tokio::spawn(async move {
            tokio::time::sleep(STARTUP_BINDING_REPLAY_DELAY).await;
            if let Err(e) = replay_bindings(&ctx).await {
                error!("Failed to replay BindingIp events: {e:#}");
            }
        });
    }

    tokio::spawn(
        Arc::clone(&ctx.redfish).run_lease_events(lease_rx, lease_tx, stop_rx.clone()),
    );
    {
        let redfish = Arc::clone(&ctx.redfish);
        let interval = config.redfish_interval();
        let stop = stop_rx.clone();
        tokio::spawn(async move { redfish.run_periodic(interval, stop).await });
    }
    {
        let ssh = Arc::clone(&ctx.ssh);
        let interval = config.ssh_interval();
        let stop = stop_rx;
        tokio::spawn(async move { ssh.run_periodic(interval, stop).await });
    }

    info!("Starting all controllers");

    let outcome = tokio::select! {
        result = run_subnet_controller(ctx.clone()) => {
            error!("CRITICAL: Subnet controller exited unexpectedly: {:?}", result);
            result.and_then(|()| Err(anyhow::anyhow!("Subnet controller exited unexpectedly without error")))
        }
        result = run_bindingip_controller(ctx.clone()) => {
            error!("CRITICAL: BindingIp controller exited unexpectedly: {:?}", result);
            result.and_then(|()| Err(anyhow::anyhow!("BindingIp controller exited unexpectedly without error")))
        }
        result = run_redfishstatus_controller(ctx.clone()) => {
            error!("CRITICAL: RedfishStatus controller exited unexpectedly: {:?}", result);
            result.and_then(|()| Err(anyhow::anyhow!("RedfishStatus controller exited unexpectedly without error")))
        }
        result = run_sshstatus_controller(ctx.clone()) => {
            error!("CRITICAL: SshStatus controller exited unexpectedly: {:?}", result);
            result.and_then(|()| Err(anyhow::anyhow!("SshStatus controller exited unexpectedly without error")))
        }
        result = run_hostendpoint_controller(ctx.clone()) => {
            error!("CRITICAL: HostEndpoint controller exited unexpectedly: {:?}", result);
            result.and_then(|()| Err(anyhow::anyhow!("HostEndpoint controller exited unexpectedly without error")))
        }
        result = run_hostoperation_controller(ctx.clone()) => {
            error!("CRITICAL: HostOperation controller exited unexpectedly: {:?}", result);
            result.and_then(|()| Err(anyhow::anyhow!("HostOperation controller exited unexpectedly without error")))
        }
        result = run_secret_controller(ctx.clone()) => {
            error!("CRITICAL: Secret controller exited unexpectedly: {:?}", result);
            result.and_then(|()| Err(anyhow::anyhow!("Secret controller exited unexpectedly without error")))
        }
        () = leadership_lost(&mut leader) => {
            error!(node = %config.node_name, "Lost leadership, shutting down");
            metrics::record_leader_lost(&config.node_name);
            Err(anyhow::anyhow!("leadership lost"))
        }
        signal = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
            signal.context("Failed to listen for shutdown signal")
        }
    };

    stop_tx.send_replace(true);
    ctx.subnets.stop_all().await;
    metrics_server.abort();

    // Releases the lease so another replica can take over right away.
    drop(leader);
    match lease_task.await {
        Ok(Ok(_)) => debug!("Leader lease released"),
        Ok(Err(e)) => warn!("Failed to release leader lease: {e}"),
        Err(e) => warn!("Leader lease task panicked: {e}"),
    }

    outcome
}

/// Resolve once this replica no longer holds the lease.
async fn leadership_lost(leader: &mut watch::Receiver<bool>) {
    loop {
        if leader.changed().await.is_err() || !*leader.borrow_and_update() {
            return;
        }
    }
}

/// Keep a local cache of `HostEndpoint` objects for owner lookups.
fn spawn_host_endpoint_reflector(client: Client) -> reflector::Store<HostEndpoint> {
    let (reader, writer) = reflector::store::<HostEndpoint>();
    let api = Api::<HostEndpoint>::all(client);
    let stream = watcher(api, watcher::Config::default())
        .default_backoff()
        .reflect(writer)
        .applied_objects();
    tokio::spawn(async move {
        stream
            .for_each(|event| {
                if let Err(e) = event {
                    warn!("HostEndpoint watch error: {e}");
                }
                futures::future::ready(())
            })
            .await;
    });
    reader
}

/// Start a DHCP server for every existing `Subnet`.
async fn start_subnets(ctx: &Context) -> Result<()> {
    let api = Api::<Subnet>::all(ctx.client.clone());
    let params = ListParams::default();
    let subnets = retry_api_call(|| api.list(&params), "list subnets")
        .await
        .context("Failed to list subnets")?;
    let specs: Vec<_> = subnets
        .items
        .into_iter()
        .filter(|subnet| !is_deleting(subnet))
        .map(|subnet| (subnet.name_any(), subnet.spec))
        .collect();
    info!(count = specs.len(), "Starting DHCP servers for existing subnets");
    ctx.subnets.start_all(specs).await;
    Ok(())
}

/// Announce every existing `BindingIp` to the subnet manager.
async fn replay_bindings(ctx: &Context) -> Result<()> {
    let api = Api::<BindingIp>::all(ctx.client.clone());
    let params = ListParams::default();
    let bindings = retry_api_call(|| api.list(&params), "list bindingips")
        .await
        .context("Failed to list BindingIps")?;
    let index = ctx.subnets.binding_index();
    let events = ctx.subnets.binding_events();
    let mut replayed = 0usize;
    for binding in bindings.items.iter().filter(|b| !is_deleting(*b)) {
        if admit_binding(
            &index,
            &events,
            &binding.name_any(),
            ManualBinding::from(&binding.spec),
        )
        .await?
        {
            replayed += 1;
        }
    }
    info!(replayed, "Replayed BindingIp events");
    Ok(())
}

async fn run_metrics_server(address: String) -> Result<()> {
    let app = Router::new().route("/metrics", get(metrics_handler));
    let listener = tokio::net::TcpListener::bind(&address)
        .await
        .with_context(|| format!("Failed to bind metrics address {address}"))?;
    info!(address = %address, "Serving metrics");
    axum::serve(listener, app).await?;
    Ok(())
}

async fn metrics_handler() -> impl IntoResponse {
    match metrics::gather_metrics() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

/// Run a reconciler and record its outcome.
async fn timed<F>(kind: &'static str, name: String, reconcile: F) -> Result<Action, ReconcileError>
where
    F: Future<Output = Result<Action>>,
{
    let start = Instant::now();
    match reconcile.await {
        Ok(action) => {
            metrics::record_reconciliation_success(kind, start.elapsed());
            debug!("Reconciled {kind} {name}");
            Ok(action)
        }
        Err(e) => {
            metrics::record_reconciliation_error(kind, start.elapsed());
            error!("Failed to reconcile {kind} {name}: {e:#}");
            Err(e.into())
        }
    }
}

/// Run the `Subnet` controller
async fn run_subnet_controller(ctx: Arc<Context>) -> Result<()> {
    info!("Starting Subnet controller");

    let api = Api::<Subnet>::all(ctx.client.clone());

    Controller::new(api, Config::default())
        .run(reconcile_subnet_wrapper, error_policy, ctx)
        .for_each(|_| futures::future::ready(()))
        .await;

    Ok(())
}

async fn reconcile_subnet_wrapper(
    subnet: Arc<Subnet>,
    ctx: Arc<Context>,
) -> Result<Action, ReconcileError> {
    timed(KIND_SUBNET, subnet.name_any(), reconcile_subnet(ctx, subnet.clone())).await
}

/// Run the `BindingIp` controller
async fn run_bindingip_controller(ctx: Arc<Context>) -> Result<()> {
    info!("Starting BindingIp controller");

    let api = Api::<BindingIp>::all(ctx.client.clone());

    Controller::new(api, Config::default())
        .run(reconcile_bindingip_wrapper, error_policy, ctx)
        .for_each(|_| futures::future::ready(()))
        .await;

    Ok(())
}

async fn reconcile_bindingip_wrapper(
    binding: Arc<BindingIp>,
    ctx: Arc<Context>,
) -> Result<Action, ReconcileError> {
    timed(
        KIND_BINDING_IP,
        binding.name_any(),
        reconcile_bindingip(ctx, binding.clone()),
    )
    .await
}

/// Run the `RedfishStatus` controller
async fn run_redfishstatus_controller(ctx: Arc<Context>) -> Result<()> {
    info!("Starting RedfishStatus controller");

    let api = Api::<RedfishStatus>::all(ctx.client.clone());

    Controller::new(api, Config::default())
        .run(reconcile_redfishstatus_wrapper, error_policy_short, ctx)
        .for_each(|_| futures::future::ready(()))
        .await;

    Ok(())
}

async fn reconcile_redfishstatus_wrapper(
    record: Arc<RedfishStatus>,
    ctx: Arc<Context>,
) -> Result<Action, ReconcileError> {
    timed(
        KIND_REDFISH_STATUS,
        record.name_any(),
        reconcile_redfishstatus(ctx, record.clone()),
    )
    .await
}

/// Run the `SshStatus` controller
async fn run_sshstatus_controller(ctx: Arc<Context>) -> Result<()> {
    info!("Starting SshStatus controller");

    let api = Api::<SshStatus>::all(ctx.client.clone());

    Controller::new(api, Config::default())
        .run(reconcile_sshstatus_wrapper, error_policy_ssh, ctx)
        .for_each(|_| futures::future::ready(()))
        .await;

    Ok(())
}

async fn reconcile_sshstatus_wrapper(
    record: Arc<SshStatus>,
    ctx: Arc<Context>,
) -> Result<Action, ReconcileError> {
    timed(
        KIND_SSH_STATUS,
        record.name_any(),
        reconcile_sshstatus(ctx, record.clone()),
    )
    .await
}

/// Run the `HostEndpoint` controller
async fn run_hostendpoint_controller(ctx: Arc<Context>) -> Result<()> {
    info!("Starting HostEndpoint controller");

    let api = Api::<HostEndpoint>::all(ctx.client.clone());

    Controller::new(api, Config::default())
        .run(reconcile_hostendpoint_wrapper, error_policy_short, ctx)
        .for_each(|_| futures::future::ready(()))
        .await;

    Ok(())
}

async fn reconcile_hostendpoint_wrapper(
    endpoint: Arc<HostEndpoint>,
    ctx: Arc<Context>,
) -> Result<Action, ReconcileError> {
    timed(
        KIND_HOST_ENDPOINT,
        endpoint.name_any(),
        reconcile_hostendpoint(ctx, endpoint.clone()),
    )
    .await
}

/// Run the `HostOperation` controller
async fn run_hostoperation_controller(ctx: Arc<Context>) -> Result<()> {
    info!("Starting HostOperation controller");

    let api = Api::<HostOperation>::all(ctx.client.clone());

    Controller::new(api, Config::default())
        .run(reconcile_hostoperation_wrapper, error_policy_short, ctx)
        .for_each(|_| futures::future::ready(()))
        .await;

    Ok(())
}

async fn reconcile_hostoperation_wrapper(
    operation: Arc<HostOperation>,
    ctx: Arc<Context>,
) -> Result<Action, ReconcileError> {
    timed(
        KIND_HOST_OPERATION,
        operation.name_any(),
        reconcile_hostoperation(ctx, operation.clone()),
    )
    .await
}

/// Run the credential `Secret` controller
async fn run_secret_controller(ctx: Arc<Context>) -> Result<()> {
    info!("Starting credential Secret controller");
    debug!(label = SECRET_CREDENTIAL, "Watching labelled secrets in all namespaces");

    let api = Api::<Secret>::all(ctx.client.clone());

    Controller::new(api, Config::default().labels(SECRET_CREDENTIAL))
        .run(reconcile_secret_wrapper, error_policy, ctx)
        .for_each(|_| futures::future::ready(()))
        .await;

    Ok(())
}

async fn reconcile_secret_wrapper(
    secret: Arc<Secret>,
    ctx: Arc<Context>,
) -> Result<Action, ReconcileError> {
    timed("Secret", secret.name_any(), reconcile_secret(ctx, secret.clone())).await
}

/// Error policy for controllers without a faster retry
fn error_policy<K: Resource<DynamicType = ()>>(
    _resource: Arc<K>,
    _err: &ReconcileError,
    _ctx: Arc<Context>,
) -> Action {
    requeue_after::<K>(ERROR_REQUEUE_DURATION_SECS)
}

/// Error policy for BMC records, endpoints and operations
fn error_policy_short<K: Resource<DynamicType = ()>>(
    _resource: Arc<K>,
    _err: &ReconcileError,
    _ctx: Arc<Context>,
) -> Action {
    requeue_after::<K>(REQUEUE_SHORT_SECS)
}

/// Error policy for SSH records
fn error_policy_ssh<K: Resource<DynamicType = ()>>(
    _resource: Arc<K>,
    _err: &ReconcileError,
    _ctx: Arc<Context>,
) -> Action {
    requeue_after::<K>(REQUEUE_SSH_SECS)
}

fn requeue_after<K: Resource<DynamicType = ()>>(secs: u64) -> Action {
    metrics::record_reconciliation_requeue(&K::kind(&()));
    Action::requeue(Duration::from_secs(secs))
}
