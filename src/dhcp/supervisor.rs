// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Per-subnet DHCP daemon supervisor.
//!
//! One [`DhcpSupervisor`] owns everything about one subnet on this node: the
//! listening interface, the rendered daemon config, the host-binding file, the
//! daemon process, the lease snapshot, and the `Subnet` status.
//!
//! # Lifecycle
//!
//! ```text
//! stopped -> interface-provisioned -> config-rendered -> process-running
//!                                                         |        ^
//!                                                 reload  |        | restart
//!                                                         v        |
//!                                                      process-running
//! ```
//!
//! Two background tasks run per subnet:
//!
//! - the monitor, which reacts to lease file changes, spec updates, binding
//!   events, and a liveness tick. A dead daemon is restarted with a freshly
//!   rendered config; a spec or binding change only reloads it.
//! - the status worker, which coalesces publish requests on a short tick and
//!   writes the `Subnet` status, retrying on conflict.
//!
//! Every start, restart, and reload requests exactly one publish.
//!
//! # Locking
//!
//! The spec, lease snapshot, and binding map sit behind the subnet's data lock.
//! The binding file has its own lock, so writing it never blocks lease readers.

use super::bindings::{
    ensure_file, merge_subnet_status, render_bindings, write_atomic, BindingMap, ManualBinding,
    StatusReport,
};
use super::config_render::{write_daemon_config, SubnetPaths, TemplateData};
use super::interface::{provision_interface, LinkManager};
use super::lease::{
    diff_leases, parse_leases, read_lease_file, LeaseContext, LeaseEvent, LeaseSnapshot,
};
use crate::config::AgentConfig;
use crate::constants::{
    DHCP_DAEMON_BINARY, DHCP_LIVENESS_INTERVAL, DHCP_STARTUP_GRACE, DHCP_STATUS_PUBLISH_TICK,
    KIND_SUBNET,
};
use crate::crd::{SubnetSpec, SubnetStatus};
use crate::dhcp_errors::DhcpError;
use crate::metrics;
use crate::reconcilers::retry::{conflict_backoff, retry_on_conflict};
use crate::reconcilers::status::{append_condition, create_condition, repeats_latest};
use crate::status_reasons::{CONDITION_TYPE_DHCP_SERVER, REASON_FAILED, STATUS_FALSE};
use crate::store::{StatusStore, StoreError};
use async_trait::async_trait;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::Path;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot, watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

// ============================================================================
// Daemon process
// ============================================================================

/// A running daemon.
#[async_trait]
pub trait DaemonProcess: Send + Sync {
    /// Whether the process still exists and accepts signals.
    fn is_alive(&self) -> bool;

    /// Ask the daemon to re-read its config and host files.
    fn reload(&self) -> Result<(), DhcpError>;

    /// Terminate the daemon and wait for it to exit.
    async fn stop(&mut self);
}

/// Starts daemons.
#[async_trait]
pub trait DaemonLauncher: Send + Sync {
    async fn launch(&self, subnet: &str, config: &Path) -> Result<Box<dyn DaemonProcess>, DhcpError>;
}

/// Launches `dnsmasq -C <config> -d` with the agent's stdout and stderr.
#[derive(Debug, Default, Clone)]
pub struct DnsmasqLauncher;

#[async_trait]
impl DaemonLauncher for DnsmasqLauncher {
    async fn launch(&self, subnet: &str, config: &Path) -> Result<Box<dyn DaemonProcess>, DhcpError> {
        let child = Command::new(DHCP_DAEMON_BINARY)
            .arg("-C")
            .arg(config)
            .arg("-d")
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| DhcpError::Process {
                subnet: subnet.to_string(),
                reason: format!("failed to spawn {DHCP_DAEMON_BINARY}: {e}"),
            })?;

        let pid = child.id().and_then(|id| i32::try_from(id).ok()).map(Pid::from_raw);
        info!(subnet = %subnet, pid = ?pid, config = %config.display(), "Spawned DHCP daemon");

        let exited = Arc::new(AtomicBool::new(false));
        let (kill_tx, kill_rx) = oneshot::channel();
        let watcher = tokio::spawn(watch_child(
            subnet.to_string(),
            child,
            kill_rx,
            Arc::clone(&exited),
        ));

        Ok(Box::new(DnsmasqProcess {
            subnet: subnet.to_string(),
            pid,
            exited,
            kill_tx: Some(kill_tx),
            watcher: Some(watcher),
        }))
    }
}

/// Wait for the child to exit, or kill it when asked to.
async fn watch_child(
    subnet: String,
    mut child: Child,
    kill_rx: oneshot::Receiver<()>,
    exited: Arc<AtomicBool>,
) {
    tokio::select! {
        status = child.wait() => {
            exited.store(true, Ordering::SeqCst);
            match status {
                Ok(status) => warn!(subnet = %subnet, status = %status, "DHCP daemon exited"),
                Err(e) => error!(subnet = %subnet, error = %e, "Failed waiting on DHCP daemon"),
            }
        }
        _ = kill_rx => {
            if let Err(e) = child.kill().await {
                warn!(subnet = %subnet, error = %e, "Failed to kill DHCP daemon");
            }
            exited.store(true, Ordering::SeqCst);
            debug!(subnet = %subnet, "DHCP daemon stopped");
        }
    }
}

struct DnsmasqProcess {
    subnet: String,
    pid: Option<Pid>,
    exited: Arc<AtomicBool>,
    kill_tx: Option<oneshot::Sender<()>>,
    watcher: Option<JoinHandle<()>>,
}

#[async_trait]
impl DaemonProcess for DnsmasqProcess {
    fn is_alive(&self) -> bool {
        if self.exited.load(Ordering::SeqCst) {
            return false;
        }
        self.pid.is_some_and(|pid| kill(pid, None::<Signal>).is_ok())
    }

    fn reload(&self) -> Result<(), DhcpError> {
        let pid = self.pid.ok_or_else(|| DhcpError::Process {
            subnet: self.subnet.clone(),
            reason: "daemon has no pid".to_string(),
        })?;
        kill(pid, Signal::SIGHUP).map_err(|e| DhcpError::Process {
            subnet: self.subnet.clone(),
            reason: format!("SIGHUP failed: {e}"),
        })
    }

    async fn stop(&mut self) {
        if let Some(tx) = self.kill_tx.take() {
            let _ = tx.send(());
        }
        if let Some(watcher) = self.watcher.take() {
            if let Err(e) = watcher.await {
                warn!(subnet = %self.subnet, error = %e, "DHCP daemon watcher panicked");
            }
        }
    }
}

// ============================================================================
// Supervisor
// ============================================================================

/// Intervals used by the supervisor's background tasks.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SupervisorTiming {
    /// Period of the liveness probe and the lease fallback check.
    pub liveness_interval: Duration,
    /// Coalescing window for status publishes. Must be non-zero.
    pub publish_tick: Duration,
    /// Wait after a daemon start before requesting a publish.
    pub startup_grace: Duration,
}

impl Default for SupervisorTiming {
    fn default() -> Self {
        Self {
            liveness_interval: DHCP_LIVENESS_INTERVAL,
            publish_tick: DHCP_STATUS_PUBLISH_TICK,
            startup_grace: DHCP_STARTUP_GRACE,
        }
    }
}

/// Collaborators shared by every supervisor on this node.
#[derive(Clone)]
pub struct SupervisorDeps {
    pub config: Arc<AgentConfig>,
    pub links: Arc<dyn LinkManager>,
    pub launcher: Arc<dyn DaemonLauncher>,
    pub subnets: Arc<dyn StatusStore<SubnetStatus>>,
    /// Lease events for the Redfish host status synchronizer.
    pub lease_events: mpsc::Sender<LeaseEvent>,
    pub timing: SupervisorTiming,
}

#[derive(Debug)]
enum SupervisorCommand {
    Update(Box<SubnetSpec>),
    BindingAdded(ManualBinding),
    BindingDeleted(ManualBinding),
}

/// What the monitor does with the daemon after handling a trigger.
enum Step {
    Idle,
    Reload,
    Restart,
}

struct SubnetState {
    spec: SubnetSpec,
    leases: LeaseSnapshot,
    bindings: BindingMap,
}

struct Shared {
    name: String,
    deps: SupervisorDeps,
    paths: SubnetPaths,
    data: RwLock<SubnetState>,
    binding_file: Mutex<()>,
    publish_tx: mpsc::UnboundedSender<()>,
    publish_requests: AtomicU64,
    restarts: AtomicU64,
}

/// Handle to one subnet's supervisor. Dropping it stops the daemon.
pub struct DhcpSupervisor {
    shared: Arc<Shared>,
    commands: mpsc::UnboundedSender<SupervisorCommand>,
    stop_tx: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl DhcpSupervisor {
    /// Provision the interface, render the config, start the daemon, and spawn
    /// the monitor and status worker.
    ///
    /// # Errors
    ///
    /// Returns the first provisioning, rendering, or spawn failure. Nothing is
    /// left running in that case.
    pub async fn start(name: &str, spec: SubnetSpec, deps: SupervisorDeps) -> Result<Self, DhcpError> {
        info!(subnet = %name, interface = %spec.interface.interface, "Starting DHCP supervisor");

        let (publish_tx, publish_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            name: name.to_string(),
            paths: SubnetPaths::new(&deps.config, name),
            deps,
            data: RwLock::new(SubnetState {
                spec,
                leases: LeaseSnapshot::new(),
                bindings: BindingMap::new(),
            }),
            binding_file: Mutex::new(()),
            publish_tx,
            publish_requests: AtomicU64::new(0),
            restarts: AtomicU64::new(0),
        });

        let process = shared.start_daemon().await?;

        let (commands, commands_rx) = mpsc::unbounded_channel();
        let (stop_tx, stop_rx) = watch::channel(false);
        let monitor = tokio::spawn(run_monitor(
            Arc::clone(&shared),
            process,
            commands_rx,
            stop_rx.clone(),
        ));
        let worker = tokio::spawn(run_status_worker(Arc::clone(&shared), publish_rx, stop_rx));

        Ok(Self {
            shared,
            commands,
            stop_tx,
            tasks: Mutex::new(vec![monitor, worker]),
        })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    #[must_use]
    pub fn paths(&self) -> &SubnetPaths {
        &self.shared.paths
    }

    pub async fn spec(&self) -> SubnetSpec {
        self.shared.data.read().await.spec.clone()
    }

    pub async fn leases(&self) -> LeaseSnapshot {
        self.shared.data.read().await.leases.clone()
    }

    pub async fn bindings(&self) -> BindingMap {
        self.shared.data.read().await.bindings.clone()
    }

    /// Apply a new spec: re-render the config and reload the daemon.
    ///
    /// # Errors
    ///
    /// Returns [`DhcpError::NotRunning`] once the supervisor has stopped.
    pub fn update(&self, spec: SubnetSpec) -> Result<(), DhcpError> {
        self.send(SupervisorCommand::Update(Box::new(spec)))
    }

    /// Add or replace a static binding.
    ///
    /// # Errors
    ///
    /// Returns [`DhcpError::NotRunning`] once the supervisor has stopped.
    pub fn add_binding(&self, binding: ManualBinding) -> Result<(), DhcpError> {
        self.send(SupervisorCommand::BindingAdded(binding))
    }

    /// Remove a static binding if its MAC still matches.
    ///
    /// # Errors
    ///
    /// Returns [`DhcpError::NotRunning`] once the supervisor has stopped.
    pub fn remove_binding(&self, binding: ManualBinding) -> Result<(), DhcpError> {
        self.send(SupervisorCommand::BindingDeleted(binding))
    }

    fn send(&self, command: SupervisorCommand) -> Result<(), DhcpError> {
        self.commands
            .send(command)
            .map_err(|_| DhcpError::NotRunning(self.shared.name.clone()))
    }

    /// Status publishes requested so far.
    #[must_use]
    pub fn publish_requests(&self) -> u64 {
        self.shared.publish_requests.load(Ordering::SeqCst)
    }

    /// Daemon restarts after a failed liveness probe.
    #[must_use]
    pub fn restarts(&self) -> u64 {
        self.shared.restarts.load(Ordering::SeqCst)
    }

    /// Stop the background tasks and the daemon, and wait for both.
    pub async fn stop(&self) {
        let _ = self.stop_tx.send(true);
        let tasks = std::mem::take(&mut *self.tasks.lock().await);
        for task in tasks {
            if let Err(e) = task.await {
                warn!(subnet = %self.shared.name, error = %e, "Supervisor task panicked");
            }
        }
        info!(subnet = %self.shared.name, "DHCP supervisor stopped");
    }
}

impl Drop for DhcpSupervisor {
    fn drop(&mut self) {
        let _ = self.stop_tx.send(true);
    }
}

impl Shared {
    fn request_publish(&self) {
        self.publish_requests.fetch_add(1, Ordering::SeqCst);
        if self.publish_tx.send(()).is_err() {
            debug!(subnet = %self.name, "Status worker gone, dropping publish request");
        }
    }

    /// Provision, render, launch, and request the post-start publish.
    async fn start_daemon(&self) -> Result<Box<dyn DaemonProcess>, DhcpError> {
        let interface = self.data.read().await.spec.interface.clone();
        let link = provision_interface(self.deps.links.as_ref(), &interface).await?;
        debug!(subnet = %self.name, interface = %link, "Interface ready");

        self.render_config().await?;

        let process = self.deps.launcher.launch(&self.name, &self.paths.config).await?;
        tokio::time::sleep(self.deps.timing.startup_grace).await;
        self.request_publish();
        Ok(process)
    }

    /// Render the daemon config, then refresh leases and rewrite the binding file.
    async fn render_config(&self) -> Result<(), DhcpError> {
        let data = {
            let state = self.data.read().await;
            TemplateData::build(&self.name, &state.spec, &self.paths, &self.deps.config)?
        };

        for file in [&self.paths.lease, &self.paths.log] {
            if let Some(dir) = file.parent() {
                tokio::fs::create_dir_all(dir)
                    .await
                    .map_err(|e| DhcpError::io(dir, e))?;
            }
        }
        ensure_file(&self.paths.bindings).await?;
        write_daemon_config(
            &self.deps.config.dhcp_config_template_path,
            &data,
            &self.paths.config,
        )
        .await?;

        self.refresh_leases().await?;
        self.write_bindings().await
    }

    async fn write_bindings(&self) -> Result<(), DhcpError> {
        let _file = self.binding_file.lock().await;
        let content = render_bindings(&self.data.read().await.bindings);
        write_atomic(&self.paths.bindings, &content).await?;
        debug!(subnet = %self.name, path = %self.paths.bindings.display(), "Wrote binding file");
        Ok(())
    }

    /// Re-read the lease file and swap in the new snapshot.
    ///
    /// Returns whether any client appeared or changed MAC or hostname. A missing
    /// file leaves the snapshot untouched.
    async fn refresh_leases(&self) -> Result<bool, DhcpError> {
        let Some(content) = read_lease_file(&self.paths.lease, true).await? else {
            return Ok(false);
        };

        let (diff, sync_enabled) = {
            let mut state = self.data.write().await;
            let ctx = LeaseContext::from_subnet(&self.name, &state.spec);
            let current = parse_leases(&content, &ctx);
            let diff = diff_leases(&state.leases, &current);
            state.leases = current;
            (diff, ctx.sync_enabled)
        };

        for event in diff.events {
            metrics::record_lease_event(&self.name, event.kind.as_str());
            if !sync_enabled {
                continue;
            }
            debug!(
                subnet = %self.name,
                ip = %event.client.ip,
                mac = %event.client.mac,
                kind = event.kind.as_str(),
                "Forwarding lease event"
            );
            if self.deps.lease_events.send(event).await.is_err() {
                warn!(subnet = %self.name, "Lease event consumer is gone");
                break;
            }
        }
        Ok(diff.changed)
    }

    /// React to a lease file change. `from_watcher` publishes even when only
    /// expiries moved.
    async fn on_lease_change(&self, from_watcher: bool) {
        match self.refresh_leases().await {
            Ok(changed) if changed || from_watcher => self.request_publish(),
            Ok(_) => {}
            Err(e) => error!(subnet = %self.name, error = %e, "Failed to process lease file"),
        }
    }

    async fn apply_command(&self, command: SupervisorCommand) -> Step {
        match command {
            SupervisorCommand::Update(spec) => {
                info!(subnet = %self.name, "Subnet spec changed, regenerating config");
                let interface = spec.interface.clone();
                self.data.write().await.spec = *spec;

                let result = match provision_interface(self.deps.links.as_ref(), &interface).await {
                    Ok(_) => self.render_config().await,
                    Err(e) => Err(e.into()),
                };
                match result {
                    Ok(()) => Step::Reload,
                    Err(e) => {
                        self.report_failure(&e).await;
                        Step::Idle
                    }
                }
            }
            SupervisorCommand::BindingAdded(binding) => {
                if !self.upsert_binding(binding).await {
                    return Step::Idle;
                }
                self.rewrite_bindings().await
            }
            SupervisorCommand::BindingDeleted(binding) => {
                if !self.remove_binding(&binding).await {
                    return Step::Idle;
                }
                self.rewrite_bindings().await
            }
        }
    }

    async fn rewrite_bindings(&self) -> Step {
        match self.write_bindings().await {
            Ok(()) => Step::Reload,
            Err(e) => {
                error!(subnet = %self.name, error = %e, "Failed to write binding file");
                Step::Idle
            }
        }
    }

    /// Returns `false` when an identical binding is already present.
    async fn upsert_binding(&self, binding: ManualBinding) -> bool {
        let mut state = self.data.write().await;
        if let Some(existing) = state.bindings.get(&binding.ip) {
            if existing.mac.eq_ignore_ascii_case(&binding.mac) && existing.hostname == binding.hostname {
                debug!(subnet = %self.name, ip = %binding.ip, "Binding unchanged");
                return false;
            }
        }
        info!(subnet = %self.name, ip = %binding.ip, mac = %binding.mac, "Adding static binding");
        state.bindings.insert(binding.ip.clone(), binding);
        true
    }

    /// Returns `false` when no binding for the IP carries this MAC.
    async fn remove_binding(&self, binding: &ManualBinding) -> bool {
        let mut state = self.data.write().await;
        match state.bindings.get(&binding.ip) {
            Some(existing) if existing.mac.eq_ignore_ascii_case(&binding.mac) => {
                info!(subnet = %self.name, ip = %binding.ip, mac = %binding.mac, "Removing static binding");
                state.bindings.remove(&binding.ip);
                true
            }
            Some(existing) => {
                debug!(
                    subnet = %self.name,
                    ip = %binding.ip,
                    bound_mac = %existing.mac,
                    requested_mac = %binding.mac,
                    "Ignoring binding removal for a different MAC"
                );
                false
            }
            None => false,
        }
    }

    fn reload(&self, process: &dyn DaemonProcess) {
        match process.reload() {
            Ok(()) => {
                info!(subnet = %self.name, "Reloaded DHCP daemon");
                self.request_publish();
            }
            Err(e) => warn!(subnet = %self.name, error = %e, "Reload failed, liveness probe will restart"),
        }
    }

    async fn restart(&self) -> Option<Box<dyn DaemonProcess>> {
        warn!(subnet = %self.name, "DHCP daemon is not running, restarting");
        match self.start_daemon().await {
            Ok(process) => {
                self.restarts.fetch_add(1, Ordering::SeqCst);
                metrics::record_daemon_restart(&self.name);
                Some(process)
            }
            Err(e) => {
                self.report_failure(&e).await;
                None
            }
        }
    }

    async fn report_failure(&self, err: &DhcpError) {
        error!(subnet = %self.name, reason = err.status_reason(), error = %err, "DHCP server failure");
        if let Err(e) = record_failure(self.deps.subnets.as_ref(), &self.name, &err.to_string()).await {
            warn!(subnet = %self.name, error = %e, "Failed to record failure condition");
        }
    }

    /// Write the current report to the `Subnet` status.
    ///
    /// Returns `false` when the stored status already matches.
    async fn publish_status(&self) -> Result<bool, StoreError> {
        let store = self.deps.subnets.as_ref();
        let name = self.name.as_str();
        let node = self.deps.config.node_name.as_str();
        let data = &self.data;
        let mut backoff = conflict_backoff();

        retry_on_conflict(
            &mut backoff,
            move || async move {
                let report = {
                    let state = data.read().await;
                    StatusReport::build(
                        &state.spec.ipv4_subnet.ip_range,
                        &state.leases,
                        &state.bindings,
                        node,
                    )
                };
                let Some(record) = store.get(name).await? else {
                    return Err(StoreError::NotFound {
                        kind: KIND_SUBNET.to_string(),
                        name: name.to_string(),
                    });
                };

                let current = record.status.unwrap_or_default();
                match merge_subnet_status(&current, &report) {
                    None => Ok(false),
                    Some(updated) => {
                        store
                            .update_status(name, &updated, record.resource_version.as_deref())
                            .await?;
                        Ok(true)
                    }
                }
            },
            "publish subnet status",
        )
        .await
    }
}

/// Append `DhcpServer/False/Failed/<message>` to the subnet's conditions.
///
/// Nothing is written when the latest `DhcpServer` condition already says the same.
///
/// # Errors
///
/// Returns the store error once conflict retries are exhausted, or
/// [`StoreError::NotFound`] if the subnet is gone.
pub async fn record_failure(
    store: &dyn StatusStore<SubnetStatus>,
    subnet: &str,
    message: &str,
) -> Result<(), StoreError> {
    let mut backoff = conflict_backoff();
    retry_on_conflict(
        &mut backoff,
        move || async move {
            let record = store.get(subnet).await?.ok_or_else(|| StoreError::NotFound {
                kind: KIND_SUBNET.to_string(),
                name: subnet.to_string(),
            })?;

            let mut status = record.status.unwrap_or_default();
            let condition =
                create_condition(CONDITION_TYPE_DHCP_SERVER, STATUS_FALSE, REASON_FAILED, message);
            if repeats_latest(&status.conditions, &condition) {
                return Ok(());
            }
            append_condition(&mut status.conditions, condition);
            store
                .update_status(subnet, &status, record.resource_version.as_deref())
                .await
        },
        "record subnet failure",
    )
    .await
}

/// Whether a watcher event touches the lease file.
pub(crate) fn is_lease_write(event: &notify::Event, lease: &Path) -> bool {
    matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_))
        && event
            .paths
            .iter()
            .any(|p| p.file_name().is_some() && p.file_name() == lease.file_name())
}

/// Watch the lease directory. Without a watcher the liveness tick still
/// picks up lease changes.
fn watch_lease_dir(subnet: &str, lease: &Path) -> (Option<RecommendedWatcher>, mpsc::UnboundedReceiver<()>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let Some(dir) = lease.parent() else {
        return (None, rx);
    };

    let target = lease.to_path_buf();
    let name = subnet.to_string();
    let watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| match res {
        Ok(event) if is_lease_write(&event, &target) => {
            let _ = tx.send(());
        }
        Ok(_) => {}
        Err(e) => warn!(subnet = %name, error = %e, "Lease watcher error"),
    })
    .and_then(|mut watcher| {
        watcher
            .watch(dir, RecursiveMode::NonRecursive)
            .map(|()| watcher)
    });

    match watcher {
        Ok(watcher) => (Some(watcher), rx),
        Err(e) => {
            warn!(subnet = %subnet, dir = %dir.display(), error = %e, "Cannot watch lease directory, relying on periodic checks");
            (None, rx)
        }
    }
}

async fn run_monitor(
    shared: Arc<Shared>,
    mut process: Box<dyn DaemonProcess>,
    mut commands: mpsc::UnboundedReceiver<SupervisorCommand>,
    mut stop: watch::Receiver<bool>,
) {
    let (_watcher, mut lease_changes) = watch_lease_dir(&shared.name, &shared.paths.lease);
    let mut liveness = tokio::time::interval(shared.deps.timing.liveness_interval);
    liveness.set_missed_tick_behavior(MissedTickBehavior::Delay);
    liveness.tick().await;

    loop {
        let step = tokio::select! {
            _ = stop.changed() => break,
            Some(()) = lease_changes.recv() => {
                shared.on_lease_change(true).await;
                Step::Idle
            }
            Some(command) = commands.recv() => shared.apply_command(command).await,
            _ = liveness.tick() => {
                shared.on_lease_change(false).await;
                if process.is_alive() { Step::Idle } else { Step::Restart }
            }
        };

        match step {
            Step::Idle => {}
            Step::Reload => shared.reload(process.as_ref()),
            Step::Restart => {
                process.stop().await;
                if let Some(restarted) = shared.restart().await {
                    process = restarted;
                }
            }
        }
    }

    process.stop().await;
    debug!(subnet = %shared.name, "Supervisor monitor exited");
}

async fn run_status_worker(
    shared: Arc<Shared>,
    mut requests: mpsc::UnboundedReceiver<()>,
    mut stop: watch::Receiver<bool>,
) {
    let mut tick = tokio::time::interval(shared.deps.timing.publish_tick);
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut pending = false;

    loop {
        tokio::select! {
            _ = stop.changed() => break,
            Some(()) = requests.recv() => pending = true,
            _ = tick.tick() => {
                if pending {
                    pending = false;
                    match shared.publish_status().await {
                        Ok(true) => debug!(subnet = %shared.name, "Published subnet status"),
                        Ok(false) => debug!(subnet = %shared.name, "Subnet status unchanged"),
                        Err(e) if e.is_not_found() => {
                            debug!(subnet = %shared.name, "Subnet is gone, skipping status publish");
                        }
                        Err(e) => error!(subnet = %shared.name, error = %e, "Failed to publish subnet status"),
                    }
                }
            }
        }
    }
}

// ============================================================================
// In-memory launcher
// ============================================================================

#[cfg(any(test, feature = "test-util"))]
pub use memory::MemoryLauncher;

#[cfg(any(test, feature = "test-util"))]
mod memory {
    use super::{DaemonLauncher, DaemonProcess};
    use crate::dhcp_errors::DhcpError;
    use async_trait::async_trait;
    use std::path::Path;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::sync::Mutex;

    /// Launcher whose processes are flags, for tests.
    #[derive(Default)]
    pub struct MemoryLauncher {
        launches: AtomicUsize,
        reloads: Arc<AtomicUsize>,
        refuse: AtomicBool,
        running: Mutex<Vec<Arc<AtomicBool>>>,
    }

    impl MemoryLauncher {
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        #[must_use]
        pub fn launches(&self) -> usize {
            self.launches.load(Ordering::SeqCst)
        }

        #[must_use]
        pub fn reloads(&self) -> usize {
            self.reloads.load(Ordering::SeqCst)
        }

        /// Make subsequent launches fail.
        pub fn refuse_launches(&self, refuse: bool) {
            self.refuse.store(refuse, Ordering::SeqCst);
        }

        /// Mark every process dead, as if killed from outside.
        pub async fn kill_all(&self) {
            for alive in self.running.lock().await.iter() {
                alive.store(false, Ordering::SeqCst);
            }
        }

        /// Number of processes still alive.
        pub async fn alive(&self) -> usize {
            self.running
                .lock()
                .await
                .iter()
                .filter(|a| a.load(Ordering::SeqCst))
                .count()
        }
    }

    #[async_trait]
    impl DaemonLauncher for MemoryLauncher {
        async fn launch(&self, subnet: &str, _config: &Path) -> Result<Box<dyn DaemonProcess>, DhcpError> {
            if self.refuse.load(Ordering::SeqCst) {
                return Err(DhcpError::Process {
                    subnet: subnet.to_string(),
                    reason: "launch refused".to_string(),
                });
            }
            self.launches.fetch_add(1, Ordering::SeqCst);
            let alive = Arc::new(AtomicBool::new(true));
            self.running.lock().await.push(Arc::clone(&alive));
            Ok(Box::new(MemoryProcess {
                alive,
                reloads: Arc::clone(&self.reloads),
            }))
        }
    }

    struct MemoryProcess {
        alive: Arc<AtomicBool>,
        reloads: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl DaemonProcess for MemoryProcess {
        fn is_alive(&self) -> bool {
            self.alive.load(Ordering::SeqCst)
        }

        fn reload(&self) -> Result<(), DhcpError> {
            if !self.is_alive() {
                return Err(DhcpError::Process {
                    subnet: String::new(),
                    reason: "process is dead".to_string(),
                });
            }
            self.reloads.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn stop(&mut self) {
            self.alive.store(false, Ordering::SeqCst);
        }
    }
}

#[cfg(test)]
#[path = "supervisor_tests.rs"]
mod supervisor_tests;
