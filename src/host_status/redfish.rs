// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Redfish capability over HTTP(S) and the `RedfishStatus` record.
//!
//! Sessions are stateless: every request carries basic auth. BMCs ship
//! self-signed certificates, so certificate verification is off. The session
//! resolves the first `ComputerSystem` and the first `Manager` once at connect
//! time and addresses them by their `@odata.id` afterwards.

use super::{DhcpDiscovered, HostInfo, HostProtocol, HostSession, HostStatusRecord, LogEntry};
use crate::connection_cache::HostConnection;
use crate::constants::{
    HOST_TYPE_DHCP, KIND_REDFISH_STATUS, PXE_REBOOT_ATTEMPTS, REDFISH_REQUEST_TIMEOUT,
};
use crate::crd::{HostAction, LogDigest, RedfishBasicInfo, RedfishHostStatus};
use crate::dhcp::DhcpClientInfo;
use crate::host_errors::{from_http_status, HostError};
use async_trait::async_trait;
use reqwest::{Client as HttpClient, Method};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

/// Redfish service root
const SERVICE_ROOT: &str = "/redfish/v1";

/// Reset action name inside a system's `Actions`
const RESET_ACTION: &str = "#ComputerSystem.Reset";

/// Dials BMCs over Redfish.
#[derive(Clone, Debug)]
pub struct RedfishProtocol {
    timeout: Duration,
}

impl Default for RedfishProtocol {
    fn default() -> Self {
        Self {
            timeout: REDFISH_REQUEST_TIMEOUT,
        }
    }
}

impl RedfishProtocol {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl HostProtocol for RedfishProtocol {
    type Session = RedfishSession;

    fn name(&self) -> &'static str {
        "redfish"
    }

    async fn connect(&self, endpoint: &HostConnection) -> Result<RedfishSession, HostError> {
        let address = format!("{}:{}", endpoint.address, endpoint.port);
        let scheme = if endpoint.https { "https" } else { "http" };

        let base_url = Url::parse(&format!("{scheme}://{address}")).map_err(|e| {
            HostError::Connect {
                address: address.clone(),
                reason: format!("invalid endpoint URL: {e}"),
            }
        })?;

        let client = HttpClient::builder()
            .danger_accept_invalid_certs(true)
            .timeout(self.timeout)
            .build()
            .map_err(|e| HostError::Connect {
                address: address.clone(),
                reason: e.to_string(),
            })?;

        let mut session = RedfishSession {
            client,
            base_url,
            address,
            username: endpoint.credentials.username.clone(),
            password: endpoint.credentials.password.clone(),
            timeout_secs: self.timeout.as_secs(),
            root: Value::Null,
            system: String::new(),
            manager: None,
        };

        session.root = session.get(SERVICE_ROOT).await?;
        session.system = session
            .first_member(&session.root["Systems"])
            .await?
            .ok_or_else(|| session.protocol_error("service root lists no ComputerSystem"))?;
        session.manager = session.first_member(&session.root["Managers"]).await?;

        debug!(
            host = %endpoint.name,
            system = %session.system,
            manager = ?session.manager,
            "Connected to Redfish service"
        );
        Ok(session)
    }
}

/// An authenticated view of one BMC.
pub struct RedfishSession {
    client: HttpClient,
    base_url: Url,
    address: String,
    username: String,
    password: String,
    timeout_secs: u64,
    root: Value,
    system: String,
    manager: Option<String>,
}

impl RedfishSession {
    /// `@odata.id` of the managed `ComputerSystem`.
    #[must_use]
    pub fn system_path(&self) -> &str {
        &self.system
    }

    fn protocol_error(&self, reason: impl Into<String>) -> HostError {
        HostError::Protocol {
            address: self.address.clone(),
            reason: reason.into(),
        }
    }

    fn transport_error(&self, err: &reqwest::Error) -> HostError {
        if err.is_timeout() {
            HostError::Timeout {
                address: self.address.clone(),
                timeout_secs: self.timeout_secs,
            }
        } else if err.is_connect() {
            HostError::Connect {
                address: self.address.clone(),
                reason: err.to_string(),
            }
        } else {
            self.protocol_error(err.to_string())
        }
    }

    async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<reqwest::Response, HostError> {
        let url = self
            .base_url
            .join(path)
            .map_err(|e| self.protocol_error(format!("{path}: invalid resource path: {e}")))?;
        let mut request = self
            .client
            .request(method.clone(), url.clone())
            .basic_auth(&self.username, Some(&self.password));
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await.map_err(|e| self.transport_error(&e))?;
        let status = response.status();
        if !status.is_success() {
            debug!(method = %method, url = %url, status = %status, "Redfish request failed");
            return Err(from_http_status(&self.address, status, path));
        }
        Ok(response)
    }

    async fn get(&self, path: &str) -> Result<Value, HostError> {
        self.request(Method::GET, path, None)
            .await?
            .json::<Value>()
            .await
            .map_err(|e| self.protocol_error(format!("{path}: invalid JSON: {e}")))
    }

    /// Members of the collection linked from `link`, empty when there is no link.
    async fn members(&self, link: &Value) -> Result<Vec<String>, HostError> {
        let Some(path) = odata_id(link) else {
            return Ok(Vec::new());
        };
        let collection = self.get(path).await?;
        Ok(collection["Members"]
            .as_array()
            .map(|m| m.iter().filter_map(odata_id).map(str::to_string).collect())
            .unwrap_or_default())
    }

    async fn first_member(&self, link: &Value) -> Result<Option<String>, HostError> {
        Ok(self.members(link).await?.into_iter().next())
    }

    /// Entries of every enabled log service in the collection behind `link`.
    async fn service_entries(&self, link: &Value) -> Result<Vec<LogEntry>, HostError> {
        let mut entries = Vec::new();
        for path in self.members(link).await? {
            let service = self.get(&path).await?;
            if service["ServiceEnabled"].as_bool() == Some(false) {
                debug!(address = %self.address, service = %path, "Log service disabled, skipping");
                continue;
            }
            let Some(entries_path) = odata_id(&service["Entries"]) else {
                continue;
            };
            let collection = self.get(entries_path).await?;
            if let Some(members) = collection["Members"].as_array() {
                entries.extend(members.iter().map(log_entry));
            }
        }
        Ok(entries)
    }

    async fn reset(&self, system: &Value, reset_type: &str) -> Result<(), HostError> {
        let target = system["Actions"][RESET_ACTION]["target"]
            .as_str()
            .map_or_else(
                || format!("{}/Actions/ComputerSystem.Reset", self.system),
                str::to_string,
            );
        self.request(
            Method::POST,
            &target,
            Some(&json!({ "ResetType": reset_type })),
        )
        .await?;
        info!(address = %self.address, reset_type, "Sent Redfish reset");
        Ok(())
    }

    async fn pxe_reboot(&self, system: &Value) -> Result<(), HostError> {
        let boot = json!({
            "Boot": {
                "BootSourceOverrideTarget": "Pxe",
                "BootSourceOverrideEnabled": "Once"
            }
        });

        let mut last_error = self.protocol_error("PXE reboot not attempted");
        for attempt in 1..=PXE_REBOOT_ATTEMPTS {
            let result: Result<(), HostError> = async {
                self.request(Method::PATCH, &self.system, Some(&boot)).await?;
                match self.reset(system, "GracefulRestart").await {
                    Ok(()) => Ok(()),
                    Err(e) => {
                        debug!(address = %self.address, error = %e, "GracefulRestart refused, forcing restart");
                        self.reset(system, "ForceRestart").await
                    }
                }
            }
            .await;

            match result {
                Ok(()) => return Ok(()),
                Err(e) => {
                    warn!(address = %self.address, attempt, error = %e, "PXE reboot attempt failed");
                    last_error = e;
                }
            }
        }
        Err(last_error)
    }
}

/// `@odata.id` of a link object.
fn odata_id(link: &Value) -> Option<&str> {
    link["@odata.id"].as_str()
}

/// Render a scalar JSON value, skipping nulls and containers.
fn scalar(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn put(info: &mut HostInfo, key: &str, value: &Value) {
    if let Some(v) = scalar(value) {
        info.insert(key.to_string(), v);
    }
}

/// Inventory facts of a `ComputerSystem` document.
fn system_info(info: &mut HostInfo, system: &Value) {
    put(info, "BiosVersion", &system["BiosVersion"]);
    put(info, "HostName", &system["HostName"]);
    put(info, "Manufacturer", &system["Manufacturer"]);
    put(info, "PowerState", &system["PowerState"]);
    put(info, "SystemStatus", &system["Status"]["Health"]);

    if let Some(resets) =
        system["Actions"][RESET_ACTION]["ResetType@Redfish.AllowableValues"].as_array()
    {
        let resets: Vec<&str> = resets.iter().filter_map(Value::as_str).collect();
        if !resets.is_empty() {
            info.insert("SupportedReset".to_string(), resets.join(","));
        }
    }

    let cpu = &system["ProcessorSummary"];
    put(info, "CpuPhysicalCore", &cpu["CoreCount"]);
    put(info, "CpuLogicalCore", &cpu["LogicalProcessorCount"]);
    put(info, "CpuModel", &cpu["Model"]);
    put(info, "CpuStatus", &cpu["Status"]["Health"]);

    let memory = &system["MemorySummary"];
    put(info, "MemoryTotalGiB", &memory["TotalSystemMemoryGiB"]);
    put(info, "MemoryStatus", &memory["Status"]["Health"]);
}

/// One-line description of a memory module.
fn memory_module(module: &Value) -> String {
    let mut parts = Vec::new();
    if let Some(capacity) = scalar(&module["CapacityMiB"]) {
        parts.push(format!("{capacity}MiB"));
    }
    for key in ["MemoryDeviceType", "Manufacturer"] {
        if let Some(v) = scalar(&module[key]) {
            parts.push(v);
        }
    }
    if let Some(speed) = scalar(&module["OperatingSpeedMhz"]) {
        parts.push(format!("{speed}MHz"));
    }
    parts.join(" ")
}

fn log_entry(entry: &Value) -> LogEntry {
    let text = |key: &str| scalar(&entry[key]).unwrap_or_default();
    LogEntry {
        created: text("Created"),
        severity: text("Severity"),
        sensor_type: text("SensorType"),
        message: text("Message"),
    }
}

#[async_trait]
impl HostSession for RedfishSession {
    async fn is_healthy(&self) -> bool {
        self.get(&self.system).await.is_ok()
    }

    async fn info(&self) -> Result<HostInfo, HostError> {
        let mut info = HostInfo::new();
        put(&mut info, "RedfishVersion", &self.root["RedfishVersion"]);
        put(&mut info, "Vendor", &self.root["Vendor"]);

        let system = self.get(&self.system).await?;
        system_info(&mut info, &system);

        if let Some(manager) = &self.manager {
            let manager = self.get(manager).await?;
            put(&mut info, "BmcFirmwareVersion", &manager["FirmwareVersion"]);
            put(&mut info, "BmcStatus", &manager["Status"]["Health"]);
        }

        let mut modules = Vec::new();
        for path in self.members(&system["Memory"]).await? {
            let module = self.get(&path).await?;
            let id = scalar(&module["Id"]).unwrap_or_else(|| path.clone());
            modules.push((id, memory_module(&module)));
        }
        if !modules.is_empty() {
            modules.sort();
            info.insert("MemoryChipsAccount".to_string(), modules.len().to_string());
            for (id, description) in modules {
                info.insert(format!("Memory[{id}]"), description);
            }
        }

        Ok(info)
    }

    async fn logs(&self) -> Result<Vec<LogEntry>, HostError> {
        let system = self.get(&self.system).await?;
        let mut entries = self.service_entries(&system["LogServices"]).await?;

        if let Some(manager) = &self.manager {
            let manager = self.get(manager).await?;
            entries.extend(self.service_entries(&manager["LogServices"]).await?);
        }

        entries.sort_by(|a, b| b.created.cmp(&a.created));
        Ok(entries)
    }

    async fn power(&self, action: HostAction) -> Result<(), HostError> {
        let system = self.get(&self.system).await?;
        match action.reset_type() {
            Some(reset_type) => self.reset(&system, reset_type).await,
            None => self.pxe_reboot(&system).await,
        }
    }
}

impl HostStatusRecord for RedfishHostStatus {
    const KIND: &'static str = KIND_REDFISH_STATUS;

    fn healthy(&self) -> bool {
        self.healthy
    }

    fn set_healthy(&mut self, healthy: bool) {
        self.healthy = healthy;
    }

    fn info(&self) -> &HostInfo {
        &self.info
    }

    fn set_info(&mut self, info: HostInfo) {
        self.info = info;
    }

    fn set_last_update_time(&mut self, time: String) {
        self.last_update_time = Some(time).filter(|t| !t.is_empty());
    }

    fn log_digest(&self) -> Option<&LogDigest> {
        Some(&self.log)
    }

    fn set_log_digest(&mut self, digest: LogDigest) {
        self.log = digest;
    }
}

fn non_empty(s: &str) -> Option<String> {
    (!s.is_empty()).then(|| s.to_string())
}

impl DhcpDiscovered for RedfishHostStatus {
    fn for_dhcp_client(client: &DhcpClientInfo, endpoint: &HostConnection) -> Self {
        Self {
            healthy: false,
            last_update_time: None,
            basic: RedfishBasicInfo {
                cluster_name: client.cluster_name.clone(),
                r#type: HOST_TYPE_DHCP.to_string(),
                ip_addr: client.ip.clone(),
                secret_name: endpoint.secret_name.clone(),
                secret_namespace: endpoint.secret_namespace.clone(),
                https: endpoint.https,
                port: i32::from(endpoint.port),
                mac: non_empty(&client.mac),
                active_dhcp_client: true,
                dhcp_expire_time: non_empty(&client.expire_time_rfc3339()),
                subnet_name: non_empty(&client.subnet_name),
                hostname: non_empty(&client.hostname),
            },
            info: HostInfo::new(),
            log: LogDigest::default(),
        }
    }

    fn refresh_lease(&mut self, client: &DhcpClientInfo) -> bool {
        let before = self.basic.clone();
        self.basic.mac = non_empty(&client.mac);
        self.basic.active_dhcp_client = true;
        self.basic.dhcp_expire_time = non_empty(&client.expire_time_rfc3339());
        self.basic.hostname = non_empty(&client.hostname);
        if !client.subnet_name.is_empty() {
            self.basic.subnet_name = Some(client.subnet_name.clone());
        }
        self.basic != before
    }

    fn deactivate(&mut self) -> bool {
        let changed = self.basic.active_dhcp_client;
        self.basic.active_dhcp_client = false;
        changed
    }
}

#[cfg(test)]
#[path = "redfish_tests.rs"]
mod redfish_tests;
