// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! SSH capability and the `SshStatus` record.
//!
//! Host facts are gathered by running a fixed set of shell commands. A command
//! that fails leaves its key out of the info map; a closed session fails the
//! whole probe.

use super::{HostInfo, HostProtocol, HostSession, HostStatusRecord};
use crate::connection_cache::{Credentials, HostConnection};
use crate::constants::{KIND_SSH_STATUS, SSH_DIAL_TIMEOUT};
use crate::crd::SshHostStatus;
use crate::host_errors::HostError;
use async_trait::async_trait;
use russh::client;
use russh::ChannelMsg;
use russh_keys::key::PublicKey;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::debug;

/// Command used as the liveness probe
pub const HEALTH_PROBE_COMMAND: &str = "echo 'Connection test'";

/// Info key and the command producing it.
pub const INFO_COMMANDS: &[(&str, &str)] = &[
    ("Hostname", "hostname"),
    (
        "OS",
        "cat /etc/os-release | grep PRETTY_NAME | cut -d '\"' -f 2",
    ),
    ("Kernel", "uname -r"),
    (
        "CPU",
        "cat /proc/cpuinfo | grep 'model name' | head -1 | cut -d ':' -f 2",
    ),
    ("CPUCores", "nproc"),
    ("Memory", "free -h | grep Mem | awk '{print $2}'"),
    ("GPUCount", "lspci | grep Display | wc -l"),
    (
        "Network",
        "lspci -v | grep -i 'ethernet controller' | grep -vi 'virtual function'",
    ),
    (
        "Storage",
        "lsblk -d -o NAME,SIZE,TYPE,TRAN | grep -E 'disk|nvme' | grep -v 'loop\\|rom' | awk '{print $1,$2}'",
    ),
];

/// How a session authenticates.
#[derive(Debug, PartialEq, Eq)]
pub enum AuthMethod<'a> {
    PrivateKey(&'a str),
    Password(&'a str),
}

/// A private key wins over a password. `None` when neither is set.
#[must_use]
pub fn auth_method(credentials: &Credentials) -> Option<AuthMethod<'_>> {
    match credentials.private_key.as_deref() {
        Some(key) if !key.is_empty() => Some(AuthMethod::PrivateKey(key)),
        _ if !credentials.password.is_empty() => {
            Some(AuthMethod::Password(&credentials.password))
        }
        _ => None,
    }
}

struct AcceptingHandler;

#[async_trait]
impl client::Handler for AcceptingHandler {
    type Error = russh::Error;

    async fn check_server_key(&mut self, _server_public_key: &PublicKey) -> Result<bool, Self::Error> {
        // Host keys are not pinned.
        Ok(true)
    }
}

/// Dials hosts over SSH.
#[derive(Clone, Debug)]
pub struct SshProtocol {
    timeout: Duration,
}

impl Default for SshProtocol {
    fn default() -> Self {
        Self {
            timeout: SSH_DIAL_TIMEOUT,
        }
    }
}

impl SshProtocol {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    async fn dial(
        &self,
        address: &str,
        credentials: &Credentials,
    ) -> Result<client::Handle<AcceptingHandler>, HostError> {
        let connect_error = |reason: String| HostError::Connect {
            address: address.to_string(),
            reason,
        };
        let auth_error = |reason: String| HostError::Auth {
            address: address.to_string(),
            reason,
        };

        let method = auth_method(credentials)
            .ok_or_else(|| auth_error("no valid authentication method".to_string()))?;

        let config = Arc::new(client::Config {
            inactivity_timeout: Some(self.timeout * 6),
            ..Default::default()
        });
        let stream = TcpStream::connect(address)
            .await
            .map_err(|e| connect_error(e.to_string()))?;
        let mut handle = client::connect_stream(config, stream, AcceptingHandler)
            .await
            .map_err(|e| connect_error(e.to_string()))?;

        let authenticated = match method {
            AuthMethod::PrivateKey(pem) => {
                let key = russh_keys::decode_secret_key(pem, None)
                    .map_err(|e| auth_error(format!("invalid private key: {e}")))?;
                handle
                    .authenticate_publickey(&credentials.username, Arc::new(key))
                    .await
            }
            AuthMethod::Password(password) => {
                handle
                    .authenticate_password(&credentials.username, password)
                    .await
            }
        }
        .map_err(|e| auth_error(e.to_string()))?;

        if !authenticated {
            return Err(auth_error(format!(
                "credentials for user '{}' rejected",
                credentials.username
            )));
        }
        Ok(handle)
    }
}

#[async_trait]
impl HostProtocol for SshProtocol {
    type Session = SshSession;

    fn name(&self) -> &'static str {
        "ssh"
    }

    async fn connect(&self, endpoint: &HostConnection) -> Result<SshSession, HostError> {
        let address = format!("{}:{}", endpoint.address, endpoint.port);
        let handle = tokio::time::timeout(self.timeout, self.dial(&address, &endpoint.credentials))
            .await
            .map_err(|_| HostError::Timeout {
                address: address.clone(),
                timeout_secs: self.timeout.as_secs(),
            })??;

        debug!(host = %endpoint.name, address = %address, "SSH session established");
        Ok(SshSession {
            address,
            handle: Mutex::new(handle),
        })
    }
}

/// An authenticated SSH connection.
pub struct SshSession {
    address: String,
    handle: Mutex<client::Handle<AcceptingHandler>>,
}

impl SshSession {
    fn transport_error(&self, err: &russh::Error) -> HostError {
        HostError::Connect {
            address: self.address.clone(),
            reason: err.to_string(),
        }
    }
}

#[async_trait]
impl HostSession for SshSession {
    async fn is_healthy(&self) -> bool {
        if self.handle.lock().await.is_closed() {
            return false;
        }
        self.run_command(HEALTH_PROBE_COMMAND).await.is_ok()
    }

    async fn info(&self) -> Result<HostInfo, HostError> {
        if self.handle.lock().await.is_closed() {
            return Err(HostError::Connect {
                address: self.address.clone(),
                reason: "session closed".to_string(),
            });
        }

        let mut info = HostInfo::new();
        for (key, command) in INFO_COMMANDS {
            match self.run_command(command).await {
                Ok(output) => {
                    info.insert((*key).to_string(), output);
                }
                Err(e @ HostError::Connect { .. }) => return Err(e),
                Err(e) => debug!(address = %self.address, key, error = %e, "Info command failed"),
            }
        }
        Ok(info)
    }

    async fn run_command(&self, command: &str) -> Result<String, HostError> {
        let mut channel = self
            .handle
            .lock()
            .await
            .channel_open_session()
            .await
            .map_err(|e| self.transport_error(&e))?;
        channel
            .exec(true, command)
            .await
            .map_err(|e| self.transport_error(&e))?;

        let mut stdout = Vec::new();
        let mut exit_status = None;
        while let Some(msg) = channel.wait().await {
            match msg {
                ChannelMsg::Data { data } => stdout.extend_from_slice(&data),
                ChannelMsg::ExitStatus { exit_status: status } => exit_status = Some(status),
                ChannelMsg::Close => break,
                _ => {}
            }
        }

        match exit_status {
            Some(0) | None => Ok(String::from_utf8_lossy(&stdout).trim().to_string()),
            Some(status) => Err(HostError::Command {
                address: self.address.clone(),
                command: command.to_string(),
                status,
            }),
        }
    }
}

impl HostStatusRecord for SshHostStatus {
    const KIND: &'static str = KIND_SSH_STATUS;

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
}

#[cfg(test)]
#[path = "ssh_tests.rs"]
mod ssh_tests;
