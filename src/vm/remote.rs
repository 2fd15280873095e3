//! Utility VMs hosted by a remote virtualization service.
//!
//! Each operation opens a TCP connection to the service, writes one JSON
//! request followed by `\n`, and reads one `\n`-terminated JSON response.
//! The channel does not expose pause/resume, shares or statistics yet; those
//! return [`VmError::NotSupported`].

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, anyhow, bail};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{BackendKind, UtilityVm, VmError, VmState, VmStatistics, expect_state};
use crate::uvm::ResolvedVmConfig;

/// Largest response accepted from the service.
const MAX_RESPONSE_BYTES: u64 = 1_048_576;

/// Address of the remote service, `host:port` with an optional
/// `tcp://`, `http://` or `https://` prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEndpoint {
    pub address: String,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
}

impl RemoteEndpoint {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            connect_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(30),
        }
    }

    fn host_port(&self) -> &str {
        strip_scheme(&self.address)
    }
}

/// One request on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum RemoteRequest {
    Create { id: String, config: ResolvedVmConfig },
    Start { id: String },
    Stop { id: String },
}

/// One response on the wire; `error` is set when the service refused.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RemoteResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub struct RemoteVm {
    config: ResolvedVmConfig,
    endpoint: RemoteEndpoint,
    state: VmState,
}

impl RemoteVm {
    pub fn new(config: ResolvedVmConfig, endpoint: RemoteEndpoint) -> Self {
        Self {
            config,
            endpoint,
            state: VmState::NotCreated,
        }
    }

    fn unsupported(operation: &'static str) -> VmError {
        VmError::NotSupported {
            operation,
            backend: BackendKind::Remote,
        }
    }

    async fn call(&self, operation: &'static str, request: &RemoteRequest) -> Result<(), VmError> {
        tokio::time::timeout(self.endpoint.request_timeout, send_request(&self.endpoint, request))
            .await
            .map_err(|_| VmError::backend(operation, anyhow!("request timed out")))?
            .map_err(|e| VmError::backend(operation, e))
    }
}

async fn send_request(endpoint: &RemoteEndpoint, request: &RemoteRequest) -> anyhow::Result<()> {
    let addr = endpoint.host_port();
    let mut stream = tokio::time::timeout(endpoint.connect_timeout, TcpStream::connect(addr))
        .await
        .map_err(|_| anyhow!("connect to {addr} timed out"))?
        .with_context(|| format!("TCP connect to {addr} failed"))?;

    let mut payload = serde_json::to_vec(request).context("serialise request")?;
    payload.push(b'\n');
    stream.write_all(&payload).await.context("write request")?;

    let mut line = Vec::new();
    let mut reader = BufReader::new(stream).take(MAX_RESPONSE_BYTES + 1);
    reader
        .read_until(b'\n', &mut line)
        .await
        .context("read response")?;
    if line.len() as u64 > MAX_RESPONSE_BYTES {
        bail!("response exceeds 1 MiB");
    }
    if line.last() == Some(&b'\n') {
        line.pop();
    }
    if line.is_empty() {
        bail!("connection closed without a response");
    }

    let response: RemoteResponse = serde_json::from_slice(&line).context("parse response")?;
    match response.error {
        Some(error) => Err(anyhow!("remote service: {error}")),
        None => Ok(()),
    }
}

fn strip_scheme(url: &str) -> &str {
    url.strip_prefix("tcp://")
        .or_else(|| url.strip_prefix("https://"))
        .or_else(|| url.strip_prefix("http://"))
        .unwrap_or(url)
}

#[async_trait]
impl UtilityVm for RemoteVm {
    fn id(&self) -> &str {
        &self.config.id
    }

    fn backend(&self) -> BackendKind {
        BackendKind::Remote
    }

    fn config(&self) -> &ResolvedVmConfig {
        &self.config
    }

    fn state(&self) -> VmState {
        self.state
    }

    async fn create(&mut self, cancel: &CancellationToken) -> Result<(), VmError> {
        expect_state("create", self.state, &[VmState::NotCreated])?;
        let request = RemoteRequest::Create {
            id: self.config.id.clone(),
            config: self.config.clone(),
        };
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(VmError::Cancelled { operation: "create" }),
            r = self.call("create", &request) => r?,
        }
        self.state = VmState::Created;
        debug!(id = %self.config.id, endpoint = %self.endpoint.address, "remote VM created");
        Ok(())
    }

    async fn start(&mut self) -> Result<(), VmError> {
        expect_state("start", self.state, &[VmState::Created])?;
        let request = RemoteRequest::Start {
            id: self.config.id.clone(),
        };
        self.call("start", &request).await?;
        self.state = VmState::Running;
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), VmError> {
        expect_state("stop", self.state, &[VmState::Created, VmState::Running])?;
        let request = RemoteRequest::Stop {
            id: self.config.id.clone(),
        };
        self.call("stop", &request).await?;
        self.state = VmState::Stopped;
        Ok(())
    }

    async fn pause(&mut self) -> Result<(), VmError> {
        Err(Self::unsupported("pause"))
    }

    async fn resume(&mut self) -> Result<(), VmError> {
        Err(Self::unsupported("resume"))
    }

    async fn add_share(
        &mut self,
        _host_path: &Path,
        _read_only: bool,
        _cancel: &CancellationToken,
    ) -> Result<(), VmError> {
        Err(Self::unsupported("add_share"))
    }

    async fn stats(&self, _cancel: &CancellationToken) -> Result<VmStatistics, VmError> {
        Err(Self::unsupported("stats"))
    }
}
