//! Utility VM backends.
//!
//! Callers hold a `Box<dyn UtilityVm>` and never branch on which backend
//! produced it. A backend that cannot perform an operation returns
//! [`VmError::NotSupported`], which callers treat as a degraded but valid
//! outcome.
//!
//! ```text
//! Backend::build(ResolvedVmConfig)
//!     ├─► Local  → LocalVm  { ComputeSystem, DaclStore }
//!     └─► Remote → RemoteVm { RemoteEndpoint }  (newline-delimited JSON over TCP)
//! ```

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::security::{DaclStore, GrantError};
use crate::uvm::ResolvedVmConfig;

pub mod local;
pub mod remote;

pub use local::{ComputeSystem, LocalVm};
pub use remote::{RemoteEndpoint, RemoteVm};

// ---------------------------------------------------------------------------
// Shared types used across backends
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Host compute service on this machine.
    Local,
    /// A virtualization service reached over a transport channel.
    Remote,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local => f.write_str("local"),
            Self::Remote => f.write_str("remote"),
        }
    }
}

/// Observed lifecycle state of the VM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VmState {
    NotCreated,
    Created,
    Running,
    Paused,
    Stopped,
}

impl fmt::Display for VmState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::NotCreated => "not created",
            Self::Created => "created",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// Point-in-time resource usage of a running VM.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VmStatistics {
    /// Total guest processor time in 100ns units.
    pub processor_runtime_100ns: u64,
    pub memory_working_set_bytes: u64,
    pub memory_private_working_set_bytes: u64,
    pub memory_reserve_bytes: u64,
    pub uptime_100ns: u64,
    pub collected_at: DateTime<Utc>,
}

#[derive(Debug, Error)]
pub enum VmError {
    /// The backend does not implement this operation.
    #[error("{operation} is not supported by the {backend} backend")]
    NotSupported {
        operation: &'static str,
        backend: BackendKind,
    },

    #[error("{operation} cancelled")]
    Cancelled { operation: &'static str },

    #[error("cannot {operation} a VM that is {state}")]
    InvalidState {
        operation: &'static str,
        state: VmState,
    },

    #[error("writable shares are disabled for this VM: {}", path.display())]
    WritableSharesDisabled { path: PathBuf },

    #[error(transparent)]
    Grant(#[from] GrantError),

    #[error("{operation} failed: {source:#}")]
    Backend {
        operation: &'static str,
        #[source]
        source: anyhow::Error,
    },
}

impl VmError {
    pub fn is_not_supported(&self) -> bool {
        matches!(self, Self::NotSupported { .. })
    }

    pub(crate) fn backend(operation: &'static str, source: impl Into<anyhow::Error>) -> Self {
        Self::Backend {
            operation,
            source: source.into(),
        }
    }
}

/// Operations every backend exposes.
#[async_trait]
pub trait UtilityVm: Send + Sync {
    fn id(&self) -> &str;

    fn backend(&self) -> BackendKind;

    fn config(&self) -> &ResolvedVmConfig;

    fn state(&self) -> VmState;

    /// Create the VM from its configuration without starting it.
    ///
    /// Host-side grants made on the way are abandoned, not submitted, once
    /// `cancel` fires.
    async fn create(&mut self, cancel: &CancellationToken) -> Result<(), VmError>;

    async fn start(&mut self) -> Result<(), VmError>;

    async fn stop(&mut self) -> Result<(), VmError>;

    async fn pause(&mut self) -> Result<(), VmError>;

    async fn resume(&mut self) -> Result<(), VmError>;

    /// Expose a host directory to the guest.
    async fn add_share(
        &mut self,
        host_path: &Path,
        read_only: bool,
        cancel: &CancellationToken,
    ) -> Result<(), VmError>;

    /// Query resource usage. Returns [`VmError::Cancelled`] promptly once
    /// `cancel` fires.
    async fn stats(&self, cancel: &CancellationToken) -> Result<VmStatistics, VmError>;
}

/// Which backend to build VMs on.
#[derive(Clone)]
pub enum Backend {
    Local {
        compute: Arc<dyn ComputeSystem>,
        dacls: Arc<dyn DaclStore>,
    },
    Remote(RemoteEndpoint),
}

impl fmt::Debug for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local { .. } => f.write_str("Backend::Local"),
            Self::Remote(endpoint) => f.debug_tuple("Backend::Remote").field(endpoint).finish(),
        }
    }
}

impl Backend {
    pub fn kind(&self) -> BackendKind {
        match self {
            Self::Local { .. } => BackendKind::Local,
            Self::Remote(_) => BackendKind::Remote,
        }
    }

    /// Produce an uncreated VM handle for `config`.
    pub fn build(&self, config: ResolvedVmConfig) -> Box<dyn UtilityVm> {
        match self {
            Self::Local { compute, dacls } => {
                Box::new(LocalVm::new(config, Arc::clone(compute), Arc::clone(dacls)))
            }
            Self::Remote(endpoint) => Box::new(RemoteVm::new(config, endpoint.clone())),
        }
    }
}

/// Fail with [`VmError::InvalidState`] unless `state` is one of `allowed`.
pub(crate) fn expect_state(
    operation: &'static str,
    state: VmState,
    allowed: &[VmState],
) -> Result<(), VmError> {
    if allowed.contains(&state) {
        Ok(())
    } else {
        Err(VmError::InvalidState { operation, state })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_supported_is_distinguishable() {
        let err = VmError::NotSupported {
            operation: "stats",
            backend: BackendKind::Remote,
        };
        assert!(err.is_not_supported());
        assert_eq!(err.to_string(), "stats is not supported by the remote backend");
        assert!(!VmError::Cancelled { operation: "stats" }.is_not_supported());
    }

    #[test]
    fn expect_state_reports_current_state() {
        let err = expect_state("start", VmState::NotCreated, &[VmState::Created]).unwrap_err();
        assert_eq!(err.to_string(), "cannot start a VM that is not created");
    }
}
