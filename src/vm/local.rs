//! Utility VMs hosted by the local compute service.
//!
//! The compute service itself sits behind [`ComputeSystem`]; this module
//! turns a [`ResolvedVmConfig`] into the document the service expects, keeps
//! the lifecycle state, and grants the VM group access to host paths the
//! guest is going to open.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{BackendKind, UtilityVm, VmError, VmState, VmStatistics, expect_state};
use crate::security::{AccessMask, DaclStore, grant_vm_group_access_with_mask};
use crate::uvm::{Guest, ResolvedVmConfig, RootFsType};

/// Client for the host compute service.
#[async_trait]
pub trait ComputeSystem: Send + Sync {
    async fn create(&self, id: &str, document: &Value) -> anyhow::Result<()>;
    async fn start(&self, id: &str) -> anyhow::Result<()>;
    async fn shutdown(&self, id: &str) -> anyhow::Result<()>;
    async fn pause(&self, id: &str) -> anyhow::Result<()>;
    async fn resume(&self, id: &str) -> anyhow::Result<()>;
    async fn add_share(&self, id: &str, host_path: &Path, read_only: bool) -> anyhow::Result<()>;
    async fn statistics(&self, id: &str) -> anyhow::Result<VmStatistics>;
}

pub struct LocalVm {
    config: ResolvedVmConfig,
    compute: Arc<dyn ComputeSystem>,
    dacls: Arc<dyn DaclStore>,
    state: VmState,
}

impl LocalVm {
    pub fn new(
        config: ResolvedVmConfig,
        compute: Arc<dyn ComputeSystem>,
        dacls: Arc<dyn DaclStore>,
    ) -> Self {
        Self {
            config,
            compute,
            dacls,
            state: VmState::NotCreated,
        }
    }

    /// Run a grant on the blocking pool.
    async fn grant(
        &self,
        path: PathBuf,
        mask: AccessMask,
        cancel: &CancellationToken,
    ) -> Result<(), VmError> {
        let dacls = Arc::clone(&self.dacls);
        let cancel = cancel.clone();
        tokio::task::spawn_blocking(move || {
            grant_vm_group_access_with_mask(dacls.as_ref(), &path, mask, &cancel)
        })
        .await
        .map_err(|e| VmError::backend("grant", e))??;
        Ok(())
    }
}

/// Build the compute-system document for `config`.
pub fn compute_system_document(config: &ResolvedVmConfig) -> Value {
    let mut processor = json!({ "Count": config.processor_count });
    if let Some(group) = &config.cpu_group_id {
        processor["CpuGroup"] = json!({ "Id": group });
    }

    let mut memory = json!({
        "SizeInMB": config.memory_size_mb,
        "AllowOvercommit": config.allow_overcommit,
        "EnableDeferredCommit": config.enable_deferred_commit,
    });
    if config.low_mmio_gap_mb > 0 {
        memory["LowMMIOGapInMB"] = json!(config.low_mmio_gap_mb);
    }
    if config.high_mmio_base_mb > 0 {
        memory["HighMMIOBaseInMB"] = json!(config.high_mmio_base_mb);
    }
    if config.high_mmio_gap_mb > 0 {
        memory["HighMMIOGapInMB"] = json!(config.high_mmio_gap_mb);
    }

    let mut vm = json!({
        "StopOnReset": true,
        "ComputeTopology": { "Memory": memory, "Processor": processor },
        "Devices": {},
    });

    if let Guest::Linux(linux) = &config.guest {
        let boot = linux.boot_files_path.display().to_string();
        let extra = linux.kernel_boot_options.as_deref().unwrap_or_default();
        // A VHD rootfs is attached as the first PMEM device.
        let cmdline = match linux.preferred_rootfs_type {
            RootFsType::Initrd => extra.to_string(),
            RootFsType::Vhd => format!("root=/dev/pmem0 ro {extra}").trim_end().to_string(),
        };
        if linux.kernel_direct_boot {
            let mut direct = json!({
                "KernelFilePath": format!("{boot}\\vmlinux"),
                "KernelCmdLine": cmdline,
            });
            if linux.preferred_rootfs_type == RootFsType::Initrd {
                direct["InitRdPath"] = json!(format!("{boot}\\initrd.img"));
            }
            vm["Chipset"] = json!({ "LinuxKernelDirect": direct });
        } else {
            vm["Chipset"] = json!({
                "Uefi": { "BootThis": { "DevicePath": format!("{boot}\\kernel"), "OptionalData": cmdline } }
            });
        }
        if linux.vpmem_device_count > 0 {
            vm["Devices"]["VirtualPMem"] = json!({ "MaximumCount": linux.vpmem_device_count });
        }
    }

    json!({
        "Owner": config.id,
        "SchemaVersion": { "Major": 2, "Minor": 1 },
        "ShouldTerminateOnLastHandleClosed": true,
        "VirtualMachine": vm,
    })
}

#[async_trait]
impl UtilityVm for LocalVm {
    fn id(&self) -> &str {
        &self.config.id
    }

    fn backend(&self) -> BackendKind {
        BackendKind::Local
    }

    fn config(&self) -> &ResolvedVmConfig {
        &self.config
    }

    fn state(&self) -> VmState {
        self.state
    }

    async fn create(&mut self, cancel: &CancellationToken) -> Result<(), VmError> {
        expect_state("create", self.state, &[VmState::NotCreated])?;

        if let Guest::Linux(linux) = &self.config.guest {
            if !linux.boot_files_path.as_os_str().is_empty() {
                self.grant(
                    linux.boot_files_path.clone(),
                    AccessMask::READ | AccessMask::EXECUTE,
                    cancel,
                )
                .await?;
            }
        }

        let document = compute_system_document(&self.config);
        self.compute
            .create(&self.config.id, &document)
            .await
            .map_err(|e| VmError::backend("create", e))?;
        self.state = VmState::Created;
        debug!(id = %self.config.id, family = %self.config.guest_family(), "local VM created");
        Ok(())
    }

    async fn start(&mut self) -> Result<(), VmError> {
        expect_state("start", self.state, &[VmState::Created])?;
        self.compute
            .start(&self.config.id)
            .await
            .map_err(|e| VmError::backend("start", e))?;
        self.state = VmState::Running;
        debug!(id = %self.config.id, "local VM started");
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), VmError> {
        expect_state(
            "stop",
            self.state,
            &[VmState::Created, VmState::Running, VmState::Paused],
        )?;
        self.compute
            .shutdown(&self.config.id)
            .await
            .map_err(|e| VmError::backend("stop", e))?;
        self.state = VmState::Stopped;
        debug!(id = %self.config.id, "local VM stopped");
        Ok(())
    }

    async fn pause(&mut self) -> Result<(), VmError> {
        expect_state("pause", self.state, &[VmState::Running])?;
        self.compute
            .pause(&self.config.id)
            .await
            .map_err(|e| VmError::backend("pause", e))?;
        self.state = VmState::Paused;
        Ok(())
    }

    async fn resume(&mut self) -> Result<(), VmError> {
        expect_state("resume", self.state, &[VmState::Paused])?;
        self.compute
            .resume(&self.config.id)
            .await
            .map_err(|e| VmError::backend("resume", e))?;
        self.state = VmState::Running;
        Ok(())
    }

    async fn add_share(
        &mut self,
        host_path: &Path,
        read_only: bool,
        cancel: &CancellationToken,
    ) -> Result<(), VmError> {
        expect_state("add_share", self.state, &[VmState::Created, VmState::Running])?;
        if !read_only && self.config.no_writable_file_shares {
            return Err(VmError::WritableSharesDisabled {
                path: host_path.to_path_buf(),
            });
        }

        self.grant(
            host_path.to_path_buf(),
            self.config.share_access(read_only),
            cancel,
        )
        .await?;
        self.compute
            .add_share(&self.config.id, host_path, read_only)
            .await
            .map_err(|e| VmError::backend("add_share", e))?;
        debug!(id = %self.config.id, path = %host_path.display(), read_only, "share added");
        Ok(())
    }

    async fn stats(&self, cancel: &CancellationToken) -> Result<VmStatistics, VmError> {
        expect_state("stats", self.state, &[VmState::Running, VmState::Paused])?;
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(VmError::Cancelled { operation: "stats" }),
            r = self.compute.statistics(&self.config.id) => {
                r.map_err(|e| VmError::backend("stats", e))
            }
        }
    }
}
