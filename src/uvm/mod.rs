//! Resolved utility VM configuration and per-family baselines.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::security::AccessMask;

/// Processor count used when nothing else asks for one.
pub const DEFAULT_PROCESSOR_COUNT: u32 = 2;

/// Memory size used when nothing else asks for one.
pub const DEFAULT_MEMORY_SIZE_MB: u64 = 1024;

/// Virtual PMEM devices attached to a Linux guest by default.
pub const DEFAULT_VPMEM_COUNT: u32 = 64;

/// Upper bound on virtual PMEM devices per VM.
pub const MAX_VPMEM_COUNT: u32 = 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GuestFamily {
    Linux,
    Windows,
}

impl fmt::Display for GuestFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Linux => f.write_str("linux"),
            Self::Windows => f.write_str("windows"),
        }
    }
}

/// How a Linux guest mounts its root filesystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RootFsType {
    #[default]
    Initrd,
    Vhd,
}

impl FromStr for RootFsType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "initrd" => Ok(Self::Initrd),
            "vhd" => Ok(Self::Vhd),
            other => Err(format!("expected \"initrd\" or \"vhd\", got {other:?}")),
        }
    }
}

/// Settings that only exist for a Linux guest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinuxGuest {
    /// Directory holding the kernel and initrd/rootfs.vhd.
    pub boot_files_path: PathBuf,
    pub kernel_direct_boot: bool,
    pub vpmem_device_count: u32,
    pub kernel_boot_options: Option<String>,
    pub preferred_rootfs_type: RootFsType,
}

/// Settings that only exist for a Windows guest.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowsGuest {
    pub boot_files_path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "family", rename_all = "snake_case")]
pub enum Guest {
    Linux(LinuxGuest),
    Windows(WindowsGuest),
}

/// Everything needed to construct one utility VM.
///
/// Built once per container-creation request by
/// [`crate::oci::uvm::resolve`] and handed to [`crate::vm::Backend::build`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedVmConfig {
    pub id: String,
    pub guest: Guest,
    pub processor_count: u32,
    pub memory_size_mb: u64,
    pub allow_overcommit: bool,
    pub enable_deferred_commit: bool,
    pub fully_physically_backed: bool,
    pub low_mmio_gap_mb: u64,
    pub high_mmio_base_mb: u64,
    pub high_mmio_gap_mb: u64,
    pub cpu_group_id: Option<String>,
    pub network_config_proxy: Option<String>,
    pub no_writable_file_shares: bool,
    /// Annotations added to each container in this VM unless the container
    /// spec already carries the key.
    pub default_container_annotations: BTreeMap<String, String>,
}

impl ResolvedVmConfig {
    pub fn guest_family(&self) -> GuestFamily {
        match self.guest {
            Guest::Linux(_) => GuestFamily::Linux,
            Guest::Windows(_) => GuestFamily::Windows,
        }
    }

    /// Boot files directory, if this family uses one.
    pub fn boot_files_path(&self) -> Option<&std::path::Path> {
        match &self.guest {
            Guest::Linux(l) => Some(l.boot_files_path.as_path()),
            Guest::Windows(w) => w.boot_files_path.as_deref(),
        }
    }

    /// Access the VM group needs on a host directory shared into this VM.
    pub fn share_access(&self, read_only: bool) -> AccessMask {
        if read_only {
            AccessMask::READ
        } else {
            AccessMask::READ | AccessMask::WRITE
        }
    }
}

/// Baseline configuration for `family`.
///
/// `root_path` is taken verbatim as the Linux boot files directory and is
/// ignored for Windows guests.
pub fn defaults_for(family: GuestFamily, id: &str, root_path: &str) -> ResolvedVmConfig {
    let guest = match family {
        GuestFamily::Linux => Guest::Linux(LinuxGuest {
            boot_files_path: PathBuf::from(root_path),
            kernel_direct_boot: true,
            vpmem_device_count: DEFAULT_VPMEM_COUNT,
            kernel_boot_options: None,
            preferred_rootfs_type: RootFsType::Initrd,
        }),
        GuestFamily::Windows => Guest::Windows(WindowsGuest::default()),
    };

    ResolvedVmConfig {
        id: id.to_string(),
        guest,
        processor_count: DEFAULT_PROCESSOR_COUNT,
        memory_size_mb: DEFAULT_MEMORY_SIZE_MB,
        allow_overcommit: true,
        enable_deferred_commit: false,
        fully_physically_backed: false,
        low_mmio_gap_mb: 0,
        high_mmio_base_mb: 0,
        high_mmio_gap_mb: 0,
        cpu_group_id: None,
        network_config_proxy: None,
        no_writable_file_shares: false,
        default_container_annotations: BTreeMap::new(),
    }
}
