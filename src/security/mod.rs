//! Host file access for the utility VM group.
//!
//! Every utility VM runs as a member of the well-known `Virtual Machines`
//! group (`S-1-5-83-0`). Before a VM can open a host file (boot files, a
//! shared directory, a scratch disk) that group needs an allow entry on the
//! file's DACL. This module computes those entries and submits them through a
//! [`DaclStore`].
//!
//! ```text
//! grant_vm_group_access_with_mask(store, path, mask, cancel)
//!     ├─► AccessMask::validate          (no I/O)
//!     ├─► fs::metadata(path)            → ObjectKind::{File, Directory}
//!     ├─► vm_group_entries(kind, mask)  → 1 entry (file) | 2 entries (dir)
//!     └─► store.merge_entries(path, …)  (one descriptor update)
//! ```
//!
//! ## Directory entries
//!
//! A directory gets two entries for the group: an explicit one so the
//! directory itself can be opened, and an inherit-only one with
//! object/container inheritance so children created later pick up the same
//! access. A file gets only the explicit entry.

use std::path::{Path, PathBuf};

use bitflags::bitflags;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub mod dacl;
pub mod system;

pub use dacl::{DaclStore, MemoryDacls, merge_entries};
pub use system::SystemDacls;

// ---------------------------------------------------------------------------
// Permission model
// ---------------------------------------------------------------------------

bitflags! {
    /// Access the VM group is being granted on a host object.
    ///
    /// Bit values are the Win32 generic rights so a raw mask coming from a
    /// caller can be checked with [`AccessMask::validate`] directly.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
    pub struct AccessMask: u32 {
        /// `GENERIC_READ`
        const READ    = 1 << 31;
        /// `GENERIC_WRITE`
        const WRITE   = 1 << 30;
        /// `GENERIC_EXECUTE`
        const EXECUTE = 1 << 29;
        /// Union of read, write and execute.
        const ALL = Self::READ.bits() | Self::WRITE.bits() | Self::EXECUTE.bits();
    }
}

/// A mask that is empty or carries bits outside [`AccessMask::ALL`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("invalid access mask: 0x{mask:08x}")]
pub struct InvalidMask {
    pub mask: u32,
}

/// `READ_CONTROL | SYNCHRONIZE | FILE_READ_DATA | FILE_READ_ATTRIBUTES | FILE_READ_EA`
pub const FILE_GENERIC_READ: u32 = 0x0012_0089;
/// `READ_CONTROL | SYNCHRONIZE | FILE_WRITE_DATA | FILE_APPEND_DATA | FILE_WRITE_ATTRIBUTES | FILE_WRITE_EA`
pub const FILE_GENERIC_WRITE: u32 = 0x0012_0116;
/// `READ_CONTROL | SYNCHRONIZE | FILE_EXECUTE | FILE_READ_ATTRIBUTES`
pub const FILE_GENERIC_EXECUTE: u32 = 0x0012_00A0;

impl AccessMask {
    /// Check that the mask is non-empty and uses only recognized bits.
    pub fn validate(self) -> Result<Self, InvalidMask> {
        let bits = self.bits();
        if bits == 0 || bits & !Self::ALL.bits() != 0 {
            return Err(InvalidMask { mask: bits });
        }
        Ok(self)
    }

    /// Translate to the file-object access mask written into the ACE.
    ///
    /// Only meaningful on a validated mask.
    pub fn file_access(self) -> u32 {
        let mut access = 0;
        if self.contains(Self::READ) {
            access |= FILE_GENERIC_READ;
        }
        if self.contains(Self::WRITE) {
            access |= FILE_GENERIC_WRITE;
        }
        if self.contains(Self::EXECUTE) {
            access |= FILE_GENERIC_EXECUTE;
        }
        access
    }
}

impl TryFrom<u32> for AccessMask {
    type Error = InvalidMask;

    fn try_from(raw: u32) -> Result<Self, Self::Error> {
        Self::from_bits_retain(raw).validate()
    }
}

// ---------------------------------------------------------------------------
// Principal and entries
// ---------------------------------------------------------------------------

/// A well-known security identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SecurityPrincipal {
    /// String form of the SID.
    pub sid: &'static str,
    /// Account name as displayed by `icacls`.
    pub account: &'static str,
}

/// The group every utility VM worker process belongs to.
pub const VIRTUAL_MACHINES: SecurityPrincipal = SecurityPrincipal {
    sid: "S-1-5-83-0",
    account: r"NT VIRTUAL MACHINE\Virtual Machines",
};

bitflags! {
    /// ACE inheritance flags. Empty means the entry applies to the object only.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Inheritance: u32 {
        const OBJECT_INHERIT    = 0x1;
        const CONTAINER_INHERIT = 0x2;
        const INHERIT_ONLY      = 0x8;
    }
}

impl Inheritance {
    /// Propagates to files and subdirectories but not to the directory itself.
    pub const CHILDREN_ONLY: Self = Self::OBJECT_INHERIT
        .union(Self::CONTAINER_INHERIT)
        .union(Self::INHERIT_ONLY);
}

/// One allow entry in a DACL.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AccessEntry {
    pub sid: String,
    pub access: u32,
    pub inheritance: Inheritance,
}

/// Whether the target is a directory or something else.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
    File,
    Directory,
}

impl ObjectKind {
    fn of(path: &Path) -> std::io::Result<Self> {
        let meta = std::fs::metadata(path)?;
        Ok(if meta.is_dir() {
            Self::Directory
        } else {
            Self::File
        })
    }
}

/// Compute the entries that grant `mask` to the VM group on an object of `kind`.
pub fn vm_group_entries(kind: ObjectKind, mask: AccessMask) -> Vec<AccessEntry> {
    let access = mask.file_access();
    let explicit = AccessEntry {
        sid: VIRTUAL_MACHINES.sid.to_string(),
        access,
        inheritance: Inheritance::empty(),
    };
    match kind {
        ObjectKind::File => vec![explicit],
        ObjectKind::Directory => vec![
            explicit,
            AccessEntry {
                sid: VIRTUAL_MACHINES.sid.to_string(),
                access,
                inheritance: Inheritance::CHILDREN_ONLY,
            },
        ],
    }
}

// ---------------------------------------------------------------------------
// Grant
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum GrantError {
    #[error(transparent)]
    InvalidMask(#[from] InvalidMask),

    #[error("cannot stat {}: {source}", path.display())]
    PathUnavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to grant VM group access to {}: {source}", path.display())]
    GrantFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("grant on {} cancelled before submission", path.display())]
    Cancelled { path: PathBuf },
}

impl GrantError {
    /// Only descriptor update failures are worth retrying; the grant merges,
    /// so a repeated call cannot duplicate entries.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::GrantFailed { .. })
    }
}

/// Grant the VM group read access to `path`.
pub fn grant_vm_group_access(
    store: &dyn DaclStore,
    path: &Path,
    cancel: &CancellationToken,
) -> Result<(), GrantError> {
    grant_vm_group_access_with_mask(store, path, AccessMask::READ, cancel)
}

/// Grant the VM group `mask` on `path`.
///
/// Nothing is submitted if the mask is invalid, the path cannot be
/// inspected, or `cancel` fires before submission.
pub fn grant_vm_group_access_with_mask(
    store: &dyn DaclStore,
    path: &Path,
    mask: AccessMask,
    cancel: &CancellationToken,
) -> Result<(), GrantError> {
    let mask = mask.validate()?;

    let kind = ObjectKind::of(path).map_err(|source| GrantError::PathUnavailable {
        path: path.to_path_buf(),
        source,
    })?;

    let entries = vm_group_entries(kind, mask);

    if cancel.is_cancelled() {
        return Err(GrantError::Cancelled {
            path: path.to_path_buf(),
        });
    }

    store
        .merge_entries(path, &entries)
        .map_err(|source| GrantError::GrantFailed {
            path: path.to_path_buf(),
            source,
        })?;

    debug!(path = %path.display(), ?kind, mask = ?mask, "granted VM group access");
    Ok(())
}
