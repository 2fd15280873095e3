//! Annotation keys understood when building a utility VM, and typed lookup.

use std::collections::BTreeMap;
use std::fmt::Display;
use std::str::FromStr;

use super::uvm::ResolveError;

pub const BOOT_FILES_ROOT_PATH: &str = "io.microsoft.virtualmachine.lcow.bootfilesrootpath";
pub const PROCESSOR_COUNT: &str = "io.microsoft.virtualmachine.computetopology.processor.count";
pub const MEMORY_SIZE_IN_MB: &str = "io.microsoft.virtualmachine.computetopology.memory.sizeinmb";
pub const MEMORY_LOW_MMIO_GAP_IN_MB: &str =
    "io.microsoft.virtualmachine.computetopology.memory.lowmmiogapinmb";
pub const MEMORY_HIGH_MMIO_BASE_IN_MB: &str =
    "io.microsoft.virtualmachine.computetopology.memory.highmmiobaseinmb";
pub const MEMORY_HIGH_MMIO_GAP_IN_MB: &str =
    "io.microsoft.virtualmachine.computetopology.memory.highmmiogapinmb";
pub const ALLOW_OVERCOMMIT: &str =
    "io.microsoft.virtualmachine.computetopology.memory.allowovercommit";
pub const ENABLE_DEFERRED_COMMIT: &str =
    "io.microsoft.virtualmachine.computetopology.memory.enabledeferredcommit";
pub const FULLY_PHYSICALLY_BACKED: &str = "io.microsoft.virtualmachine.fullyphysicallybacked";
pub const CPU_GROUP_ID: &str = "io.microsoft.virtualmachine.cpugroup.id";
pub const NETWORK_CONFIG_PROXY: &str = "io.microsoft.network.ncproxy";
pub const DISABLE_WRITABLE_FILE_SHARES: &str =
    "io.microsoft.virtualmachine.fileshares.disablewritable";

// Linux guest only.
pub const KERNEL_DIRECT_BOOT: &str = "io.microsoft.virtualmachine.lcow.kerneldirectboot";
pub const VPMEM_COUNT: &str = "io.microsoft.virtualmachine.devices.virtualpmem.maximumcount";
pub const KERNEL_BOOT_OPTIONS: &str = "io.microsoft.virtualmachine.lcow.kernelbootoptions";
pub const PREFERRED_ROOTFS_TYPE: &str = "io.microsoft.virtualmachine.lcow.preferredrootfstype";

/// Parse `key` with `T::from_str`, or `None` when the key is absent.
///
/// `bool` therefore accepts exactly `true` and `false`.
pub fn parse<T>(annotations: &BTreeMap<String, String>, key: &str) -> Result<Option<T>, ResolveError>
where
    T: FromStr,
    T::Err: Display,
{
    let Some(value) = annotations.get(key) else {
        return Ok(None);
    };
    value
        .parse()
        .map(Some)
        .map_err(|e: T::Err| ResolveError::InvalidAnnotationValue {
            key: key.to_string(),
            value: value.clone(),
            reason: e.to_string(),
        })
}

/// Like [`parse`] but zero is rejected.
pub fn parse_positive<T>(
    annotations: &BTreeMap<String, String>,
    key: &str,
) -> Result<Option<T>, ResolveError>
where
    T: FromStr + Default + PartialEq,
    T::Err: Display,
{
    match parse::<T>(annotations, key)? {
        Some(v) if v == T::default() => Err(ResolveError::InvalidAnnotationValue {
            key: key.to_string(),
            value: annotations[key].clone(),
            reason: "must be greater than zero".to_string(),
        }),
        other => Ok(other),
    }
}

/// String value of `key`; present-but-empty reads as unset.
pub fn string(annotations: &BTreeMap<String, String>, key: &str) -> Option<String> {
    annotations
        .get(key)
        .filter(|v| !v.is_empty())
        .cloned()
}
