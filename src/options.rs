//! Shim runtime options and their projection onto spec annotations.
//!
//! The options arrive as the `options` table of a runtime entry in the
//! container runtime's TOML configuration, e.g.
//!
//! ```toml
//! BootFilesRootPath = 'C:\ContainerPlat\LinuxBootFiles'
//! VmProcessorCount = 4
//! VmMemorySizeInMb = 2048
//! NCProxyAddr = '\\.\pipe\ncproxy'
//!
//! [DefaultContainerAnnotations]
//! "io.microsoft.virtualmachine.fileshares.disablewritable" = "true"
//! ```
//!
//! Zero and empty values mean "not set".

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::oci::{Spec, annotations};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct ShimOptions {
    pub boot_files_root_path: String,
    pub vm_processor_count: u32,
    pub vm_memory_size_in_mb: u64,
    #[serde(rename = "NCProxyAddr")]
    pub nc_proxy_addr: String,
    pub default_container_annotations: BTreeMap<String, String>,
}

impl ShimOptions {
    /// Read options from a TOML file.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("read options {}", path.display()))?;
        toml::from_str(&raw).with_context(|| format!("parse options {}", path.display()))
    }
}

/// Write each set option into `spec.annotations` unless the spec already
/// carries that key.
///
/// Every write is "insert if absent", so the order in which keys are visited
/// does not change the result.
pub fn update_spec_from_options(spec: &mut Spec, opts: Option<&ShimOptions>) {
    let Some(opts) = opts else {
        return;
    };
    let a = &mut spec.annotations;

    if !opts.boot_files_root_path.is_empty() {
        a.entry(annotations::BOOT_FILES_ROOT_PATH.to_string())
            .or_insert_with(|| opts.boot_files_root_path.clone());
    }
    if opts.vm_processor_count != 0 {
        a.entry(annotations::PROCESSOR_COUNT.to_string())
            .or_insert_with(|| opts.vm_processor_count.to_string());
    }
    if opts.vm_memory_size_in_mb != 0 {
        a.entry(annotations::MEMORY_SIZE_IN_MB.to_string())
            .or_insert_with(|| opts.vm_memory_size_in_mb.to_string());
    }
    if !opts.nc_proxy_addr.is_empty() {
        a.entry(annotations::NETWORK_CONFIG_PROXY.to_string())
            .or_insert_with(|| opts.nc_proxy_addr.clone());
    }

    for (key, value) in &opts.default_container_annotations {
        a.entry(key.clone()).or_insert_with(|| value.clone());
    }
}
