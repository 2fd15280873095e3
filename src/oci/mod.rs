//! The parts of an OCI runtime spec that drive utility VM creation.
//!
//! Only the guest-family descriptors and the annotation map are modelled;
//! every other field in a `config.json` is ignored on load.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

pub mod annotations;
pub mod uvm;

/// Runtime spec subset.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Spec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub linux: Option<Linux>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub windows: Option<Windows>,

    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
}

/// Presence marks a Linux container.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Linux {}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Windows {
    /// Present when the container must run in a Hyper-V isolated VM.
    #[serde(default, rename = "hyperv", skip_serializing_if = "Option::is_none")]
    pub hyper_v: Option<HyperV>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HyperV {
    #[serde(default, rename = "utilityVMPath", skip_serializing_if = "Option::is_none")]
    pub utility_vm_path: Option<String>,
}

impl Spec {
    /// Read a spec from a `config.json`.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("read spec {}", path.display()))?;
        serde_json::from_str(&raw).with_context(|| format!("parse spec {}", path.display()))
    }

    pub fn is_linux(&self) -> bool {
        self.linux.is_some()
    }

    pub fn is_hyper_v_isolated_windows(&self) -> bool {
        !self.is_linux()
            && self
                .windows
                .as_ref()
                .is_some_and(|w| w.hyper_v.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_config_json_ignoring_unknown_fields() {
        let spec: Spec = serde_json::from_str(
            r#"{
                "ociVersion": "1.1.0",
                "process": {"args": ["sh"]},
                "linux": {"namespaces": []},
                "annotations": {"io.microsoft.network.ncproxy": "//./pipe/ncproxy"}
            }"#,
        )
        .unwrap();
        assert!(spec.is_linux());
        assert_eq!(spec.annotations.len(), 1);
    }

    #[test]
    fn windows_without_hyperv_is_not_isolated() {
        let spec: Spec = serde_json::from_str(r#"{"windows": {}}"#).unwrap();
        assert!(!spec.is_hyper_v_isolated_windows());

        let spec: Spec = serde_json::from_str(r#"{"windows": {"hyperv": {}}}"#).unwrap();
        assert!(spec.is_hyper_v_isolated_windows());
    }
}
