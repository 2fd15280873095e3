//! Turning a spec plus shim options into a [`ResolvedVmConfig`].
//!
//! Precedence, lowest first:
//!
//! 1. the guest family baseline ([`defaults_for`]),
//! 2. the shim options, projected onto annotations the spec does not set
//!    ([`update_spec_from_options`]),
//! 3. annotations already present on the spec.
//!
//! Steps 2 and 3 meet in the spec's annotation map, so a key the caller
//! put on the spec is never overwritten.

use std::collections::BTreeMap;
use std::path::PathBuf;

use thiserror::Error;

use super::Spec;
use super::annotations::{self as keys, parse, parse_positive, string};
use crate::options::{ShimOptions, update_spec_from_options};
use crate::uvm::{Guest, GuestFamily, MAX_VPMEM_COUNT, ResolvedVmConfig, RootFsType, defaults_for};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    #[error("spec is neither a Linux nor a Hyper-V isolated Windows container")]
    UnsupportedGuest,

    #[error("invalid value {value:?} for annotation {key}: {reason}")]
    InvalidAnnotationValue {
        key: String,
        value: String,
        reason: String,
    },
}

/// Guest family selected by the spec's platform sections.
pub fn guest_family(spec: &Spec) -> Result<GuestFamily, ResolveError> {
    if spec.is_linux() {
        Ok(GuestFamily::Linux)
    } else if spec.is_hyper_v_isolated_windows() {
        Ok(GuestFamily::Windows)
    } else {
        Err(ResolveError::UnsupportedGuest)
    }
}

/// Resolve the utility VM configuration for `spec`.
///
/// On success `spec.annotations` gains the option-derived keys it was
/// missing; keys already present are left as they are. On error `spec` is
/// unchanged.
pub fn resolve(
    spec: &mut Spec,
    opts: Option<&ShimOptions>,
    id: &str,
    root_path: &str,
) -> Result<ResolvedVmConfig, ResolveError> {
    let family = guest_family(spec)?;
    let mut merged = spec.clone();
    update_spec_from_options(&mut merged, opts);

    let mut cfg = defaults_for(family, id, root_path);
    apply_annotations(&mut cfg, &merged.annotations)?;
    if let Some(opts) = opts {
        cfg.default_container_annotations = opts.default_container_annotations.clone();
    }
    spec.annotations = merged.annotations;
    Ok(cfg)
}

fn apply_annotations(
    cfg: &mut ResolvedVmConfig,
    a: &BTreeMap<String, String>,
) -> Result<(), ResolveError> {
    if let Some(v) = parse_positive(a, keys::PROCESSOR_COUNT)? {
        cfg.processor_count = v;
    }
    if let Some(v) = parse_positive(a, keys::MEMORY_SIZE_IN_MB)? {
        cfg.memory_size_mb = v;
    }
    if let Some(v) = parse(a, keys::MEMORY_LOW_MMIO_GAP_IN_MB)? {
        cfg.low_mmio_gap_mb = v;
    }
    if let Some(v) = parse(a, keys::MEMORY_HIGH_MMIO_BASE_IN_MB)? {
        cfg.high_mmio_base_mb = v;
    }
    if let Some(v) = parse(a, keys::MEMORY_HIGH_MMIO_GAP_IN_MB)? {
        cfg.high_mmio_gap_mb = v;
    }
    if let Some(v) = parse(a, keys::ALLOW_OVERCOMMIT)? {
        cfg.allow_overcommit = v;
    }
    if let Some(v) = parse(a, keys::ENABLE_DEFERRED_COMMIT)? {
        cfg.enable_deferred_commit = v;
    }
    if let Some(v) = parse(a, keys::FULLY_PHYSICALLY_BACKED)? {
        cfg.fully_physically_backed = v;
    }
    if let Some(v) = parse(a, keys::DISABLE_WRITABLE_FILE_SHARES)? {
        cfg.no_writable_file_shares = v;
    }
    if let Some(v) = string(a, keys::CPU_GROUP_ID) {
        cfg.cpu_group_id = Some(v);
    }
    if let Some(v) = string(a, keys::NETWORK_CONFIG_PROXY) {
        cfg.network_config_proxy = Some(v);
    }

    // Physically backed memory cannot be overcommitted.
    if cfg.fully_physically_backed {
        cfg.allow_overcommit = false;
    }

    if let Guest::Linux(linux) = &mut cfg.guest {
        if let Some(v) = string(a, keys::BOOT_FILES_ROOT_PATH) {
            linux.boot_files_path = PathBuf::from(v);
        }
        if let Some(v) = parse(a, keys::KERNEL_DIRECT_BOOT)? {
            linux.kernel_direct_boot = v;
        }
        if let Some(v) = parse::<u32>(a, keys::VPMEM_COUNT)? {
            if v > MAX_VPMEM_COUNT {
                return Err(ResolveError::InvalidAnnotationValue {
                    key: keys::VPMEM_COUNT.to_string(),
                    value: v.to_string(),
                    reason: format!("at most {MAX_VPMEM_COUNT} devices are supported"),
                });
            }
            linux.vpmem_device_count = v;
        }
        if let Some(v) = string(a, keys::KERNEL_BOOT_OPTIONS) {
            linux.kernel_boot_options = Some(v);
        }
        if let Some(v) = parse::<RootFsType>(a, keys::PREFERRED_ROOTFS_TYPE)? {
            linux.preferred_rootfs_type = v;
        }
        if cfg.fully_physically_backed {
            linux.vpmem_device_count = 0;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oci::{HyperV, Linux, Windows};

    fn linux_spec() -> Spec {
        Spec {
            linux: Some(Linux {}),
            ..Default::default()
        }
    }

    fn with(mut spec: Spec, key: &str, value: &str) -> Spec {
        spec.annotations.insert(key.to_string(), value.to_string());
        spec
    }

    #[test]
    fn process_isolated_windows_is_unsupported() {
        let mut spec = Spec {
            windows: Some(Windows { hyper_v: None }),
            ..Default::default()
        };
        assert_eq!(
            resolve(&mut spec, None, "id", ""),
            Err(ResolveError::UnsupportedGuest)
        );
    }

    #[test]
    fn linux_wins_when_both_sections_present() {
        let spec = Spec {
            linux: Some(Linux {}),
            windows: Some(Windows {
                hyper_v: Some(HyperV::default()),
            }),
            ..Default::default()
        };
        assert_eq!(guest_family(&spec), Ok(GuestFamily::Linux));
    }

    #[test]
    fn fully_physically_backed_disables_overcommit_and_vpmem() {
        let spec = with(linux_spec(), keys::FULLY_PHYSICALLY_BACKED, "true");
        let mut spec = with(spec, keys::ALLOW_OVERCOMMIT, "true");
        let cfg = resolve(&mut spec, None, "id", "").unwrap();
        assert!(!cfg.allow_overcommit);
        match cfg.guest {
            Guest::Linux(l) => assert_eq!(l.vpmem_device_count, 0),
            Guest::Windows(_) => panic!("expected linux guest"),
        }
    }

    #[test]
    fn vpmem_count_above_limit_is_rejected() {
        let mut spec = with(linux_spec(), keys::VPMEM_COUNT, "129");
        let err = resolve(&mut spec, None, "id", "").unwrap_err();
        assert!(matches!(
            err,
            ResolveError::InvalidAnnotationValue { ref key, .. } if key == keys::VPMEM_COUNT
        ));
    }

    #[test]
    fn boot_files_annotation_overrides_root() {
        let mut spec = with(linux_spec(), keys::BOOT_FILES_ROOT_PATH, r"D:\boot");
        let cfg = resolve(&mut spec, None, "id", r"C:\root").unwrap();
        assert_eq!(cfg.boot_files_path(), Some(std::path::Path::new(r"D:\boot")));
    }

    #[test]
    fn linux_only_keys_are_ignored_for_windows() {
        let mut spec = with(
            Spec {
                windows: Some(Windows {
                    hyper_v: Some(HyperV::default()),
                }),
                ..Default::default()
            },
            keys::PREFERRED_ROOTFS_TYPE,
            "not-a-type",
        );
        assert!(resolve(&mut spec, None, "id", "").is_ok());
    }
}
