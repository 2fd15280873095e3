//! End-to-end tests for utility VM option resolution.
//!
//! Tested in this file:
//! - empty specs resolve to the family baselines
//! - annotations override baselines for both families
//! - shim options never overwrite annotations already on the spec
//! - default container annotations merge per key
//! - malformed annotation values name the offending key and change nothing

use std::collections::BTreeMap;

use uvm_provision::oci::annotations as keys;
use uvm_provision::oci::uvm::{ResolveError, resolve};
use uvm_provision::oci::{HyperV, Linux, Spec, Windows};
use uvm_provision::options::ShimOptions;
use uvm_provision::uvm::{GuestFamily, defaults_for};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn lcow() -> Spec {
    Spec {
        linux: Some(Linux {}),
        ..Default::default()
    }
}

fn wcow_hyperv() -> Spec {
    Spec {
        windows: Some(Windows {
            hyper_v: Some(HyperV::default()),
        }),
        ..Default::default()
    }
}

fn annotations(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

// ---------------------------------------------------------------------------
// Baselines
// ---------------------------------------------------------------------------

#[test]
fn default_lcow_matches_linux_baseline() {
    let mut spec = lcow();
    let cfg = resolve(&mut spec, None, "default_lcow", "").unwrap();
    assert_eq!(cfg, defaults_for(GuestFamily::Linux, "default_lcow", ""));
}

#[test]
fn default_wcow_matches_windows_baseline() {
    let mut spec = wcow_hyperv();
    let cfg = resolve(&mut spec, None, "default_wcow", "").unwrap();
    assert_eq!(cfg, defaults_for(GuestFamily::Windows, "default_wcow", ""));
}

#[test]
fn spec_without_platform_is_unsupported() {
    let mut spec = Spec::default();
    assert_eq!(
        resolve(&mut spec, None, "id", ""),
        Err(ResolveError::UnsupportedGuest)
    );
}

// ---------------------------------------------------------------------------
// Annotations
// ---------------------------------------------------------------------------

#[test]
fn common_annotations_apply_to_both_families() {
    let as_ = annotations(&[
        (keys::PROCESSOR_COUNT, "8"),
        (keys::CPU_GROUP_ID, "1"),
        (keys::DISABLE_WRITABLE_FILE_SHARES, "true"),
        (keys::MEMORY_LOW_MMIO_GAP_IN_MB, "1024"),
    ]);

    for (name, mut spec) in [("lcow", lcow()), ("wcow-hypervisor", wcow_hyperv())] {
        spec.annotations = as_.clone();
        let cfg = resolve(&mut spec, None, name, "").unwrap();
        assert_eq!(cfg.processor_count, 8, "{name}");
        assert_eq!(cfg.low_mmio_gap_mb, 1024, "{name}");
        assert_eq!(cfg.cpu_group_id.as_deref(), Some("1"), "{name}");
        assert!(cfg.no_writable_file_shares, "{name}");
    }
}

#[test]
fn malformed_processor_count_names_key() {
    let mut spec = lcow();
    spec.annotations = annotations(&[(keys::PROCESSOR_COUNT, "8 cores")]);
    match resolve(&mut spec, None, "id", "") {
        Err(ResolveError::InvalidAnnotationValue { key, .. }) => {
            assert_eq!(key, keys::PROCESSOR_COUNT)
        }
        other => panic!("expected InvalidAnnotationValue, got {other:?}"),
    }
}

#[test]
fn bool_annotation_rejects_non_literal_tokens() {
    let mut spec = wcow_hyperv();
    spec.annotations = annotations(&[(keys::DISABLE_WRITABLE_FILE_SHARES, "yes")]);
    let err = resolve(&mut spec, None, "id", "").unwrap_err();
    assert!(err.to_string().contains(keys::DISABLE_WRITABLE_FILE_SHARES));
}

#[test]
fn zero_memory_is_rejected() {
    let mut spec = lcow();
    spec.annotations = annotations(&[(keys::MEMORY_SIZE_IN_MB, "0")]);
    assert!(matches!(
        resolve(&mut spec, None, "id", ""),
        Err(ResolveError::InvalidAnnotationValue { .. })
    ));
}

// ---------------------------------------------------------------------------
// Shim options
// ---------------------------------------------------------------------------

#[test]
fn options_fill_fields_the_spec_leaves_open() {
    let opts = ShimOptions {
        boot_files_root_path: r"C:\ContainerPlat\LinuxBootFiles".to_string(),
        vm_processor_count: 4,
        vm_memory_size_in_mb: 4096,
        nc_proxy_addr: r"\\.\pipe\ncproxy".to_string(),
        ..Default::default()
    };
    let mut spec = lcow();
    let cfg = resolve(&mut spec, Some(&opts), "id", r"C:\root").unwrap();

    assert_eq!(cfg.processor_count, 4);
    assert_eq!(cfg.memory_size_mb, 4096);
    assert_eq!(cfg.network_config_proxy.as_deref(), Some(r"\\.\pipe\ncproxy"));
    assert_eq!(
        cfg.boot_files_path(),
        Some(std::path::Path::new(r"C:\ContainerPlat\LinuxBootFiles"))
    );
    assert_eq!(spec.annotations[keys::PROCESSOR_COUNT], "4");
}

#[test]
fn spec_annotations_are_never_clobbered() {
    let opts = ShimOptions {
        vm_processor_count: 4,
        vm_memory_size_in_mb: 4096,
        default_container_annotations: annotations(&[(keys::PROCESSOR_COUNT, "32")]),
        ..Default::default()
    };
    let mut spec = wcow_hyperv();
    spec.annotations = annotations(&[
        (keys::PROCESSOR_COUNT, "16"),
        (keys::MEMORY_SIZE_IN_MB, "8192"),
    ]);

    let cfg = resolve(&mut spec, Some(&opts), "id", "").unwrap();

    assert_eq!(cfg.processor_count, 16);
    assert_eq!(cfg.memory_size_mb, 8192);
    assert_eq!(spec.annotations[keys::PROCESSOR_COUNT], "16");
    assert_eq!(spec.annotations[keys::MEMORY_SIZE_IN_MB], "8192");
}

#[test]
fn default_container_annotations_merge_per_key() {
    let opts = ShimOptions {
        default_container_annotations: annotations(&[("a", "1"), ("b", "2")]),
        ..Default::default()
    };
    let mut spec = lcow();
    spec.annotations = annotations(&[("a", "9")]);

    let cfg = resolve(&mut spec, Some(&opts), "id", "").unwrap();

    assert_eq!(spec.annotations, annotations(&[("a", "9"), ("b", "2")]));
    assert_eq!(cfg.default_container_annotations, annotations(&[("a", "1"), ("b", "2")]));
}

#[test]
fn resolve_is_repeatable() {
    let opts = ShimOptions {
        vm_processor_count: 6,
        default_container_annotations: annotations(&[(keys::ALLOW_OVERCOMMIT, "false")]),
        ..Default::default()
    };
    let mut first = lcow();
    let mut second = lcow();

    let a = resolve(&mut first, Some(&opts), "id", r"C:\boot").unwrap();
    let b = resolve(&mut second, Some(&opts), "id", r"C:\boot").unwrap();
    let again = resolve(&mut first, Some(&opts), "id", r"C:\boot").unwrap();

    assert_eq!(a, b);
    assert_eq!(a, again);
    assert!(!a.allow_overcommit);
}

#[test]
fn explicit_option_beats_default_container_annotation() {
    let opts = ShimOptions {
        vm_processor_count: 4,
        default_container_annotations: annotations(&[(keys::PROCESSOR_COUNT, "32")]),
        ..Default::default()
    };
    let mut spec = lcow();

    let cfg = resolve(&mut spec, Some(&opts), "id", "").unwrap();

    assert_eq!(cfg.processor_count, 4);
    assert_eq!(spec.annotations[keys::PROCESSOR_COUNT], "4");
}

#[test]
fn failed_resolve_leaves_annotations_untouched() {
    let opts = ShimOptions {
        vm_processor_count: 4,
        default_container_annotations: annotations(&[("a", "1")]),
        ..Default::default()
    };
    let mut spec = lcow();
    spec.annotations = annotations(&[(keys::MEMORY_SIZE_IN_MB, "bogus")]);
    let before = spec.clone();

    let err = resolve(&mut spec, Some(&opts), "id", "").unwrap_err();

    assert!(matches!(
        err,
        ResolveError::InvalidAnnotationValue { ref key, .. } if key == keys::MEMORY_SIZE_IN_MB
    ));
    assert_eq!(spec, before);
}
