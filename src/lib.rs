//! uvm-provision: utility VM configuration and host access for container shims.
//!
//! - [`oci::uvm::resolve`] merges family defaults, shim options and spec
//!   annotations into one [`uvm::ResolvedVmConfig`].
//! - [`security::grant_vm_group_access_with_mask`] gives the `Virtual Machines`
//!   group access to a host file or directory.
//! - [`vm::Backend`] builds a [`vm::UtilityVm`] on a local or remote backend.

pub mod logging;
pub mod oci;
pub mod options;
pub mod paths;
pub mod security;
pub mod uvm;
pub mod vm;
