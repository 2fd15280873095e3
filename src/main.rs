//! uvm-provision: resolve utility VM configuration, grant VM group access,
//! and create VMs on a remote backend.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::info;

use uvm_provision::oci::Spec;
use uvm_provision::oci::uvm::resolve;
use uvm_provision::options::ShimOptions;
use uvm_provision::paths::ShimPaths;
use uvm_provision::security::{AccessMask, SystemDacls, grant_vm_group_access_with_mask};
use uvm_provision::uvm::ResolvedVmConfig;
use uvm_provision::vm::{Backend, RemoteEndpoint};

#[derive(Parser, Debug)]
#[command(name = "uvm-provision", version, about = "Utility VM provisioning")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the resolved VM configuration for an OCI spec
    Resolve(ResolveArgs),

    /// Grant the Virtual Machines group access to a file or directory
    Grant {
        path: PathBuf,

        /// Access to grant; repeat to combine
        #[arg(long, value_enum, default_values_t = [Access::Read])]
        access: Vec<Access>,
    },

    /// Resolve a spec and create the VM on a remote backend
    Create {
        #[command(flatten)]
        resolve: ResolveArgs,

        /// Remote VM service address (host:port)
        #[arg(long)]
        remote: String,
    },
}

#[derive(clap::Args, Debug)]
struct ResolveArgs {
    /// Path to the OCI config.json
    spec: PathBuf,

    /// Shim options TOML (defaults to options.toml in the config directory)
    #[arg(long)]
    options: Option<PathBuf>,

    /// VM identifier
    #[arg(long, default_value = "uvm")]
    id: String,

    /// Linux boot files root
    #[arg(long, default_value = "")]
    root: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Access {
    Read,
    Write,
    Execute,
    All,
}

impl From<Access> for AccessMask {
    fn from(a: Access) -> Self {
        match a {
            Access::Read => AccessMask::READ,
            Access::Write => AccessMask::WRITE,
            Access::Execute => AccessMask::EXECUTE,
            Access::All => AccessMask::ALL,
        }
    }
}

fn load_options(explicit: Option<&Path>) -> Result<Option<ShimOptions>> {
    let path = match explicit {
        Some(p) => Some(p.to_path_buf()),
        None => ShimPaths::resolve().and_then(|p| p.options_file()),
    };
    path.map(|p| ShimOptions::load(&p)).transpose()
}

fn resolve_config(args: &ResolveArgs) -> Result<ResolvedVmConfig> {
    let mut spec = Spec::load(&args.spec)?;
    let opts = load_options(args.options.as_deref())?;
    let config = resolve(&mut spec, opts.as_ref(), &args.id, &args.root)
        .with_context(|| format!("resolve {}", args.spec.display()))?;
    info!(id = %config.id, family = %config.guest_family(), "resolved VM configuration");
    Ok(config)
}

fn main() -> Result<()> {
    let _log_guard = uvm_provision::logging::init();
    let args = Args::parse();

    match args.command {
        Command::Resolve(resolve_args) => {
            let config = resolve_config(&resolve_args)?;
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
        Command::Grant { path, access } => {
            let mask = access
                .into_iter()
                .fold(AccessMask::empty(), |m, a| m | AccessMask::from(a));
            grant_vm_group_access_with_mask(&SystemDacls, &path, mask, &CancellationToken::new())?;
            info!(path = %path.display(), ?mask, "granted VM group access");
        }
        Command::Create { resolve, remote } => {
            let config = resolve_config(&resolve)?;
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
                .context("Failed to create Tokio runtime")?;
            let backend = Backend::Remote(RemoteEndpoint::new(remote));
            runtime.block_on(async {
                let mut vm = backend.build(config);
                vm.create(&CancellationToken::new()).await?;
                println!("{} {}", vm.id(), vm.state());
                anyhow::Ok(())
            })?;
        }
    }

    Ok(())
}
