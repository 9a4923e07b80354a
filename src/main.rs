// ============================================
// WimKeeper - main.rs
// ============================================
// Thin CLI over the library: every subcommand maps to one lifecycle
// operation. GUI front ends call the same library surface; this binary
// exists for scripting and for poking at a machine's mount state by
// hand.
// ============================================

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};

use wimkeeper::recovery::{RecoveryRequest, WindowsProcessControl};
use wimkeeper::{dism, driver, image, recovery, MountSlot, SystemDism, WimError};

#[derive(Parser)]
#[command(name = "wimkeeper", version, about = "Offline WIM image mount manager and driver injector")]
struct Cli {
    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// List the images inside a WIM file
    Info {
        /// Path to the .wim file
        wim: PathBuf,
    },
    /// Mount an image index onto an empty directory
    Mount {
        wim: PathBuf,
        /// 1-based image index
        index: u32,
        /// Empty directory to mount onto
        mount_dir: PathBuf,
        /// Mount read-only
        #[arg(long)]
        read_only: bool,
    },
    /// Unmount a mounted image
    Unmount {
        mount_dir: PathBuf,
        /// Persist in-mount changes back into the WIM (default: discard)
        #[arg(long)]
        commit: bool,
    },
    /// Show the OS-wide mounted image table
    Mounts,
    /// Check whether a directory holds a serviceable mounted image
    Check { mount_dir: PathBuf },
    /// Run the recovery ladder against stale or stuck mounts
    Recover {
        /// Also force this specific mount directory to be unmounted
        #[arg(long)]
        mount_dir: Option<PathBuf>,
        /// Commit when unmounting the requested directory
        #[arg(long)]
        commit: bool,
    },
    /// Install driver package(s) into a mounted image
    AddDriver {
        mount_dir: PathBuf,
        /// A single .inf file or a directory of driver packages
        source: PathBuf,
        /// Scan subdirectories of the source
        #[arg(long)]
        recurse: bool,
        /// Allow unsigned drivers (off unless explicitly requested)
        #[arg(long)]
        force_unsigned: bool,
    },
    /// Export the drivers installed in a mounted image
    ExportDrivers {
        mount_dir: PathBuf,
        out_dir: PathBuf,
    },
    /// List the third-party drivers installed in a mounted image
    ListDrivers { mount_dir: PathBuf },
    /// Enumerate .inf driver descriptors at a local path (no DISM)
    ScanDrivers { path: PathBuf },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let dism_runner = SystemDism;

    if !dism::is_admin() {
        eprintln!("warning: not running elevated; DISM mount operations will likely fail");
    }

    match cli.command {
        Cmd::Info { wim } => {
            let images = image::get_wim_images(&dism_runner, &wim)
                .map_err(describe)
                .with_context(|| format!("reading image info from {}", wim.display()))?;
            if images.is_empty() {
                println!("No images found in {}", wim.display());
            }
            for entry in images {
                println!("Index {}: {} - {}", entry.index, entry.name, entry.description);
            }
        }
        Cmd::Mount { wim, index, mount_dir, read_only } => {
            let slot = MountSlot {
                image_file: wim,
                index,
                mount_dir,
                read_only,
                commit_on_unmount: false,
            };
            match image::mount_slot(&dism_runner, &slot, &[]) {
                Ok(msg) => println!("{}", msg),
                Err(WimError::Conflict(conflict)) => {
                    eprintln!("Conflict: {}", conflict);
                    eprintln!("Options: force cleanup then retry (wimkeeper recover), cancel, or inspect (wimkeeper mounts)");
                    bail!("mount conflicts with a live mount");
                }
                Err(e) => return Err(describe(e)),
            }
        }
        Cmd::Unmount { mount_dir, commit } => {
            match image::unmount_wim(&dism_runner, &mount_dir, commit) {
                Ok(msg) => println!("{}", msg),
                Err(e) => return Err(describe(e)),
            }
        }
        Cmd::Mounts => {
            let live = image::query_mounted_images(&dism_runner).map_err(describe)?;
            if live.is_empty() {
                println!("No images are currently mounted.");
            }
            for record in live {
                println!(
                    "{} <- {} (index {}) [{:?}, {}]",
                    record.mount_dir,
                    record.image_file,
                    record.image_index,
                    record.status,
                    if record.read_write { "Read/Write" } else { "Read Only" }
                );
            }
        }
        Cmd::Check { mount_dir } => {
            let check = image::check_mount_status(&dism_runner, &mount_dir).map_err(describe)?;
            match &check.record {
                Some(r) => println!(
                    "Live mount table: {} (index {}) is mounted here, status {:?}",
                    r.image_file, r.image_index, r.status
                ),
                None => println!("Live mount table: no record for this directory"),
            }
            if check.looks_mounted {
                println!("Local probe: Windows system folders present; ready for driver servicing");
            } else {
                println!("Local probe: no Windows system folders; this does not look like a mounted image");
            }
        }
        Cmd::Recover { mount_dir, commit } => {
            let request = RecoveryRequest { mount_dir, commit };
            let report = recovery::run_recovery(&dism_runner, &WindowsProcessControl, &request)
                .map_err(describe)?;
            for line in report.transcript() {
                println!("{}", line);
            }
            report.outcome().map_err(describe)?;
            println!("Recovery complete; mount state is clean.");
        }
        Cmd::AddDriver { mount_dir, source, recurse, force_unsigned } => {
            let msg =
                driver::add_driver(&dism_runner, &mount_dir, &source, recurse, force_unsigned)
                    .map_err(describe)?;
            println!("{}", msg);
        }
        Cmd::ExportDrivers { mount_dir, out_dir } => {
            let msg =
                driver::export_drivers(&dism_runner, &mount_dir, &out_dir).map_err(describe)?;
            println!("{}", msg);
        }
        Cmd::ListDrivers { mount_dir } => {
            let drivers = driver::list_drivers(&dism_runner, &mount_dir).map_err(describe)?;
            if drivers.is_empty() {
                println!("No third-party drivers installed.");
            }
            for (i, d) in drivers.iter().enumerate() {
                println!(
                    "{:2}. {} - {} ({}, v{}, {})",
                    i + 1,
                    d.published_name,
                    d.original_file_name,
                    d.provider,
                    d.version,
                    d.date
                );
            }
        }
        Cmd::ScanDrivers { path } => {
            let drivers = driver::scan_driver_source(&path).map_err(describe)?;
            println!("Found {} driver descriptor file(s)", drivers.len());
            for d in &drivers {
                println!("  {}", d.path);
            }
        }
    }

    Ok(())
}

/// Turn a library error into an anyhow error that keeps the raw tool
/// message and appends the classified guidance, so a failure is never
/// just an opaque code.
fn describe(err: WimError) -> anyhow::Error {
    if let WimError::Tool(failure) = &err {
        let mut text = format!("DISM failed (exit {}): {}", failure.code, failure.message);
        for line in &failure.guidance {
            text.push_str("\n  - ");
            text.push_str(line);
        }
        anyhow::anyhow!(text)
    } else {
        anyhow::Error::new(err)
    }
}
