// ============================================
// driver.rs - Driver operator
// ============================================
// Injects driver packages into an already-mounted image, exports the
// drivers a mounted image carries, and enumerates both. The DISM side:
//   /Add-Driver /Image: /Driver: [/Recurse] [/ForceUnsigned]
//   /Export-Driver /Image: /Destination:
//   /Get-Drivers /Image:
// scan_driver_source is the one pure-local operation: a filesystem
// walk for .inf descriptor files, no DISM involved.
// ============================================

use std::fs;
use std::path::Path;

use tracing::info;
use walkdir::WalkDir;

use crate::dism::DismRunner;
use crate::error::{OpResult, QueryResult, WimError};
use crate::image::normalize_path;
use crate::parse::{self, DriverDescriptor};

/// Install a driver package into the image mounted at `mount_dir`.
///
/// `source` may be a single .inf descriptor or a directory; `recurse`
/// tells DISM to scan subdirectories. `force_unsigned` bypasses
/// signature enforcement - callers must default it to false and only
/// set it on an explicit user decision.
pub fn add_driver(
    dism: &dyn DismRunner,
    mount_dir: &Path,
    source: &Path,
    recurse: bool,
    force_unsigned: bool,
) -> OpResult {
    let image = normalize_path(mount_dir);
    let driver = normalize_path(source);

    info!(image = %image, driver = %driver, recurse, force_unsigned, "adding driver");

    let image_arg = format!("/Image:{}", image);
    let driver_arg = format!("/Driver:{}", driver);
    let mut args: Vec<&str> = vec!["/Add-Driver", image_arg.as_str(), driver_arg.as_str()];
    if recurse {
        args.push("/Recurse");
    }
    if force_unsigned {
        args.push("/ForceUnsigned");
    }

    let output = dism.run(&args);
    if output.success() {
        Ok(format!("Driver(s) from {} installed into {}", driver, image))
    } else {
        Err(WimError::from_output(&output))
    }
}

/// Export all third-party drivers from the mounted image into
/// `out_dir`. DISM does not create a missing destination, so it is
/// created here first.
pub fn export_drivers(dism: &dyn DismRunner, mount_dir: &Path, out_dir: &Path) -> OpResult {
    let image = normalize_path(mount_dir);
    let dest = normalize_path(out_dir);

    fs::create_dir_all(out_dir)?;

    info!(image = %image, dest = %dest, "exporting drivers");

    let output = dism.run(&[
        "/Export-Driver",
        &format!("/Image:{}", image),
        &format!("/Destination:{}", dest),
    ]);
    if output.success() {
        Ok(format!("Drivers exported to {}", dest))
    } else {
        Err(WimError::from_output(&output))
    }
}

/// List the third-party drivers installed in the mounted image.
pub fn list_drivers(dism: &dyn DismRunner, mount_dir: &Path) -> QueryResult<DriverDescriptor> {
    let image = normalize_path(mount_dir);

    let output = dism.run(&["/Get-Drivers", &format!("/Image:{}", image)]);
    if output.success() {
        Ok(parse::parse_drivers(&output.stdout))
    } else {
        Err(WimError::from_output(&output))
    }
}

/// Enumerate .inf driver descriptors at a local path without invoking
/// DISM. A single .inf file yields one entry; a directory is walked
/// recursively. Finding nothing is an empty list, not an error.
pub fn scan_driver_source(path: &Path) -> QueryResult<DriverDescriptor> {
    if !path.exists() {
        return Err(WimError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("driver source {} does not exist", path.display()),
        )));
    }

    let mut drivers = Vec::new();

    if path.is_file() {
        if is_inf(path) {
            drivers.push(descriptor_for(path, None));
        }
        return Ok(drivers);
    }

    for entry in WalkDir::new(path).into_iter().filter_map(|e| e.ok()) {
        if entry.file_type().is_file() && is_inf(entry.path()) {
            let folder = entry.path().parent().map(|p| normalize_path(p));
            drivers.push(descriptor_for(entry.path(), folder));
        }
    }

    Ok(drivers)
}

fn is_inf(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.eq_ignore_ascii_case("inf"))
        .unwrap_or(false)
}

fn descriptor_for(path: &Path, folder: Option<String>) -> DriverDescriptor {
    DriverDescriptor {
        path: normalize_path(path),
        display_name: path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default(),
        folder,
        ..DriverDescriptor::default()
    }
}

// ============================================
// TESTS
// ============================================
