// ============================================
// image.rs - Mount/unmount operator
// ============================================
// Builds and issues the DISM image-servicing commands:
//   /Get-WimInfo (+ legacy /Get-ImageInfo fallback)
//   /Mount-Image, /Unmount-Image (/Commit XOR /Discard)
//   /Remount-Image
//   /Get-MountedImageInfo  <- the source of truth for live state
//   /Cleanup-Wim, /Cleanup-Mountpoints
//
// Paths are normalized (separator canonicalization ONLY - no symlink
// resolution, no existence checks: the directory may legitimately not
// exist yet when the user is about to create it) and passed to DISM as
// /Flag:value tokens, each its own argv entry.
// ============================================

use std::fs;
use std::path::Path;

use tracing::{info, warn};

use crate::conflict::{self, MountSlot};
use crate::dism::DismRunner;
use crate::error::{OpResult, QueryResult, WimError};
use crate::parse::{self, ImageIndexEntry, MountedImage};

// ============================================
// PATH NORMALIZATION
// ============================================

/// Canonicalize path separators the way DISM expects: backslashes,
/// no duplicate separators, no trailing separator, `.`/`..` segments
/// collapsed lexically. Deliberately does NOT touch the filesystem.
pub fn normalize_path(path: &Path) -> String {
    let raw = path.to_string_lossy().replace('/', "\\");

    // Preserve a UNC prefix (\\server\share) through the split below.
    let (prefix, rest) = match raw.strip_prefix("\\\\") {
        Some(rest) => ("\\\\", rest),
        None => ("", raw.as_str()),
    };

    let mut parts: Vec<&str> = Vec::new();
    for part in rest.split('\\') {
        match part {
            "" | "." => {}
            ".." => {
                // Lexical parent: pop unless there's nothing poppable.
                match parts.last() {
                    Some(&last) if last != ".." && !last.ends_with(':') => {
                        parts.pop();
                    }
                    // A drive root swallows ".." - C:\.. is still C:\.
                    Some(&last) if last.ends_with(':') => {}
                    _ if prefix.is_empty() => parts.push(".."),
                    _ => {}
                }
            }
            p => parts.push(p),
        }
    }

    let mut joined = format!("{}{}", prefix, parts.join("\\"));
    if joined.is_empty() {
        joined = ".".to_string();
    } else if joined.ends_with(':') {
        // "C:" alone means the drive root here, not the drive-relative CWD.
        joined.push('\\');
    }
    joined
}

// ============================================
// IMAGE INFO
// ============================================

/// List the images inside a WIM file.
///
/// Tries `/Get-WimInfo /WimFile:` first; on failure retries with the
/// legacy spelling `/Get-ImageInfo /ImageFile:` - the tool has carried
/// both flag names over the years and either may be the one a given
/// build accepts.
pub fn get_wim_images(dism: &dyn DismRunner, wim_file: &Path) -> QueryResult<ImageIndexEntry> {
    let file = normalize_path(wim_file);

    let primary = dism.run(&["/Get-WimInfo", &format!("/WimFile:{}", file)]);
    if primary.success() {
        return Ok(parse::parse_image_info(&primary.stdout));
    }

    warn!(code = primary.code, "Get-WimInfo failed, trying legacy Get-ImageInfo");
    let legacy = dism.run(&["/Get-ImageInfo", &format!("/ImageFile:{}", file)]);
    if legacy.success() {
        return Ok(parse::parse_image_info(&legacy.stdout));
    }

    // Report whichever attempt actually said something: builds that
    // reject the primary spelling often exit silently, and then the
    // legacy attempt is the one naming the real failure.
    if primary.stderr.trim().is_empty() && primary.stdout.trim().is_empty() {
        Err(WimError::from_output(&legacy))
    } else {
        Err(WimError::from_output(&primary))
    }
}

// ============================================
// MOUNT / UNMOUNT
// ============================================

/// Mount one image index of a WIM file onto a directory.
///
/// The directory is re-checked to exist and be empty at call time -
/// time may have passed since the user picked it, and DISM's own
/// error for a dirty directory is far less helpful.
pub fn mount_wim(
    dism: &dyn DismRunner,
    wim_file: &Path,
    index: u32,
    mount_dir: &Path,
    read_only: bool,
) -> OpResult {
    let file = normalize_path(wim_file);
    let dir = normalize_path(mount_dir);

    match fs::read_dir(mount_dir) {
        Err(_) => return Err(WimError::MountDirMissing(dir)),
        Ok(mut entries) => {
            if entries.next().is_some() {
                return Err(WimError::MountDirNotEmpty(dir));
            }
        }
    }

    info!(file = %file, index, dir = %dir, read_only, "mounting image");

    let image_arg = format!("/ImageFile:{}", file);
    let index_arg = format!("/Index:{}", index);
    let dir_arg = format!("/MountDir:{}", dir);
    let mut args: Vec<&str> = vec![
        "/Mount-Image",
        image_arg.as_str(),
        index_arg.as_str(),
        dir_arg.as_str(),
    ];
    if read_only {
        args.push("/ReadOnly");
    }

    let output = dism.run(&args);
    if output.success() {
        info!(dir = %dir, "image mounted");
        Ok(format!("Image mounted at {}", dir))
    } else {
        Err(WimError::from_output(&output))
    }
}

/// Unmount the image at a directory, committing or discarding changes.
/// Exactly one of /Commit or /Discard is ever emitted.
pub fn unmount_wim(dism: &dyn DismRunner, mount_dir: &Path, commit: bool) -> OpResult {
    let dir = normalize_path(mount_dir);
    let mode = if commit { "/Commit" } else { "/Discard" };

    info!(dir = %dir, mode, "unmounting image");

    let output = dism.run(&["/Unmount-Image", &format!("/MountDir:{}", dir), mode]);
    if output.success() {
        info!(dir = %dir, "image unmounted");
        Ok(format!("Image unmounted from {} ({})", dir, mode))
    } else {
        Err(WimError::from_output(&output))
    }
}

/// Reattach an orphaned mount (one whose status is "Needs Remount")
/// so it can be serviced or cleanly unmounted.
pub fn remount_wim(dism: &dyn DismRunner, mount_dir: &Path) -> OpResult {
    let dir = normalize_path(mount_dir);
    info!(dir = %dir, "remounting image");

    let output = dism.run(&["/Remount-Image", &format!("/MountDir:{}", dir)]);
    if output.success() {
        Ok(format!("Image remounted at {}", dir))
    } else {
        Err(WimError::from_output(&output))
    }
}

// ============================================
// LIVE MOUNT STATE
// ============================================

/// Query the OS-wide mount table. This is the source of truth the
/// conflict resolver and recovery ladder reconcile against; local
/// beliefs about "what is mounted" are never trusted over it.
pub fn query_mounted_images(dism: &dyn DismRunner) -> QueryResult<MountedImage> {
    let output = dism.run(&["/Get-MountedImageInfo"]);
    if output.success() {
        Ok(parse::parse_mounted_images(&output.stdout))
    } else {
        Err(WimError::from_output(&output))
    }
}

/// Quick local heuristic for "does this look like a mounted Windows
/// image": a mounted image exposes Windows\System32. Display-only -
/// never a substitute for `query_mounted_images`.
pub fn looks_mounted(mount_dir: &Path) -> bool {
    mount_dir.join("Windows").join("System32").is_dir()
}

/// Status snapshot of one mount directory: the live-table record at
/// that directory (if any) paired with the local filesystem probe.
#[derive(Debug)]
pub struct MountCheck {
    pub record: Option<MountedImage>,
    /// Result of the `Windows\System32` probe. Advisory only; the
    /// probe never upgrades a directory to "mounted" on its own.
    pub looks_mounted: bool,
}

/// Check whether a directory holds a mounted image: the live table is
/// matched by normalized path equality, then the directory is probed
/// for Windows system folders so the caller can tell "mounted and
/// serviceable" apart from "mounted but empty-looking".
pub fn check_mount_status(dism: &dyn DismRunner, mount_dir: &Path) -> Result<MountCheck, WimError> {
    let wanted = normalize_path(mount_dir).to_lowercase();
    let record = query_mounted_images(dism)?
        .into_iter()
        .find(|r| normalize_path(Path::new(&r.mount_dir)).to_lowercase() == wanted);

    Ok(MountCheck {
        record,
        looks_mounted: looks_mounted(mount_dir),
    })
}

// ============================================
// CLEANUP SUBCOMMANDS
// ============================================

/// `/Cleanup-Wim`: release cached WIM servicing resources.
/// `verbose_log` adds `/LogLevel:4` so a re-run after lock eviction
/// leaves a full trail in dism.log.
pub fn cleanup_wim_cache(dism: &dyn DismRunner, verbose_log: bool) -> OpResult {
    let mut args = vec!["/Cleanup-Wim"];
    if verbose_log {
        args.push("/LogLevel:4");
    }
    let output = dism.run(&args);
    if output.success() {
        Ok("WIM cache cleanup completed".to_string())
    } else {
        Err(WimError::from_output(&output))
    }
}

/// `/Cleanup-Mountpoints`: delete orphaned mount point records.
pub fn cleanup_mountpoints(dism: &dyn DismRunner, verbose_log: bool) -> OpResult {
    let mut args = vec!["/Cleanup-Mountpoints"];
    if verbose_log {
        args.push("/LogLevel:4");
    }
    let output = dism.run(&args);
    if output.success() {
        Ok("Mount point cleanup completed".to_string())
    } else {
        Err(WimError::from_output(&output))
    }
}

// ============================================
// PREFLIGHTED MOUNT
// ============================================

/// Mount a slot after the full preflight: cross-slot index check, then
/// live reconciliation against a fresh mount-table query, then the
/// mount itself. Conflicts surface BEFORE any mount command is issued.
pub fn mount_slot(dism: &dyn DismRunner, slot: &MountSlot, siblings: &[MountSlot]) -> OpResult {
    // Tracked-state check: no sibling slot may hold the same index.
    for (pos, other) in siblings.iter().enumerate() {
        if other.index == slot.index {
            return Err(WimError::SlotConflict(conflict::IndexConflict {
                index: slot.index,
                held_by: pos,
            }));
        }
    }

    // Live reconciliation (invariant: the mount table wins over any
    // cached belief, so this query happens immediately before acting).
    let live = query_mounted_images(dism)?;
    conflict::check_live_mounts(&slot.image_file, slot.index, &live)
        .map_err(WimError::Conflict)?;

    mount_wim(
        dism,
        &slot.image_file,
        slot.index,
        &slot.mount_dir,
        slot.read_only,
    )
}

// ============================================
// TESTS
// ============================================
