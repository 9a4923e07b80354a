// ============================================
// conflict.rs - Mount slot conflict resolver
// ============================================
// The front end exposes mount "slots" (two in the shipped UI, any N
// here). Each slot picks an (image file, index, mount dir) triple.
// Two checks keep them from stepping on each other:
//
// 1. SELECTION TIME (cross-slot): no two slots may claim the same
//    index. Selecting a sibling's index is rejected and the slot
//    reverts to Unselected. Refreshing a slot's offered index list
//    filters out sibling claims and clears a selection that was
//    claimed out from under it.
//
// 2. MOUNT TIME (live): the OS mount table is authoritative and can
//    be mutated by any privileged process, so the requested
//    (file, index) is reconciled against a FRESH /Get-MountedImageInfo
//    query immediately before mounting. On a hit the resolver never
//    proceeds silently - it hands the caller a decision request.
// ============================================

use std::fmt;
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::image::normalize_path;
use crate::parse::MountedImage;

/// One user-visible mount operation. The mount directory is the
/// de-facto primary key against the OS; there is no other identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountSlot {
    pub image_file: PathBuf,
    pub index: u32,
    pub mount_dir: PathBuf,
    pub read_only: bool,
    pub commit_on_unmount: bool,
}

/// Index selection state of one slot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Selection {
    #[default]
    Unselected,
    Selected(u32),
}

impl Selection {
    pub fn index(self) -> Option<u32> {
        match self {
            Selection::Unselected => None,
            Selection::Selected(i) => Some(i),
        }
    }
}

/// A rejected selection: the index is already claimed by a sibling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexConflict {
    pub index: u32,
    /// Which slot holds the claim.
    pub held_by: usize,
}

impl fmt::Display for IndexConflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "index {} is already selected by slot {}; pick a different index",
            self.index,
            self.held_by + 1
        )
    }
}

/// Selection state for all slots, generalized to N (the GUI uses 2).
#[derive(Debug, Clone)]
pub struct SlotSet {
    selections: Vec<Selection>,
}

impl SlotSet {
    pub fn new(slots: usize) -> Self {
        SlotSet {
            selections: vec![Selection::Unselected; slots],
        }
    }

    pub fn selection(&self, slot: usize) -> Selection {
        self.selections[slot]
    }

    pub fn clear(&mut self, slot: usize) {
        self.selections[slot] = Selection::Unselected;
    }

    /// Try to select `index` for `slot`. If any sibling already holds
    /// that index the selection is rejected, the slot reverts to
    /// Unselected, and the conflict explains which sibling holds it.
    pub fn select(&mut self, slot: usize, index: u32) -> Result<(), IndexConflict> {
        for (other, sel) in self.selections.iter().enumerate() {
            if other != slot && sel.index() == Some(index) {
                self.selections[slot] = Selection::Unselected;
                warn!(slot, index, held_by = other, "index selection conflict");
                return Err(IndexConflict {
                    index,
                    held_by: other,
                });
            }
        }
        self.selections[slot] = Selection::Selected(index);
        Ok(())
    }

    /// Refresh the offered index list for `slot` after an image-info
    /// query. Indices claimed by siblings are removed from the offer,
    /// and the slot's own selection is cleared when it is no longer in
    /// the filtered list (claimed by a sibling, or gone from the WIM).
    pub fn refresh_offered(&mut self, slot: usize, offered: &[u32]) -> Vec<u32> {
        let available: Vec<u32> = offered
            .iter()
            .copied()
            .filter(|idx| {
                !self
                    .selections
                    .iter()
                    .enumerate()
                    .any(|(other, sel)| other != slot && sel.index() == Some(*idx))
            })
            .collect();

        if let Selection::Selected(current) = self.selections[slot] {
            if !available.contains(&current) {
                self.selections[slot] = Selection::Unselected;
            }
        }
        available
    }
}

// ============================================
// LIVE RECONCILIATION
// ============================================

/// How the caller may resolve a live mount conflict. Presented in
/// order; the front end maps these to a prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictResolution {
    /// Run the recovery ladder against the conflicting mount, then retry.
    ForceCleanupThenRetry,
    /// Abandon the mount request.
    Cancel,
    /// Show the full live-mount report before deciding.
    InspectStatus,
}

/// A requested mount collides with a live mount record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountConflict {
    pub requested_file: String,
    pub requested_index: u32,
    /// The live record that matched.
    pub existing: MountedImage,
    /// Offered resolutions, in presentation order.
    pub resolutions: [ConflictResolution; 3],
}

impl fmt::Display for MountConflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "index {} of {} is already mounted at {} (status {:?})",
            self.requested_index, self.requested_file, self.existing.mount_dir, self.existing.status
        )
    }
}

/// Compare a requested (image file, index) against every live mount
/// record and surface a conflict before any DISM call is issued.
///
/// DISM reports the mount index as a bare integer with no guaranteed
/// path canonicalization, so the file comparison is a substring match
/// either way on the normalized, lowercased paths. That heuristic can
/// false-positive when one path is a suffix of another
/// (C:\a\x.wim vs C:\b\a\x.wim); kept for compatibility with how the
/// mount table has always been matched here.
pub fn check_live_mounts(
    image_file: &Path,
    index: u32,
    live: &[MountedImage],
) -> Result<(), MountConflict> {
    let requested = normalize_path(image_file).to_lowercase();

    for record in live {
        if record.image_index != index {
            continue;
        }
        let mounted = normalize_path(Path::new(&record.image_file)).to_lowercase();
        if mounted.contains(&requested) || requested.contains(&mounted) {
            warn!(
                index,
                file = %requested,
                mount_dir = %record.mount_dir,
                "requested mount conflicts with live mount"
            );
            return Err(MountConflict {
                requested_file: normalize_path(image_file),
                requested_index: index,
                existing: record.clone(),
                resolutions: [
                    ConflictResolution::ForceCleanupThenRetry,
                    ConflictResolution::Cancel,
                    ConflictResolution::InspectStatus,
                ],
            });
        }
    }
    Ok(())
}

// ============================================
// TESTS
// ============================================
