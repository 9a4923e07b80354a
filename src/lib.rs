// ============================================
// WimKeeper - lib.rs
// ============================================
// Offline WIM image lifecycle manager.
//
// Key concepts:
// - A WIM file holds one or more captured Windows images, selected by
//   a 1-based index and mountable onto an empty directory via DISM
// - The OS mount table is shared, privileged state this program does
//   not own: crashes and other tools mutate it out-of-band, so live
//   queries always win over local beliefs about what is mounted
// - When mount state goes stale or conflicts, the recovery ladder
//   escalates through remediation tiers up to a reboot recommendation
//
// Module map:
//   dism      - spawns the DISM tool, sentinel codes for missing tool
//   parse     - turns DISM's free text into typed records
//   image     - mount / unmount / remount / live query / cleanups
//   conflict  - slot index selection + live mount reconciliation
//   recovery  - the escalating remediation ladder
//   driver    - driver injection, export, enumeration
//   classify  - failure-message signature table
//   settings  - flat section/key/value persistence for the front end
//   error     - error taxonomy and boundary result types
// ============================================

pub mod classify;
pub mod conflict;
pub mod dism;
pub mod driver;
pub mod error;
pub mod image;
pub mod parse;
pub mod recovery;
pub mod settings;

pub use classify::{classify, guidance_for, FailureKind};
pub use conflict::{
    check_live_mounts, ConflictResolution, IndexConflict, MountConflict, MountSlot, Selection,
    SlotSet,
};
pub use dism::{DismOutput, DismRunner, SystemDism};
pub use error::{OpResult, QueryResult, ToolFailure, WimError};
pub use image::{
    check_mount_status, cleanup_mountpoints, cleanup_wim_cache, get_wim_images, looks_mounted,
    mount_slot, mount_wim, normalize_path, query_mounted_images, remount_wim, unmount_wim,
    MountCheck,
};
pub use parse::{DriverDescriptor, ImageIndexEntry, MountStatus, MountedImage};
pub use recovery::{
    run_recovery, ProcessControl, RecoveryReport, RecoveryRequest, TierReport,
    WindowsProcessControl,
};
pub use settings::Settings;
