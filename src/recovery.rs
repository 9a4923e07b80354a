// ============================================
// recovery.rs - Mount failure recovery ladder
// ============================================
// When a mount or unmount fails with a recognizable signature
// (already-mounted, needs-remount, directory-in-use), this module
// walks an escalating sequence of remediation tiers:
//
//   1. graceful unmount        (commit or discard, per caller)
//   2. explorer eviction       (close windows rooted at the mount dir)
//   3. forced eviction         (kill + relaunch explorer system-wide)
//   4. targeted repair         (remount -> commit -> discard, per mount)
//   5. system cleanup          (/Cleanup-Wim, /Cleanup-Mountpoints)
//   6. ultimate cleanup        (kill DISM helpers, purge artifacts,
//                               restart mount services, re-clean,
//                               read-only registry audit)
//   7. reboot recommendation   (terminal)
//
// The tiers are an ordered data table run by ONE driver loop. The loop
// re-queries the live mount table between tiers (the table is the only
// truth - a crash or another process may have changed it) and stops as
// soon as nothing is left to fix. A tier that fails never aborts the
// ladder; only a failure to orchestrate (e.g. the live query itself
// dying) halts it.
// ============================================

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use tracing::{info, warn};

use crate::dism::DismRunner;
use crate::error::WimError;
use crate::image::{
    cleanup_mountpoints, cleanup_wim_cache, normalize_path, query_mounted_images, remount_wim,
    unmount_wim,
};
use crate::parse::MountedImage;

/// Settle delay after asking Explorer windows to close themselves.
const EVICTION_SETTLE: Duration = Duration::from_secs(1);
/// Longer settle after force-killing the Explorer process tree.
const FORCED_SETTLE: Duration = Duration::from_secs(2);

/// The Windows service backing WIM mounts; restarting it releases
/// mount locks a crashed servicing session left behind.
const MOUNT_SERVICE: &str = "WIMMount";

// ============================================
// REQUEST / REPORT TYPES
// ============================================

/// What the caller wants recovered.
#[derive(Debug, Clone, Default)]
pub struct RecoveryRequest {
    /// The mount the caller is trying to get rid of, if any. Unhealthy
    /// mounts found in the live table are repaired regardless.
    pub mount_dir: Option<PathBuf>,
    /// Commit (true) or discard (false) when unmounting the requested
    /// directory. Repairs of corrupted mounts always end in discard.
    pub commit: bool,
}

/// Outcome of one tier, with its full log transcript.
#[derive(Debug, Clone)]
pub struct TierReport {
    pub tier: &'static str,
    /// false when the tier had nothing applicable to do.
    pub attempted: bool,
    pub succeeded: bool,
    pub log: Vec<String>,
}

/// Outcome of a full ladder run.
#[derive(Debug)]
pub struct RecoveryReport {
    pub tiers: Vec<TierReport>,
    /// true when a final live query shows nothing left to fix.
    pub resolved: bool,
    /// true when even the last tier left problems - an OS restart is
    /// the only remaining remediation.
    pub reboot_required: bool,
    /// Problem records still present after the ladder finished.
    pub remaining: Vec<MountedImage>,
}

impl RecoveryReport {
    /// Collapse to the boundary result shape: an exhausted ladder is
    /// an error the caller must act on (reboot), never a quiet success.
    pub fn outcome(&self) -> Result<(), WimError> {
        if self.resolved {
            Ok(())
        } else {
            Err(WimError::RecoveryExhausted {
                unresolved: self.remaining.len(),
            })
        }
    }

    /// Flattened per-tier transcript for display.
    pub fn transcript(&self) -> Vec<String> {
        let mut lines = Vec::new();
        for tier in &self.tiers {
            let outcome = if !tier.attempted {
                "skipped"
            } else if tier.succeeded {
                "ok"
            } else {
                "failed"
            };
            lines.push(format!("[{}] {}", tier.tier, outcome));
            for entry in &tier.log {
                lines.push(format!("  {}", entry));
            }
        }
        lines
    }
}

// ============================================
// PROCESS CONTROL SEAM
// ============================================

/// OS process/service plumbing the ladder needs. A trait so the
/// ladder's ordering and stopping logic is testable without killing
/// anyone's Explorer.
pub trait ProcessControl {
    /// Ask file-browser windows whose path is rooted at `under` to
    /// close themselves. Returns how many complied.
    fn close_explorer_windows(&self, under: &Path) -> Result<usize, String>;
    /// Force-terminate the Explorer process tree and relaunch it.
    fn restart_explorer(&self) -> Result<(), String>;
    /// Force-terminate every process with this image name. Returns
    /// whether anything was killed.
    fn kill_process(&self, image_name: &str) -> bool;
    /// Stop and restart a Windows service.
    fn restart_service(&self, name: &str) -> Result<(), String>;
    /// Count orphaned mount records under the WIMMount registry
    /// subtree. Read-only: deleting registry data is out of scope.
    fn orphaned_mount_records(&self) -> Result<usize, String>;
    /// Wait for the OS to settle after an eviction.
    fn settle(&self, wait: Duration);
}

/// Real implementation driving taskkill / PowerShell / sc / reg.
pub struct WindowsProcessControl;

impl ProcessControl for WindowsProcessControl {
    fn close_explorer_windows(&self, under: &Path) -> Result<usize, String> {
        // Walk the shell's open windows via COM and Quit() the ones
        // whose folder path starts with the mount directory.
        let target = normalize_path(under).to_lowercase().replace('\\', "\\\\");
        let script = format!(
            r#"$shell = New-Object -ComObject Shell.Application
$closed = 0
foreach ($window in $shell.Windows()) {{
    try {{
        $path = $window.Document.Folder.Self.Path
        if ($path -and $path.ToLower().StartsWith("{target}")) {{
            $window.Quit()
            $closed++
        }}
    }} catch {{ }}
}}
Write-Output $closed"#
        );

        let output = Command::new("powershell")
            .arg("-NoProfile")
            .arg("-Command")
            .arg(&script)
            .output()
            .map_err(|e| format!("failed to run powershell: {}", e))?;

        if output.status.success() {
            let count = String::from_utf8_lossy(&output.stdout)
                .trim()
                .parse::<usize>()
                .unwrap_or(0);
            Ok(count)
        } else {
            Err(String::from_utf8_lossy(&output.stderr).into_owned())
        }
    }

    fn restart_explorer(&self) -> Result<(), String> {
        let killed = Command::new("taskkill")
            .args(["/F", "/IM", "explorer.exe"])
            .output()
            .map_err(|e| format!("failed to run taskkill: {}", e))?;
        if !killed.status.success() {
            return Err(String::from_utf8_lossy(&killed.stderr).into_owned());
        }
        Command::new("explorer.exe")
            .spawn()
            .map_err(|e| format!("failed to relaunch explorer: {}", e))?;
        Ok(())
    }

    fn kill_process(&self, image_name: &str) -> bool {
        Command::new("taskkill")
            .args(["/F", "/T", "/IM", image_name])
            .output()
            .map(|out| out.status.success())
            .unwrap_or(false)
    }

    fn restart_service(&self, name: &str) -> Result<(), String> {
        let stop = Command::new("sc")
            .args(["stop", name])
            .output()
            .map_err(|e| format!("failed to run sc stop: {}", e))?;
        // "already stopped" is fine; only a spawn failure matters.
        let _ = stop;
        let start = Command::new("sc")
            .args(["start", name])
            .output()
            .map_err(|e| format!("failed to run sc start: {}", e))?;
        if start.status.success() {
            Ok(())
        } else {
            Err(String::from_utf8_lossy(&start.stderr).into_owned())
        }
    }

    fn orphaned_mount_records(&self) -> Result<usize, String> {
        let output = Command::new("reg")
            .args([
                "query",
                r"HKLM\SOFTWARE\Microsoft\WIMMount\Mounted Images",
            ])
            .output()
            .map_err(|e| format!("failed to run reg query: {}", e))?;
        if !output.status.success() {
            // The subtree not existing means zero orphans.
            return Ok(0);
        }
        let count = String::from_utf8_lossy(&output.stdout)
            .lines()
            .filter(|line| line.contains("Mounted Images\\"))
            .count();
        Ok(count)
    }

    fn settle(&self, wait: Duration) {
        std::thread::sleep(wait);
    }
}

// ============================================
// DRIVER LOOP
// ============================================

struct Ctx<'a> {
    dism: &'a dyn DismRunner,
    procs: &'a dyn ProcessControl,
    request: &'a RecoveryRequest,
}

/// One remediation tier: a pure function from current problem state to
/// an attempt report. Ordering in the table IS the escalation order.
struct Tier {
    name: &'static str,
    run: fn(&Ctx<'_>, &[MountedImage]) -> TierReport,
}

const TIERS: &[Tier] = &[
    Tier { name: "graceful-unmount", run: tier_graceful_unmount },
    Tier { name: "explorer-eviction", run: tier_explorer_eviction },
    Tier { name: "forced-eviction", run: tier_forced_eviction },
    Tier { name: "targeted-repair", run: tier_targeted_repair },
    Tier { name: "system-cleanup", run: tier_system_cleanup },
    Tier { name: "ultimate-cleanup", run: tier_ultimate_cleanup },
];

/// Run the ladder until a fresh live query shows nothing left to fix,
/// or the tiers are exhausted. Re-running after a fully successful run
/// is a no-op: the first live query finds no problems and every tier
/// is skipped.
pub fn run_recovery(
    dism: &dyn DismRunner,
    procs: &dyn ProcessControl,
    request: &RecoveryRequest,
) -> Result<RecoveryReport, WimError> {
    let ctx = Ctx { dism, procs, request };
    let mut reports = Vec::new();

    let mut problems = find_problems(&query_mounted_images(dism)?, request);

    for tier in TIERS {
        if problems.is_empty() {
            break;
        }
        info!(tier = tier.name, problems = problems.len(), "running recovery tier");
        let report = (tier.run)(&ctx, &problems);
        for line in &report.log {
            info!(tier = tier.name, "{}", line);
        }
        reports.push(report);

        // Re-query between tiers: a tier's own claim of success is
        // never trusted over the live table.
        problems = find_problems(&query_mounted_images(dism)?, request);
    }

    let resolved = problems.is_empty();
    let reboot_required = !resolved;
    if reboot_required {
        warn!(remaining = problems.len(), "recovery exhausted; reboot required");
        reports.push(TierReport {
            tier: "reboot-recommendation",
            attempted: true,
            succeeded: false,
            log: vec![format!(
                "{} mount record(s) could not be repaired; restart the operating system and run cleanup again",
                problems.len()
            )],
        });
    }

    Ok(RecoveryReport {
        tiers: reports,
        resolved,
        reboot_required,
        remaining: problems,
    })
}

/// The problem set: every unhealthy live record, plus the record at
/// the caller's requested directory (healthy or not - the caller asked
/// for it to be gone). Normal mounts the caller did not ask about are
/// never problems.
fn find_problems(live: &[MountedImage], request: &RecoveryRequest) -> Vec<MountedImage> {
    let wanted_gone = request
        .mount_dir
        .as_deref()
        .map(|d| normalize_path(d).to_lowercase());

    live.iter()
        .filter(|record| {
            if record.status.unhealthy() {
                return true;
            }
            match &wanted_gone {
                Some(dir) => {
                    normalize_path(Path::new(&record.mount_dir)).to_lowercase() == *dir
                }
                None => false,
            }
        })
        .cloned()
        .collect()
}

// ============================================
// TIER IMPLEMENTATIONS
// ============================================

fn tier_graceful_unmount(ctx: &Ctx<'_>, _problems: &[MountedImage]) -> TierReport {
    let mut log = Vec::new();

    let Some(dir) = ctx.request.mount_dir.as_deref() else {
        log.push("no target directory requested; nothing to unmount gracefully".to_string());
        return TierReport {
            tier: "graceful-unmount",
            attempted: false,
            succeeded: false,
            log,
        };
    };

    let mode = if ctx.request.commit { "commit" } else { "discard" };
    let succeeded = match unmount_wim(ctx.dism, dir, ctx.request.commit) {
        Ok(msg) => {
            log.push(msg);
            true
        }
        Err(e) => {
            log.push(format!("{} unmount failed: {}", mode, e));
            false
        }
    };

    TierReport {
        tier: "graceful-unmount",
        attempted: true,
        succeeded,
        log,
    }
}

fn tier_explorer_eviction(ctx: &Ctx<'_>, problems: &[MountedImage]) -> TierReport {
    let mut log = Vec::new();

    // Close windows over the requested dir and over every problem
    // mount; an eviction failure is logged, never fatal.
    let mut targets: Vec<PathBuf> = problems
        .iter()
        .map(|r| PathBuf::from(&r.mount_dir))
        .collect();
    if let Some(dir) = ctx.request.mount_dir.as_deref() {
        targets.push(dir.to_path_buf());
    }
    targets.sort();
    targets.dedup();

    for target in &targets {
        match ctx.procs.close_explorer_windows(target) {
            Ok(count) => log.push(format!(
                "closed {} explorer window(s) under {}",
                count,
                target.display()
            )),
            Err(e) => log.push(format!(
                "could not close explorer windows under {}: {}",
                target.display(),
                e
            )),
        }
    }

    ctx.procs.settle(EVICTION_SETTLE);

    let succeeded = retry_requested_unmount(ctx, &mut log);

    TierReport {
        tier: "explorer-eviction",
        attempted: true,
        succeeded,
        log,
    }
}

fn tier_forced_eviction(ctx: &Ctx<'_>, _problems: &[MountedImage]) -> TierReport {
    let mut log = Vec::new();

    match ctx.procs.restart_explorer() {
        Ok(()) => log.push("explorer terminated and relaunched".to_string()),
        Err(e) => log.push(format!("explorer restart failed: {}", e)),
    }

    ctx.procs.settle(FORCED_SETTLE);

    let succeeded = retry_requested_unmount(ctx, &mut log);

    TierReport {
        tier: "forced-eviction",
        attempted: true,
        succeeded,
        log,
    }
}

/// After an eviction, retry the caller's unmount (when there is one).
/// Problem records that are merely unhealthy are tier 4's job.
fn retry_requested_unmount(ctx: &Ctx<'_>, log: &mut Vec<String>) -> bool {
    let Some(dir) = ctx.request.mount_dir.as_deref() else {
        return true;
    };
    match unmount_wim(ctx.dism, dir, ctx.request.commit) {
        Ok(msg) => {
            log.push(msg);
            true
        }
        Err(e) => {
            log.push(format!("unmount retry failed: {}", e));
            false
        }
    }
}

fn tier_targeted_repair(ctx: &Ctx<'_>, problems: &[MountedImage]) -> TierReport {
    let mut log = Vec::new();
    let mut all_repaired = true;

    for record in problems.iter().filter(|r| r.status.unhealthy()) {
        let dir = PathBuf::from(&record.mount_dir);

        // Repair order matters: remount first (least destructive),
        // then commit-unmount, then discard-unmount. Discard is the
        // reliable terminal step for corrupted state but must come
        // last - committing a corrupted mount can propagate corruption
        // into the WIM, so it gets its chance before discard, not after.
        let steps = ["remount", "commit-unmount", "discard-unmount"];

        let mut repaired = false;
        for step in steps {
            let result = match step {
                "remount" => remount_wim(ctx.dism, &dir),
                "commit-unmount" => unmount_wim(ctx.dism, &dir, true),
                _ => unmount_wim(ctx.dism, &dir, false),
            };
            match result {
                Ok(_) => {
                    log.push(format!("{}: {} succeeded", record.mount_dir, step));
                    repaired = true;
                    break;
                }
                Err(e) => log.push(format!("{}: {} failed: {}", record.mount_dir, step, e)),
            }
        }
        if !repaired {
            all_repaired = false;
        }
    }

    TierReport {
        tier: "targeted-repair",
        attempted: true,
        succeeded: all_repaired,
        log,
    }
}

fn tier_system_cleanup(ctx: &Ctx<'_>, _problems: &[MountedImage]) -> TierReport {
    let mut log = Vec::new();
    let mut succeeded = true;

    // Both cleanup subcommands run unconditionally, whatever tier 4
    // managed per-mount.
    for result in [
        cleanup_wim_cache(ctx.dism, false),
        cleanup_mountpoints(ctx.dism, false),
    ] {
        match result {
            Ok(msg) => log.push(msg),
            Err(e) => {
                log.push(format!("cleanup failed: {}", e));
                succeeded = false;
            }
        }
    }

    TierReport {
        tier: "system-cleanup",
        attempted: true,
        succeeded,
        log,
    }
}

fn tier_ultimate_cleanup(ctx: &Ctx<'_>, _problems: &[MountedImage]) -> TierReport {
    let mut log = Vec::new();

    // 1. Kill any DISM helper still holding servicing handles.
    for image in ["dism.exe", "dismhost.exe"] {
        if ctx.procs.kill_process(image) {
            log.push(format!("terminated {}", image));
        } else {
            log.push(format!("no running {} to terminate", image));
        }
    }

    // 2. Purge known DISM scratch/log artifacts.
    let purged = purge_dism_artifacts();
    log.push(format!("purged {} DISM artifact file(s)", purged));

    // 3. Bounce the service holding mount locks.
    match ctx.procs.restart_service(MOUNT_SERVICE) {
        Ok(()) => log.push(format!("restarted service {}", MOUNT_SERVICE)),
        Err(e) => log.push(format!("service {} restart failed: {}", MOUNT_SERVICE, e)),
    }

    // 4. Re-run the cleanup subcommands now that locks are released,
    // this time at maximum log verbosity so the attempt leaves a
    // usable trail in dism.log.
    for result in [
        cleanup_wim_cache(ctx.dism, true),
        cleanup_mountpoints(ctx.dism, true),
    ] {
        match result {
            Ok(msg) => log.push(format!("re-run: {}", msg)),
            Err(e) => log.push(format!("re-run cleanup failed: {}", e)),
        }
    }

    // 5. Audit the mount registry subtree. Read-only: orphan counts
    // are reported, never deleted - that needs privilege and risk this
    // tool does not take on.
    match ctx.procs.orphaned_mount_records() {
        Ok(0) => log.push("registry audit: no orphaned mount records".to_string()),
        Ok(n) => log.push(format!("registry audit: {} orphaned mount record(s) present", n)),
        Err(e) => log.push(format!("registry audit failed: {}", e)),
    }

    TierReport {
        tier: "ultimate-cleanup",
        attempted: true,
        succeeded: true,
        log,
    }
}

/// Delete leftover DISM log/scratch files, best effort. Missing files
/// and permission failures are silently skipped.
fn purge_dism_artifacts() -> usize {
    let mut candidates: Vec<PathBuf> = vec![
        PathBuf::from(r"C:\Windows\Logs\DISM\dism.log"),
    ];

    let temp = std::env::temp_dir();
    if let Ok(entries) = fs::read_dir(&temp) {
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().to_lowercase();
            if name.starts_with("dism") {
                candidates.push(entry.path());
            }
        }
    }

    candidates
        .into_iter()
        .filter(|path| path.is_file() && fs::remove_file(path).is_ok())
        .count()
}

// ============================================
// TESTS
// ============================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dism::testing::{err_output, ok_output, ScriptedDism};
    use crate::dism::DismOutput;
    use std::cell::RefCell;

    /// ProcessControl stub: everything succeeds instantly, calls are
    /// recorded, nothing sleeps.
    struct FakeProcs {
        calls: RefCell<Vec<String>>,
    }

    impl FakeProcs {
        fn new() -> Self {
            FakeProcs { calls: RefCell::new(Vec::new()) }
        }
    }

    impl ProcessControl for FakeProcs {
        fn close_explorer_windows(&self, under: &Path) -> Result<usize, String> {
            self.calls.borrow_mut().push(format!("close:{}", under.display()));
            Ok(0)
        }
        fn restart_explorer(&self) -> Result<(), String> {
            self.calls.borrow_mut().push("restart-explorer".to_string());
            Ok(())
        }
        fn kill_process(&self, image_name: &str) -> bool {
            self.calls.borrow_mut().push(format!("kill:{}", image_name));
            false
        }
        fn restart_service(&self, name: &str) -> Result<(), String> {
            self.calls.borrow_mut().push(format!("service:{}", name));
            Ok(())
        }
        fn orphaned_mount_records(&self) -> Result<usize, String> {
            Ok(0)
        }
        fn settle(&self, _wait: Duration) {}
    }

    fn live_output(records: &[(&str, &str)]) -> DismOutput {
        let mut text = String::from("Mounted images:\n\n");
        for (dir, status) in records {
            text.push_str(&format!(
                "Mount Dir : {}\nImage File : C:\\images\\x.wim\nImage Index : 1\nMounted Read/Write : Yes\nStatus : {}\n\n",
                dir, status
            ));
        }
        ok_output(&text)
    }

    #[test]
    fn clean_state_resolves_immediately_with_all_tiers_skipped() {
        // Idempotence: a run against a healthy mount table performs no
        // remediation at all and reports success.
        let dism = ScriptedDism::new(|args: &[&str]| {
            assert_eq!(args[0], "/Get-MountedImageInfo", "only the live query may run");
            live_output(&[("C:\\healthy", "Ok")])
        });
        let procs = FakeProcs::new();

        for _ in 0..2 {
            let report = run_recovery(&dism, &procs, &RecoveryRequest::default()).unwrap();
            assert!(report.resolved);
            assert!(!report.reboot_required);
            assert!(report.tiers.is_empty());
            assert!(report.remaining.is_empty());
        }
        assert!(procs.calls.borrow().is_empty());
    }

    #[test]
    fn targeted_repair_tries_remount_commit_discard_in_order() {
        // Scenario: one "Needs Remount" record; remount fails, commit
        // fails, discard succeeds. The tier must attempt exactly that
        // order and stop at the first success.
        let healthy = RefCell::new(false);
        let dism = ScriptedDism::new(|args: &[&str]| {
            match args[0] {
                "/Get-MountedImageInfo" => {
                    if *healthy.borrow() {
                        ok_output("")
                    } else {
                        live_output(&[("C:\\stale", "Needs Remount")])
                    }
                }
                "/Remount-Image" => err_output(1, "Error: 0xC1420134"),
                "/Unmount-Image" if args.contains(&"/Commit") => {
                    err_output(1, "The image is corrupt")
                }
                "/Unmount-Image" => {
                    *healthy.borrow_mut() = true;
                    ok_output("")
                }
                _ => ok_output(""),
            }
        });
        let procs = FakeProcs::new();

        let report = run_recovery(&dism, &procs, &RecoveryRequest::default()).unwrap();
        assert!(report.resolved);
        assert!(!report.reboot_required);

        let repair = report
            .tiers
            .iter()
            .find(|t| t.tier == "targeted-repair")
            .expect("targeted repair should have run");
        assert!(repair.succeeded);

        // Verify the escalation order inside tier 4.
        let calls = dism.recorded();
        let repair_steps: Vec<&Vec<String>> = calls
            .iter()
            .filter(|c| c[0] == "/Remount-Image" || c[0] == "/Unmount-Image")
            .collect();
        assert_eq!(repair_steps[0][0], "/Remount-Image");
        assert!(repair_steps[1].contains(&"/Commit".to_string()));
        assert!(repair_steps[2].contains(&"/Discard".to_string()));
    }

    #[test]
    fn requested_dir_is_a_problem_even_when_healthy() {
        // The caller asked for C:\\mine to be gone; tier 1 unmounts it
        // with the caller's commit choice and the ladder stops there.
        let mounted = RefCell::new(true);
        let dism = ScriptedDism::new(|args: &[&str]| match args[0] {
            "/Get-MountedImageInfo" => {
                if *mounted.borrow() {
                    live_output(&[("C:\\mine", "Ok")])
                } else {
                    ok_output("")
                }
            }
            "/Unmount-Image" => {
                assert!(args.contains(&"/Commit"), "caller asked to commit");
                *mounted.borrow_mut() = false;
                ok_output("")
            }
            _ => ok_output(""),
        });
        let procs = FakeProcs::new();

        let request = RecoveryRequest {
            mount_dir: Some(PathBuf::from("C:\\mine")),
            commit: true,
        };
        let report = run_recovery(&dism, &procs, &request).unwrap();
        assert!(report.resolved);
        assert_eq!(report.tiers.len(), 1);
        assert_eq!(report.tiers[0].tier, "graceful-unmount");
        assert!(report.tiers[0].succeeded);
    }

    #[test]
    fn unrelated_healthy_mounts_do_not_count_as_problems() {
        let dism = ScriptedDism::new(|args: &[&str]| match args[0] {
            "/Get-MountedImageInfo" => live_output(&[("C:\\other", "Ok")]),
            _ => ok_output(""),
        });
        let procs = FakeProcs::new();

        let request = RecoveryRequest {
            mount_dir: Some(PathBuf::from("C:\\mine")),
            commit: false,
        };
        let report = run_recovery(&dism, &procs, &request).unwrap();
        assert!(report.resolved);
        assert!(report.tiers.is_empty());
    }

    #[test]
    fn exhausted_ladder_recommends_reboot_and_never_claims_success() {
        // Every remediation fails and the bad record never goes away:
        // all six tiers must run, then the terminal recommendation.
        let dism = ScriptedDism::new(|args: &[&str]| match args[0] {
            "/Get-MountedImageInfo" => live_output(&[("C:\\cursed", "Invalid")]),
            _ => err_output(1, "Error: 0xC1420117 The directory is currently in use"),
        });
        let procs = FakeProcs::new();

        let report = run_recovery(&dism, &procs, &RecoveryRequest::default()).unwrap();
        assert!(!report.resolved);
        assert!(report.reboot_required);
        assert_eq!(report.remaining.len(), 1);
        assert!(matches!(
            report.outcome(),
            Err(WimError::RecoveryExhausted { unresolved: 1 })
        ));

        let names: Vec<&str> = report.tiers.iter().map(|t| t.tier).collect();
        assert_eq!(
            names,
            vec![
                "graceful-unmount",
                "explorer-eviction",
                "forced-eviction",
                "targeted-repair",
                "system-cleanup",
                "ultimate-cleanup",
                "reboot-recommendation",
            ]
        );
        assert!(!report.tiers.last().unwrap().succeeded);

        // Escalation side effects happened in order.
        let proc_calls = procs.calls.borrow();
        assert!(proc_calls.iter().any(|c| c.starts_with("close:")));
        assert!(proc_calls.contains(&"restart-explorer".to_string()));
        assert!(proc_calls.contains(&format!("service:{}", MOUNT_SERVICE)));
    }

    #[test]
    fn ultimate_cleanup_reruns_cleanup_with_raised_logging() {
        // Tier 5 runs the bare cleanup subcommands; tier 6's re-run
        // must be distinguishable (raised log level), not a repeat of
        // the identical invocation.
        let dism = ScriptedDism::new(|args: &[&str]| match args[0] {
            "/Get-MountedImageInfo" => live_output(&[("C:\\cursed", "Invalid")]),
            _ => err_output(1, "in use"),
        });
        let procs = FakeProcs::new();

        run_recovery(&dism, &procs, &RecoveryRequest::default()).unwrap();

        let calls = dism.recorded();
        let cleanups: Vec<&Vec<String>> = calls
            .iter()
            .filter(|c| c[0] == "/Cleanup-Wim" || c[0] == "/Cleanup-Mountpoints")
            .collect();
        assert_eq!(cleanups.len(), 4);
        assert_eq!(cleanups[0].len(), 1);
        assert_eq!(cleanups[1].len(), 1);
        assert!(cleanups[2].contains(&"/LogLevel:4".to_string()));
        assert!(cleanups[3].contains(&"/LogLevel:4".to_string()));
    }

    #[test]
    fn live_query_failure_halts_the_ladder() {
        let dism = ScriptedDism::new(|args: &[&str]| match args[0] {
            "/Get-MountedImageInfo" => err_output(9001, "DISM not found on PATH"),
            _ => ok_output(""),
        });
        let procs = FakeProcs::new();

        let err = run_recovery(&dism, &procs, &RecoveryRequest::default()).unwrap_err();
        assert!(matches!(err, WimError::ToolNotFound(_)));
    }

    #[test]
    fn transcript_reports_every_tier_line() {
        let dism = ScriptedDism::new(|args: &[&str]| match args[0] {
            "/Get-MountedImageInfo" => live_output(&[("C:\\cursed", "Invalid")]),
            _ => err_output(1, "in use"),
        });
        let procs = FakeProcs::new();

        let report = run_recovery(&dism, &procs, &RecoveryRequest::default()).unwrap();
        let transcript = report.transcript();
        assert!(transcript.iter().any(|l| l.contains("[targeted-repair]")));
        assert!(transcript.iter().any(|l| l.contains("[reboot-recommendation]")));
    }
}
