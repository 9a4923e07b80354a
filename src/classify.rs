// ============================================
// classify.rs - DISM failure message classification
// ============================================
// DISM reports failures as free text plus an HRESULT. This module
// pattern-matches those messages against a fixed, ordered rule table
// to produce a causal label and concrete next steps for the user.
//
// The table is data, not control flow: new message formats from newer
// DISM builds are added as rows, top-to-bottom order decides ties.
// An unmatched message gets generic diagnostic advice instead of an
// opaque exit code.
// ============================================

/// Recognized causes of a DISM-reported failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// The requested image/index is already mounted somewhere.
    AlreadyMounted,
    /// A previous mount was orphaned and must be remounted before use.
    NeedsRemount,
    /// Something (Explorer, a shell, antivirus) holds the mount dir open.
    DirectoryInUse,
    FileNotFound,
    AccessDenied,
    Corrupted,
    DirectoryNotEmpty,
    InsufficientSpace,
    InvalidIndex,
}

impl FailureKind {
    /// Whether this failure is the kind the recovery ladder can act on.
    pub fn recoverable(self) -> bool {
        matches!(
            self,
            FailureKind::AlreadyMounted
                | FailureKind::NeedsRemount
                | FailureKind::DirectoryInUse
                | FailureKind::Corrupted
        )
    }
}

/// One classification rule: any needle matching (case-insensitively)
/// anywhere in the message selects this rule.
pub struct ClassifyRule {
    pub needles: &'static [&'static str],
    pub kind: FailureKind,
    /// Short causal label shown to the user.
    pub label: &'static str,
    /// Ordered suggested next actions.
    pub guidance: &'static [&'static str],
}

/// Evaluated top-to-bottom; the first rule with a matching needle wins.
/// Needles are lowercase; HRESULTs are the ones DISM actually emits for
/// each condition.
pub const RULES: &[ClassifyRule] = &[
    ClassifyRule {
        needles: &["0xc1420127", "already mounted"],
        kind: FailureKind::AlreadyMounted,
        label: "image already mounted",
        guidance: &[
            "Another mount already claims this image/index",
            "Run the recovery cleanup, or unmount the existing mount first",
            "Check 'dism /Get-MountedImageInfo' for the conflicting mount",
        ],
    },
    ClassifyRule {
        needles: &["0xc1420134", "needs to be remounted", "request is not supported"],
        kind: FailureKind::NeedsRemount,
        label: "stale mount needs remount",
        guidance: &[
            "A previous session left this mount orphaned",
            "Run the recovery cleanup to remount or discard it",
        ],
    },
    ClassifyRule {
        needles: &["0xc1420117", "currently in use", "being used by another process"],
        kind: FailureKind::DirectoryInUse,
        label: "mount directory in use",
        guidance: &[
            "Close Explorer windows and terminals open inside the mount directory",
            "Retry with force cleanup to evict open handles",
        ],
    },
    ClassifyRule {
        needles: &["0x80070002", "cannot find the file", "cannot find the path"],
        kind: FailureKind::FileNotFound,
        label: "file not found",
        guidance: &[
            "Verify the WIM file path and the mount directory exist",
        ],
    },
    ClassifyRule {
        needles: &["0x80070005", "access is denied", "access denied"],
        kind: FailureKind::AccessDenied,
        label: "access denied",
        guidance: &[
            "Run the program as Administrator (DISM requires elevation)",
            "Check that antivirus is not blocking DISM",
        ],
    },
    ClassifyRule {
        needles: &["0xc142010d", "is corrupted", "corrupt"],
        kind: FailureKind::Corrupted,
        label: "mount state corrupted",
        guidance: &[
            "Do not commit this mount - committing can propagate the corruption",
            "Run the recovery cleanup; it will discard the corrupted state",
        ],
    },
    ClassifyRule {
        needles: &["0x80070091", "directory is not empty", "not empty"],
        kind: FailureKind::DirectoryNotEmpty,
        label: "mount directory not empty",
        guidance: &[
            "DISM needs an empty directory; clear it or choose another",
        ],
    },
    ClassifyRule {
        needles: &["0x80070070", "not enough space", "insufficient"],
        kind: FailureKind::InsufficientSpace,
        label: "insufficient disk space",
        guidance: &[
            "Free space on the drive holding the mount directory and scratch dir",
        ],
    },
    ClassifyRule {
        needles: &["0xc142011c", "image does not exist", "invalid index", "index is not valid"],
        kind: FailureKind::InvalidIndex,
        label: "no such image index",
        guidance: &[
            "Re-read the image info and pick an index the WIM actually contains",
        ],
    },
];

/// Classify a DISM failure message. Returns the first matching rule,
/// or `None` when nothing in the table matches.
pub fn classify(message: &str) -> Option<&'static ClassifyRule> {
    let lower = message.to_lowercase();
    RULES
        .iter()
        .find(|rule| rule.needles.iter().any(|needle| lower.contains(needle)))
}

/// Human-readable advice for a failure message: the matched rule's
/// label and steps, or generic diagnostics when unmatched.
pub fn guidance_for(message: &str) -> Vec<String> {
    match classify(message) {
        Some(rule) => {
            let mut lines = vec![format!("Likely cause: {}", rule.label)];
            lines.extend(rule.guidance.iter().map(|s| s.to_string()));
            lines
        }
        None => vec![
            "Unrecognized DISM failure.".to_string(),
            "Check the DISM log (C:\\Windows\\Logs\\DISM\\dism.log) for details".to_string(),
            "Verify elevation, free disk space, and that no other servicing operation is running".to_string(),
        ],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hresult_already_mounted_is_classified() {
        // The exact signature a conflicting mount produces.
        let msg = "Error: 0xC1420127\nThe specified image in the specified wim is already mounted for read/write access.";
        let rule = classify(msg).expect("should classify");
        assert_eq!(rule.kind, FailureKind::AlreadyMounted);
        assert!(rule.kind.recoverable());
    }

    #[test]
    fn in_use_and_remount_signatures() {
        assert_eq!(
            classify("The directory is currently in use.").unwrap().kind,
            FailureKind::DirectoryInUse
        );
        assert_eq!(
            classify("Error: 0xC1420134").unwrap().kind,
            FailureKind::NeedsRemount
        );
    }

    #[test]
    fn order_breaks_ties_top_to_bottom() {
        // "corrupt" and "not empty" both appear; the corruption rule
        // sits higher in the table and must win.
        let msg = "The image is corrupt and the directory is not empty";
        assert_eq!(classify(msg).unwrap().kind, FailureKind::Corrupted);
    }

    #[test]
    fn unmatched_message_gets_generic_guidance() {
        assert!(classify("something entirely novel").is_none());
        let advice = guidance_for("something entirely novel");
        assert!(!advice.is_empty());
        assert!(advice[0].contains("Unrecognized"));
    }

    #[test]
    fn matched_guidance_leads_with_label() {
        let advice = guidance_for("Error: 0x80070005 Access is denied.");
        assert!(advice[0].contains("access denied"));
        assert!(advice.len() > 1);
    }
}
