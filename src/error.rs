// ============================================
// error.rs - Error taxonomy and boundary result types
// ============================================
// The original boundary shape was an untyped (ok, value, message)
// triple. Here it is an explicit Result so "failed" and "succeeded
// with no data" can never be confused:
//   - imperative operations:  OpResult            = Result<String, WimError>
//   - queries:                QueryResult<T>      = Result<Vec<T>, WimError>
// A parse that finds nothing is NOT an error (empty Vec); only the
// tool invocation itself can fail.
// ============================================

use thiserror::Error;

use crate::classify::{self, FailureKind};
use crate::conflict::{IndexConflict, MountConflict};
use crate::dism::{DismOutput, EXIT_SPAWN_FAILED, EXIT_TOOL_NOT_FOUND};

/// Everything that can go wrong in a lifecycle operation.
#[derive(Debug, Error)]
pub enum WimError {
    /// DISM is missing from the execution path.
    #[error("DISM not available: {0}")]
    ToolNotFound(String),

    /// The DISM process could not be spawned at all.
    #[error("failed to invoke DISM: {0}")]
    ToolInvocation(String),

    /// DISM ran and reported failure.
    #[error("{}", .0.message)]
    Tool(ToolFailure),

    /// The mount directory failed the pre-mount emptiness check.
    #[error("mount directory {0} is not empty")]
    MountDirNotEmpty(String),

    /// The mount directory does not exist at mount time.
    #[error("mount directory {0} does not exist")]
    MountDirMissing(String),

    /// A requested mount collides with live OS mount state.
    /// Detected before any DISM call is issued.
    #[error("{0}")]
    Conflict(MountConflict),

    /// Another tracked slot already claims the requested index.
    /// Detected before any DISM call is issued.
    #[error("{0}")]
    SlotConflict(IndexConflict),

    /// The recovery ladder ran to its terminal tier and problems remain.
    #[error("recovery exhausted; {unresolved} mount(s) still unhealthy - reboot required")]
    RecoveryExhausted { unresolved: usize },

    /// Local filesystem failure outside DISM (creating an output dir, etc).
    #[error("{0}")]
    Io(#[from] std::io::Error),
}

/// A nonzero DISM exit, carrying the raw message plus classification.
#[derive(Debug)]
pub struct ToolFailure {
    pub code: i32,
    /// Raw tool message (stderr, falling back to stdout).
    pub message: String,
    /// Causal label when the message matched a known signature.
    pub kind: Option<FailureKind>,
    /// Ordered suggested next actions - never empty.
    pub guidance: Vec<String>,
}

impl WimError {
    /// Map a failed DISM invocation to the right taxonomy entry,
    /// classifying the message against the signature table.
    pub fn from_output(output: &DismOutput) -> WimError {
        match output.code {
            EXIT_TOOL_NOT_FOUND => WimError::ToolNotFound(output.failure_message()),
            EXIT_SPAWN_FAILED => WimError::ToolInvocation(output.failure_message()),
            code => {
                let message = output.failure_message();
                let kind = classify::classify(&message).map(|r| r.kind);
                let guidance = classify::guidance_for(&message);
                WimError::Tool(ToolFailure {
                    code,
                    message,
                    kind,
                    guidance,
                })
            }
        }
    }

    /// The classified failure kind, when there is one.
    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            WimError::Tool(f) => f.kind,
            _ => None,
        }
    }
}

/// Result of an imperative operation; Ok carries the success message.
pub type OpResult = Result<String, WimError>;

/// Result of a query; Ok carries the parsed records (possibly empty).
pub type QueryResult<T> = Result<Vec<T>, WimError>;
