// ============================================
// dism.rs - External tool invoker
// ============================================
// Every image-servicing operation in this crate shells out to DISM
// (Deployment Image Servicing and Management), the privileged tool
// built into Windows. This module is the single choke point for
// those invocations:
//   - /English is always passed first so the parsers in parse.rs can
//     rely on English field labels regardless of the host locale
//   - "dism not on PATH" and "could not spawn" are mapped to sentinel
//     exit codes instead of errors, so callers get a uniform
//     (code, stdout, stderr) triple for every invocation
//
// DISM calls are synchronous and can take minutes (mount/unmount of a
// multi-GB WIM). Callers must keep them off any interactive thread.
// ============================================

use std::io;
use std::process::Command;

use tracing::debug;

/// Sentinel exit code: the DISM executable was not found on PATH.
/// Real DISM exit codes are HRESULT-shaped or small integers; 9001
/// never collides with them.
pub const EXIT_TOOL_NOT_FOUND: i32 = 9001;

/// Sentinel exit code: the process could not be spawned for any other
/// reason (permissions, resource limits).
pub const EXIT_SPAWN_FAILED: i32 = 9002;

/// Captured result of one DISM invocation.
#[derive(Debug, Clone)]
pub struct DismOutput {
    pub code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl DismOutput {
    pub fn success(&self) -> bool {
        self.code == 0
    }

    /// The message to surface when the invocation failed: stderr,
    /// falling back to stdout, falling back to a generated description.
    /// Never empty for a failed call.
    pub fn failure_message(&self) -> String {
        let err = self.stderr.trim();
        if !err.is_empty() {
            return err.to_string();
        }
        let out = self.stdout.trim();
        if !out.is_empty() {
            return out.to_string();
        }
        format!("DISM exited with code {}", self.code)
    }
}

/// The seam between the lifecycle manager and the real DISM binary.
///
/// Production code uses [`SystemDism`]; tests substitute scripted
/// implementations so mount/recovery logic can run against canned
/// output without touching the OS mount table.
pub trait DismRunner {
    /// Run DISM with the given arguments (after the implicit /English)
    /// and wait for completion.
    fn run(&self, args: &[&str]) -> DismOutput;
}

/// Invokes the real `dism` executable from PATH.
pub struct SystemDism;

impl DismRunner for SystemDism {
    fn run(&self, args: &[&str]) -> DismOutput {
        debug!(?args, "invoking dism");

        // Each flag is a separate argv entry - never joined into one
        // string - so paths with spaces survive without shell quoting.
        let result = Command::new("dism").arg("/English").args(args).output();

        match result {
            Ok(output) => DismOutput {
                // DISM always sets an exit code on normal termination;
                // None means it was killed by a signal.
                code: output.status.code().unwrap_or(EXIT_SPAWN_FAILED),
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            },
            Err(e) if e.kind() == io::ErrorKind::NotFound => DismOutput {
                code: EXIT_TOOL_NOT_FOUND,
                stdout: String::new(),
                stderr: format!("DISM not found on PATH: {}", e),
            },
            Err(e) => DismOutput {
                code: EXIT_SPAWN_FAILED,
                stdout: String::new(),
                stderr: format!("Failed to run DISM: {}", e),
            },
        }
    }
}

/// Check whether the current process runs with administrator rights.
/// DISM mount/unmount operations fail without elevation, so front ends
/// check this up front instead of letting the first mount attempt fail.
#[cfg(windows)]
pub fn is_admin() -> bool {
    // SAFETY: IsUserAnAdmin takes no arguments and only reads the
    // process token.
    unsafe { winapi::um::shellapi::IsUserAnAdmin() != 0 }
}

#[cfg(not(windows))]
pub fn is_admin() -> bool {
    false
}

// ============================================
// TEST SUPPORT
// ============================================
// Scripted DISM stand-in shared by the unit tests of the operator,
// conflict, and recovery modules.

#[cfg(test)]
pub mod testing {
    use super::{DismOutput, DismRunner};
    use std::cell::RefCell;

    /// A `DismRunner` that records every call and answers from a
    /// caller-supplied handler function.
    pub struct ScriptedDism<F> {
        pub handler: F,
        pub calls: RefCell<Vec<Vec<String>>>,
    }

    impl<F> ScriptedDism<F>
    where
        F: Fn(&[&str]) -> DismOutput,
    {
        pub fn new(handler: F) -> Self {
            ScriptedDism {
                handler,
                calls: RefCell::new(Vec::new()),
            }
        }

        /// All recorded invocations, one Vec<String> per call.
        pub fn recorded(&self) -> Vec<Vec<String>> {
            self.calls.borrow().clone()
        }
    }

    impl<F> DismRunner for ScriptedDism<F>
    where
        F: Fn(&[&str]) -> DismOutput,
    {
        fn run(&self, args: &[&str]) -> DismOutput {
            self.calls
                .borrow_mut()
                .push(args.iter().map(|s| s.to_string()).collect());
            (self.handler)(args)
        }
    }

    /// A successful invocation with the given stdout.
    pub fn ok_output(stdout: &str) -> DismOutput {
        DismOutput {
            code: 0,
            stdout: stdout.to_string(),
            stderr: String::new(),
        }
    }

    /// A failed invocation with the given exit code and stderr.
    pub fn err_output(code: i32, stderr: &str) -> DismOutput {
        DismOutput {
            code,
            stdout: String::new(),
            stderr: stderr.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_message_prefers_stderr() {
        let out = DismOutput {
            code: 1,
            stdout: "stdout text".to_string(),
            stderr: "stderr text".to_string(),
        };
        assert_eq!(out.failure_message(), "stderr text");
    }

    #[test]
    fn failure_message_falls_back_to_stdout_then_code() {
        let out = DismOutput {
            code: 5,
            stdout: "only stdout".to_string(),
            stderr: "   ".to_string(),
        };
        assert_eq!(out.failure_message(), "only stdout");

        let bare = DismOutput {
            code: 5,
            stdout: String::new(),
            stderr: String::new(),
        };
        assert_eq!(bare.failure_message(), "DISM exited with code 5");
    }

    #[test]
    fn sentinel_codes_are_distinct() {
        assert_ne!(EXIT_TOOL_NOT_FOUND, EXIT_SPAWN_FAILED);
        assert_ne!(EXIT_TOOL_NOT_FOUND, 0);
        assert_ne!(EXIT_SPAWN_FAILED, 0);
    }
}
