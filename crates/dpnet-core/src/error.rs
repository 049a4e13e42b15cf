// ── Core error types ──
//
// User-facing errors from dpnet-core. Callers never see raw process
// plumbing: failed tool invocations are folded into `CommandFailed`
// with the tool name, exit status and trimmed stderr.

use std::path::PathBuf;

use thiserror::Error;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Prerequisites ────────────────────────────────────────────────
    #[error("Interface inventory not found at {}", path.display())]
    MissingInventory { path: PathBuf },

    #[error("Interface not found: {name}")]
    InterfaceNotFound { name: String },

    // ── Validation / state machine ───────────────────────────────────
    #[error("Validation failed: {message}")]
    Validation { message: String },

    #[error("Cannot {action} while in {mode} mode")]
    IllegalTransition { action: String, mode: String },

    // ── External tools ───────────────────────────────────────────────
    #[error("Required tool '{program}' is not installed")]
    ToolMissing { program: String },

    #[error("{program} exited with status {status}: {stderr}")]
    CommandFailed {
        program: String,
        args: String,
        status: i32,
        stderr: String,
    },

    #[error("{program} did not finish within {timeout_secs}s")]
    CommandTimeout { program: String, timeout_secs: u64 },

    // ── Apply ────────────────────────────────────────────────────────
    #[error("WAN interface {interface} is unreachable: {reason}")]
    WanUnreachable { interface: String, reason: String },

    // ── Persistence ──────────────────────────────────────────────────
    #[error("Timed out after {timeout_secs}s waiting for lock {}", path.display())]
    LockTimeout { path: PathBuf, timeout_secs: u64 },

    #[error("State file {} is corrupt: {reason}", path.display())]
    StateCorrupt { path: PathBuf, reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl CoreError {
    pub(crate) fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }
}
