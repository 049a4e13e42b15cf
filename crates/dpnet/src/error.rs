//! CLI error types with miette diagnostics.
//!
//! Maps `CoreError` and `ConfigError` into user-facing errors with
//! actionable help text.

use miette::Diagnostic;
use thiserror::Error;

use dpnet_config::ConfigError;
use dpnet_core::CoreError;

/// Process exit codes.
pub mod exit_code {
    pub const SUCCESS: i32 = 0;
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Privileges ───────────────────────────────────────────────────
    #[error("'{command}' changes system networking and must run as root")]
    #[diagnostic(code(dpnet::not_root), help("Run: sudo dpnet {command}"))]
    NotRoot { command: String },

    // ── Inventory / roles ────────────────────────────────────────────
    #[error("Interface inventory not found at {path}")]
    #[diagnostic(
        code(dpnet::no_inventory),
        help("Scan interfaces first with: sudo dpnet enumerate")
    )]
    MissingInventory { path: String },

    #[error("Interface '{name}' not found")]
    #[diagnostic(
        code(dpnet::interface_not_found),
        help(
            "Run: dpnet list-interfaces to see known interfaces.\n\
             After plugging in new hardware, run: sudo dpnet enumerate"
        )
    )]
    InterfaceNotFound { name: String },

    #[error("Cannot {action} while in {mode} mode")]
    #[diagnostic(
        code(dpnet::illegal_transition),
        help("Leave {mode} mode first with: sudo dpnet reset")
    )]
    IllegalTransition { action: String, mode: String },

    // ── Validation ───────────────────────────────────────────────────
    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(dpnet::validation))]
    Validation { field: String, reason: String },

    // ── External tools ───────────────────────────────────────────────
    #[error("Required tool '{program}' is not installed")]
    #[diagnostic(
        code(dpnet::tool_missing),
        help("Install the package providing '{program}' and retry.")
    )]
    ToolMissing { program: String },

    #[error("{program} failed with status {status}")]
    #[diagnostic(code(dpnet::command_failed), help("{program} {args}\n{stderr}"))]
    CommandFailed {
        program: String,
        args: String,
        status: i32,
        stderr: String,
    },

    #[error("{program} did not finish within {seconds}s")]
    #[diagnostic(
        code(dpnet::timeout),
        help("Raise apply.command_timeout_secs in the config file if the device is slow.")
    )]
    Timeout { program: String, seconds: u64 },

    #[error("WAN interface {interface} is unreachable: {reason}")]
    #[diagnostic(
        code(dpnet::wan_unreachable),
        help(
            "Check the cable or WiFi association, then run: sudo dpnet evaluate\n\
             Run: dpnet diagnostics connectivity for details"
        )
    )]
    WanUnreachable { interface: String, reason: String },

    // ── State ────────────────────────────────────────────────────────
    #[error("Timed out after {seconds}s waiting for {path}")]
    #[diagnostic(
        code(dpnet::locked),
        help("Another dpnet command (or `dpnet monitor`) is applying changes. Retry shortly.")
    )]
    Locked { path: String, seconds: u64 },

    #[error("State file {path} is corrupt: {reason}")]
    #[diagnostic(
        code(dpnet::state_corrupt),
        help("Move the file aside and reassign roles; dpnet recreates it with defaults.")
    )]
    StateCorrupt { path: String, reason: String },

    // ── Configuration ────────────────────────────────────────────────
    #[error(transparent)]
    #[diagnostic(
        code(dpnet::config),
        help("Check the file shown by: dpnet config path")
    )]
    Config(#[from] ConfigError),

    // ── Interactive ──────────────────────────────────────────────────
    #[error("Destructive operation '{action}' requires confirmation")]
    #[diagnostic(
        code(dpnet::confirmation_required),
        help("Use --yes (-y) to skip confirmation in non-interactive contexts.")
    )]
    NonInteractiveRequiresYes { action: String },

    // ── IO / Serialization ───────────────────────────────────────────
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Failed to render JSON output: {0}")]
    #[diagnostic(code(dpnet::json))]
    Json(#[from] serde_json::Error),

    #[error("Failed to render YAML output: {0}")]
    #[diagnostic(code(dpnet::yaml))]
    Yaml(#[from] serde_yaml::Error),
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Validation { .. }
            | Self::InterfaceNotFound { .. }
            | Self::NonInteractiveRequiresYes { .. }
            | Self::Config(ConfigError::Validation { .. }) => exit_code::USAGE,
            _ => exit_code::GENERAL,
        }
    }
}

// ── CoreError → CliError mapping ─────────────────────────────────────

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::MissingInventory { path } => Self::MissingInventory {
                path: path.display().to_string(),
            },
            CoreError::InterfaceNotFound { name } => Self::InterfaceNotFound { name },
            CoreError::Validation { message } => Self::Validation {
                field: "input".into(),
                reason: message,
            },
            CoreError::IllegalTransition { action, mode } => {
                Self::IllegalTransition { action, mode }
            }
            CoreError::ToolMissing { program } => Self::ToolMissing { program },
            CoreError::CommandFailed {
                program,
                args,
                status,
                stderr,
            } => Self::CommandFailed {
                program,
                args,
                status,
                stderr,
            },
            CoreError::CommandTimeout {
                program,
                timeout_secs,
            } => Self::Timeout {
                program,
                seconds: timeout_secs,
            },
            CoreError::WanUnreachable { interface, reason } => {
                Self::WanUnreachable { interface, reason }
            }
            CoreError::LockTimeout { path, timeout_secs } => Self::Locked {
                path: path.display().to_string(),
                seconds: timeout_secs,
            },
            CoreError::StateCorrupt { path, reason } => Self::StateCorrupt {
                path: path.display().to_string(),
                reason,
            },
            CoreError::Io(e) => Self::Io(e),
            CoreError::Json(e) => Self::Json(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn exit_codes() {
        let usage = CliError::from(CoreError::Validation {
            message: "tailscale0 cannot carry a WAN role".into(),
        });
        assert_eq!(usage.exit_code(), exit_code::USAGE);

        let general = CliError::from(CoreError::MissingInventory {
            path: PathBuf::from("/etc/dangerprep/interfaces.conf"),
        });
        assert_eq!(general.exit_code(), exit_code::GENERAL);

        let unknown = CliError::from(CoreError::InterfaceNotFound { name: "eth7".into() });
        assert_eq!(unknown.exit_code(), exit_code::USAGE);

        let not_root = CliError::NotRoot {
            command: "set-wan".into(),
        };
        assert_eq!(not_root.exit_code(), exit_code::GENERAL);
    }

    #[test]
    fn illegal_transition_keeps_mode() {
        let err = CliError::from(CoreError::IllegalTransition {
            action: "assign a WAN role".into(),
            mode: "local-only".into(),
        });
        assert_eq!(err.to_string(), "Cannot assign a WAN role while in local-only mode");
    }
}
