//! Shared helpers for command handlers.

use std::io::IsTerminal;

use secrecy::SecretString;

use dpnet_core::{ApplyReport, ChangeOutcome, Controller};

use crate::cli::{GlobalOpts, OutputFormat};
use crate::error::CliError;
use crate::output;

/// Refuse to continue unless running as root.
pub fn require_root(command: &str) -> Result<(), CliError> {
    if nix::unistd::Uid::effective().is_root() {
        Ok(())
    } else {
        Err(CliError::NotRoot {
            command: command.into(),
        })
    }
}

/// Reject interface names missing from the inventory. Called before the
/// root check.
pub fn known_interface(controller: &Controller, name: &str) -> Result<(), CliError> {
    if controller.inventory()?.iter().any(|i| i.name == name) {
        Ok(())
    } else {
        Err(CliError::InterfaceNotFound { name: name.into() })
    }
}

/// Prompt for confirmation, auto-approving if `--yes` was passed.
pub fn confirm(message: &str, action: &str, yes_flag: bool) -> Result<bool, CliError> {
    if yes_flag {
        return Ok(true);
    }
    if !std::io::stdin().is_terminal() {
        return Err(CliError::NonInteractiveRequiresYes {
            action: action.into(),
        });
    }
    let confirmed = dialoguer::Confirm::new()
        .with_prompt(message)
        .default(false)
        .interact()
        .map_err(|e| CliError::Io(std::io::Error::other(e)))?;
    Ok(confirmed)
}

/// `-` reads the passphrase from the terminal without echo.
pub fn read_passphrase(arg: String, prompt: &str) -> Result<SecretString, CliError> {
    if arg == "-" {
        let entered = rpassword::prompt_password(prompt)?;
        Ok(SecretString::from(entered))
    } else {
        Ok(SecretString::from(arg))
    }
}

/// One-line summary of what an apply did.
pub fn describe_apply(report: &ApplyReport) -> String {
    format!(
        "applied: uplink {}, {} LAN segment(s), {} firewall change(s){}",
        report.topology.uplink.as_deref().unwrap_or("none"),
        report.topology.lan.len(),
        report.firewall.changes,
        if report.dnsmasq_restarted {
            ", dnsmasq restarted"
        } else {
            ""
        }
    )
}

/// Report a state change: structured formats get the full outcome on
/// stdout, interactive formats a short summary on stderr.
pub fn report_change(global: &GlobalOpts, outcome: &ChangeOutcome, message: &str) -> Result<(), CliError> {
    match global.output {
        OutputFormat::Table | OutputFormat::Plain => {
            if !global.quiet {
                eprintln!("{message}");
                match &outcome.applied {
                    Some(report) => eprintln!("{}", describe_apply(report)),
                    None if !outcome.state.mode.is_auto() => {
                        eprintln!("saved (manual control; run `sudo dpnet evaluate` to apply)");
                    }
                    None => {}
                }
            }
            Ok(())
        }
        format => {
            let out = output::render_single(format, outcome, |_| String::new(), |_| String::new())?;
            output::print_output(&out, global.quiet);
            Ok(())
        }
    }
}
