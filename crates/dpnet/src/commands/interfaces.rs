//! Interface inventory and LAN role handlers.

use tabled::Tabled;

use dpnet_core::{Controller, Interface, InterfaceEntry};

use crate::cli::{GlobalOpts, InterfaceArg};
use crate::error::CliError;
use crate::output;

use super::util;

// ── Table rows ──────────────────────────────────────────────────────

#[derive(Tabled)]
struct InterfaceRow {
    #[tabled(rename = "Interface")]
    name: String,
    #[tabled(rename = "Kind")]
    kind: String,
    #[tabled(rename = "MAC")]
    mac: String,
    #[tabled(rename = "State")]
    state: String,
    #[tabled(rename = "Driver")]
    driver: String,
    #[tabled(rename = "Caps")]
    caps: String,
    #[tabled(rename = "Role")]
    role: String,
}

impl From<&Interface> for InterfaceRow {
    fn from(i: &Interface) -> Self {
        Self {
            name: i.name.clone(),
            kind: i.kind.to_string(),
            mac: i.mac.as_ref().map_or_else(|| "-".into(), ToString::to_string),
            state: i.state.to_string(),
            driver: i.driver.clone().unwrap_or_else(|| "-".into()),
            caps: if i.is_wifi() {
                i.capabilities.to_flags()
            } else {
                "-".into()
            },
            role: "-".into(),
        }
    }
}

impl From<&InterfaceEntry> for InterfaceRow {
    fn from(e: &InterfaceEntry) -> Self {
        let role = match (e.role, e.effective_role) {
            (Some(explicit), _) => explicit.to_string(),
            (None, Some(effective)) => format!("{effective} (default)"),
            (None, None) => "overlay".into(),
        };
        Self {
            role,
            ..Self::from(&e.interface)
        }
    }
}

// ── Handlers ────────────────────────────────────────────────────────

pub async fn enumerate(controller: &Controller, global: &GlobalOpts) -> Result<(), CliError> {
    util::require_root("enumerate")?;
    let interfaces = controller.enumerate().await?;
    let out = output::render_list(
        global.output,
        &interfaces,
        |i| InterfaceRow::from(i),
        |i| i.name.clone(),
    )?;
    output::print_output(&out, global.quiet);
    if !global.quiet {
        eprintln!(
            "{} interface(s) written to {}",
            interfaces.len(),
            controller.config().paths.interfaces_conf().display()
        );
    }
    Ok(())
}

pub async fn list(controller: &Controller, global: &GlobalOpts) -> Result<(), CliError> {
    let entries = controller.list_interfaces().await?;
    let out = output::render_list(
        global.output,
        &entries,
        |i| InterfaceRow::from(i),
        |e| e.interface.name.clone(),
    )?;
    output::print_output(&out, global.quiet);
    Ok(())
}

pub async fn set_lan(controller: &Controller, args: InterfaceArg, global: &GlobalOpts) -> Result<(), CliError> {
    util::known_interface(controller, &args.interface)?;
    util::require_root("set-lan")?;
    let outcome = controller.set_lan(&args.interface).await?;
    util::report_change(global, &outcome, &format!("{} assigned to LAN", args.interface))
}

pub async fn clear_lan(controller: &Controller, args: InterfaceArg, global: &GlobalOpts) -> Result<(), CliError> {
    util::known_interface(controller, &args.interface)?;
    util::require_root("clear-lan")?;
    let outcome = controller.clear_lan(&args.interface).await?;
    util::report_change(global, &outcome, &format!("{} LAN assignment cleared", args.interface))
}
