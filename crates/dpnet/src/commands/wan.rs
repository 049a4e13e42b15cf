//! WAN role handlers.

use tabled::Tabled;

use dpnet_core::{Controller, WanDetail, WanPriority};

use crate::cli::{GlobalOpts, InterfaceArg, SetWanArgs, WanPriorityArg};
use crate::error::CliError;
use crate::output;

use super::util;

#[derive(Tabled)]
struct WanRow {
    #[tabled(rename = "Interface")]
    interface: String,
    #[tabled(rename = "Role")]
    role: String,
    #[tabled(rename = "Metric")]
    metric: String,
    #[tabled(rename = "Link")]
    link: String,
    #[tabled(rename = "Address")]
    address: String,
    #[tabled(rename = "Gateway")]
    gateway: String,
    #[tabled(rename = "Internet")]
    internet: String,
}

fn row(d: &WanDetail, color: bool) -> WanRow {
    let dash = || "-".to_string();
    let probe = d.connectivity.as_ref();
    WanRow {
        interface: d.interface.clone(),
        role: d.role.to_string(),
        metric: d.route_metric.map_or_else(dash, |m| m.to_string()),
        link: if d.present {
            probe.map_or_else(dash, |c| c.link.to_string())
        } else {
            "absent".into()
        },
        address: probe.and_then(|c| c.address).map_or_else(dash, |a| a.to_string()),
        gateway: probe.map_or_else(dash, |c| output::yes_no(c.has_default_route, color)),
        internet: probe.map_or_else(dash, |c| output::yes_no(c.has_internet, color)),
    }
}

impl From<WanPriorityArg> for WanPriority {
    fn from(arg: WanPriorityArg) -> Self {
        match arg {
            WanPriorityArg::Primary => Self::Primary,
            WanPriorityArg::Secondary => Self::Secondary,
            WanPriorityArg::Available => Self::Available,
        }
    }
}

pub async fn details(controller: &Controller, global: &GlobalOpts) -> Result<(), CliError> {
    let details = controller.wan_details().await?;
    let color = output::should_color(global.color);
    if details.is_empty() && global.output == crate::cli::OutputFormat::Table {
        if !global.quiet {
            eprintln!("No WAN roles assigned. Run: sudo dpnet set-wan <interface>");
        }
        return Ok(());
    }
    let out = output::render_list(global.output, &details, |d| row(d, color), |d| d.interface.clone())?;
    output::print_output(&out, global.quiet);
    Ok(())
}

pub async fn set(controller: &Controller, args: SetWanArgs, global: &GlobalOpts) -> Result<(), CliError> {
    util::known_interface(controller, &args.interface)?;
    util::require_root("set-wan")?;
    let priority = WanPriority::from(args.priority);
    let outcome = controller.set_wan(&args.interface, priority).await?;
    util::report_change(global, &outcome, &format!("{} set as {priority} WAN", args.interface))
}

pub async fn clear(controller: &Controller, args: InterfaceArg, global: &GlobalOpts) -> Result<(), CliError> {
    util::known_interface(controller, &args.interface)?;
    util::require_root("clear-wan")?;
    let outcome = controller.clear_wan(&args.interface).await?;
    util::report_change(global, &outcome, &format!("{} WAN role cleared", args.interface))
}
