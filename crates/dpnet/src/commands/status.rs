//! `dpnet status`.

use tabled::Tabled;

use dpnet_core::{Controller, InterfaceStatus, StatusReport};

use crate::cli::GlobalOpts;
use crate::error::CliError;
use crate::output;

#[derive(Tabled)]
struct StatusRow {
    #[tabled(rename = "Interface")]
    name: String,
    #[tabled(rename = "Kind")]
    kind: String,
    #[tabled(rename = "Role")]
    role: String,
    #[tabled(rename = "Link")]
    link: String,
    #[tabled(rename = "Address")]
    address: String,
    #[tabled(rename = "Gateway")]
    gateway: String,
    #[tabled(rename = "Internet")]
    internet: String,
}

fn row(status: &InterfaceStatus, color: bool) -> StatusRow {
    let c = &status.connectivity;
    StatusRow {
        name: status.entry.interface.name.clone(),
        kind: status.entry.interface.kind.to_string(),
        role: status
            .entry
            .effective_role
            .map_or_else(|| "-".into(), |r| r.to_string()),
        link: c.link.to_string(),
        address: c.address.map_or_else(|| "-".into(), |a| a.to_string()),
        gateway: output::yes_no(c.has_default_route, color),
        internet: output::yes_no(c.has_internet, color),
    }
}

fn detail(report: &StatusReport, color: bool) -> String {
    let mut lines = vec![
        format!("Mode:        {}", report.mode),
        format!("Hotspot:     {}", report.hotspot_ssid),
    ];
    if let Some(r) = &report.repeater {
        lines.push(format!("Repeater:    {} -> {}", r.upstream, r.access_point));
    }
    match &report.last_apply {
        Some(s) => lines.push(format!(
            "Last apply:  {} (uplink {}, {} rule(s))",
            s.applied_at.format("%Y-%m-%d %H:%M:%S UTC"),
            s.uplink.as_deref().unwrap_or("none"),
            s.rules
        )),
        None => lines.push("Last apply:  never".into()),
    }

    if report.interfaces.is_empty() {
        lines.push(String::new());
        lines.push("No interfaces enumerated. Run: sudo dpnet enumerate".into());
    } else {
        let rows: Vec<StatusRow> = report.interfaces.iter().map(|s| row(s, color)).collect();
        lines.push(String::new());
        lines.push(output::render_table(&rows));
    }
    lines.join("\n")
}

pub async fn handle(controller: &Controller, global: &GlobalOpts) -> Result<(), CliError> {
    let report = controller.status().await?;
    let color = output::should_color(global.color);
    let out = output::render_single(global.output, &report, |r| detail(r, color), |r| r.mode.label())?;
    output::print_output(&out, global.quiet);
    Ok(())
}
