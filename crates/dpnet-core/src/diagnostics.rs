// ── Diagnostics ──
//
// Read-only health checks grouped by area. Each check produces a
// `Section`; a check that cannot run reports itself unhealthy rather
// than failing the whole report.

use serde::Serialize;
use strum::{Display, EnumString};

use crate::config::ControllerConfig;
use crate::error::CoreError;
use crate::firewall::{FORWARD_CHAIN, NAT_CHAIN, OUTPUT_CHAIN};
use crate::model::Interface;
use crate::probe::Prober;
use crate::system::CommandRunner;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum DiagnosticKind {
    Connectivity,
    Routes,
    Firewall,
    Dns,
    #[default]
    All,
}

impl DiagnosticKind {
    fn includes(self, other: Self) -> bool {
        self == Self::All || self == other
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Section {
    pub kind: DiagnosticKind,
    pub healthy: bool,
    pub details: Vec<String>,
}

impl Section {
    fn failed(kind: DiagnosticKind, err: &CoreError) -> Self {
        Self {
            kind,
            healthy: false,
            details: vec![format!("check failed: {err}")],
        }
    }
}

pub async fn run(
    kind: DiagnosticKind,
    runner: &dyn CommandRunner,
    config: &ControllerConfig,
    inventory: &[Interface],
) -> Vec<Section> {
    let mut sections = Vec::new();
    if kind.includes(DiagnosticKind::Connectivity) {
        sections.push(
            connectivity(runner, config, inventory)
                .await
                .unwrap_or_else(|e| Section::failed(DiagnosticKind::Connectivity, &e)),
        );
    }
    if kind.includes(DiagnosticKind::Routes) {
        sections.push(
            routes(runner)
                .await
                .unwrap_or_else(|e| Section::failed(DiagnosticKind::Routes, &e)),
        );
    }
    if kind.includes(DiagnosticKind::Firewall) {
        sections.push(
            firewall(runner)
                .await
                .unwrap_or_else(|e| Section::failed(DiagnosticKind::Firewall, &e)),
        );
    }
    if kind.includes(DiagnosticKind::Dns) {
        sections.push(
            dns(runner, config)
                .await
                .unwrap_or_else(|e| Section::failed(DiagnosticKind::Dns, &e)),
        );
    }
    sections
}

async fn connectivity(
    runner: &dyn CommandRunner,
    config: &ControllerConfig,
    inventory: &[Interface],
) -> Result<Section, CoreError> {
    let prober = Prober::new(runner, &config.paths.sysfs_root, &config.probe);
    let statuses = prober
        .probe_all(inventory.iter().map(|i| i.name.as_str()))
        .await?;
    let details = statuses
        .iter()
        .map(|s| {
            format!(
                "{}: link {}, address {}, default route {}, internet {}",
                s.interface,
                s.link,
                s.address.map_or_else(|| "none".to_owned(), |a| a.to_string()),
                yes_no(s.has_default_route),
                yes_no(s.has_internet),
            )
        })
        .collect();
    Ok(Section {
        kind: DiagnosticKind::Connectivity,
        healthy: statuses.iter().any(|s| s.has_internet),
        details,
    })
}

async fn routes(runner: &dyn CommandRunner) -> Result<Section, CoreError> {
    let output = runner.run_checked("ip", &["-4", "route", "show"]).await?;
    let details: Vec<String> = output.lines().map(str::to_owned).collect();
    Ok(Section {
        kind: DiagnosticKind::Routes,
        healthy: details.iter().any(|l| l.starts_with("default")),
        details,
    })
}

async fn firewall(runner: &dyn CommandRunner) -> Result<Section, CoreError> {
    let mut details = Vec::new();
    for table in ["filter", "nat"] {
        let output = runner.run_checked("iptables-save", &["-t", table]).await?;
        details.extend(
            output
                .lines()
                .filter(|l| {
                    l.starts_with(":FORWARD")
                        || [FORWARD_CHAIN, OUTPUT_CHAIN, NAT_CHAIN]
                            .iter()
                            .any(|c| l.contains(c))
                })
                .map(|l| format!("{table}: {l}")),
        );
    }
    let forwarding = runner
        .run_checked("sysctl", &["-n", "net.ipv4.ip_forward"])
        .await?;
    details.push(format!("net.ipv4.ip_forward = {}", forwarding.trim()));

    let hooked = [FORWARD_CHAIN, OUTPUT_CHAIN, NAT_CHAIN]
        .iter()
        .all(|c| details.iter().any(|l| l.ends_with(&format!("-j {c}"))));
    Ok(Section {
        kind: DiagnosticKind::Firewall,
        healthy: hooked,
        details,
    })
}

async fn dns(runner: &dyn CommandRunner, config: &ControllerConfig) -> Result<Section, CoreError> {
    let output = runner.run("systemctl", &["is-active", "dnsmasq"]).await?;
    let state = output.stdout.trim().to_owned();
    let conf = &config.paths.dnsmasq_conf;
    let present = conf.exists();
    Ok(Section {
        kind: DiagnosticKind::Dns,
        healthy: output.success() && present,
        details: vec![
            format!("dnsmasq: {}", if state.is_empty() { "unknown" } else { state.as_str() }),
            format!(
                "{}: {}",
                conf.display(),
                if present { "present" } else { "missing" }
            ),
        ],
    })
}

fn yes_no(v: bool) -> &'static str {
    if v { "yes" } else { "no" }
}
