// ── Connectivity prober ──

use std::fs;
use std::net::Ipv4Addr;
use std::path::Path;

use chrono::Utc;
use tracing::{debug, instrument};

use crate::config::ProbeSettings;
use crate::error::CoreError;
use crate::model::{ConnectivityStatus, LinkState};
use crate::system::CommandRunner;

/// Probes one interface at a time against the configured targets.
pub struct Prober<'a> {
    runner: &'a dyn CommandRunner,
    sysfs_root: &'a Path,
    settings: &'a ProbeSettings,
}

impl<'a> Prober<'a> {
    pub fn new(runner: &'a dyn CommandRunner, sysfs_root: &'a Path, settings: &'a ProbeSettings) -> Self {
        Self {
            runner,
            sysfs_root,
            settings,
        }
    }

    #[instrument(skip(self))]
    pub async fn probe(&self, interface: &str) -> Result<ConnectivityStatus, CoreError> {
        let link = self.link_state(interface);
        let address = self.ipv4_address(interface).await?;
        let has_default_route = has_default_route(self.runner, interface).await?;
        let has_internet = match address {
            Some(_) => self.ping_any(interface).await?,
            None => false,
        };

        let status = ConnectivityStatus {
            interface: interface.to_owned(),
            link,
            address,
            has_default_route,
            has_internet,
            checked_at: Utc::now(),
        };
        debug!(?status, "probed");
        Ok(status)
    }

    pub async fn probe_all<'n>(
        &self,
        interfaces: impl IntoIterator<Item = &'n str>,
    ) -> Result<Vec<ConnectivityStatus>, CoreError> {
        let mut out = Vec::new();
        for name in interfaces {
            out.push(self.probe(name).await?);
        }
        Ok(out)
    }

    fn link_state(&self, interface: &str) -> LinkState {
        let dir = self.sysfs_root.join(interface);
        let operstate = fs::read_to_string(dir.join("operstate"))
            .map_or(LinkState::Unknown, |s| LinkState::from_operstate(&s));
        if operstate != LinkState::Unknown {
            return operstate;
        }
        // Some drivers leave operstate "unknown" but report carrier.
        match fs::read_to_string(dir.join("carrier")).as_deref().map(str::trim) {
            Ok("1") => LinkState::Up,
            Ok("0") => LinkState::Down,
            _ => LinkState::Unknown,
        }
    }

    async fn ipv4_address(&self, interface: &str) -> Result<Option<Ipv4Addr>, CoreError> {
        let output = self
            .runner
            .run("ip", &["-4", "-o", "addr", "show", "dev", interface])
            .await?;
        if !output.success() {
            return Ok(None);
        }
        Ok(parse_ipv4_address(&output.stdout))
    }

    async fn ping_any(&self, interface: &str) -> Result<bool, CoreError> {
        let timeout = self.settings.timeout.as_secs().max(1).to_string();
        for target in &self.settings.targets {
            let target = target.to_string();
            let output = self
                .runner
                .run("ping", &["-c", "1", "-W", &timeout, "-I", interface, &target])
                .await?;
            if output.success() {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

pub async fn has_default_route(runner: &dyn CommandRunner, interface: &str) -> Result<bool, CoreError> {
    let output = runner
        .run("ip", &["-4", "route", "show", "default", "dev", interface])
        .await?;
    Ok(output.success() && !output.stdout.trim().is_empty())
}

/// First address from `ip -4 -o addr show` output
/// (`2: eth0    inet 192.168.1.20/24 brd ... scope global eth0`).
pub fn parse_ipv4_address(output: &str) -> Option<Ipv4Addr> {
    output.lines().find_map(|line| {
        let mut words = line.split_whitespace();
        words.find(|w| *w == "inet")?;
        words.next()?.split('/').next()?.parse().ok()
    })
}
