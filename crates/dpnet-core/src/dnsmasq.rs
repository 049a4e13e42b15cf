// ── dnsmasq configuration ──

use std::fmt::Write as _;
use std::fs;
use std::path::Path;

use tracing::{info, warn};

use crate::config::LanSettings;
use crate::error::CoreError;
use crate::model::SharingMode;
use crate::store::{atomic_write, write_if_changed};
use crate::system::CommandRunner;
use crate::topology::Topology;

/// Render the dnsmasq drop-in for the topology's LAN segments.
pub fn render(topology: &Topology, lan: &LanSettings) -> String {
    let local_only = topology.sharing == SharingMode::LocalOnly;

    let mut out = String::from("# Managed by dpnet. Do not edit.\n");
    out.push_str("bind-interfaces\ndomain-needed\nbogus-priv\n");
    let _ = writeln!(out, "domain={}", lan.domain);
    let _ = writeln!(out, "local=/{}/", lan.domain);

    for seg in &topology.lan {
        let (start, end) = seg.dhcp_range();
        let _ = writeln!(out, "\n# {} ({})", seg.name, seg.kind);
        let _ = writeln!(out, "interface={}", seg.name);
        let _ = writeln!(
            out,
            "dhcp-range=set:{},{start},{end},255.255.255.0,{}",
            seg.name, lan.dhcp_lease
        );
        // Without a router option clients keep the LAN but route nothing through us.
        if !local_only {
            let _ = writeln!(out, "dhcp-option=tag:{},option:router,{}", seg.name, seg.gateway());
        }
        let _ = writeln!(out, "dhcp-option=tag:{},option:dns-server,{}", seg.name, seg.gateway());
    }

    out.push_str("\nno-resolv\n");
    if !local_only {
        for server in &lan.upstream_dns {
            let _ = writeln!(out, "server={server}");
        }
    }
    out
}

/// Write the drop-in and restart dnsmasq only if the content changed.
/// Returns `true` when dnsmasq was restarted. A failed restart puts the
/// previous file back so the next sync writes and restarts again.
pub async fn sync(
    runner: &dyn CommandRunner,
    path: &Path,
    topology: &Topology,
    lan: &LanSettings,
) -> Result<bool, CoreError> {
    let content = render(topology, lan);
    let previous = fs::read_to_string(path).ok();
    if !write_if_changed(path, &content, 0o644)? {
        return Ok(false);
    }
    if let Err(e) = runner.run_checked("systemctl", &["restart", "dnsmasq"]).await {
        let restored = match previous {
            Some(old) => atomic_write(path, old.as_bytes(), 0o644),
            None => fs::remove_file(path).map_err(CoreError::from),
        };
        if let Err(restore) = restored {
            warn!(path = %path.display(), error = %restore, "could not roll back dnsmasq configuration");
        }
        return Err(e);
    }
    info!(path = %path.display(), "dnsmasq configuration updated");
    Ok(true)
}
