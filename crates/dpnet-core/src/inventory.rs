// ── Interface enumerator ──
//
// Scans sysfs for the interfaces dpnet manages and records them in
// `interfaces.conf`, one `<KIND>_<name>="k=v,..."` line each.

use std::fs;
use std::path::Path;

use tracing::{debug, info, warn};

use crate::error::CoreError;
use crate::model::{Interface, InterfaceKind, LinkState, MacAddress, WifiCapabilities};
use crate::store::atomic_write;
use crate::system::CommandRunner;

const HEADER: &str = "# DangerPrep interface inventory. Managed by `dpnet enumerate`; do not edit.\n";

const VIRTUAL_PREFIXES: &[&str] = &["veth", "docker", "br-", "virbr"];

/// Scan `sysfs_root`, probe WiFi capabilities and return the interfaces
/// sorted by name. `bridge` is the dpnet LAN bridge, which is skipped.
pub async fn scan(
    sysfs_root: &Path,
    bridge: &str,
    runner: &dyn CommandRunner,
) -> Result<Vec<Interface>, CoreError> {
    let mut names: Vec<String> = fs::read_dir(sysfs_root)?
        .filter_map(Result::ok)
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();

    let mut interfaces = Vec::new();
    for name in names {
        if is_virtual(&name, bridge) {
            debug!(interface = %name, "skipping virtual interface");
            continue;
        }
        let dir = sysfs_root.join(&name);
        let Some(kind) = classify(&name, &dir) else {
            debug!(interface = %name, "skipping unsupported interface");
            continue;
        };

        let capabilities = if kind == InterfaceKind::Wifi {
            wifi_capabilities(&name, &dir, runner).await
        } else {
            WifiCapabilities::default()
        };

        interfaces.push(Interface {
            mac: read_attr(&dir, "address")
                .filter(|mac| !mac.is_empty())
                .map(MacAddress::new),
            state: read_attr(&dir, "operstate")
                .map_or(LinkState::Unknown, |s| LinkState::from_operstate(&s)),
            driver: driver_name(&dir),
            name,
            kind,
            capabilities,
        });
    }

    Ok(interfaces)
}

/// Scan and replace `interfaces.conf` atomically.
pub async fn enumerate(
    sysfs_root: &Path,
    bridge: &str,
    output: &Path,
    runner: &dyn CommandRunner,
) -> Result<Vec<Interface>, CoreError> {
    let interfaces = scan(sysfs_root, bridge, runner).await?;
    atomic_write(output, render(&interfaces).as_bytes(), 0o644)?;
    info!(count = interfaces.len(), path = %output.display(), "interface inventory written");
    Ok(interfaces)
}

fn is_virtual(name: &str, bridge: &str) -> bool {
    name == "lo" || name == bridge || VIRTUAL_PREFIXES.iter().any(|p| name.starts_with(p))
}

fn classify(name: &str, dir: &Path) -> Option<InterfaceKind> {
    if name.starts_with("tailscale") {
        return Some(InterfaceKind::Tailscale);
    }
    if dir.join("wireless").exists() || dir.join("phy80211").exists() {
        return Some(InterfaceKind::Wifi);
    }
    // Software devices (dummy, tun, bonds) have no backing device.
    if !dir.join("device").exists() {
        return None;
    }
    match read_attr(dir, "type").as_deref() {
        Some("1") => Some(InterfaceKind::Ethernet),
        _ => None,
    }
}

fn read_attr(dir: &Path, attr: &str) -> Option<String> {
    fs::read_to_string(dir.join(attr))
        .ok()
        .map(|s| s.trim().to_owned())
}

fn driver_name(dir: &Path) -> Option<String> {
    fs::read_link(dir.join("device/driver"))
        .ok()
        .and_then(|target| target.file_name().map(|n| n.to_string_lossy().into_owned()))
}

fn phy_name(dir: &Path) -> Option<String> {
    read_attr(&dir.join("phy80211"), "name").or_else(|| {
        fs::read_link(dir.join("phy80211"))
            .ok()
            .and_then(|target| target.file_name().map(|n| n.to_string_lossy().into_owned()))
    })
}

async fn wifi_capabilities(name: &str, dir: &Path, runner: &dyn CommandRunner) -> WifiCapabilities {
    let Some(phy) = phy_name(dir) else {
        warn!(interface = %name, "no phy80211 link, recording without capabilities");
        return WifiCapabilities::default();
    };
    match runner.run_checked("iw", &["phy", &phy, "info"]).await {
        Ok(info) => parse_iw_modes(&info),
        Err(e) => {
            warn!(interface = %name, phy = %phy, error = %e, "capability probe failed");
            WifiCapabilities::default()
        }
    }
}

/// Read the "Supported interface modes" block of `iw phy <phy> info`.
pub fn parse_iw_modes(info: &str) -> WifiCapabilities {
    let mut caps = WifiCapabilities::default();
    let mut in_modes = false;
    for line in info.lines() {
        let trimmed = line.trim();
        if trimmed == "Supported interface modes:" {
            in_modes = true;
            continue;
        }
        if !in_modes {
            continue;
        }
        let Some(mode) = trimmed.strip_prefix('*') else {
            break;
        };
        match mode.trim() {
            "AP" => caps.ap = true,
            "monitor" => caps.monitor = true,
            "mesh point" => caps.mesh = true,
            _ => {}
        }
    }
    caps
}

// ── interfaces.conf ─────────────────────────────────────────────────

pub fn render(interfaces: &[Interface]) -> String {
    let mut out = String::from(HEADER);
    for iface in interfaces {
        out.push_str(&format!(
            "{}_{}=\"type={},mac={},state={},driver={},caps={}\"\n",
            iface.kind.config_prefix(),
            iface.name,
            iface.kind,
            iface.mac.as_ref().map(MacAddress::as_str).unwrap_or_default(),
            iface.state,
            iface.driver.as_deref().unwrap_or_default(),
            iface.capabilities.to_flags(),
        ));
    }
    out
}

/// Parse `interfaces.conf`. Comments, blank lines and unknown keys are ignored.
pub fn parse(content: &str) -> Vec<Interface> {
    content.lines().filter_map(parse_line).collect()
}

fn parse_line(line: &str) -> Option<Interface> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }
    let (key, value) = line.split_once('=')?;
    let (prefix, name) = key.split_once('_')?;
    let prefix_kind = InterfaceKind::from_config_prefix(prefix)?;
    if name.is_empty() {
        return None;
    }

    let mut iface = Interface {
        name: name.to_owned(),
        kind: prefix_kind,
        mac: None,
        state: LinkState::Unknown,
        driver: None,
        capabilities: WifiCapabilities::default(),
    };
    for field in value.trim_matches('"').split(',') {
        let Some((k, v)) = field.split_once('=') else {
            continue;
        };
        match k {
            "type" => {
                if let Ok(kind) = v.parse() {
                    iface.kind = kind;
                }
            }
            "mac" if !v.is_empty() => iface.mac = Some(MacAddress::new(v)),
            "state" => iface.state = v.parse().unwrap_or(LinkState::Unknown),
            "driver" if !v.is_empty() => iface.driver = Some(v.to_owned()),
            "caps" => iface.capabilities = WifiCapabilities::from_flags(v),
            _ => {}
        }
    }
    Some(iface)
}

/// Load the inventory, failing with `MissingInventory` if it was never written.
pub fn load(path: &Path) -> Result<Vec<Interface>, CoreError> {
    match fs::read_to_string(path) {
        Ok(content) => Ok(parse(&content)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(CoreError::MissingInventory {
            path: path.to_path_buf(),
        }),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::system::CommandOutput;
    use crate::system::mock::MockRunner;
    use pretty_assertions::assert_eq;
    use std::os::unix::fs::symlink;
    use tempfile::TempDir;

    const IW_INFO: &str = "Wiphy phy0
\tmax # scan SSIDs: 4
\tSupported interface modes:
\t\t * IBSS
\t\t * managed
\t\t * AP
\t\t * AP/VLAN
\t\t * monitor
\t\t * mesh point
\tBand 1:
\t\tCapabilities: 0x1862
";

    fn fake_iface(root: &Path, name: &str, files: &[(&str, &str)]) -> std::path::PathBuf {
        let dir = root.join(name);
        fs::create_dir_all(&dir).unwrap();
        for (file, content) in files {
            let path = dir.join(file);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, content).unwrap();
        }
        dir
    }

    fn fake_sysfs() -> TempDir {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        let drivers = root.join("drivers");
        fs::create_dir_all(drivers.join("r8169")).unwrap();
        fs::create_dir_all(drivers.join("mt7921u")).unwrap();

        let eth = fake_iface(
            root,
            "eth0",
            &[("type", "1\n"), ("address", "AA:BB:CC:00:00:01\n"), ("operstate", "up\n")],
        );
        fs::create_dir_all(eth.join("device")).unwrap();
        symlink(drivers.join("r8169"), eth.join("device/driver")).unwrap();

        let wlan = fake_iface(
            root,
            "wlan0",
            &[
                ("type", "1\n"),
                ("address", "aa:bb:cc:00:00:02\n"),
                ("operstate", "dormant\n"),
                ("phy80211/name", "phy0\n"),
            ],
        );
        fs::create_dir_all(wlan.join("device")).unwrap();
        symlink(drivers.join("mt7921u"), wlan.join("device/driver")).unwrap();

        fake_iface(root, "tailscale0", &[("type", "65534\n"), ("operstate", "unknown\n")]);
        fake_iface(root, "lo", &[("type", "772\n")]);
        fake_iface(root, "veth12ab", &[("type", "1\n")]);
        fake_iface(root, "br-dp", &[("type", "1\n")]);
        // Software ethernet without a backing device.
        fake_iface(root, "dummy0", &[("type", "1\n")]);
        tmp
    }

    #[tokio::test]
    async fn scan_classifies_and_skips_virtual() {
        let sysfs = fake_sysfs();
        let runner = MockRunner::new();
        runner.on("iw phy phy0 info", CommandOutput::ok(IW_INFO));

        let interfaces = scan(sysfs.path(), "br-dp", &runner).await.unwrap();
        let names: Vec<_> = interfaces.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, vec!["eth0", "tailscale0", "wlan0"]);

        let eth = &interfaces[0];
        assert_eq!(eth.kind, InterfaceKind::Ethernet);
        assert_eq!(eth.mac.as_ref().unwrap().as_str(), "aa:bb:cc:00:00:01");
        assert_eq!(eth.state, LinkState::Up);
        assert_eq!(eth.driver.as_deref(), Some("r8169"));

        let wlan = &interfaces[2];
        assert_eq!(wlan.kind, InterfaceKind::Wifi);
        assert_eq!(wlan.state, LinkState::Down);
        assert_eq!(wlan.capabilities.to_flags(), "ap+monitor+mesh");
    }

    #[tokio::test]
    async fn capability_probe_failure_is_not_fatal() {
        let sysfs = fake_sysfs();
        let runner = MockRunner::new();
        runner.on("iw", CommandOutput::failed(1, "nl80211 not found"));

        let interfaces = scan(sysfs.path(), "br-dp", &runner).await.unwrap();
        let wlan = interfaces.iter().find(|i| i.name == "wlan0").unwrap();
        assert_eq!(wlan.capabilities, WifiCapabilities::default());
    }

    #[tokio::test]
    async fn enumerate_writes_each_interface_once() {
        let sysfs = fake_sysfs();
        let out = TempDir::new().unwrap();
        let conf = out.path().join("interfaces.conf");
        let runner = MockRunner::new();
        runner.on("iw phy phy0 info", CommandOutput::ok(IW_INFO));

        enumerate(sysfs.path(), "br-dp", &conf, &runner).await.unwrap();
        // Second run replaces rather than appends.
        let written = enumerate(sysfs.path(), "br-dp", &conf, &runner).await.unwrap();

        let content = fs::read_to_string(&conf).unwrap();
        assert_eq!(content.matches("ETHERNET_eth0=").count(), 1);
        assert_eq!(content.matches("WIFI_wlan0=").count(), 1);
        assert!(content.contains(
            "ETHERNET_eth0=\"type=ethernet,mac=aa:bb:cc:00:00:01,state=up,driver=r8169,caps=none\""
        ));
        assert_eq!(load(&conf).unwrap(), written);
    }

    #[test]
    fn parse_ignores_noise() {
        let content = "# comment\n\nFOO=bar\nWIFI_wlan1=\"type=wifi,mac=,state=down,driver=,caps=ap,extra=1\"\n";
        let interfaces = parse(content);
        assert_eq!(interfaces.len(), 1);
        let wlan = &interfaces[0];
        assert_eq!(wlan.name, "wlan1");
        assert!(wlan.mac.is_none());
        assert!(wlan.driver.is_none());
        assert!(wlan.supports_ap());
    }

    #[test]
    fn load_missing_inventory() {
        let tmp = TempDir::new().unwrap();
        let err = load(&tmp.path().join("interfaces.conf")).unwrap_err();
        assert!(matches!(err, CoreError::MissingInventory { .. }));
    }

    #[test]
    fn iw_modes_ignore_ap_vlan() {
        let caps = parse_iw_modes("\tSupported interface modes:\n\t\t * managed\n\t\t * AP/VLAN\n");
        assert!(!caps.ap);
    }
}
