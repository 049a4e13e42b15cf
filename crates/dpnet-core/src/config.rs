// ── Runtime controller configuration ──
//
// These types describe *where* dpnet keeps its files and *how* it tunes
// probing and applying. Core never reads config files: the CLI builds a
// `ControllerConfig` (usually via dpnet-config) and hands it in.

use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use ipnet::Ipv4Net;
use secrecy::SecretString;

/// Filesystem locations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Paths {
    /// Holds `interfaces.conf` and the legacy `wan.conf`.
    pub config_dir: PathBuf,
    /// Holds `network-state.json`, `routing-state` and the lock file.
    pub state_dir: PathBuf,
    pub dnsmasq_conf: PathBuf,
    pub sysfs_root: PathBuf,
}

impl Paths {
    pub fn interfaces_conf(&self) -> PathBuf {
        self.config_dir.join("interfaces.conf")
    }

    pub fn wan_conf(&self) -> PathBuf {
        self.config_dir.join("wan.conf")
    }

    pub fn state_file(&self) -> PathBuf {
        self.state_dir.join("network-state.json")
    }

    pub fn routing_state(&self) -> PathBuf {
        self.state_dir.join("routing-state")
    }

    pub fn lock_file(&self) -> PathBuf {
        self.state_dir.join("dpnet.lock")
    }

    /// All paths rooted under `root`, for tests and sandboxes.
    pub fn under(root: &Path) -> Self {
        Self {
            config_dir: root.join("config"),
            state_dir: root.join("state"),
            dnsmasq_conf: root.join("dnsmasq.d/dangerprep-routing.conf"),
            sysfs_root: root.join("sys/class/net"),
        }
    }
}

impl Default for Paths {
    fn default() -> Self {
        Self {
            config_dir: PathBuf::from("/etc/dangerprep"),
            state_dir: PathBuf::from("/var/lib/dangerprep"),
            dnsmasq_conf: PathBuf::from("/etc/dnsmasq.d/dangerprep-routing.conf"),
            sysfs_root: PathBuf::from("/sys/class/net"),
        }
    }
}

/// LAN addressing and DNS.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LanSettings {
    /// Name of the bridge that aggregates wired LAN ports.
    pub bridge: String,
    /// First /24; segment `i` gets `subnet_base + i * 256`.
    pub subnet_base: Ipv4Net,
    /// dnsmasq lease time, e.g. `12h`.
    pub dhcp_lease: String,
    pub upstream_dns: Vec<Ipv4Addr>,
    pub domain: String,
}

impl Default for LanSettings {
    fn default() -> Self {
        Self {
            bridge: "br-dp".into(),
            subnet_base: Ipv4Net::new(Ipv4Addr::new(192, 168, 120, 0), 24)
                .unwrap_or_default(),
            dhcp_lease: "12h".into(),
            upstream_dns: vec![Ipv4Addr::new(1, 1, 1, 1), Ipv4Addr::new(9, 9, 9, 9)],
            domain: "dangerprep.local".into(),
        }
    }
}

/// Default credentials and radio settings for LAN access points.
#[derive(Debug, Clone)]
pub struct HotspotDefaults {
    pub ssid: String,
    pub passphrase: SecretString,
    /// `bg` (2.4 GHz) or `a` (5 GHz), as nmcli spells it.
    pub band: String,
    pub channel: Option<u32>,
}

impl Default for HotspotDefaults {
    fn default() -> Self {
        Self {
            ssid: "DangerPrep".into(),
            passphrase: SecretString::from("changeme-dangerprep".to_string()),
            band: "bg".into(),
            channel: None,
        }
    }
}

/// Internet reachability probing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeSettings {
    pub targets: Vec<Ipv4Addr>,
    /// Per-ping timeout.
    pub timeout: Duration,
}

impl Default for ProbeSettings {
    fn default() -> Self {
        Self {
            targets: vec![Ipv4Addr::new(1, 1, 1, 1), Ipv4Addr::new(8, 8, 8, 8)],
            timeout: Duration::from_secs(2),
        }
    }
}

/// Apply tuning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplySettings {
    /// Fixed wait between WAN bring-up and the default-route check.
    pub wan_wait: Duration,
    pub lock_timeout: Duration,
    pub command_timeout: Duration,
}

impl Default for ApplySettings {
    fn default() -> Self {
        Self {
            wan_wait: Duration::from_secs(5),
            lock_timeout: Duration::from_secs(10),
            command_timeout: Duration::from_secs(30),
        }
    }
}

/// Everything the controller needs, built by the CLI.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    pub paths: Paths,
    pub lan: LanSettings,
    pub hotspot: HotspotDefaults,
    pub probe: ProbeSettings,
    pub apply: ApplySettings,
    /// How often `monitor` re-probes.
    pub monitor_interval: Duration,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            paths: Paths::default(),
            lan: LanSettings::default(),
            hotspot: HotspotDefaults::default(),
            probe: ProbeSettings::default(),
            apply: ApplySettings::default(),
            monitor_interval: Duration::from_secs(30),
        }
    }
}

impl ControllerConfig {
    /// Defaults with every path under `root`.
    pub fn rooted(root: &Path) -> Self {
        Self {
            paths: Paths::under(root),
            ..Self::default()
        }
    }
}
