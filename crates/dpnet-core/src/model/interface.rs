// ── Interface domain types ──
//
// One `Interface` per kernel network device the controller cares about.
// Produced by the enumerator and round-tripped through `interfaces.conf`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use strum::{Display, EnumString};

/// Interface class, decided from the device name and sysfs layout.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum InterfaceKind {
    Ethernet,
    Wifi,
    Tailscale,
}

impl InterfaceKind {
    /// Key prefix used in `interfaces.conf` (`ETHERNET_eth0=...`).
    pub fn config_prefix(self) -> &'static str {
        match self {
            Self::Ethernet => "ETHERNET",
            Self::Wifi => "WIFI",
            Self::Tailscale => "TAILSCALE",
        }
    }

    pub fn from_config_prefix(prefix: &str) -> Option<Self> {
        match prefix {
            "ETHERNET" => Some(Self::Ethernet),
            "WIFI" => Some(Self::Wifi),
            "TAILSCALE" => Some(Self::Tailscale),
            _ => None,
        }
    }
}

/// Operational link state as reported by the kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum LinkState {
    Up,
    Down,
    Unknown,
}

impl LinkState {
    /// Map a sysfs `operstate` value.
    pub fn from_operstate(raw: &str) -> Self {
        match raw.trim() {
            "up" => Self::Up,
            "down" | "lowerlayerdown" | "notpresent" | "dormant" => Self::Down,
            _ => Self::Unknown,
        }
    }

    pub fn is_up(self) -> bool {
        matches!(self, Self::Up)
    }
}

/// WiFi interface modes relevant to topology decisions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WifiCapabilities {
    pub ap: bool,
    pub monitor: bool,
    pub mesh: bool,
}

impl WifiCapabilities {
    /// Render as `ap+monitor+mesh`, or `none`.
    pub fn to_flags(self) -> String {
        let mut flags = Vec::new();
        if self.ap {
            flags.push("ap");
        }
        if self.monitor {
            flags.push("monitor");
        }
        if self.mesh {
            flags.push("mesh");
        }
        if flags.is_empty() {
            "none".into()
        } else {
            flags.join("+")
        }
    }

    pub fn from_flags(raw: &str) -> Self {
        let mut caps = Self::default();
        for flag in raw.split('+') {
            match flag.trim() {
                "ap" => caps.ap = true,
                "monitor" => caps.monitor = true,
                "mesh" => caps.mesh = true,
                _ => {}
            }
        }
        caps
    }
}

// ── MacAddress ──────────────────────────────────────────────────────

/// MAC address, normalized to lowercase colon-separated format (aa:bb:cc:dd:ee:ff).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MacAddress(String);

impl MacAddress {
    /// Create a normalized MAC address. Accepts colon- or dash-separated hex.
    pub fn new(raw: impl AsRef<str>) -> Self {
        let normalized = raw.as_ref().trim().to_lowercase().replace('-', ":");
        Self(normalized)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for MacAddress {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::new(s))
    }
}

// ── Interface ───────────────────────────────────────────────────────

/// A network interface as recorded by the enumerator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interface {
    pub name: String,
    pub kind: InterfaceKind,
    pub mac: Option<MacAddress>,
    pub state: LinkState,
    pub driver: Option<String>,
    #[serde(default)]
    pub capabilities: WifiCapabilities,
}

impl Interface {
    pub fn is_wifi(&self) -> bool {
        self.kind == InterfaceKind::Wifi
    }

    /// Tailscale is an overlay; it never carries the default route or serves clients.
    pub fn is_overlay(&self) -> bool {
        self.kind == InterfaceKind::Tailscale
    }

    pub fn supports_ap(&self) -> bool {
        self.is_wifi() && self.capabilities.ap
    }
}
