// ── Desired topology ──
//
// Pure planning: given roles, mode, inventory and fresh probes, decide
// which uplink carries traffic and how LAN segments are addressed.
// Nothing here touches the host.

use std::net::Ipv4Addr;

use ipnet::Ipv4Net;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use tracing::warn;

use crate::config::LanSettings;
use crate::error::CoreError;
use crate::model::{ConnectivityStatus, Interface, InterfaceKind, NetworkState, Role, RoleMap, SharingMode};

pub const CONNECTION_PREFIX: &str = "DangerPrep-";
pub const BRIDGE_CONNECTION: &str = "DangerPrep-Bridge";
pub const HOTSPOT_CONNECTION_PREFIX: &str = "DangerPrep-Hotspot-";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum SegmentKind {
    Bridge,
    Hotspot,
}

/// One LAN broadcast domain with its own /24.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LanSegment {
    /// Bridge name, or the WiFi interface serving the hotspot.
    pub name: String,
    pub kind: SegmentKind,
    /// Bridge ports; empty for hotspots.
    pub members: Vec<String>,
    pub subnet: Ipv4Net,
}

impl LanSegment {
    pub fn gateway(&self) -> Ipv4Addr {
        offset(self.subnet.network(), 1)
    }

    pub fn dhcp_range(&self) -> (Ipv4Addr, Ipv4Addr) {
        let net = self.subnet.network();
        (offset(net, 50), offset(net, 250))
    }

    /// NetworkManager connection carrying the segment's address.
    pub fn connection_name(&self) -> String {
        match self.kind {
            SegmentKind::Bridge => BRIDGE_CONNECTION.to_owned(),
            SegmentKind::Hotspot => format!("{HOTSPOT_CONNECTION_PREFIX}{}", self.name),
        }
    }
}

fn offset(addr: Ipv4Addr, n: u32) -> Ipv4Addr {
    Ipv4Addr::from(u32::from(addr).saturating_add(n))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WanLink {
    pub interface: String,
    pub kind: InterfaceKind,
    pub role: Role,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Topology {
    pub sharing: SharingMode,
    /// WAN interface expected to hold the default route.
    pub uplink: Option<String>,
    /// WAN links in preference order. Empty in local-only mode.
    pub wan: Vec<WanLink>,
    /// WAN interfaces held offline in local-only mode.
    pub isolated: Vec<String>,
    pub lan: Vec<LanSegment>,
}

impl Topology {
    pub fn lan_subnets(&self) -> Vec<Ipv4Net> {
        self.lan.iter().map(|s| s.subnet).collect()
    }

    /// Interfaces that carry LAN traffic at layer 3 (bridge or AP).
    pub fn lan_devices(&self) -> Vec<&str> {
        self.lan.iter().map(|s| s.name.as_str()).collect()
    }
}

/// Pick the uplink: the primary if it reaches the internet, then the
/// first secondary, then the first available; otherwise the most
/// preferred WAN so the topology still comes up.
pub fn select_uplink(wan: &[WanLink], statuses: &[ConnectivityStatus]) -> Option<String> {
    let online = |name: &str| {
        statuses
            .iter()
            .any(|s| s.interface == name && s.has_internet)
    };
    for role in [Role::WanPrimary, Role::WanSecondary, Role::WanAvailable] {
        if let Some(link) = wan
            .iter()
            .find(|l| l.role == role && online(&l.interface))
        {
            return Some(link.interface.clone());
        }
    }
    wan.first().map(|l| l.interface.clone())
}

/// Compute the desired topology.
pub fn plan(
    state: &NetworkState,
    inventory: &[Interface],
    statuses: &[ConnectivityStatus],
    lan: &LanSettings,
) -> Result<Topology, CoreError> {
    let sharing = state.mode.sharing;
    let (wan, isolated) = if sharing == SharingMode::LocalOnly {
        let names: Vec<String> = wan_links(&state.roles, inventory)
            .into_iter()
            .map(|l| l.interface)
            .collect();
        (Vec::new(), names)
    } else {
        (wan_links(&state.roles, inventory), Vec::new())
    };
    let uplink = select_uplink(&wan, statuses);

    let mut segments = Vec::new();
    let lan_ifaces = state.roles.lan_interfaces(inventory);

    let wired: Vec<String> = lan_ifaces
        .iter()
        .filter(|i| i.kind == InterfaceKind::Ethernet)
        .map(|i| i.name.clone())
        .collect();
    // The wired bridge always owns the first /24 so hotspot subnets stay
    // stable when ports come and go.
    if !wired.is_empty() {
        segments.push(LanSegment {
            name: lan.bridge.clone(),
            kind: SegmentKind::Bridge,
            members: wired,
            subnet: segment_subnet(lan.subnet_base, 0)?,
        });
    }

    let mut index = 1;
    for iface in lan_ifaces.iter().filter(|i| i.is_wifi()) {
        if !iface.supports_ap() {
            warn!(interface = %iface.name, "WiFi interface cannot run an access point, not serving LAN");
            continue;
        }
        segments.push(LanSegment {
            name: iface.name.clone(),
            kind: SegmentKind::Hotspot,
            members: Vec::new(),
            subnet: segment_subnet(lan.subnet_base, index)?,
        });
        index += 1;
    }

    Ok(Topology {
        sharing,
        uplink,
        wan,
        isolated,
        lan: segments,
    })
}

fn wan_links(roles: &RoleMap, inventory: &[Interface]) -> Vec<WanLink> {
    roles
        .wan_order()
        .into_iter()
        .filter_map(|(name, role)| {
            let Some(iface) = inventory.iter().find(|i| i.name == name) else {
                warn!(interface = %name, "WAN interface missing from inventory, skipping");
                return None;
            };
            Some(WanLink {
                interface: name.to_owned(),
                kind: iface.kind,
                role,
            })
        })
        .collect()
}

/// `/24` number `index` counted up from `base`.
pub fn segment_subnet(base: Ipv4Net, index: u32) -> Result<Ipv4Net, CoreError> {
    let start = u32::from(base.network())
        .checked_add(index << 8)
        .ok_or_else(|| CoreError::validation("LAN subnet range exhausted"))?;
    Ipv4Net::new(Ipv4Addr::from(start), 24)
        .map_err(|e| CoreError::validation(format!("invalid LAN subnet: {e}")))
}
