// ── Interface roles ──
//
// The role map is the operator's intent: which interfaces may carry
// upstream traffic and in what order. Anything without a WAN role is
// served as LAN.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use super::interface::Interface;

/// WAN priority accepted by `set-wan`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum WanPriority {
    Primary,
    Secondary,
    Available,
}

/// Effective role of a single interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    WanPrimary,
    WanSecondary,
    WanAvailable,
    Lan,
}

impl Role {
    pub fn is_wan(self) -> bool {
        !matches!(self, Self::Lan)
    }

    /// Route metric used for WAN links; lower wins.
    pub fn route_metric(self) -> Option<u32> {
        match self {
            Self::WanPrimary => Some(100),
            Self::WanSecondary => Some(200),
            Self::WanAvailable => Some(300),
            Self::Lan => None,
        }
    }
}

impl From<WanPriority> for Role {
    fn from(priority: WanPriority) -> Self {
        match priority {
            WanPriority::Primary => Self::WanPrimary,
            WanPriority::Secondary => Self::WanSecondary,
            WanPriority::Available => Self::WanAvailable,
        }
    }
}

/// Persisted role assignments.
///
/// Every interface appears in at most one list, and `primary` is a single
/// slot, so "at most one WAN_PRIMARY" holds by construction.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleMap {
    #[serde(default)]
    pub primary: Option<String>,
    #[serde(default)]
    pub secondary: Vec<String>,
    #[serde(default)]
    pub available: Vec<String>,
    #[serde(default)]
    pub lan: Vec<String>,
}

impl RoleMap {
    /// Explicitly assigned role, if any.
    pub fn role_of(&self, name: &str) -> Option<Role> {
        if self.primary.as_deref() == Some(name) {
            Some(Role::WanPrimary)
        } else if self.secondary.iter().any(|n| n == name) {
            Some(Role::WanSecondary)
        } else if self.available.iter().any(|n| n == name) {
            Some(Role::WanAvailable)
        } else if self.lan.iter().any(|n| n == name) {
            Some(Role::Lan)
        } else {
            None
        }
    }

    /// Role used for topology: unassigned interfaces are LAN.
    pub fn effective_role(&self, name: &str) -> Role {
        self.role_of(name).unwrap_or(Role::Lan)
    }

    pub fn is_wan(&self, name: &str) -> bool {
        self.role_of(name).is_some_and(Role::is_wan)
    }

    /// Assign a WAN role. A new primary demotes the previous one to the
    /// front of the secondary list.
    pub fn assign_wan(&mut self, name: &str, priority: WanPriority) {
        self.remove(name);
        match priority {
            WanPriority::Primary => {
                if let Some(previous) = self.primary.replace(name.to_owned()) {
                    self.secondary.insert(0, previous);
                }
            }
            WanPriority::Secondary => self.secondary.push(name.to_owned()),
            WanPriority::Available => self.available.push(name.to_owned()),
        }
    }

    /// Drop any WAN role. Returns `true` if the interface held one.
    pub fn clear_wan(&mut self, name: &str) -> bool {
        if !self.is_wan(name) {
            return false;
        }
        self.remove(name);
        true
    }

    pub fn assign_lan(&mut self, name: &str) {
        self.remove(name);
        self.lan.push(name.to_owned());
    }

    pub fn clear_lan(&mut self, name: &str) -> bool {
        let before = self.lan.len();
        self.lan.retain(|n| n != name);
        before != self.lan.len()
    }

    /// WAN interfaces in preference order: primary, secondaries, available.
    pub fn wan_order(&self) -> Vec<(&str, Role)> {
        let mut out = Vec::new();
        if let Some(ref primary) = self.primary {
            out.push((primary.as_str(), Role::WanPrimary));
        }
        out.extend(self.secondary.iter().map(|n| (n.as_str(), Role::WanSecondary)));
        out.extend(self.available.iter().map(|n| (n.as_str(), Role::WanAvailable)));
        out
    }

    /// Interfaces from `inventory` that end up serving clients.
    pub fn lan_interfaces<'a>(&self, inventory: &'a [Interface]) -> Vec<&'a Interface> {
        inventory
            .iter()
            .filter(|iface| !iface.is_overlay() && !self.is_wan(&iface.name))
            .collect()
    }

    fn remove(&mut self, name: &str) {
        if self.primary.as_deref() == Some(name) {
            self.primary = None;
        }
        self.secondary.retain(|n| n != name);
        self.available.retain(|n| n != name);
        self.lan.retain(|n| n != name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::interface::{InterfaceKind, LinkState, WifiCapabilities};
    use pretty_assertions::assert_eq;

    fn iface(name: &str, kind: InterfaceKind) -> Interface {
        Interface {
            name: name.into(),
            kind,
            mac: None,
            state: LinkState::Up,
            driver: None,
            capabilities: WifiCapabilities::default(),
        }
    }

    #[test]
    fn new_primary_demotes_previous() {
        let mut roles = RoleMap::default();
        roles.assign_wan("eth0", WanPriority::Primary);
        roles.assign_wan("wlan1", WanPriority::Primary);

        assert_eq!(roles.primary.as_deref(), Some("wlan1"));
        assert_eq!(roles.secondary, vec!["eth0".to_string()]);
        assert_eq!(roles.role_of("eth0"), Some(Role::WanSecondary));
    }

    #[test]
    fn reassigning_moves_between_lists() {
        let mut roles = RoleMap::default();
        roles.assign_wan("eth0", WanPriority::Secondary);
        roles.assign_wan("eth0", WanPriority::Available);

        assert!(roles.secondary.is_empty());
        assert_eq!(roles.available, vec!["eth0".to_string()]);
    }

    #[test]
    fn clear_wan_falls_back_to_lan() {
        let mut roles = RoleMap::default();
        roles.assign_wan("eth0", WanPriority::Primary);

        assert!(roles.clear_wan("eth0"));
        assert!(!roles.clear_wan("eth0"));
        assert_eq!(roles.role_of("eth0"), None);
        assert_eq!(roles.effective_role("eth0"), Role::Lan);
    }

    #[test]
    fn clear_wan_ignores_explicit_lan() {
        let mut roles = RoleMap::default();
        roles.assign_lan("eth1");
        assert!(!roles.clear_wan("eth1"));
        assert_eq!(roles.role_of("eth1"), Some(Role::Lan));
    }

    #[test]
    fn wan_order_is_primary_first() {
        let mut roles = RoleMap::default();
        roles.assign_wan("usb0", WanPriority::Available);
        roles.assign_wan("wlan1", WanPriority::Secondary);
        roles.assign_wan("eth0", WanPriority::Primary);

        let order: Vec<_> = roles.wan_order().into_iter().map(|(n, _)| n).collect();
        assert_eq!(order, vec!["eth0", "wlan1", "usb0"]);
    }

    #[test]
    fn lan_excludes_wan_and_overlay() {
        let inventory = vec![
            iface("eth0", InterfaceKind::Ethernet),
            iface("eth1", InterfaceKind::Ethernet),
            iface("wlan0", InterfaceKind::Wifi),
            iface("tailscale0", InterfaceKind::Tailscale),
        ];
        let mut roles = RoleMap::default();
        roles.assign_wan("eth0", WanPriority::Primary);

        let lan: Vec<_> = roles
            .lan_interfaces(&inventory)
            .into_iter()
            .map(|i| i.name.as_str())
            .collect();
        assert_eq!(lan, vec!["eth1", "wlan0"]);
    }

    #[test]
    fn role_labels() {
        assert_eq!(Role::WanPrimary.to_string(), "WAN_PRIMARY");
        assert_eq!("secondary".parse::<WanPriority>().ok(), Some(WanPriority::Secondary));
    }
}
