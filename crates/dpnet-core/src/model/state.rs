// ── Persisted controller state and its transitions ──
//
// Every mutation goes through `NetworkState::transition`, which rejects
// invalid combinations up front (e.g. changing WAN roles while LAN
// clients are fenced off the internet).

use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::interface::Interface;
use super::mode::{ControlMode, NetworkMode, SharingMode};
use super::role::{RoleMap, WanPriority};
use crate::error::CoreError;

/// SSID and passphrase for LAN access points.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HotspotSettings {
    pub ssid: String,
    #[serde(serialize_with = "expose", deserialize_with = "conceal")]
    pub passphrase: SecretString,
}

impl HotspotSettings {
    pub fn new(ssid: impl Into<String>, passphrase: SecretString) -> Result<Self, CoreError> {
        let settings = Self {
            ssid: ssid.into(),
            passphrase,
        };
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        if self.ssid.is_empty() || self.ssid.len() > 32 {
            return Err(CoreError::validation("SSID must be 1-32 bytes"));
        }
        if !is_valid_wpa_passphrase(self.passphrase.expose_secret()) {
            return Err(CoreError::validation(
                "WPA passphrase must be 8-63 printable ASCII characters",
            ));
        }
        Ok(())
    }
}

/// WPA-PSK passphrase: 8-63 printable ASCII characters.
pub fn is_valid_wpa_passphrase(passphrase: &str) -> bool {
    (8..=63).contains(&passphrase.len()) && passphrase.bytes().all(|b| (0x20..=0x7e).contains(&b))
}

fn expose<S: Serializer>(secret: &SecretString, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(secret.expose_secret())
}

fn conceal<'de, D: Deserializer<'de>>(deserializer: D) -> Result<SecretString, D::Error> {
    String::deserialize(deserializer).map(SecretString::from)
}

/// A running WiFi repeater: client on `upstream`, access point on `access_point`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepeaterState {
    pub upstream: String,
    pub access_point: String,
}

/// Everything the controller persists between invocations.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NetworkState {
    #[serde(default)]
    pub mode: NetworkMode,
    #[serde(default)]
    pub roles: RoleMap,
    /// Overrides the configured hotspot credentials when set by `wifi-ap`.
    #[serde(default)]
    pub hotspot: Option<HotspotSettings>,
    #[serde(default)]
    pub repeater: Option<RepeaterState>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

/// A requested state change.
#[derive(Debug, Clone)]
pub enum Transition {
    SetControl(ControlMode),
    AssignWan {
        interface: String,
        priority: WanPriority,
    },
    ClearWan {
        interface: String,
    },
    AssignLan {
        interface: String,
    },
    ClearLan {
        interface: String,
    },
    /// Validation only: a WiFi client association is about to be made.
    ConnectClient {
        interface: String,
    },
    SetHotspot(HotspotSettings),
    StartRepeater(RepeaterState),
    StopRepeater,
    EnterLocalOnly,
    Reset,
}

impl Transition {
    fn action(&self) -> &'static str {
        match self {
            Self::SetControl(_) => "change control mode",
            Self::AssignWan { .. } => "assign a WAN role",
            Self::ClearWan { .. } => "clear a WAN role",
            Self::AssignLan { .. } => "assign a LAN role",
            Self::ClearLan { .. } => "clear a LAN role",
            Self::ConnectClient { .. } => "connect to a WiFi network",
            Self::SetHotspot(_) => "change hotspot settings",
            Self::StartRepeater(_) => "start the WiFi repeater",
            Self::StopRepeater => "stop the WiFi repeater",
            Self::EnterLocalOnly => "enter local-only mode",
            Self::Reset => "reset",
        }
    }

    /// Transitions that change where upstream traffic comes from.
    fn touches_uplink(&self) -> bool {
        matches!(
            self,
            Self::AssignWan { .. }
                | Self::ClearWan { .. }
                | Self::AssignLan { .. }
                | Self::ClearLan { .. }
                | Self::ConnectClient { .. }
                | Self::StartRepeater(_)
        )
    }
}

impl NetworkState {
    /// Validate and apply a transition. On error the state is unchanged.
    pub fn transition(
        &mut self,
        transition: Transition,
        inventory: &[Interface],
    ) -> Result<(), CoreError> {
        if self.mode.is_local_only() && transition.touches_uplink() {
            return Err(CoreError::IllegalTransition {
                action: transition.action().into(),
                mode: SharingMode::LocalOnly.to_string(),
            });
        }

        match transition {
            Transition::SetControl(control) => self.mode.control = control,
            Transition::AssignWan {
                interface,
                priority,
            } => {
                let iface = find(inventory, &interface)?;
                if iface.is_overlay() {
                    return Err(CoreError::validation(format!(
                        "{interface} is an overlay interface and cannot carry WAN traffic"
                    )));
                }
                self.roles.assign_wan(&interface, priority);
            }
            Transition::ClearWan { interface } => {
                if !self.roles.clear_wan(&interface) {
                    return Err(CoreError::validation(format!(
                        "{interface} does not hold a WAN role"
                    )));
                }
                if self
                    .repeater
                    .as_ref()
                    .is_some_and(|r| r.upstream == interface)
                {
                    self.repeater = None;
                }
            }
            Transition::AssignLan { interface } => {
                let iface = find(inventory, &interface)?;
                if iface.is_overlay() {
                    return Err(CoreError::validation(format!(
                        "{interface} is an overlay interface and cannot serve LAN clients"
                    )));
                }
                if self.roles.is_wan(&interface) {
                    return Err(CoreError::validation(format!(
                        "{interface} holds a WAN role; clear it first with clear-wan"
                    )));
                }
                self.roles.assign_lan(&interface);
            }
            Transition::ClearLan { interface } => {
                if !self.roles.clear_lan(&interface) {
                    return Err(CoreError::validation(format!(
                        "{interface} has no explicit LAN role"
                    )));
                }
            }
            Transition::ConnectClient { interface } => {
                let iface = find(inventory, &interface)?;
                if !iface.is_wifi() {
                    return Err(CoreError::validation(format!(
                        "{interface} is not a WiFi interface"
                    )));
                }
            }
            Transition::SetHotspot(settings) => {
                settings.validate()?;
                self.hotspot = Some(settings);
            }
            Transition::StartRepeater(repeater) => {
                if repeater.upstream == repeater.access_point {
                    return Err(CoreError::validation(
                        "repeater needs two distinct WiFi interfaces",
                    ));
                }
                let upstream = find(inventory, &repeater.upstream)?;
                let ap = find(inventory, &repeater.access_point)?;
                if !upstream.is_wifi() || !ap.is_wifi() {
                    return Err(CoreError::validation(
                        "repeater interfaces must both be WiFi",
                    ));
                }
                if !ap.supports_ap() {
                    return Err(CoreError::validation(format!(
                        "{} does not support access point mode",
                        ap.name
                    )));
                }
                self.roles
                    .assign_wan(&repeater.upstream, WanPriority::Primary);
                self.roles.assign_lan(&repeater.access_point);
                self.repeater = Some(repeater);
            }
            Transition::StopRepeater => {
                let Some(repeater) = self.repeater.take() else {
                    return Err(CoreError::validation("the WiFi repeater is not running"));
                };
                self.roles.clear_wan(&repeater.upstream);
            }
            Transition::EnterLocalOnly => self.mode.sharing = SharingMode::LocalOnly,
            Transition::Reset => {
                self.mode.sharing = SharingMode::Normal;
                if let Some(repeater) = self.repeater.take() {
                    self.roles.clear_wan(&repeater.upstream);
                }
            }
        }

        self.updated_at = Some(Utc::now());
        Ok(())
    }
}

fn find<'a>(inventory: &'a [Interface], name: &str) -> Result<&'a Interface, CoreError> {
    inventory
        .iter()
        .find(|iface| iface.name == name)
        .ok_or_else(|| CoreError::InterfaceNotFound { name: name.into() })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::model::interface::{InterfaceKind, LinkState, WifiCapabilities};
    use crate::model::role::Role;

    fn inventory() -> Vec<Interface> {
        let mk = |name: &str, kind, ap| Interface {
            name: name.into(),
            kind,
            mac: None,
            state: LinkState::Up,
            driver: None,
            capabilities: WifiCapabilities {
                ap,
                ..WifiCapabilities::default()
            },
        };
        vec![
            mk("eth0", InterfaceKind::Ethernet, false),
            mk("wlan0", InterfaceKind::Wifi, true),
            mk("wlan1", InterfaceKind::Wifi, false),
            mk("tailscale0", InterfaceKind::Tailscale, false),
        ]
    }

    fn assign(state: &mut NetworkState, name: &str, priority: WanPriority) -> Result<(), CoreError> {
        state.transition(
            Transition::AssignWan {
                interface: name.into(),
                priority,
            },
            &inventory(),
        )
    }

    #[test]
    fn assign_wan_requires_known_interface() {
        let mut state = NetworkState::default();
        let err = assign(&mut state, "eth9", WanPriority::Primary).unwrap_err();
        assert!(matches!(err, CoreError::InterfaceNotFound { .. }));
        assert!(state.updated_at.is_none());
    }

    #[test]
    fn overlay_cannot_be_wan() {
        let mut state = NetworkState::default();
        let err = assign(&mut state, "tailscale0", WanPriority::Primary).unwrap_err();
        assert!(matches!(err, CoreError::Validation { .. }));
    }

    #[test]
    fn local_only_blocks_role_changes() {
        let mut state = NetworkState::default();
        state
            .transition(Transition::EnterLocalOnly, &inventory())
            .unwrap();

        let err = assign(&mut state, "eth0", WanPriority::Primary).unwrap_err();
        assert!(matches!(err, CoreError::IllegalTransition { .. }));
        assert!(state.roles.primary.is_none());

        let err = state
            .transition(
                Transition::ConnectClient {
                    interface: "wlan1".into(),
                },
                &inventory(),
            )
            .unwrap_err();
        assert!(matches!(err, CoreError::IllegalTransition { .. }));

        // Leaving local-only re-enables role changes.
        state.transition(Transition::Reset, &inventory()).unwrap();
        assign(&mut state, "eth0", WanPriority::Primary).unwrap();
        assert_eq!(state.roles.primary.as_deref(), Some("eth0"));
    }

    #[test]
    fn control_mode_changes_are_allowed_in_local_only() {
        let mut state = NetworkState::default();
        state
            .transition(Transition::EnterLocalOnly, &inventory())
            .unwrap();
        state
            .transition(Transition::SetControl(ControlMode::Auto), &inventory())
            .unwrap();
        assert!(state.mode.is_auto());
        assert!(state.mode.is_local_only());
    }

    #[test]
    fn set_lan_rejects_wan_interface() {
        let mut state = NetworkState::default();
        assign(&mut state, "eth0", WanPriority::Primary).unwrap();
        let err = state
            .transition(
                Transition::AssignLan {
                    interface: "eth0".into(),
                },
                &inventory(),
            )
            .unwrap_err();
        assert!(matches!(err, CoreError::Validation { .. }));
    }

    #[test]
    fn repeater_assigns_roles_and_stop_clears_upstream() {
        let mut state = NetworkState::default();
        state
            .transition(
                Transition::StartRepeater(RepeaterState {
                    upstream: "wlan1".into(),
                    access_point: "wlan0".into(),
                }),
                &inventory(),
            )
            .unwrap();
        assert_eq!(state.roles.role_of("wlan1"), Some(Role::WanPrimary));
        assert_eq!(state.roles.role_of("wlan0"), Some(Role::Lan));

        state
            .transition(Transition::StopRepeater, &inventory())
            .unwrap();
        assert!(state.repeater.is_none());
        assert_eq!(state.roles.role_of("wlan1"), None);
    }

    #[test]
    fn reset_leaves_local_only_and_stops_repeater() {
        let mut state = NetworkState::default();
        state
            .transition(
                Transition::StartRepeater(RepeaterState {
                    upstream: "wlan1".into(),
                    access_point: "wlan0".into(),
                }),
                &inventory(),
            )
            .unwrap();
        state
            .transition(Transition::EnterLocalOnly, &inventory())
            .unwrap();

        state.transition(Transition::Reset, &inventory()).unwrap();
        assert!(!state.mode.is_local_only());
        assert!(state.repeater.is_none());
        assert!(!state.roles.is_wan("wlan1"));
    }

    #[test]
    fn repeater_needs_ap_capable_radio() {
        let mut state = NetworkState::default();
        let err = state
            .transition(
                Transition::StartRepeater(RepeaterState {
                    upstream: "wlan0".into(),
                    access_point: "wlan1".into(),
                }),
                &inventory(),
            )
            .unwrap_err();
        assert!(matches!(err, CoreError::Validation { .. }));
    }

    #[test]
    fn hotspot_passphrase_is_validated() {
        let err = HotspotSettings::new("Field", SecretString::from("short".to_string())).unwrap_err();
        assert!(matches!(err, CoreError::Validation { .. }));
        assert!(HotspotSettings::new("Field", SecretString::from("longenough".to_string())).is_ok());
    }

    #[test]
    fn wpa_passphrase_rules() {
        assert!(is_valid_wpa_passphrase("12345678"));
        assert!(is_valid_wpa_passphrase(&"x".repeat(63)));
        assert!(!is_valid_wpa_passphrase(&"x".repeat(64)));
        // Seven characters, fourteen bytes.
        assert!(!is_valid_wpa_passphrase("ééééééé"));
        assert!(!is_valid_wpa_passphrase("pässwörd-long"));
        assert!(!is_valid_wpa_passphrase("tab\there1"));
    }

    #[test]
    fn state_json_round_trip_keeps_passphrase() {
        let mut state = NetworkState::default();
        state.hotspot = Some(
            HotspotSettings::new("Field", SecretString::from("longenough".to_string())).unwrap(),
        );
        let json = serde_json::to_string(&state).unwrap();
        let back: NetworkState = serde_json::from_str(&json).unwrap();
        let hotspot = back.hotspot.unwrap();
        assert_eq!(hotspot.ssid, "Field");
        assert_eq!(hotspot.passphrase.expose_secret(), "longenough");
    }
}
