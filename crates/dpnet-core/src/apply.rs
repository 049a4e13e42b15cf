// ── Route/firewall applier ──
//
// Drives the host towards a `Topology`: NetworkManager connections,
// WAN route metrics, dnsmasq, iptables and IP forwarding. No retries;
// a failure after LAN connections were created removes the ones this
// run added before the error is returned.

use secrecy::ExposeSecret;
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::config::ControllerConfig;
use crate::dnsmasq;
use crate::error::CoreError;
use crate::firewall::{self, ReconcileReport, Ruleset};
use crate::model::{HotspotSettings, InterfaceKind, SharingMode};
use crate::nmcli;
use crate::probe::has_default_route;
use crate::store::{RoutingSnapshot, StateStore};
use crate::system::CommandRunner;
use crate::topology::{
    BRIDGE_CONNECTION, HOTSPOT_CONNECTION_PREFIX, LanSegment, SegmentKind, Topology, WanLink,
};

/// Outcome of one apply.
#[derive(Debug, Clone, Serialize)]
pub struct ApplyReport {
    pub topology: Topology,
    pub firewall: ReconcileReport,
    pub dnsmasq_restarted: bool,
    pub snapshot: RoutingSnapshot,
}

/// Whether a connection name belongs to the LAN side dpnet manages.
/// WiFi client profiles (`DangerPrep-Client-*`) are not included.
pub fn is_managed_lan_connection(name: &str) -> bool {
    name.starts_with(BRIDGE_CONNECTION) || name.starts_with(HOTSPOT_CONNECTION_PREFIX)
}

pub struct Applier<'a> {
    runner: &'a dyn CommandRunner,
    config: &'a ControllerConfig,
    store: &'a StateStore,
}

impl<'a> Applier<'a> {
    pub fn new(runner: &'a dyn CommandRunner, config: &'a ControllerConfig, store: &'a StateStore) -> Self {
        Self {
            runner,
            config,
            store,
        }
    }

    #[instrument(skip_all, fields(sharing = %topology.sharing, uplink = ?topology.uplink))]
    pub async fn apply(&self, topology: &Topology, hotspot: &HotspotSettings) -> Result<ApplyReport, CoreError> {
        let existing = nmcli::connection_names(self.runner).await?;
        self.remove_stale(topology, &existing).await?;

        match topology.sharing {
            SharingMode::Normal => self.bring_up_wan(topology).await?,
            SharingMode::LocalOnly => self.isolate_wan(&topology.isolated).await?,
        }

        let mut created = Vec::new();
        let result = self.finish(topology, hotspot, &existing, &mut created).await;
        if result.is_err() && !created.is_empty() {
            warn!(count = created.len(), "apply failed, removing connections created by this run");
            for name in &created {
                if let Err(e) = nmcli::delete_connection(self.runner, name).await {
                    warn!(connection = %name, error = %e, "cleanup failed");
                }
            }
        }
        result
    }

    async fn finish(
        &self,
        topology: &Topology,
        hotspot: &HotspotSettings,
        existing: &[String],
        created: &mut Vec<String>,
    ) -> Result<ApplyReport, CoreError> {
        for segment in &topology.lan {
            self.bring_up_segment(segment, hotspot, existing, created).await?;
        }

        let dnsmasq_restarted =
            dnsmasq::sync(self.runner, &self.config.paths.dnsmasq_conf, topology, &self.config.lan).await?;

        let ruleset = Ruleset::for_topology(topology);
        let firewall = firewall::reconcile(self.runner, &ruleset).await?;

        let forward = if topology.sharing == SharingMode::Normal { "1" } else { "0" };
        self.runner
            .run_checked("sysctl", &["-w", &format!("net.ipv4.ip_forward={forward}")])
            .await?;

        let snapshot = RoutingSnapshot::from_topology(topology, firewall.rules);
        self.store.save_snapshot(&snapshot)?;
        self.store.write_wan_conf(topology.uplink.as_deref())?;

        info!(
            uplink = topology.uplink.as_deref().unwrap_or("none"),
            segments = topology.lan.len(),
            firewall_changes = firewall.changes,
            "topology applied"
        );
        Ok(ApplyReport {
            topology: topology.clone(),
            firewall,
            dnsmasq_restarted,
            snapshot,
        })
    }

    /// Delete managed LAN connections the topology no longer wants.
    async fn remove_stale(&self, topology: &Topology, existing: &[String]) -> Result<(), CoreError> {
        let wanted = wanted_connections(topology);
        for name in existing.iter().filter(|n| is_managed_lan_connection(n)) {
            if !wanted.contains(name) {
                info!(connection = %name, "removing stale connection");
                nmcli::delete_connection(self.runner, name).await?;
            }
        }
        Ok(())
    }

    /// Remove every managed LAN connection. Returns how many were deleted.
    pub async fn teardown_lan(&self) -> Result<usize, CoreError> {
        let mut removed = 0;
        for name in nmcli::connection_names(self.runner).await? {
            if is_managed_lan_connection(&name) {
                nmcli::delete_connection(self.runner, &name).await?;
                removed += 1;
            }
        }
        info!(removed, "managed LAN connections removed");
        Ok(removed)
    }

    async fn bring_up_wan(&self, topology: &Topology) -> Result<(), CoreError> {
        for link in &topology.wan {
            let is_uplink = topology.uplink.as_deref() == Some(link.interface.as_str());
            match self.connect_wan(link).await {
                Ok(()) => {}
                Err(e) if is_uplink => return Err(e),
                Err(e) => {
                    warn!(interface = %link.interface, error = %e, "standby WAN not brought up");
                    continue;
                }
            }
            if let Some(metric) = link.role.route_metric() {
                self.runner
                    .run_checked(
                        "nmcli",
                        &["device", "modify", &link.interface, "ipv4.route-metric", &metric.to_string()],
                    )
                    .await?;
            }
        }

        let Some(ref uplink) = topology.uplink else {
            return Ok(());
        };
        debug!(wait = ?self.config.apply.wan_wait, "waiting for WAN");
        tokio::time::sleep(self.config.apply.wan_wait).await;
        if !has_default_route(self.runner, uplink).await? {
            return Err(CoreError::WanUnreachable {
                interface: uplink.clone(),
                reason: format!(
                    "no default route after {}s",
                    self.config.apply.wan_wait.as_secs()
                ),
            });
        }
        Ok(())
    }

    /// Take WAN links offline and make sure none keeps a default route.
    async fn isolate_wan(&self, interfaces: &[String]) -> Result<(), CoreError> {
        for interface in interfaces {
            let output = self
                .runner
                .run("nmcli", &["device", "disconnect", interface])
                .await?;
            if !output.success() {
                debug!(interface = %interface, stderr = %output.stderr.trim(), "device already disconnected");
            }
            if has_default_route(self.runner, interface).await? {
                warn!(interface = %interface, "default route survived disconnect, deleting it");
                self.runner
                    .run_checked("ip", &["-4", "route", "del", "default", "dev", interface])
                    .await?;
            }
            info!(interface = %interface, "WAN isolated");
        }
        Ok(())
    }

    async fn connect_wan(&self, link: &WanLink) -> Result<(), CoreError> {
        match link.kind {
            InterfaceKind::Wifi => {
                let mut state = nmcli::device_state(self.runner, &link.interface).await?;
                if !nmcli::is_connected_state(&state) {
                    // Rejoins the client profile after local-only dropped it.
                    self.runner
                        .run("nmcli", &["device", "connect", &link.interface])
                        .await?;
                    state = nmcli::device_state(self.runner, &link.interface).await?;
                }
                if nmcli::is_connected_state(&state) {
                    Ok(())
                } else {
                    Err(CoreError::WanUnreachable {
                        interface: link.interface.clone(),
                        reason: "WiFi client is not associated; run wifi-connect first".into(),
                    })
                }
            }
            _ => self
                .runner
                .run_checked("nmcli", &["device", "connect", &link.interface])
                .await
                .map(|_| ())
                .map_err(|e| CoreError::WanUnreachable {
                    interface: link.interface.clone(),
                    reason: e.to_string(),
                }),
        }
    }

    async fn bring_up_segment(
        &self,
        segment: &LanSegment,
        hotspot: &HotspotSettings,
        existing: &[String],
        created: &mut Vec<String>,
    ) -> Result<(), CoreError> {
        let address = format!("{}/24", segment.gateway());
        let mut ip = vec![
            "ipv4.method".to_owned(),
            "manual".to_owned(),
            "ipv4.addresses".to_owned(),
            address,
            "ipv6.method".to_owned(),
            "disabled".to_owned(),
            "connection.autoconnect".to_owned(),
            "yes".to_owned(),
        ];

        match segment.kind {
            SegmentKind::Bridge => {
                ip.extend(["bridge.stp".to_owned(), "no".to_owned()]);
                let master = segment.connection_name();
                self.ensure(&master, "bridge", &segment.name, &ip, existing, created)
                    .await?;
                self.up(&master).await?;

                for port in &segment.members {
                    let name = format!("{BRIDGE_CONNECTION}-{port}");
                    let props = [
                        "connection.master".to_owned(),
                        segment.name.clone(),
                        "connection.slave-type".to_owned(),
                        "bridge".to_owned(),
                        "connection.autoconnect".to_owned(),
                        "yes".to_owned(),
                    ];
                    self.ensure(&name, "ethernet", port, &props, existing, created)
                        .await?;
                    self.up(&name).await?;
                }
            }
            SegmentKind::Hotspot => {
                let radio = &self.config.hotspot;
                let mut props = vec![
                    "802-11-wireless.ssid".to_owned(),
                    hotspot.ssid.clone(),
                    "802-11-wireless.mode".to_owned(),
                    "ap".to_owned(),
                    "802-11-wireless.band".to_owned(),
                    radio.band.clone(),
                ];
                if let Some(channel) = radio.channel {
                    props.extend(["802-11-wireless.channel".to_owned(), channel.to_string()]);
                }
                props.extend([
                    "wifi-sec.key-mgmt".to_owned(),
                    "wpa-psk".to_owned(),
                    "wifi-sec.psk".to_owned(),
                    hotspot.passphrase.expose_secret().to_owned(),
                ]);
                props.extend(ip);

                let name = segment.connection_name();
                self.ensure(&name, "wifi", &segment.name, &props, existing, created)
                    .await?;
                self.up(&name).await?;
            }
        }
        Ok(())
    }

    /// Create the connection, or update it in place if it already exists.
    async fn ensure(
        &self,
        name: &str,
        kind: &str,
        ifname: &str,
        props: &[String],
        existing: &[String],
        created: &mut Vec<String>,
    ) -> Result<(), CoreError> {
        let mut args: Vec<&str> = if existing.iter().any(|n| n == name) {
            vec!["connection", "modify", name, "connection.interface-name", ifname]
        } else {
            vec!["connection", "add", "type", kind, "ifname", ifname, "con-name", name]
        };
        args.extend(props.iter().map(String::as_str));

        self.runner.run_checked("nmcli", &args).await?;
        if args.get(1) == Some(&"add") {
            debug!(connection = %name, "connection created");
            created.push(name.to_owned());
        }
        Ok(())
    }

    async fn up(&self, name: &str) -> Result<(), CoreError> {
        self.runner
            .run_checked("nmcli", &["connection", "up", name])
            .await
            .map(|_| ())
    }
}

fn wanted_connections(topology: &Topology) -> Vec<String> {
    let mut names = Vec::new();
    for segment in &topology.lan {
        names.push(segment.connection_name());
        if segment.kind == SegmentKind::Bridge {
            names.extend(
                segment
                    .members
                    .iter()
                    .map(|port| format!("{BRIDGE_CONNECTION}-{port}")),
            );
        }
    }
    names
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::model::Role;
    use crate::system::CommandOutput;
    use crate::system::mock::MockRunner;
    use secrecy::SecretString;
    use std::time::Duration;
    use tempfile::TempDir;

    fn config(root: &std::path::Path) -> ControllerConfig {
        let mut config = ControllerConfig::rooted(root);
        config.apply.wan_wait = Duration::ZERO;
        config
    }

    fn hotspot() -> HotspotSettings {
        HotspotSettings::new("DangerPrep", SecretString::from("fieldkit-pass".to_string())).unwrap()
    }

    fn topology(sharing: SharingMode) -> Topology {
        let wan = if sharing == SharingMode::Normal {
            vec![
                WanLink {
                    interface: "eth0".into(),
                    kind: InterfaceKind::Ethernet,
                    role: Role::WanPrimary,
                },
                WanLink {
                    interface: "wlan1".into(),
                    kind: InterfaceKind::Wifi,
                    role: Role::WanSecondary,
                },
            ]
        } else {
            Vec::new()
        };
        let isolated = if sharing == SharingMode::LocalOnly {
            vec!["eth0".to_string(), "wlan1".to_string()]
        } else {
            Vec::new()
        };
        Topology {
            sharing,
            uplink: wan.first().map(|w| w.interface.clone()),
            wan,
            isolated,
            lan: vec![
                LanSegment {
                    name: "br-dp".into(),
                    kind: SegmentKind::Bridge,
                    members: vec!["eth1".into()],
                    subnet: "192.168.120.0/24".parse().unwrap(),
                },
                LanSegment {
                    name: "wlan0".into(),
                    kind: SegmentKind::Hotspot,
                    members: Vec::new(),
                    subnet: "192.168.121.0/24".parse().unwrap(),
                },
            ],
        }
    }

    fn healthy_runner() -> MockRunner {
        let runner = MockRunner::new();
        runner
            .on("nmcli -t -f NAME connection show", CommandOutput::ok("Wired connection 1\nDangerPrep-Hotspot-wlan9\nDangerPrep-Client-Home\n"))
            .on("nmcli -t -f GENERAL.STATE device show wlan1", CommandOutput::ok("GENERAL.STATE:100 (connected)\n"))
            .on("ip -4 route show default dev eth0", CommandOutput::ok("default via 10.0.0.1 metric 100\n"))
            .on("iptables-save", CommandOutput::ok("*filter\n:FORWARD ACCEPT [0:0]\nCOMMIT\n"));
        runner
    }

    #[tokio::test]
    async fn normal_apply_sequence() {
        let tmp = TempDir::new().unwrap();
        let config = config(tmp.path());
        let store = StateStore::new(config.paths.clone());
        let runner = healthy_runner();

        let report = Applier::new(&runner, &config, &store)
            .apply(&topology(SharingMode::Normal), &hotspot())
            .await
            .unwrap();

        // Stale hotspot removed; client profile and foreign profiles untouched.
        assert_eq!(runner.calls_matching("nmcli connection delete").len(), 1);
        assert_eq!(runner.calls_matching("nmcli connection delete DangerPrep-Hotspot-wlan9").len(), 1);

        assert_eq!(runner.calls_matching("nmcli device connect eth0").len(), 1);
        assert_eq!(runner.calls_matching("nmcli device modify eth0 ipv4.route-metric 100").len(), 1);
        assert_eq!(runner.calls_matching("nmcli device modify wlan1 ipv4.route-metric 200").len(), 1);

        assert_eq!(
            runner.calls_matching("nmcli connection add type bridge ifname br-dp con-name DangerPrep-Bridge ipv4.method manual ipv4.addresses 192.168.120.1/24").len(),
            1
        );
        assert_eq!(
            runner.calls_matching("nmcli connection add type ethernet ifname eth1 con-name DangerPrep-Bridge-eth1 connection.master br-dp").len(),
            1
        );
        assert_eq!(
            runner.calls_matching("nmcli connection add type wifi ifname wlan0 con-name DangerPrep-Hotspot-wlan0 802-11-wireless.ssid DangerPrep 802-11-wireless.mode ap").len(),
            1
        );
        assert_eq!(runner.calls_matching("systemctl restart dnsmasq").len(), 1);
        assert_eq!(runner.calls_matching("sysctl -w net.ipv4.ip_forward=1").len(), 1);

        assert!(report.dnsmasq_restarted);
        let snapshot = store.load_snapshot().unwrap().unwrap();
        assert_eq!(snapshot.uplink.as_deref(), Some("eth0"));
        assert_eq!(
            std::fs::read_to_string(config.paths.wan_conf()).unwrap(),
            "WAN_INTERFACE=eth0\n"
        );
    }

    #[tokio::test]
    async fn missing_default_route_is_unreachable() {
        let tmp = TempDir::new().unwrap();
        let config = config(tmp.path());
        let store = StateStore::new(config.paths.clone());
        let runner = healthy_runner();
        runner.on("ip -4 route show default dev eth0", CommandOutput::ok(""));

        let err = Applier::new(&runner, &config, &store)
            .apply(&topology(SharingMode::Normal), &hotspot())
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::WanUnreachable { ref interface, .. } if interface == "eth0"));
        assert!(runner.calls_matching("nmcli connection add").is_empty());
    }

    #[tokio::test]
    async fn unassociated_wifi_uplink_fails() {
        let tmp = TempDir::new().unwrap();
        let config = config(tmp.path());
        let store = StateStore::new(config.paths.clone());
        let runner = healthy_runner();
        runner.on(
            "nmcli -t -f GENERAL.STATE device show wlan1",
            CommandOutput::ok("GENERAL.STATE:30 (disconnected)\n"),
        );
        let mut topo = topology(SharingMode::Normal);
        topo.uplink = Some("wlan1".into());

        let err = Applier::new(&runner, &config, &store)
            .apply(&topo, &hotspot())
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::WanUnreachable { ref interface, .. } if interface == "wlan1"));
    }

    #[tokio::test]
    async fn local_only_isolates_wan_and_disables_forwarding() {
        let tmp = TempDir::new().unwrap();
        let config = config(tmp.path());
        let store = StateStore::new(config.paths.clone());
        let runner = healthy_runner();
        runner.on("nmcli device disconnect wlan1", CommandOutput::failed(6, "Error: not active"));

        Applier::new(&runner, &config, &store)
            .apply(&topology(SharingMode::LocalOnly), &hotspot())
            .await
            .unwrap();

        assert!(runner.calls_matching("nmcli device connect").is_empty());
        assert_eq!(runner.calls_matching("nmcli device disconnect eth0").len(), 1);
        assert_eq!(runner.calls_matching("nmcli device disconnect wlan1").len(), 1);
        // eth0 still reports a default route after disconnect; wlan1 does not.
        assert_eq!(runner.calls_matching("ip -4 route del default dev eth0").len(), 1);
        assert!(runner.calls_matching("ip -4 route del default dev wlan1").is_empty());
        assert_eq!(runner.calls_matching("sysctl -w net.ipv4.ip_forward=0").len(), 1);
        assert_eq!(
            std::fs::read_to_string(config.paths.wan_conf()).unwrap(),
            "WAN_INTERFACE=\n"
        );
    }

    #[tokio::test]
    async fn later_failure_removes_created_connections() {
        let tmp = TempDir::new().unwrap();
        let config = config(tmp.path());
        let store = StateStore::new(config.paths.clone());
        let runner = healthy_runner();
        runner.on("systemctl restart dnsmasq", CommandOutput::failed(1, "Job for dnsmasq.service failed"));

        let err = Applier::new(&runner, &config, &store)
            .apply(&topology(SharingMode::Normal), &hotspot())
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::CommandFailed { ref program, .. } if program == "systemctl"));
        for name in ["DangerPrep-Bridge", "DangerPrep-Bridge-eth1", "DangerPrep-Hotspot-wlan0"] {
            assert_eq!(
                runner
                    .calls()
                    .iter()
                    .filter(|c| *c == &format!("nmcli connection delete {name}"))
                    .count(),
                1,
                "{name} should be removed"
            );
        }
    }

    #[tokio::test]
    async fn existing_connections_are_modified() {
        let tmp = TempDir::new().unwrap();
        let config = config(tmp.path());
        let store = StateStore::new(config.paths.clone());
        let runner = healthy_runner();
        runner.on(
            "nmcli -t -f NAME connection show",
            CommandOutput::ok("DangerPrep-Bridge\nDangerPrep-Bridge-eth1\nDangerPrep-Hotspot-wlan0\n"),
        );

        Applier::new(&runner, &config, &store)
            .apply(&topology(SharingMode::Normal), &hotspot())
            .await
            .unwrap();
        assert!(runner.calls_matching("nmcli connection add").is_empty());
        assert!(runner.calls_matching("nmcli connection delete").is_empty());
        assert_eq!(
            runner.calls_matching("nmcli connection modify DangerPrep-Hotspot-wlan0 connection.interface-name wlan0").len(),
            1
        );
    }

    #[tokio::test]
    async fn teardown_keeps_client_profiles() {
        let tmp = TempDir::new().unwrap();
        let config = config(tmp.path());
        let store = StateStore::new(config.paths.clone());
        let runner = healthy_runner();

        let removed = Applier::new(&runner, &config, &store).teardown_lan().await.unwrap();
        assert_eq!(removed, 1);
        assert!(runner.calls_matching("nmcli connection delete DangerPrep-Client").is_empty());
    }
}
