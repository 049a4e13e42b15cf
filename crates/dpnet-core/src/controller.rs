// ── Controller facade ──
//
// Single entry point for the CLI. Owns the configuration, the command
// runner and the cached `NetworkState`. Mutating operations take the
// on-disk lock, reload state, validate a `Transition`, persist, and
// apply when the operation (or AUTO mode) calls for it.

use std::sync::Arc;

use secrecy::SecretString;
use serde::Serialize;
use strum::{Display, EnumString};
use tokio::sync::Mutex;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::apply::{ApplyReport, Applier};
use crate::config::ControllerConfig;
use crate::diagnostics::{self, DiagnosticKind, Section};
use crate::error::CoreError;
use crate::inventory;
use crate::model::{
    ConnectivityStatus, ControlMode, HotspotSettings, Interface, LinkState, NetworkMode, NetworkState,
    RepeaterState, Role, RoleMap, Transition, WanPriority,
};
use crate::probe::Prober;
use crate::store::{RoutingSnapshot, StateLock, StateStore};
use crate::system::{CommandRunner, SystemRunner};
use crate::topology;
use crate::wifi::{self, WifiDevice, WifiNetwork};

// ── Report types ────────────────────────────────────────────────────

/// One row of `list-interfaces`.
#[derive(Debug, Clone, Serialize)]
pub struct InterfaceEntry {
    #[serde(flatten)]
    pub interface: Interface,
    /// Explicitly assigned role.
    pub role: Option<Role>,
    /// Role used for topology; `None` for overlay interfaces.
    pub effective_role: Option<Role>,
}

#[derive(Debug, Clone, Serialize)]
pub struct InterfaceStatus {
    #[serde(flatten)]
    pub entry: InterfaceEntry,
    pub connectivity: ConnectivityStatus,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub mode: NetworkMode,
    pub roles: RoleMap,
    pub hotspot_ssid: String,
    pub repeater: Option<RepeaterState>,
    pub interfaces: Vec<InterfaceStatus>,
    pub last_apply: Option<RoutingSnapshot>,
}

#[derive(Debug, Clone, Serialize)]
pub struct WanDetail {
    pub interface: String,
    pub role: Role,
    pub route_metric: Option<u32>,
    pub present: bool,
    pub connectivity: Option<ConnectivityStatus>,
}

/// Result of a state change: the new state and, if routing was
/// reapplied, what the apply did.
#[derive(Debug, Clone, Serialize)]
pub struct ChangeOutcome {
    pub state: NetworkState,
    pub applied: Option<ApplyReport>,
}

/// Fields readable with `query`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "kebab-case")]
pub enum QueryField {
    Mode,
    Control,
    Sharing,
    WanPrimary,
    WanSecondary,
    WanAvailable,
    Lan,
    Interfaces,
    HotspotSsid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ApplyWhen {
    Always,
    IfAuto,
    Never,
}

// ── Controller ──────────────────────────────────────────────────────

/// Cheaply cloneable handle; all clones share state.
#[derive(Clone)]
pub struct Controller {
    inner: Arc<ControllerInner>,
}

struct ControllerInner {
    config: ControllerConfig,
    runner: Arc<dyn CommandRunner>,
    store: StateStore,
    state: Mutex<NetworkState>,
}

impl Controller {
    /// Controller that runs real system tools.
    pub fn new(config: ControllerConfig) -> Self {
        let runner = Arc::new(SystemRunner::new(config.apply.command_timeout));
        Self::with_runner(config, runner)
    }

    pub fn with_runner(config: ControllerConfig, runner: Arc<dyn CommandRunner>) -> Self {
        let store = StateStore::new(config.paths.clone());
        Self {
            inner: Arc::new(ControllerInner {
                config,
                runner,
                store,
                state: Mutex::new(NetworkState::default()),
            }),
        }
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.inner.config
    }

    fn runner(&self) -> &dyn CommandRunner {
        self.inner.runner.as_ref()
    }

    async fn lock(&self) -> Result<StateLock, CoreError> {
        self.inner
            .store
            .lock(self.inner.config.apply.lock_timeout)
            .await
    }

    /// Current persisted state (read-only, no lock).
    pub async fn state(&self) -> Result<NetworkState, CoreError> {
        let loaded = self.inner.store.load()?;
        *self.inner.state.lock().await = loaded.clone();
        Ok(loaded)
    }

    /// Interfaces from `interfaces.conf`.
    pub fn inventory(&self) -> Result<Vec<Interface>, CoreError> {
        inventory::load(&self.inner.config.paths.interfaces_conf())
    }

    fn hotspot_for(&self, state: &NetworkState) -> HotspotSettings {
        state.hotspot.clone().unwrap_or_else(|| {
            let defaults = &self.inner.config.hotspot;
            HotspotSettings {
                ssid: defaults.ssid.clone(),
                passphrase: defaults.passphrase.clone(),
            }
        })
    }

    // ── Enumerator ───────────────────────────────────────────────────

    pub async fn enumerate(&self) -> Result<Vec<Interface>, CoreError> {
        let _lock = self.lock().await?;
        let paths = &self.inner.config.paths;
        inventory::enumerate(
            &paths.sysfs_root,
            &self.inner.config.lan.bridge,
            &paths.interfaces_conf(),
            self.runner(),
        )
        .await
    }

    // ── Read-only views ──────────────────────────────────────────────

    pub async fn list_interfaces(&self) -> Result<Vec<InterfaceEntry>, CoreError> {
        let inventory = self.inventory()?;
        let state = self.state().await?;
        Ok(entries(&inventory, &state.roles))
    }

    pub async fn status(&self) -> Result<StatusReport, CoreError> {
        let state = self.state().await?;
        let inventory = match self.inventory() {
            Ok(inventory) => inventory,
            Err(CoreError::MissingInventory { path }) => {
                warn!(path = %path.display(), "no interface inventory; run `dpnet enumerate`");
                Vec::new()
            }
            Err(e) => return Err(e),
        };

        let prober = self.prober();
        let mut interfaces = Vec::new();
        for entry in entries(&inventory, &state.roles) {
            let connectivity = prober.probe(&entry.interface.name).await?;
            interfaces.push(InterfaceStatus { entry, connectivity });
        }

        Ok(StatusReport {
            mode: state.mode,
            roles: state.roles.clone(),
            hotspot_ssid: self.hotspot_for(&state).ssid,
            repeater: state.repeater.clone(),
            interfaces,
            last_apply: self.inner.store.load_snapshot()?,
        })
    }

    pub async fn wan_details(&self) -> Result<Vec<WanDetail>, CoreError> {
        let state = self.state().await?;
        let inventory = self.inventory()?;
        let prober = self.prober();

        let mut details = Vec::new();
        for (name, role) in state.roles.wan_order() {
            let present = inventory.iter().any(|i| i.name == name);
            let connectivity = if present {
                Some(prober.probe(name).await?)
            } else {
                None
            };
            details.push(WanDetail {
                interface: name.to_owned(),
                role,
                route_metric: role.route_metric(),
                present,
                connectivity,
            });
        }
        Ok(details)
    }

    /// Single value for scripts. Lists are space separated; unset is empty.
    pub async fn query(&self, field: QueryField) -> Result<String, CoreError> {
        let state = self.state().await?;
        let value = match field {
            QueryField::Mode => state.mode.label(),
            QueryField::Control => state.mode.control.to_string(),
            QueryField::Sharing => state.mode.sharing.to_string(),
            QueryField::WanPrimary => state.roles.primary.clone().unwrap_or_default(),
            QueryField::WanSecondary => state.roles.secondary.join(" "),
            QueryField::WanAvailable => state.roles.available.join(" "),
            QueryField::Lan => {
                let inventory = self.inventory()?;
                state
                    .roles
                    .lan_interfaces(&inventory)
                    .iter()
                    .map(|i| i.name.as_str())
                    .collect::<Vec<_>>()
                    .join(" ")
            }
            QueryField::Interfaces => self
                .inventory()?
                .iter()
                .map(|i| i.name.as_str())
                .collect::<Vec<_>>()
                .join(" "),
            QueryField::HotspotSsid => self.hotspot_for(&state).ssid,
        };
        Ok(value)
    }

    pub async fn diagnostics(&self, kind: DiagnosticKind) -> Result<Vec<Section>, CoreError> {
        let inventory = self.inventory().unwrap_or_default();
        Ok(diagnostics::run(kind, self.runner(), &self.inner.config, &inventory).await)
    }

    // ── State changes ────────────────────────────────────────────────

    /// Validate and persist `transition`, then apply as requested.
    async fn change(&self, transition: Transition, when: ApplyWhen) -> Result<ChangeOutcome, CoreError> {
        let _lock = self.lock().await?;
        self.change_locked(transition, when).await
    }

    /// `change` for callers already holding the state lock.
    async fn change_locked(&self, transition: Transition, when: ApplyWhen) -> Result<ChangeOutcome, CoreError> {
        let mut state = self.inner.state.lock().await;
        *state = self.inner.store.load()?;

        let inventory = self.inventory()?;
        let mut next = state.clone();
        next.transition(transition, &inventory)?;
        self.inner.store.save(&next)?;
        *state = next.clone();
        drop(state);

        let apply = match when {
            ApplyWhen::Always => true,
            ApplyWhen::IfAuto => next.mode.is_auto(),
            ApplyWhen::Never => false,
        };
        let applied = if apply {
            Some(self.apply_state(&next, &inventory, None).await?)
        } else {
            debug!("control mode is manual; change saved without applying");
            None
        };
        Ok(ChangeOutcome {
            state: next,
            applied,
        })
    }

    async fn apply_state(
        &self,
        state: &NetworkState,
        inventory: &[Interface],
        statuses: Option<Vec<ConnectivityStatus>>,
    ) -> Result<ApplyReport, CoreError> {
        let statuses = match statuses {
            Some(s) => s,
            None => self.probe_wan(state, inventory).await?,
        };
        let topology = topology::plan(state, inventory, &statuses, &self.inner.config.lan)?;
        Applier::new(self.runner(), &self.inner.config, &self.inner.store)
            .apply(&topology, &self.hotspot_for(state))
            .await
    }

    async fn probe_wan(
        &self,
        state: &NetworkState,
        inventory: &[Interface],
    ) -> Result<Vec<ConnectivityStatus>, CoreError> {
        if state.mode.is_local_only() {
            return Ok(Vec::new());
        }
        let names: Vec<&str> = state
            .roles
            .wan_order()
            .into_iter()
            .map(|(name, _)| name)
            .filter(|name| inventory.iter().any(|i| i.name == *name))
            .collect();
        self.prober().probe_all(names).await
    }

    fn prober(&self) -> Prober<'_> {
        Prober::new(
            self.runner(),
            &self.inner.config.paths.sysfs_root,
            &self.inner.config.probe,
        )
    }

    pub async fn set_control(&self, control: ControlMode) -> Result<ChangeOutcome, CoreError> {
        let when = match control {
            ControlMode::Auto => ApplyWhen::Always,
            ControlMode::Manual => ApplyWhen::Never,
        };
        let outcome = self.change(Transition::SetControl(control), when).await?;
        info!(%control, "control mode set");
        Ok(outcome)
    }

    /// Probe WAN links, pick the uplink and apply.
    pub async fn evaluate(&self) -> Result<ApplyReport, CoreError> {
        let _lock = self.lock().await?;
        let state = self.inner.store.load()?;
        *self.inner.state.lock().await = state.clone();
        let inventory = self.inventory()?;
        self.apply_state(&state, &inventory, None).await
    }

    pub async fn set_wan(&self, interface: &str, priority: WanPriority) -> Result<ChangeOutcome, CoreError> {
        self.change(
            Transition::AssignWan {
                interface: interface.to_owned(),
                priority,
            },
            ApplyWhen::IfAuto,
        )
        .await
    }

    pub async fn clear_wan(&self, interface: &str) -> Result<ChangeOutcome, CoreError> {
        self.change(
            Transition::ClearWan {
                interface: interface.to_owned(),
            },
            ApplyWhen::IfAuto,
        )
        .await
    }

    pub async fn set_lan(&self, interface: &str) -> Result<ChangeOutcome, CoreError> {
        self.change(
            Transition::AssignLan {
                interface: interface.to_owned(),
            },
            ApplyWhen::IfAuto,
        )
        .await
    }

    pub async fn clear_lan(&self, interface: &str) -> Result<ChangeOutcome, CoreError> {
        self.change(
            Transition::ClearLan {
                interface: interface.to_owned(),
            },
            ApplyWhen::IfAuto,
        )
        .await
    }

    pub async fn local_only(&self) -> Result<ChangeOutcome, CoreError> {
        self.change(Transition::EnterLocalOnly, ApplyWhen::Always).await
    }

    /// Leave local-only, drop managed LAN connections and rebuild.
    pub async fn reset(&self) -> Result<ChangeOutcome, CoreError> {
        let _lock = self.lock().await?;
        let mut state = self.inner.store.load()?;
        let inventory = self.inventory()?;
        state.transition(Transition::Reset, &inventory)?;
        self.inner.store.save(&state)?;
        *self.inner.state.lock().await = state.clone();

        Applier::new(self.runner(), &self.inner.config, &self.inner.store)
            .teardown_lan()
            .await?;
        let applied = self.apply_state(&state, &inventory, None).await?;
        info!("network reset to normal sharing");
        Ok(ChangeOutcome {
            state,
            applied: Some(applied),
        })
    }

    // ── WiFi ─────────────────────────────────────────────────────────

    pub async fn wifi_scan(&self, interface: Option<&str>) -> Result<Vec<WifiNetwork>, CoreError> {
        wifi::scan(self.runner(), interface).await
    }

    pub async fn wifi_status(&self) -> Result<Vec<WifiDevice>, CoreError> {
        wifi::status(self.runner()).await
    }

    /// Pick the radio for client work: a WiFi WAN first, then a radio
    /// that cannot host an AP, then any radio.
    fn client_radio(&self, state: &NetworkState, inventory: &[Interface]) -> Result<String, CoreError> {
        let radios: Vec<&Interface> = inventory.iter().filter(|i| i.is_wifi()).collect();
        radios
            .iter()
            .find(|i| state.roles.is_wan(&i.name))
            .or_else(|| radios.iter().find(|i| !i.supports_ap()))
            .or_else(|| radios.first())
            .map(|i| i.name.clone())
            .ok_or_else(|| CoreError::validation("no WiFi interface in the inventory"))
    }

    pub async fn wifi_connect(
        &self,
        ssid: &str,
        passphrase: &SecretString,
        interface: Option<&str>,
    ) -> Result<ChangeOutcome, CoreError> {
        let _lock = self.lock().await?;
        let mut state = self.inner.store.load()?;
        let inventory = self.inventory()?;
        let radio = match interface {
            Some(name) => name.to_owned(),
            None => self.client_radio(&state, &inventory)?,
        };
        state.transition(
            Transition::ConnectClient {
                interface: radio.clone(),
            },
            &inventory,
        )?;

        wifi::connect(self.runner(), ssid, passphrase, &radio).await?;
        let applied = if state.mode.is_auto() {
            Some(self.apply_state(&state, &inventory, None).await?)
        } else {
            None
        };
        Ok(ChangeOutcome { state, applied })
    }

    pub async fn wifi_disconnect(&self, interface: Option<&str>) -> Result<String, CoreError> {
        let _lock = self.lock().await?;
        let state = self.inner.store.load()?;
        let inventory = self.inventory()?;
        let radio = match interface {
            Some(name) => name.to_owned(),
            None => self.client_radio(&state, &inventory)?,
        };
        wifi::disconnect(self.runner(), &radio).await?;
        Ok(radio)
    }

    /// Set hotspot credentials and rebuild the access points.
    pub async fn wifi_ap(&self, ssid: &str, passphrase: SecretString) -> Result<ChangeOutcome, CoreError> {
        let settings = HotspotSettings::new(ssid, passphrase)?;
        self.change(Transition::SetHotspot(settings), ApplyWhen::Always)
            .await
    }

    /// Start the repeater. Without explicit interfaces the first AP-capable
    /// radio hosts the AP and another radio is the upstream client.
    pub async fn repeater_start(
        &self,
        upstream: Option<&str>,
        access_point: Option<&str>,
    ) -> Result<ChangeOutcome, CoreError> {
        let inventory = self.inventory()?;
        let radios: Vec<&Interface> = inventory.iter().filter(|i| i.is_wifi()).collect();

        let ap = match access_point {
            Some(name) => name.to_owned(),
            None => radios
                .iter()
                .filter(|i| Some(i.name.as_str()) != upstream)
                .find(|i| i.supports_ap())
                .map(|i| i.name.clone())
                .ok_or_else(|| CoreError::validation("no AP-capable WiFi interface for the repeater"))?,
        };
        let upstream = match upstream {
            Some(name) => name.to_owned(),
            None => radios
                .iter()
                .find(|i| i.name != ap)
                .map(|i| i.name.clone())
                .ok_or_else(|| CoreError::validation("repeater needs a second WiFi interface"))?,
        };

        let outcome = self
            .change(
                Transition::StartRepeater(RepeaterState {
                    upstream,
                    access_point: ap,
                }),
                ApplyWhen::Always,
            )
            .await?;
        info!("WiFi repeater started");
        Ok(outcome)
    }

    pub async fn repeater_stop(&self) -> Result<ChangeOutcome, CoreError> {
        let _lock = self.lock().await?;
        let state = self.inner.store.load()?;
        let Some(repeater) = state.repeater else {
            return Err(CoreError::validation("the WiFi repeater is not running"));
        };
        wifi::disconnect(self.runner(), &repeater.upstream).await?;
        let outcome = self
            .change_locked(Transition::StopRepeater, ApplyWhen::Always)
            .await?;
        info!("WiFi repeater stopped");
        Ok(outcome)
    }

    // ── Monitor ──────────────────────────────────────────────────────

    /// Re-probe every `monitor_interval` and reapply when WAN
    /// connectivity changes while in AUTO mode. Returns when `cancel`
    /// fires; an apply in progress always completes first.
    pub async fn monitor(&self, cancel: CancellationToken) -> Result<(), CoreError> {
        let mut ticker = tokio::time::interval(self.inner.config.monitor_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last = None;

        info!(interval = ?self.inner.config.monitor_interval, "monitor started");
        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    info!("monitor stopping");
                    return Ok(());
                }
                _ = ticker.tick() => {}
            }
            match self.monitor_tick(&mut last).await {
                Ok(true) => info!("connectivity changed, topology reapplied"),
                Ok(false) => {}
                Err(e) => warn!(error = %e, "monitor evaluation failed"),
            }
        }
    }

    /// One monitor iteration. Returns `true` if routing was reapplied.
    /// `last` only advances after a successful apply.
    async fn monitor_tick(&self, last: &mut Option<Vec<Fingerprint>>) -> Result<bool, CoreError> {
        let _lock = self.lock().await?;
        let state = self.inner.store.load()?;
        *self.inner.state.lock().await = state.clone();
        if !state.mode.is_auto() {
            *last = None;
            return Ok(false);
        }
        let inventory = self.inventory()?;
        let statuses = self.probe_wan(&state, &inventory).await?;
        let fingerprint: Vec<Fingerprint> = statuses.iter().map(ConnectivityStatus::fingerprint).collect();
        if last.as_ref() == Some(&fingerprint) {
            return Ok(false);
        }

        self.apply_state(&state, &inventory, Some(statuses)).await?;
        *last = Some(fingerprint);
        Ok(true)
    }
}

type Fingerprint = (String, LinkState, Option<std::net::Ipv4Addr>, bool);

fn entries(inventory: &[Interface], roles: &RoleMap) -> Vec<InterfaceEntry> {
    inventory
        .iter()
        .map(|iface| InterfaceEntry {
            interface: iface.clone(),
            role: roles.role_of(&iface.name),
            effective_role: (!iface.is_overlay()).then(|| roles.effective_role(&iface.name)),
        })
        .collect()
}
