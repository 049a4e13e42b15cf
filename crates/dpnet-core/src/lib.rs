// dpnet-core: interface roles, connectivity probing and routing reconciliation
// for DangerPrep hotspots. The CLI drives everything through `Controller`.

pub mod apply;
pub mod config;
pub mod controller;
pub mod diagnostics;
pub mod dnsmasq;
pub mod error;
pub mod firewall;
pub mod inventory;
pub mod model;
pub mod nmcli;
pub mod probe;
pub mod store;
pub mod system;
pub mod topology;
pub mod wifi;

// ── Primary re-exports ──────────────────────────────────────────────
pub use apply::ApplyReport;
pub use config::{ApplySettings, ControllerConfig, HotspotDefaults, LanSettings, Paths, ProbeSettings};
pub use controller::{
    ChangeOutcome, Controller, InterfaceEntry, InterfaceStatus, QueryField, StatusReport, WanDetail,
};
pub use diagnostics::{DiagnosticKind, Section};
pub use error::CoreError;
pub use store::RoutingSnapshot;
pub use system::{CommandOutput, CommandRunner, SystemRunner};
pub use topology::{LanSegment, SegmentKind, Topology};
pub use wifi::{WifiDevice, WifiNetwork};

pub use model::{
    ConnectivityStatus, ControlMode, HotspotSettings, Interface, InterfaceKind, LinkState, MacAddress,
    NetworkMode, NetworkState, RepeaterState, Role, RoleMap, SharingMode, Transition, WanPriority,
    WifiCapabilities,
};
