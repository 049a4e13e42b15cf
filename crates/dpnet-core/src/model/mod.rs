// ── Domain model ──
//
// Canonical types shared by the enumerator, the state store, the
// applier and the CLI.

pub mod connectivity;
pub mod interface;
pub mod mode;
pub mod role;
pub mod state;

pub use connectivity::ConnectivityStatus;
pub use interface::{Interface, InterfaceKind, LinkState, MacAddress, WifiCapabilities};
pub use mode::{ControlMode, NetworkMode, SharingMode};
pub use role::{Role, RoleMap, WanPriority};
pub use state::{HotspotSettings, NetworkState, RepeaterState, Transition, is_valid_wpa_passphrase};
