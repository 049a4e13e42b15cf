// ── Connectivity status ──

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;

use super::interface::LinkState;

/// Result of probing one interface. Recomputed on every evaluation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectivityStatus {
    pub interface: String,
    pub link: LinkState,
    pub address: Option<Ipv4Addr>,
    pub has_default_route: bool,
    pub has_internet: bool,
    pub checked_at: DateTime<Utc>,
}

impl ConnectivityStatus {
    /// The fields whose change should trigger a re-evaluation.
    pub fn fingerprint(&self) -> (String, LinkState, Option<Ipv4Addr>, bool) {
        (
            self.interface.clone(),
            self.link,
            self.address,
            self.has_internet,
        )
    }
}
