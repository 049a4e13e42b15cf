// ── Role/state store ──
//
// Persists `NetworkState` as JSON, the routing snapshot and the legacy
// `wan.conf` pointer. Every write is atomic (temp file, fsync, rename);
// mutating callers serialize through an exclusive flock.

use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use ipnet::Ipv4Net;
use nix::errno::Errno;
use nix::fcntl::{Flock, FlockArg};
use serde::Serialize;
use tracing::debug;

use crate::config::Paths;
use crate::error::CoreError;
use crate::model::{NetworkState, SharingMode};
use crate::topology::{SegmentKind, Topology};

const LOCK_POLL: Duration = Duration::from_millis(100);

/// Replace `path` with `contents` atomically.
pub fn atomic_write(path: &Path, contents: &[u8], mode: u32) -> Result<(), CoreError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let temp_path = path.with_file_name(format!(".{file_name}.tmp"));

    {
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .mode(mode)
            .open(&temp_path)?;
        file.write_all(contents)?;
        file.sync_all()?;
    }
    fs::rename(&temp_path, path)?;
    Ok(())
}

/// Write only when the content differs. Returns `true` if the file changed.
pub fn write_if_changed(path: &Path, contents: &str, mode: u32) -> Result<bool, CoreError> {
    match fs::read_to_string(path) {
        Ok(current) if current == contents => return Ok(false),
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }
    atomic_write(path, contents.as_bytes(), mode)?;
    Ok(true)
}

/// Held for the duration of a mutating command; released on drop.
pub struct StateLock {
    _guard: Flock<fs::File>,
}

impl fmt::Debug for StateLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateLock").finish_non_exhaustive()
    }
}

// ── Routing snapshot ────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SegmentSummary {
    pub name: String,
    pub kind: SegmentKind,
    pub subnet: Ipv4Net,
}

/// What the last successful apply configured.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoutingSnapshot {
    pub applied_at: DateTime<Utc>,
    pub sharing: SharingMode,
    pub uplink: Option<String>,
    pub wan_interfaces: Vec<String>,
    pub lan_segments: Vec<SegmentSummary>,
    /// Rules in dpnet-owned chains.
    pub rules: usize,
}

impl RoutingSnapshot {
    pub fn from_topology(topology: &Topology, rules: usize) -> Self {
        Self {
            applied_at: Utc::now(),
            sharing: topology.sharing,
            uplink: topology.uplink.clone(),
            wan_interfaces: topology.wan.iter().map(|w| w.interface.clone()).collect(),
            lan_segments: topology
                .lan
                .iter()
                .map(|s| SegmentSummary {
                    name: s.name.clone(),
                    kind: s.kind,
                    subnet: s.subnet,
                })
                .collect(),
            rules,
        }
    }

    pub fn render(&self) -> String {
        let segments = self
            .lan_segments
            .iter()
            .map(|s| format!("{}:{}:{}", s.name, s.kind, s.subnet))
            .collect::<Vec<_>>()
            .join(";");
        format!(
            "APPLIED_AT={}\nSHARING={}\nUPLINK={}\nWAN_INTERFACES={}\nLAN_SEGMENTS={}\nRULES={}\n",
            self.applied_at.to_rfc3339(),
            self.sharing,
            self.uplink.as_deref().unwrap_or_default(),
            self.wan_interfaces.join(","),
            segments,
            self.rules,
        )
    }

    /// Parse `render` output; `None` when a required key is missing or malformed.
    pub fn parse(content: &str) -> Option<Self> {
        let mut applied_at = None;
        let mut sharing = None;
        let mut uplink = None;
        let mut wan_interfaces = Vec::new();
        let mut lan_segments = Vec::new();
        let mut rules = 0;

        for line in content.lines() {
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            match key {
                "APPLIED_AT" => {
                    applied_at = DateTime::parse_from_rfc3339(value)
                        .ok()
                        .map(|t| t.with_timezone(&Utc));
                }
                "SHARING" => sharing = value.parse().ok(),
                "UPLINK" if !value.is_empty() => uplink = Some(value.to_owned()),
                "WAN_INTERFACES" => {
                    wan_interfaces = split_list(value, ',');
                }
                "LAN_SEGMENTS" => {
                    lan_segments = split_list(value, ';')
                        .iter()
                        .filter_map(|s| parse_segment(s))
                        .collect();
                }
                "RULES" => rules = value.parse().unwrap_or(0),
                _ => {}
            }
        }

        Some(Self {
            applied_at: applied_at?,
            sharing: sharing?,
            uplink,
            wan_interfaces,
            lan_segments,
            rules,
        })
    }
}

fn split_list(value: &str, sep: char) -> Vec<String> {
    value
        .split(sep)
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
        .collect()
}

fn parse_segment(raw: &str) -> Option<SegmentSummary> {
    let mut parts = raw.splitn(3, ':');
    Some(SegmentSummary {
        name: parts.next()?.to_owned(),
        kind: parts.next()?.parse().ok()?,
        subnet: parts.next()?.parse().ok()?,
    })
}

// ── StateStore ──────────────────────────────────────────────────────

/// File-backed persistence for controller state.
#[derive(Debug, Clone)]
pub struct StateStore {
    paths: Paths,
}

impl StateStore {
    pub fn new(paths: Paths) -> Self {
        Self { paths }
    }

    pub fn paths(&self) -> &Paths {
        &self.paths
    }

    /// Load state; a missing file yields defaults (manual, normal, no roles).
    pub fn load(&self) -> Result<NetworkState, CoreError> {
        let path = self.paths.state_file();
        let content = match fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "no state file, using defaults");
                return Ok(NetworkState::default());
            }
            Err(e) => return Err(e.into()),
        };
        serde_json::from_str(&content).map_err(|e| CoreError::StateCorrupt {
            path,
            reason: e.to_string(),
        })
    }

    /// Persist state. Mode 0600: the file may hold the hotspot passphrase.
    pub fn save(&self, state: &NetworkState) -> Result<(), CoreError> {
        let json = serde_json::to_string_pretty(state)?;
        atomic_write(&self.paths.state_file(), json.as_bytes(), 0o600)?;
        debug!(path = %self.paths.state_file().display(), "state saved");
        Ok(())
    }

    pub fn load_snapshot(&self) -> Result<Option<RoutingSnapshot>, CoreError> {
        match fs::read_to_string(self.paths.routing_state()) {
            Ok(content) => Ok(RoutingSnapshot::parse(&content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn save_snapshot(&self, snapshot: &RoutingSnapshot) -> Result<(), CoreError> {
        atomic_write(&self.paths.routing_state(), snapshot.render().as_bytes(), 0o644)
    }

    /// Legacy pointer read by older tooling: `WAN_INTERFACE=<uplink>`.
    pub fn write_wan_conf(&self, uplink: Option<&str>) -> Result<(), CoreError> {
        let content = format!("WAN_INTERFACE={}\n", uplink.unwrap_or_default());
        atomic_write(&self.paths.wan_conf(), content.as_bytes(), 0o644)
    }

    pub fn lock_path(&self) -> PathBuf {
        self.paths.lock_file()
    }

    /// Take the exclusive state lock, polling until `timeout`.
    pub async fn lock(&self, timeout: Duration) -> Result<StateLock, CoreError> {
        let path = self.lock_path();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .mode(0o600)
            .open(&path)?;

        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            match Flock::lock(file, FlockArg::LockExclusiveNonblock) {
                Ok(guard) => {
                    debug!(path = %path.display(), "state lock acquired");
                    return Ok(StateLock { _guard: guard });
                }
                Err((returned, errno)) if errno == Errno::EWOULDBLOCK => {
                    if tokio::time::Instant::now() >= deadline {
                        return Err(CoreError::LockTimeout {
                            path,
                            timeout_secs: timeout.as_secs(),
                        });
                    }
                    file = returned;
                    tokio::time::sleep(LOCK_POLL).await;
                }
                Err((_, errno)) => return Err(CoreError::Io(errno.into())),
            }
        }
    }
}
