//! Configuration for the dpnet CLI.
//!
//! One TOML file (default `/etc/dangerprep/network.toml`) layered over
//! built-in defaults, with `DPNET_*` environment overrides on top, and
//! translation to `dpnet_core::ControllerConfig`.

use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use ipnet::Ipv4Net;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

use dpnet_core::model::is_valid_wpa_passphrase;
use dpnet_core::{
    ApplySettings, ControllerConfig, HotspotDefaults, LanSettings, Paths, ProbeSettings,
};

/// Environment variable naming an alternate config file.
pub const CONFIG_ENV: &str = "DPNET_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "/etc/dangerprep/network.toml";
const ENV_PREFIX: &str = "DPNET_";
const MASK: &str = "********";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

fn invalid(field: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Validation {
        field: field.into(),
        reason: reason.into(),
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level `network.toml`.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub paths: PathsSection,
    pub lan: LanSection,
    pub hotspot: HotspotSection,
    pub probe: ProbeSection,
    pub apply: ApplySection,
    pub monitor: MonitorSection,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PathsSection {
    pub config_dir: PathBuf,
    pub state_dir: PathBuf,
    pub dnsmasq_conf: PathBuf,
    pub sysfs_root: PathBuf,
    /// Plain-text log written alongside stderr output.
    pub log_file: PathBuf,
}

impl Default for PathsSection {
    fn default() -> Self {
        let paths = Paths::default();
        Self {
            config_dir: paths.config_dir,
            state_dir: paths.state_dir,
            dnsmasq_conf: paths.dnsmasq_conf,
            sysfs_root: paths.sysfs_root,
            log_file: PathBuf::from("/var/log/dangerprep-network.log"),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LanSection {
    pub bridge: String,
    pub subnet_base: Ipv4Net,
    pub dhcp_lease: String,
    pub upstream_dns: Vec<Ipv4Addr>,
    pub domain: String,
}

impl Default for LanSection {
    fn default() -> Self {
        let lan = LanSettings::default();
        Self {
            bridge: lan.bridge,
            subnet_base: lan.subnet_base,
            dhcp_lease: lan.dhcp_lease,
            upstream_dns: lan.upstream_dns,
            domain: lan.domain,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HotspotSection {
    pub ssid: String,
    #[serde(serialize_with = "expose", deserialize_with = "conceal")]
    pub passphrase: SecretString,
    pub band: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel: Option<u32>,
}

impl Default for HotspotSection {
    fn default() -> Self {
        let hotspot = HotspotDefaults::default();
        Self {
            ssid: hotspot.ssid,
            passphrase: hotspot.passphrase,
            band: hotspot.band,
            channel: hotspot.channel,
        }
    }
}

fn expose<S: Serializer>(secret: &SecretString, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(secret.expose_secret())
}

fn conceal<'de, D: Deserializer<'de>>(deserializer: D) -> Result<SecretString, D::Error> {
    String::deserialize(deserializer).map(SecretString::from)
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ProbeSection {
    pub targets: Vec<Ipv4Addr>,
    pub timeout_secs: u64,
}

impl Default for ProbeSection {
    fn default() -> Self {
        let probe = ProbeSettings::default();
        Self {
            targets: probe.targets,
            timeout_secs: probe.timeout.as_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ApplySection {
    pub wan_wait_secs: u64,
    pub lock_timeout_secs: u64,
    pub command_timeout_secs: u64,
}

impl Default for ApplySection {
    fn default() -> Self {
        let apply = ApplySettings::default();
        Self {
            wan_wait_secs: apply.wan_wait.as_secs(),
            lock_timeout_secs: apply.lock_timeout.as_secs(),
            command_timeout_secs: apply.command_timeout.as_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MonitorSection {
    pub interval_secs: u64,
}

impl Default for MonitorSection {
    fn default() -> Self {
        Self {
            interval_secs: ControllerConfig::default().monitor_interval.as_secs(),
        }
    }
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file: explicit flag, then `DPNET_CONFIG`, then the
/// system default.
pub fn config_path(explicit: Option<&Path>) -> PathBuf {
    explicit.map_or_else(
        || {
            std::env::var_os(CONFIG_ENV)
                .filter(|v| !v.is_empty())
                .map_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH), PathBuf::from)
        },
        Path::to_path_buf,
    )
}

// ── Config loading ──────────────────────────────────────────────────

/// Load defaults, then the TOML file (if present), then `DPNET_*`
/// overrides where `__` separates sections (`DPNET_APPLY__WAN_WAIT_SECS`).
pub fn load(path: &Path) -> Result<Config, ConfigError> {
    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed(ENV_PREFIX).split("__").ignore(&["CONFIG"]));

    let config: Config = figment.extract()?;
    config.validate()?;
    Ok(config)
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let base = self.lan.subnet_base;
        if base.prefix_len() != 24 || base.network() != base.addr() {
            return Err(invalid(
                "lan.subnet_base",
                format!("expected a /24 network address, got {base}"),
            ));
        }

        if !is_valid_wpa_passphrase(self.hotspot.passphrase.expose_secret()) {
            return Err(invalid("hotspot.passphrase", "must be 8-63 printable ASCII characters"));
        }
        if self.hotspot.ssid.is_empty() || self.hotspot.ssid.len() > 32 {
            return Err(invalid("hotspot.ssid", "must be 1-32 bytes"));
        }

        if self.probe.targets.is_empty() {
            return Err(invalid("probe.targets", "at least one target is required"));
        }

        for (field, value) in [
            ("probe.timeout_secs", self.probe.timeout_secs),
            ("apply.lock_timeout_secs", self.apply.lock_timeout_secs),
            ("apply.command_timeout_secs", self.apply.command_timeout_secs),
            ("monitor.interval_secs", self.monitor.interval_secs),
        ] {
            if value == 0 {
                return Err(invalid(field, "must be greater than zero"));
            }
        }
        Ok(())
    }

    /// Translate to the controller's runtime configuration.
    pub fn to_controller_config(&self) -> ControllerConfig {
        ControllerConfig {
            paths: Paths {
                config_dir: self.paths.config_dir.clone(),
                state_dir: self.paths.state_dir.clone(),
                dnsmasq_conf: self.paths.dnsmasq_conf.clone(),
                sysfs_root: self.paths.sysfs_root.clone(),
            },
            lan: LanSettings {
                bridge: self.lan.bridge.clone(),
                subnet_base: self.lan.subnet_base,
                dhcp_lease: self.lan.dhcp_lease.clone(),
                upstream_dns: self.lan.upstream_dns.clone(),
                domain: self.lan.domain.clone(),
            },
            hotspot: HotspotDefaults {
                ssid: self.hotspot.ssid.clone(),
                passphrase: self.hotspot.passphrase.clone(),
                band: self.hotspot.band.clone(),
                channel: self.hotspot.channel,
            },
            probe: ProbeSettings {
                targets: self.probe.targets.clone(),
                timeout: Duration::from_secs(self.probe.timeout_secs),
            },
            apply: ApplySettings {
                wan_wait: Duration::from_secs(self.apply.wan_wait_secs),
                lock_timeout: Duration::from_secs(self.apply.lock_timeout_secs),
                command_timeout: Duration::from_secs(self.apply.command_timeout_secs),
            },
            monitor_interval: Duration::from_secs(self.monitor.interval_secs),
        }
    }

    /// TOML rendering with secrets masked, for `config show`.
    pub fn to_redacted_toml(&self) -> Result<String, ConfigError> {
        let mut masked = self.clone();
        masked.hotspot.passphrase = SecretString::from(MASK.to_string());
        Ok(toml::to_string_pretty(&masked)?)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use figment::Jail;
    use pretty_assertions::assert_eq;

    #[test]
    fn missing_file_yields_defaults() {
        Jail::expect_with(|_jail| {
            let config = load(Path::new("absent.toml")).map_err(|e| e.to_string())?;
            assert_eq!(config.lan.bridge, "br-dp");
            assert_eq!(config.paths.log_file, PathBuf::from("/var/log/dangerprep-network.log"));
            assert_eq!(config.monitor.interval_secs, 30);
            Ok(())
        });
    }

    #[test]
    fn file_then_env_layering() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "network.toml",
                r#"
                [lan]
                subnet_base = "10.42.0.0/24"

                [hotspot]
                ssid = "Basecamp"
                passphrase = "correct horse"

                [apply]
                wan_wait_secs = 9
                "#,
            )?;
            jail.set_env("DPNET_APPLY__WAN_WAIT_SECS", "2");
            jail.set_env("DPNET_CONFIG", "ignored.toml");

            let config = load(Path::new("network.toml")).map_err(|e| e.to_string())?;
            assert_eq!(config.lan.subnet_base.to_string(), "10.42.0.0/24");
            assert_eq!(config.hotspot.ssid, "Basecamp");
            assert_eq!(config.apply.wan_wait_secs, 2);

            let runtime = config.to_controller_config();
            assert_eq!(runtime.apply.wan_wait, Duration::from_secs(2));
            assert_eq!(runtime.hotspot.passphrase.expose_secret(), "correct horse");
            Ok(())
        });
    }

    #[test]
    fn rejects_unaligned_subnet() {
        let mut config = Config::default();
        config.lan.subnet_base = "10.42.0.7/24".parse().unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("lan.subnet_base"));

        config.lan.subnet_base = "10.42.0.0/16".parse().unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_short_passphrase_and_zero_intervals() {
        let mut config = Config::default();
        config.hotspot.passphrase = SecretString::from("short".to_string());
        assert!(config.validate().unwrap_err().to_string().contains("hotspot.passphrase"));

        let mut config = Config::default();
        config.hotspot.passphrase = SecretString::from("ééééééé".to_string());
        assert!(config.validate().unwrap_err().to_string().contains("hotspot.passphrase"));

        let mut config = Config::default();
        config.monitor.interval_secs = 0;
        assert!(config.validate().unwrap_err().to_string().contains("monitor.interval_secs"));

        let mut config = Config::default();
        config.probe.targets.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn redacted_toml_masks_passphrase() {
        let rendered = Config::default().to_redacted_toml().unwrap();
        assert!(rendered.contains("passphrase = \"********\""));
        assert!(!rendered.contains("changeme"));
    }

    #[test]
    fn explicit_path_wins() {
        assert_eq!(config_path(Some(Path::new("/tmp/x.toml"))), PathBuf::from("/tmp/x.toml"));
    }
}
