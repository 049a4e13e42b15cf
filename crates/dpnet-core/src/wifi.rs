// ── WiFi client operations ──

use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use tracing::info;

use crate::error::CoreError;
use crate::nmcli::split_terse;
use crate::system::CommandRunner;

pub const CLIENT_CONNECTION_PREFIX: &str = "DangerPrep-Client-";

/// One visible network from a scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WifiNetwork {
    pub in_use: bool,
    pub ssid: String,
    pub signal: u8,
    pub security: String,
    pub channel: Option<u32>,
}

/// A WiFi device as NetworkManager sees it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WifiDevice {
    pub device: String,
    pub state: String,
    pub connection: Option<String>,
}

pub async fn scan(runner: &dyn CommandRunner, interface: Option<&str>) -> Result<Vec<WifiNetwork>, CoreError> {
    let mut args = vec![
        "-t",
        "-f",
        "IN-USE,SSID,SIGNAL,SECURITY,CHAN",
        "device",
        "wifi",
        "list",
        "--rescan",
        "yes",
    ];
    if let Some(iface) = interface {
        args.extend(["ifname", iface]);
    }
    let output = runner.run_checked("nmcli", &args).await?;
    Ok(parse_scan(&output))
}

pub fn parse_scan(output: &str) -> Vec<WifiNetwork> {
    let mut networks: Vec<WifiNetwork> = output
        .lines()
        .filter_map(|line| {
            let fields = split_terse(line);
            let [in_use, ssid, signal, security, chan] = fields.as_slice() else {
                return None;
            };
            // Hidden networks have no SSID to connect to.
            if ssid.trim().is_empty() {
                return None;
            }
            Some(WifiNetwork {
                in_use: in_use == "*",
                ssid: ssid.clone(),
                signal: signal.parse().unwrap_or(0),
                security: if security.is_empty() { "open".into() } else { security.clone() },
                channel: chan.parse().ok(),
            })
        })
        .collect();
    networks.sort_by(|a, b| b.signal.cmp(&a.signal).then_with(|| a.ssid.cmp(&b.ssid)));
    networks
}

/// Associate `interface` with `ssid`, saving the profile as
/// `DangerPrep-Client-<ssid>`. An empty passphrase joins an open network.
pub async fn connect(
    runner: &dyn CommandRunner,
    ssid: &str,
    passphrase: &SecretString,
    interface: &str,
) -> Result<String, CoreError> {
    let profile = format!("{CLIENT_CONNECTION_PREFIX}{ssid}");
    let mut args = vec!["device", "wifi", "connect", ssid];
    let secret = passphrase.expose_secret();
    if !secret.is_empty() {
        args.extend(["password", secret]);
    }
    args.extend(["ifname", interface, "name", &profile]);

    runner.run_checked("nmcli", &args).await?;
    info!(%ssid, %interface, "WiFi client connected");
    Ok(profile)
}

pub async fn disconnect(runner: &dyn CommandRunner, interface: &str) -> Result<(), CoreError> {
    runner
        .run_checked("nmcli", &["device", "disconnect", interface])
        .await?;
    info!(%interface, "WiFi client disconnected");
    Ok(())
}

pub async fn status(runner: &dyn CommandRunner) -> Result<Vec<WifiDevice>, CoreError> {
    let output = runner
        .run_checked("nmcli", &["-t", "-f", "DEVICE,TYPE,STATE,CONNECTION", "device", "status"])
        .await?;
    Ok(parse_status(&output))
}

pub fn parse_status(output: &str) -> Vec<WifiDevice> {
    output
        .lines()
        .filter_map(|line| {
            let fields = split_terse(line);
            let [device, kind, state, connection] = fields.as_slice() else {
                return None;
            };
            if kind != "wifi" {
                return None;
            }
            Some(WifiDevice {
                device: device.clone(),
                state: state.clone(),
                connection: (!connection.is_empty() && connection != "--").then(|| connection.clone()),
            })
        })
        .collect()
}
