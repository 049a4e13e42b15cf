//! WiFi client, hotspot and repeater handlers.

use tabled::Tabled;

use dpnet_core::{Controller, WifiDevice, WifiNetwork};

use crate::cli::{GlobalOpts, OptionalInterface, RepeaterArgs, WifiApArgs, WifiConnectArgs};
use crate::error::CliError;
use crate::output;

use super::util;

// ── Table rows ──────────────────────────────────────────────────────

#[derive(Tabled)]
struct NetworkRow {
    #[tabled(rename = "")]
    in_use: String,
    #[tabled(rename = "SSID")]
    ssid: String,
    #[tabled(rename = "Signal")]
    signal: String,
    #[tabled(rename = "Security")]
    security: String,
    #[tabled(rename = "Channel")]
    channel: String,
}

impl From<&WifiNetwork> for NetworkRow {
    fn from(n: &WifiNetwork) -> Self {
        Self {
            in_use: if n.in_use { "*" } else { "" }.into(),
            ssid: n.ssid.clone(),
            signal: format!("{}%", n.signal),
            security: n.security.clone(),
            channel: n.channel.map_or_else(|| "-".into(), |c| c.to_string()),
        }
    }
}

#[derive(Tabled)]
struct DeviceRow {
    #[tabled(rename = "Device")]
    device: String,
    #[tabled(rename = "State")]
    state: String,
    #[tabled(rename = "Connection")]
    connection: String,
}

impl From<&WifiDevice> for DeviceRow {
    fn from(d: &WifiDevice) -> Self {
        Self {
            device: d.device.clone(),
            state: d.state.clone(),
            connection: d.connection.clone().unwrap_or_else(|| "-".into()),
        }
    }
}

// ── Handlers ────────────────────────────────────────────────────────

pub async fn scan(controller: &Controller, args: OptionalInterface, global: &GlobalOpts) -> Result<(), CliError> {
    util::require_root("wifi-scan")?;
    let networks = controller.wifi_scan(args.interface.as_deref()).await?;
    let out = output::render_list(
        global.output,
        &networks,
        |n| NetworkRow::from(n),
        |n| n.ssid.clone(),
    )?;
    output::print_output(&out, global.quiet);
    Ok(())
}

pub async fn connect(controller: &Controller, args: WifiConnectArgs, global: &GlobalOpts) -> Result<(), CliError> {
    util::require_root("wifi-connect")?;
    let passphrase = util::read_passphrase(args.passphrase, &format!("Passphrase for {}: ", args.ssid))?;
    let outcome = controller
        .wifi_connect(&args.ssid, &passphrase, args.interface.as_deref())
        .await?;
    util::report_change(global, &outcome, &format!("connected to {}", args.ssid))
}

pub async fn disconnect(controller: &Controller, args: OptionalInterface, global: &GlobalOpts) -> Result<(), CliError> {
    util::require_root("wifi-disconnect")?;
    let interface = controller.wifi_disconnect(args.interface.as_deref()).await?;
    if !global.quiet {
        eprintln!("{interface} disconnected");
    }
    Ok(())
}

pub async fn access_point(controller: &Controller, args: WifiApArgs, global: &GlobalOpts) -> Result<(), CliError> {
    util::require_root("wifi-ap")?;
    let passphrase = util::read_passphrase(args.passphrase, "Hotspot passphrase: ")?;
    let outcome = controller.wifi_ap(&args.ssid, passphrase).await?;
    util::report_change(global, &outcome, &format!("hotspot SSID set to {}", args.ssid))
}

pub async fn status(controller: &Controller, global: &GlobalOpts) -> Result<(), CliError> {
    let devices = controller.wifi_status().await?;
    let out = output::render_list(
        global.output,
        &devices,
        |d| DeviceRow::from(d),
        |d| format!("{} {}", d.device, d.state),
    )?;
    output::print_output(&out, global.quiet);
    Ok(())
}

pub async fn repeater_start(controller: &Controller, args: RepeaterArgs, global: &GlobalOpts) -> Result<(), CliError> {
    util::require_root("wifi-repeater-start")?;
    let outcome = controller
        .repeater_start(args.upstream.as_deref(), args.ap.as_deref())
        .await?;
    let message = outcome.state.repeater.as_ref().map_or_else(
        || "repeater started".to_string(),
        |r| format!("repeater started: {} upstream, hotspot on {}", r.upstream, r.access_point),
    );
    util::report_change(global, &outcome, &message)
}

pub async fn repeater_stop(controller: &Controller, global: &GlobalOpts) -> Result<(), CliError> {
    util::require_root("wifi-repeater-stop")?;
    let outcome = controller.repeater_stop().await?;
    util::report_change(global, &outcome, "repeater stopped")
}
