//! Clap derive structures for the `dpnet` CLI.
//!
//! Defines the command tree, global flags, and shared value enums. Kept
//! free of crate-internal imports so `build.rs` can include it for man pages.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

// ── Top-Level CLI ────────────────────────────────────────────────────

/// dpnet -- network mode controller for DangerPrep hotspots
#[derive(Debug, Parser)]
#[command(
    name = "dpnet",
    version,
    about = "Manage DangerPrep hotspot networking from the command line",
    long_about = "Assigns WAN and LAN roles to network interfaces, picks the active uplink,\n\
        and reconciles NetworkManager connections, dnsmasq and iptables to match.\n\n\
        Run `dpnet enumerate` once after hardware changes to refresh the interface inventory.",
    propagate_version = true,
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Command,
}

// ── Global Options ───────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Config file (default: $DPNET_CONFIG or /etc/dangerprep/network.toml)
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Output format
    #[arg(
        long,
        short = 'o',
        env = "DPNET_OUTPUT",
        default_value = "table",
        global = true
    )]
    pub output: OutputFormat,

    /// When to use color output
    #[arg(long, default_value = "auto", global = true)]
    pub color: ColorMode,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(long, short = 'q', global = true)]
    pub quiet: bool,

    /// Skip confirmation prompts
    #[arg(long, short = 'y', global = true)]
    pub yes: bool,
}

// ── Output & Color Enums ─────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Pretty table (default, interactive)
    Table,
    /// Pretty-printed JSON
    Json,
    /// Compact single-line JSON
    JsonCompact,
    /// YAML
    Yaml,
    /// Plain text, one value per line (scripting)
    Plain,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ColorMode {
    /// Auto-detect (color if terminal is interactive)
    Auto,
    /// Always emit color codes
    Always,
    /// Never emit color codes
    Never,
}

// ── Top-Level Command Enum ───────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Show mode, roles, per-interface connectivity and the last apply
    Status,

    /// Switch to automatic control and evaluate now
    Auto,

    /// Switch to manual control (roles change only on request)
    Manual,

    /// Probe WAN links, choose the uplink and apply routing
    Evaluate,

    /// Scan kernel interfaces and rewrite the interface inventory
    Enumerate,

    /// List enumerated interfaces with their roles
    #[command(alias = "ls")]
    ListInterfaces,

    /// Show WAN role assignments with live probes
    ShowWanDetails,

    /// Assign a WAN role to an interface
    SetWan(SetWanArgs),

    /// Remove every WAN role from an interface
    ClearWan(InterfaceArg),

    /// Explicitly serve an interface as LAN
    SetLan(InterfaceArg),

    /// Drop an explicit LAN assignment
    ClearLan(InterfaceArg),

    /// List visible WiFi networks
    WifiScan(OptionalInterface),

    /// Join a WiFi network as a client
    WifiConnect(WifiConnectArgs),

    /// Disconnect a WiFi client interface
    WifiDisconnect(OptionalInterface),

    /// Set hotspot credentials and rebuild access points
    WifiAp(WifiApArgs),

    /// Show WiFi device states
    WifiStatus,

    /// Start a repeater: client on one radio, access point on another
    WifiRepeaterStart(RepeaterArgs),

    /// Stop the WiFi repeater
    WifiRepeaterStop,

    /// Run health checks
    #[command(alias = "diag")]
    Diagnostics(DiagnosticsArgs),

    /// Cut LAN clients off from the internet; local services stay reachable
    LocalOnly,

    /// Leave local-only mode and rebuild the default topology
    Reset,

    /// Print a single value for scripts
    Query(QueryArgs),

    /// Re-evaluate whenever WAN connectivity changes (runs until interrupted)
    Monitor,

    /// Inspect CLI configuration
    Config(ConfigArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

// ── Interface arguments ──────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct InterfaceArg {
    /// Interface name (see `dpnet list-interfaces`)
    pub interface: String,
}

#[derive(Debug, Args)]
pub struct OptionalInterface {
    /// WiFi interface (default: chosen automatically)
    pub interface: Option<String>,
}

#[derive(Debug, Args)]
pub struct SetWanArgs {
    /// Interface name
    pub interface: String,

    /// WAN priority
    #[arg(value_enum, default_value = "primary")]
    pub priority: WanPriorityArg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum WanPriorityArg {
    /// Preferred uplink
    Primary,
    /// Used when the primary has no internet
    Secondary,
    /// Last resort
    Available,
}

// ── WiFi arguments ───────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct WifiConnectArgs {
    /// Network name
    pub ssid: String,

    /// Passphrase; `-` prompts without echo, empty joins an open network
    pub passphrase: String,

    /// WiFi interface (default: chosen automatically)
    pub interface: Option<String>,
}

#[derive(Debug, Args)]
pub struct WifiApArgs {
    /// Hotspot network name (1-32 bytes)
    pub ssid: String,

    /// Hotspot passphrase (8-63 characters); `-` prompts without echo
    pub passphrase: String,
}

#[derive(Debug, Args)]
pub struct RepeaterArgs {
    /// Radio that joins the upstream network
    #[arg(long)]
    pub upstream: Option<String>,

    /// AP-capable radio that hosts the hotspot
    #[arg(long)]
    pub ap: Option<String>,
}

// ── Diagnostics / query ──────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct DiagnosticsArgs {
    /// Area to check
    #[arg(value_enum, default_value = "all")]
    pub kind: DiagnosticArg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum DiagnosticArg {
    Connectivity,
    Routes,
    Firewall,
    Dns,
    All,
}

#[derive(Debug, Args)]
pub struct QueryArgs {
    /// Field to print
    #[arg(value_enum)]
    pub field: QueryFieldArg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum QueryFieldArg {
    /// auto, manual or local-only
    Mode,
    /// auto or manual
    Control,
    /// normal or local-only
    Sharing,
    WanPrimary,
    WanSecondary,
    WanAvailable,
    /// Interfaces currently served as LAN
    Lan,
    /// Every enumerated interface
    Interfaces,
    HotspotSsid,
}

// ── Config / completions ─────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Show the effective configuration (secrets masked)
    Show,
    /// Print the config file path in use
    Path,
}

#[derive(Debug, Args)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    pub shell: clap_complete::Shell,
}
