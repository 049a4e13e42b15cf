//! Command dispatch: bridges CLI args -> Controller operations -> output formatting.

pub mod config_cmd;
pub mod diagnostics;
pub mod interfaces;
pub mod mode;
pub mod query;
pub mod status;
pub mod util;
pub mod wan;
pub mod wifi;

use dpnet_core::Controller;

use crate::cli::{Command, GlobalOpts};
use crate::error::CliError;

/// Dispatch a controller-bound command to the appropriate handler.
pub async fn dispatch(cmd: Command, controller: &Controller, global: &GlobalOpts) -> Result<(), CliError> {
    match cmd {
        Command::Status => status::handle(controller, global).await,
        Command::Query(args) => query::handle(controller, args).await,
        Command::Diagnostics(args) => diagnostics::handle(controller, args, global).await,

        Command::Enumerate => interfaces::enumerate(controller, global).await,
        Command::ListInterfaces => interfaces::list(controller, global).await,
        Command::SetLan(args) => interfaces::set_lan(controller, args, global).await,
        Command::ClearLan(args) => interfaces::clear_lan(controller, args, global).await,

        Command::ShowWanDetails => wan::details(controller, global).await,
        Command::SetWan(args) => wan::set(controller, args, global).await,
        Command::ClearWan(args) => wan::clear(controller, args, global).await,

        Command::Auto => mode::auto(controller, global).await,
        Command::Manual => mode::manual(controller, global).await,
        Command::Evaluate => mode::evaluate(controller, global).await,
        Command::LocalOnly => mode::local_only(controller, global).await,
        Command::Reset => mode::reset(controller, global).await,
        Command::Monitor => mode::monitor(controller).await,

        Command::WifiScan(args) => wifi::scan(controller, args, global).await,
        Command::WifiConnect(args) => wifi::connect(controller, args, global).await,
        Command::WifiDisconnect(args) => wifi::disconnect(controller, args, global).await,
        Command::WifiAp(args) => wifi::access_point(controller, args, global).await,
        Command::WifiStatus => wifi::status(controller, global).await,
        Command::WifiRepeaterStart(args) => wifi::repeater_start(controller, args, global).await,
        Command::WifiRepeaterStop => wifi::repeater_stop(controller, global).await,

        // Config and Completions are handled before dispatch
        Command::Config(_) | Command::Completions(_) => unreachable!(),
    }
}
