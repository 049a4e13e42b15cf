//! Control and sharing mode handlers, plus the monitor loop.

use tokio_util::sync::CancellationToken;
use tracing::info;

use dpnet_core::{ControlMode, Controller};

use crate::cli::{GlobalOpts, OutputFormat};
use crate::error::CliError;
use crate::output;

use super::util;

pub async fn auto(controller: &Controller, global: &GlobalOpts) -> Result<(), CliError> {
    util::require_root("auto")?;
    let outcome = controller.set_control(ControlMode::Auto).await?;
    util::report_change(global, &outcome, "control mode: auto")
}

pub async fn manual(controller: &Controller, global: &GlobalOpts) -> Result<(), CliError> {
    util::require_root("manual")?;
    let outcome = controller.set_control(ControlMode::Manual).await?;
    util::report_change(global, &outcome, "control mode: manual")
}

pub async fn evaluate(controller: &Controller, global: &GlobalOpts) -> Result<(), CliError> {
    util::require_root("evaluate")?;
    let report = controller.evaluate().await?;
    match global.output {
        OutputFormat::Table | OutputFormat::Plain => {
            if !global.quiet {
                eprintln!("{}", util::describe_apply(&report));
            }
        }
        format => {
            let out = output::render_single(format, &report, |_| String::new(), |_| String::new())?;
            output::print_output(&out, global.quiet);
        }
    }
    Ok(())
}

pub async fn local_only(controller: &Controller, global: &GlobalOpts) -> Result<(), CliError> {
    util::require_root("local-only")?;
    let outcome = controller.local_only().await?;
    util::report_change(
        global,
        &outcome,
        "local-only mode: LAN clients can reach local services but not the internet",
    )
}

pub async fn reset(controller: &Controller, global: &GlobalOpts) -> Result<(), CliError> {
    util::require_root("reset")?;
    if !util::confirm(
        "Rebuild LAN connections, dnsmasq and firewall from scratch?",
        "reset",
        global.yes,
    )? {
        return Ok(());
    }
    let outcome = controller.reset().await?;
    util::report_change(global, &outcome, "network reset to normal sharing")
}

/// Run until SIGINT/SIGTERM. A signal never interrupts an apply in progress.
pub async fn monitor(controller: &Controller) -> Result<(), CliError> {
    util::require_root("monitor")?;
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("shutdown signal received");
        trigger.cancel();
    });
    controller.monitor(cancel).await?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
