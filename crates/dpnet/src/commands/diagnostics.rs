//! `dpnet diagnostics`.

use dpnet_core::{Controller, DiagnosticKind, Section};

use crate::cli::{DiagnosticArg, DiagnosticsArgs, GlobalOpts, OutputFormat};
use crate::error::CliError;
use crate::output;

impl From<DiagnosticArg> for DiagnosticKind {
    fn from(arg: DiagnosticArg) -> Self {
        match arg {
            DiagnosticArg::Connectivity => Self::Connectivity,
            DiagnosticArg::Routes => Self::Routes,
            DiagnosticArg::Firewall => Self::Firewall,
            DiagnosticArg::Dns => Self::Dns,
            DiagnosticArg::All => Self::All,
        }
    }
}

fn render_text(sections: &[Section], color: bool) -> String {
    sections
        .iter()
        .map(|s| {
            let mut block = format!("[{}] {}", output::health(s.healthy, color), s.kind);
            for line in &s.details {
                block.push_str("\n  ");
                block.push_str(line);
            }
            block
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

pub async fn handle(controller: &Controller, args: DiagnosticsArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let sections = controller.diagnostics(args.kind.into()).await?;
    let out = match global.output {
        OutputFormat::Table => render_text(&sections, output::should_color(global.color)),
        OutputFormat::Plain => sections
            .iter()
            .map(|s| format!("{} {}", s.kind, if s.healthy { "ok" } else { "fail" }))
            .collect::<Vec<_>>()
            .join("\n"),
        format => output::render_single(format, &sections, |_| String::new(), |_| String::new())?,
    };
    output::print_output(&out, global.quiet);
    Ok(())
}
