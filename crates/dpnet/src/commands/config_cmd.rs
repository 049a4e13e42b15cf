//! Config subcommand handlers.

use crate::cli::{ConfigArgs, ConfigCommand, GlobalOpts, OutputFormat};
use crate::config;
use crate::error::CliError;
use crate::output;

pub fn handle(args: &ConfigArgs, global: &GlobalOpts) -> Result<(), CliError> {
    match args.command {
        ConfigCommand::Show => {
            let cfg = config::load(global)?;
            let rendered = cfg.to_redacted_toml()?;
            let out = match global.output {
                OutputFormat::Table | OutputFormat::Plain => rendered.trim_end().to_owned(),
                format => {
                    let value: toml::Value = toml::from_str(&rendered).map_err(|e| CliError::Validation {
                        field: "config".into(),
                        reason: e.to_string(),
                    })?;
                    output::render_single(format, &value, |_| String::new(), |_| String::new())?
                }
            };
            output::print_output(&out, global.quiet);
            Ok(())
        }

        ConfigCommand::Path => {
            let path = config::active_path(global);
            println!("{}", path.display());
            if !path.exists() && !global.quiet {
                eprintln!("(file not present; built-in defaults apply)");
            }
            Ok(())
        }
    }
}
