//! `dpnet query FIELD` -- one value on stdout for shell scripts.

use dpnet_core::{Controller, QueryField};

use crate::cli::{QueryArgs, QueryFieldArg};
use crate::error::CliError;

impl From<QueryFieldArg> for QueryField {
    fn from(arg: QueryFieldArg) -> Self {
        match arg {
            QueryFieldArg::Mode => Self::Mode,
            QueryFieldArg::Control => Self::Control,
            QueryFieldArg::Sharing => Self::Sharing,
            QueryFieldArg::WanPrimary => Self::WanPrimary,
            QueryFieldArg::WanSecondary => Self::WanSecondary,
            QueryFieldArg::WanAvailable => Self::WanAvailable,
            QueryFieldArg::Lan => Self::Lan,
            QueryFieldArg::Interfaces => Self::Interfaces,
            QueryFieldArg::HotspotSsid => Self::HotspotSsid,
        }
    }
}

/// Always plain text; an unset field prints an empty line.
pub async fn handle(controller: &Controller, args: QueryArgs) -> Result<(), CliError> {
    let value = controller.query(args.field.into()).await?;
    println!("{value}");
    Ok(())
}
