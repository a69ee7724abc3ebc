//! The `palisade plan` subcommand.

use std::path::PathBuf;

use clap::Args;
use color_eyre::eyre::{OptionExt, Result};
use palisade_context::{AppIdentity, HostLayout, plan_exports};

use crate::load;

/// Print the mounts a sandbox launcher would set up on this host.
///
/// Nothing is mounted or created; paths are only listed and checked for
/// existence.
#[derive(Args)]
pub struct PlanArgs {
    /// Metadata documents, lowest priority first.
    #[arg(required = true)]
    pub metadata: Vec<PathBuf>,

    /// Application id: applies its overrides and plans its data directory.
    #[arg(long)]
    pub app_id: Option<String>,

    /// Output as JSON.
    #[arg(long)]
    pub json: bool,
}

/// Execute the plan command.
pub fn execute(args: &PlanArgs) -> Result<()> {
    let ctx = load::load_context(&args.metadata, args.app_id.as_deref())?;
    let host = HostLayout::from_env().ok_or_eyre("cannot determine the home directory")?;
    let app = args
        .app_id
        .as_deref()
        .map(|id| AppIdentity::under_home(id, &host.home));

    let ops = plan_exports(&ctx, &host, app.as_ref());

    if args.json {
        println!("{}", serde_json::to_string_pretty(&ops)?);
    } else {
        for op in &ops {
            println!("{op}");
        }
    }

    Ok(())
}
