//! The `palisade check-update` subcommand.
//!
//! Compares the permissions of two versions of an application and exits
//! with status 2 when the new one grants anything the old one did not.

use std::path::PathBuf;
use std::process;

use clap::Args;
use color_eyre::eyre::Result;
use palisade_context::{diff_permissions, format_report};

use crate::load;

/// Exit status when the new version needs more permissions.
const ESCALATION_EXIT: i32 = 2;

/// Report permissions a new version grants over an old one.
#[derive(Args)]
pub struct CheckUpdateArgs {
    /// Metadata of the installed version.
    pub old: PathBuf,

    /// Metadata of the candidate update.
    pub new: PathBuf,

    /// Output as JSON.
    #[arg(long)]
    pub json: bool,
}

/// Execute the check-update command.
pub fn execute(args: &CheckUpdateArgs) -> Result<()> {
    let old = load::load_context(std::slice::from_ref(&args.old), None)?;
    let new = load::load_context(std::slice::from_ref(&args.new), None)?;

    let diff = diff_permissions(&old, &new);

    if args.json {
        println!("{}", serde_json::to_string_pretty(&diff)?);
    } else if diff.is_empty() {
        println!("no new permissions");
    } else {
        println!("The update requests new permissions:\n");
        print!("{}", format_report(&diff));
    }

    if !diff.is_empty() {
        process::exit(ESCALATION_EXIT);
    }

    Ok(())
}
