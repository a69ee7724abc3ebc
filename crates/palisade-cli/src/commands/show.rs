//! The `palisade show` subcommand.
//!
//! Merges metadata documents in order and prints the result.

use std::path::PathBuf;

use clap::Args;
use color_eyre::eyre::Result;
use palisade_context::NamedFamily;

use crate::{host, load};

/// Merge metadata documents and print the resulting context.
///
/// Documents are applied lowest priority first, so later ones override
/// earlier ones.
#[derive(Args)]
pub struct ShowArgs {
    /// Metadata documents, lowest priority first.
    #[arg(required = true)]
    pub metadata: Vec<PathBuf>,

    /// Layer the system and user overrides for this application on top.
    #[arg(long)]
    pub app_id: Option<String>,

    /// Leave out explicit denials.
    #[arg(long, conflicts_with = "flags")]
    pub flatten: bool,

    /// Print command-line flags instead of a document.
    #[arg(long)]
    pub flags: bool,

    /// Also print the sockets, devices and policy values in effect on this host.
    #[arg(long)]
    pub effective: bool,
}

/// Execute the show command.
pub fn execute(args: &ShowArgs) -> Result<()> {
    let ctx = load::load_context(&args.metadata, args.app_id.as_deref())?;

    if args.flags {
        for flag in ctx.to_flags() {
            println!("{flag}");
        }
    } else {
        print!("{}", ctx.save_metadata(args.flatten).render()?);
    }

    if args.effective {
        let sockets: Vec<_> = ctx
            .compute_sockets(host::evaluate)
            .into_iter()
            .map(NamedFamily::name)
            .collect();
        let devices: Vec<_> = ctx
            .compute_devices(host::evaluate)
            .into_iter()
            .map(NamedFamily::name)
            .collect();
        println!();
        println!("# granted sockets: {}", sockets.join(", "));
        println!("# granted devices: {}", devices.join(", "));
        let policy = ctx.generic_policy();
        for (key, _) in policy.iter() {
            let values: Vec<_> = policy.effective(key).collect();
            if !values.is_empty() {
                println!("# policy {key}: {}", values.join(", "));
            }
        }
    }

    Ok(())
}
