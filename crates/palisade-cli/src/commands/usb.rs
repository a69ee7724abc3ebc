//! The `palisade usb` subcommand.

use std::path::PathBuf;

use clap::Args;
use color_eyre::eyre::{Result, WrapErr};
use palisade_context::Context;

/// Parse a USB list file and print its canonical queries.
///
/// Each line holds `;`-separated queries; `!` hides a query and `#`
/// starts a comment. Output is one query per line, hidden ones last.
#[derive(Args)]
pub struct UsbArgs {
    /// The USB list file.
    pub list: PathBuf,
}

/// Execute the usb command.
pub fn execute(args: &UsbArgs) -> Result<()> {
    let contents = std::fs::read_to_string(&args.list)
        .wrap_err_with(|| format!("failed to read {}", args.list.display()))?;

    let mut ctx = Context::default();
    ctx.add_usb_list(&contents)?;

    for query in ctx.usb().enumerable.keys() {
        println!("{query}");
    }
    for query in ctx.usb().hidden.keys() {
        println!("!{query}");
    }

    Ok(())
}
