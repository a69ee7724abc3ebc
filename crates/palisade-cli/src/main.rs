//! Palisade CLI: inspect sandbox permission contexts.
//!
//! Merge metadata layers, compare permission sets across updates, and
//! preview what a sandbox launcher would mount.

mod commands;
mod host;
mod load;

use clap::Parser;
use color_eyre::eyre::Result;

/// Palisade: permission contexts for sandboxed desktop applications.
///
/// Every subcommand reads TOML metadata documents with `[Context]`,
/// `[Environment]`, bus policy, generic policy and USB groups.
#[derive(Parser)]
#[command(name = "palisade", version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging (repeat for more detail: -v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Output logs as JSON (for machine consumption).
    #[arg(long, global = true)]
    json_logs: bool,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Merge metadata documents and print the resulting context.
    Show(commands::show::ShowArgs),
    /// Report permissions a new version grants over an old one.
    CheckUpdate(commands::check_update::CheckUpdateArgs),
    /// Print the mounts a sandbox launcher would set up.
    Plan(commands::plan::PlanArgs),
    /// Parse a USB list file and print its canonical queries.
    Usb(commands::usb::UsbArgs),
}

fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();

    // Initialize tracing subscriber based on verbosity
    let filter = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true);

    if cli.json_logs {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    match cli.command {
        Commands::Show(args) => commands::show::execute(&args),
        Commands::CheckUpdate(args) => commands::check_update::execute(&args),
        Commands::Plan(args) => commands::plan::execute(&args),
        Commands::Usb(args) => commands::usb::execute(&args),
    }
}
