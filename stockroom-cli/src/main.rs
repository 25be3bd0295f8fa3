//! Stockroom: catalog reconciliation CLI.
//!
//! # Usage
//!
//! ```text
//! stockroom init <dir>
//! stockroom validate [--config <path>]
//! stockroom sync [--config <path>] [--dry-run] [--allow-empty-sweep] [--audit] [--json]
//! ```

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{init::InitArgs, sync::SyncArgs, validate::ValidateArgs};

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "stockroom",
    version,
    about = "Reconcile a product manifest with the CDN, payment catalog and database",
    long_about = None,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Scaffold a config, an empty manifest and a media directory.
    Init(InitArgs),

    /// Load and validate the manifest without contacting anything remote.
    Validate(ValidateArgs),

    /// Run the reconciliation pipeline.
    Sync(SyncArgs),
}

/// Log records go to stderr so `--json` output on stdout stays parseable.
fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    match cli.command {
        Commands::Init(args) => args.run(),
        Commands::Validate(args) => args.run(),
        Commands::Sync(args) => args.run(),
    }
}
