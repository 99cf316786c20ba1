//! PieJam CLI - demo command-line front end for the PieJam mixer engine.

mod commands;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "piejam")]
#[command(author, version, about = "PieJam audio mixer engine CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the mixer against a mock sound card until interrupted
    Run(commands::run::RunArgs),

    /// List the devices a real front end would offer
    Devices(commands::devices::DevicesArgs),

    /// Manage session files
    #[command(subcommand)]
    Session(commands::session::SessionCommand),

    /// Inspect and edit a session's mixer layout
    #[command(subcommand)]
    Mixer(commands::mixer::MixerCommand),
}

fn main() -> anyhow::Result<()> {
    use tracing_subscriber::EnvFilter;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .init();

    let cli = Cli::parse();

    tracing::debug!(command = ?std::mem::discriminant(&cli.command), "dispatching command");

    match cli.command {
        Commands::Run(args) => commands::run::run(args),
        Commands::Devices(args) => commands::devices::run(args),
        Commands::Session(cmd) => commands::session::run(cmd),
        Commands::Mixer(cmd) => commands::mixer::run(cmd),
    }
}
