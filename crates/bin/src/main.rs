use clap::Parser;
use tracing_subscriber::EnvFilter;

mod backend;
mod cli;
mod commands;

use cli::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Health and relay print their own results; keep their stderr quiet.
    let default_directive = match cli.command {
        Commands::Authority(_) | Commands::Edge(_) => "edgedir=info",
        Commands::RelayPassword(_) | Commands::Health(_) => "edgedir=warn",
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(default_directive.parse()?))
        .with_writer(std::io::stderr)
        .init();

    match &cli.command {
        Commands::Authority(args) => commands::authority::run(args).await,
        Commands::Edge(args) => commands::edge::run(args).await,
        Commands::RelayPassword(args) => commands::relay::run(args).await,
        Commands::Health(args) => commands::health::run(args).await,
    }
}
