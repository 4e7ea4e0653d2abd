use anyhow::Result;
use clap::Parser;
use stipple_server::cli::{Cli, Commands};
use stipple_server::{publish, serve};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Respect RUST_LOG if set, otherwise pick defaults from the verbose flag
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cli.verbose {
            "stipple=debug,stipple_server=debug,stipple_core=debug,stipple_storage=debug,tower_http=debug".to_string()
        } else {
            "stipple=info,stipple_server=info,stipple_core=info,stipple_storage=info,tower_http=info".to_string()
        }
    });
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(env_filter))
        .init();

    match cli.command {
        Commands::Serve(args) => serve::run(args).await,
        Commands::Publish(args) => publish::run(args).await,
    }
}
