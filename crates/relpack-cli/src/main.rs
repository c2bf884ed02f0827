//! relpack - release packaging CLI

use anyhow::Result;
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use relpack_cli::cmd;
use relpack_cli::{Cli, Commands, write_manifest};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let ctx = cli.context(std::env::vars().collect())?;

    let cancel = ctx.cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, cancelling in-flight work");
            cancel.cancel();
        }
    });

    let result = match cli.command {
        Commands::Package => cmd::package::package(&ctx).await,
        Commands::Publish => cmd::publish::publish(&ctx).await,
        Commands::All => match cmd::package::package(&ctx).await {
            Ok(()) => cmd::publish::publish(&ctx).await,
            Err(e) => Err(e),
        },
    };

    // Partial results are still worth recording.
    let manifest = write_manifest(&ctx)?;
    info!(path = %manifest.display(), artifacts = ctx.artifacts.len(), "wrote artifact manifest");
    result
}
