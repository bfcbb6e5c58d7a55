use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use opsdesk::cli::{self, Cli};
use opsdesk::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.config.log_level);

    cli.config.validate();
    cli.config.log_startup_warnings();

    let state = AppState::start(cli.config)
        .await
        .context("failed to start session")?;

    cli::run(&state, cli.command).await
}

fn init_tracing(fallback_level: &str) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback_level));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .compact()
        .with_writer(std::io::stderr)
        .init();
}
