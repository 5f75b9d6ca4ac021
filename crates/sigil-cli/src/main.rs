mod commands;
mod config;

use clap::Parser;

use config::Cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_env_filter(cli.env_filter())
        .with_target(false)
        .init();

    commands::run(cli).await
}
