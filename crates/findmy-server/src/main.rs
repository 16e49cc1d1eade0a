use anyhow::Result;
use clap::Parser;
use findmy_config::ConfigLoader;
use findmy_server::{cli, logging, App, Cli};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();

    let config = ConfigLoader::new(&args.config_dir).load()?;
    logging::init_logging(&config.logging)?;
    tracing::debug!(config_dir = %args.config_dir.display(), "Configuration loaded");

    let app = App::open(config).await?;
    cli::run(app, &args.command).await
}
