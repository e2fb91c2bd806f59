use clap::Parser;
use colored::Colorize;
use tracing_subscriber::EnvFilter;

use mosy::cli::Cli;
use mosy::config::Config;
use mosy::control::{ControlOptions, ControlPlaneClient};
use mosy::error::Result;
use mosy::provision;
use mosy::sanitize::{CleanupMode, MongoStore, Sanitizer};
use mosy::supervisor::MongosyncProcess;
use mosy::workflow::Workflow;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    if let Err(err) = run(cli).await {
        eprintln!("{} {err}", "migration failed:".red().bold());
        std::process::exit(1);
    }
    println!("{}", "migration complete".green().bold());
}

async fn run(cli: Cli) -> Result<()> {
    let config = Config::resolve(cli)?;

    provision::ensure_binary(&config.binary_path, &config.download_url).await?;

    let process = MongosyncProcess::new(
        config.binary_path.clone(),
        config.source_uri.clone(),
        config.destination_uri.clone(),
        config.settle_window,
    );
    let control = ControlPlaneClient::new(ControlOptions::from(&config))?;
    let sanitizer = match config.cleanup {
        CleanupMode::Off => None,
        CleanupMode::Standard | CleanupMode::Thorough => Some(Sanitizer::new(
            MongoStore::connect(&config.destination_uri).await?,
        )),
    };

    let mut workflow = Workflow::new(
        process,
        control,
        sanitizer,
        config.cleanup,
        config.wait_deadline,
    );
    workflow.run().await
}
