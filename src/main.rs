use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::Parser;
use tracing::info;
use tracing_subscriber::filter::LevelFilter;

use bidflow::cli::{Cli, Command};
use bidflow::config::BidflowConfig;
use bidflow::engine::WorkflowEngine;
use bidflow::events::Event;
use bidflow::fees::FeeSchedule;
use bidflow::payments::StripeClient;
use bidflow::store::FirestoreStore;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    };
    tracing_subscriber::fmt().with_max_level(level).init();

    let config = BidflowConfig::load_from(Path::new(&cli.config))
        .with_context(|| format!("failed to load config from {}", cli.config))?;
    if config.firestore_project.is_empty() {
        bail!("firestore_project is not configured; set it in {}", cli.config);
    }

    let store = FirestoreStore::new(config.firestore_project.clone(), config.firestore_token.clone());
    let gateway = StripeClient::new(config.stripe_api_key.clone());
    let engine = WorkflowEngine::with_settings(
        store,
        gateway,
        FeeSchedule::new(config.fee_percent),
        config.currency.clone(),
        config.max_attempts,
    );

    match cli.command {
        Command::Serve => {
            let interval = Duration::from_secs(config.sweep_interval_hours * 3600);
            info!(
                interval_hours = config.sweep_interval_hours,
                "retry-sweep scheduler started"
            );
            loop {
                engine.dispatch(Event::ScheduleTick).await?;
                tokio::time::sleep(interval).await;
            }
        }
        Command::Sweep => {
            engine.dispatch(Event::ScheduleTick).await?;
        }
        Command::Settle { record_id } => {
            engine.settle(&record_id).await?;
        }
    }

    Ok(())
}
