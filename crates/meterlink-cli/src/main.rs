mod config;
mod dataset;
mod display;

use std::fs::OpenOptions;
use std::path::Path;
use std::sync::{Arc, Mutex};

use anyhow::Context;
use chrono::Utc;
use clap::Parser;
use meterlink_core::{Anonymizer, ContractSource, DatasetEntry, RunReport};
use meterlink_store::DuckStore;
use meterlink_sync::{AnalyticsClient, MeteringClient, SyncEngine, SyncOptions, plan_contract};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::{Cli, LogLevel};
use crate::dataset::JsonDataset;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(cli.log_level, cli.log_file.as_deref())?;
    info!("meterlink v{}", env!("CARGO_PKG_VERSION"));

    let anonymizer = Anonymizer::new(&cli.anonymize_key);
    let entries = JsonDataset::new(&cli.dataset, anonymizer).contracts()?;
    info!(rows = entries.len(), dataset = %cli.dataset.display(), "loaded contract dataset");

    let store = Arc::new(
        DuckStore::open_persistent(&cli.store)
            .with_context(|| format!("opening store {}", cli.store.display()))?,
    );
    let options = cli.sync_options();

    if cli.dry_run {
        return dry_run(&store, &entries, &options).await;
    }

    let analytics = Arc::new(AnalyticsClient::new(cli.api.config()?)?);
    let metering = Arc::new(MeteringClient::new(cli.metering.config()?)?);
    let engine = SyncEngine::new(
        analytics.clone(),
        metering,
        analytics,
        store.clone(),
        options,
    );

    let now = Utc::now();
    let report = RunReport::start(now, entries.len());
    store.save_report(&report).context("saving run report")?;

    let report = engine.run_with_report(report, entries, now).await;
    store.save_report(&report).context("saving run report")?;

    display::print_summary(&report);
    Ok(())
}

/// Print each processable contract's fetch plan. Nothing is fetched or written.
async fn dry_run(
    store: &DuckStore,
    entries: &[DatasetEntry],
    options: &SyncOptions,
) -> anyhow::Result<()> {
    let now = Utc::now();
    for entry in entries {
        match entry {
            Err(e) => warn!(contract = %e.contract(), error = %e, "contract row rejected"),
            Ok(contract) if !contract.issues().is_empty() => {
                warn!(contract = %contract.id(), "contract will not be processed");
            }
            Ok(contract) => {
                let plans = plan_contract(store, contract, options, now).await?;
                display::print_plan(contract.id(), &plans);
            }
        }
    }
    Ok(())
}

fn init_tracing(level: LogLevel, log_file: Option<&Path>) -> anyhow::Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.directives()));

    let file_layer = match log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("opening log file {}", path.display()))?;
            Some(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .with(file_layer)
        .init();
    Ok(())
}
