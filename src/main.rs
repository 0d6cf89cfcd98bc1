use anyhow::{Context, Result};
use petra_alarms::actions::rows_to_json;
use petra_alarms::{build_provider, logging, AlarmQuery, Config, Engine, SignalBus};
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    let mut args = std::env::args().skip(1);
    let config_path = args.next();
    let flags: Vec<String> = args.collect();
    let save_on_exit = flags.iter().any(|arg| arg == "--save");
    let list_open = flags.iter().any(|arg| arg == "--open");

    let config = match &config_path {
        Some(path) => Config::from_file(path).with_context(|| format!("loading {}", path))?,
        None => Config::default(),
    };
    logging::init(config.logging.level)?;
    info!("PETRA alarms v{} starting", petra_alarms::VERSION);

    let provider = build_provider(&config.provider)
        .await
        .context("opening the alarm record store")?;
    let bus = SignalBus::new();
    let engine = Engine::from_config(&config, provider, Arc::new(bus.clone()))
        .await
        .context("building the alarm tree")?;
    engine.start().await.context("starting the alarm engine")?;

    if let Err(e) = engine.update_counts(true).await {
        error!("Counting alarm records failed: {}", e);
    }
    let counts = engine.counts();
    info!(
        "Engine running with {} open alarms of {} records",
        counts.open, counts.total
    );

    if list_open {
        // Print the open records and exit without waiting for a signal
        let rows = engine.get_alarm_page(&AlarmQuery::open(None), 0, None).await?;
        println!("{}", rows_to_json(&rows)?);
        engine.stop().await;
        return Ok(());
    }

    signal::ctrl_c().await?;
    info!("Received shutdown signal");

    // Snapshot before stopping; stop tears down the tree
    let mut snapshot = engine.snapshot_config();
    snapshot.provider = config.provider.clone();
    engine.stop().await;

    if save_on_exit {
        if let Some(path) = &config_path {
            match snapshot.to_file(path) {
                Ok(()) => info!("Saved alarm tree to {}", path),
                Err(e) => error!("Saving alarm tree to {} failed: {}", path, e),
            }
        }
    }

    info!("Engine stopped normally");
    Ok(())
}
