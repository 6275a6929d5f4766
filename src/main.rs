use std::sync::Arc;

use tokio::io::BufReader;
use tracing::info;

use tireslot::compactor::run_compactor;
use tireslot::config::Config;
use tireslot::driver::Driver;
use tireslot::engine::Engine;
use tireslot::notify::{run_dispatcher, LogSink, NotifyHub};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .init();

    let config = Config::from_env();
    tireslot::observability::init(config.metrics_port)?;
    std::fs::create_dir_all(&config.data_dir)?;

    let hub = Arc::new(NotifyHub::new(config.notify_capacity));
    let engine = Arc::new(Engine::new(config.wal_path(), hub.clone())?);

    info!("tireslot ready");
    info!("  wal: {}", config.wal_path().display());
    info!(
        "  compaction: every {}s past {} appends",
        config.compact_interval.as_secs(),
        config.compact_threshold
    );
    info!(
        "  metrics: {}",
        config
            .metrics_port
            .map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics"))
    );

    tokio::spawn(run_dispatcher(hub.subscribe(), Arc::new(LogSink)));
    tokio::spawn(run_compactor(
        engine.clone(),
        config.compact_threshold,
        config.compact_interval,
    ));

    let driver = Driver::new(engine);
    tokio::select! {
        result = driver.serve(BufReader::new(tokio::io::stdin()), tokio::io::stdout()) => {
            result?;
            info!("input closed");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received");
        }
    }

    info!("tireslot stopped");
    Ok(())
}
