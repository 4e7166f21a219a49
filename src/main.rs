use color_eyre::{eyre::eyre, Result};
use datamanager::config::Config;
use datamanager::manager::{DataManagerHandle, ManagerSettings};
use datamanager::mqtt::{MqttConfig, MqttHandler};
use datamanager::persistence::{format_ts, SqliteStore, Store};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

const DEFAULT_HISTORY: u32 = 10;

enum Command {
    Run,
    History(u32),
}

#[tokio::main]
async fn main() -> Result<()> {
    setup()?;
    let command = parse_command()?;

    let (config, path) = Config::load_or_init().await?;
    info!("Using configuration {}", path.display());

    let store = SqliteStore::connect(&config.storage.database_url)
        .await
        .map_err(|e| eyre!("Failed to open store: {}", e))?;

    match command {
        Command::Run => run(config, Arc::new(store)).await,
        Command::History(limit) => print_history(&store, limit).await,
    }
}

fn setup() -> Result<()> {
    if std::env::var("RUST_LIB_BACKTRACE").is_err() {
        std::env::set_var("RUST_LIB_BACKTRACE", "0")
    }
    color_eyre::install()?;
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info")
    }
    setup_logging_env();
    Ok(())
}

fn setup_logging_env() {
    FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .init();
}

fn parse_command() -> Result<Command> {
    let mut args = std::env::args().skip(1);
    match args.next().as_deref() {
        None | Some("run") => Ok(Command::Run),
        Some("history") => {
            let limit = match args.next() {
                Some(raw) => raw
                    .parse()
                    .map_err(|e| eyre!("Invalid history length {:?}: {}", raw, e))?,
                None => DEFAULT_HISTORY,
            };
            Ok(Command::History(limit))
        }
        Some(other) => Err(eyre!(
            "Unknown command {:?} (expected `run` or `history [N]`)",
            other
        )),
    }
}

async fn run(config: Config, store: Arc<SqliteStore>) -> Result<()> {
    let topics = config.topics();
    let (inbound_tx, inbound_rx) = mpsc::channel(config.mqtt.channel_capacity);

    // the only fatal transport error: no broker at startup
    let mqtt = Arc::new(
        MqttHandler::connect(MqttConfig::from_config(&config, "data-manager"), inbound_tx)
            .await
            .map_err(|e| eyre!("Failed to connect to MQTT broker {}: {}", config.mqtt, e))?,
    );

    let mut manager = DataManagerHandle::start(
        "DataManager".to_string(),
        inbound_rx,
        mqtt.clone(),
        store,
        topics.clone(),
        ManagerSettings::from_config(&config),
    )
    .await
    .map_err(|e| eyre!("Failed to start data manager: {}", e))?;

    info!(
        "DataManager subscribed to {:?}, commands on {}, alerts on {}",
        topics.subscriptions(),
        topics.relay_set,
        topics.alerts
    );

    tokio::signal::ctrl_c()
        .await
        .map_err(|e| eyre!("Failed to listen for Ctrl-C: {}", e))?;
    info!("Ctrl-C received, shutting down");

    match manager.shutdown().await {
        Ok(status) => info!("Final counters: {:?}", status),
        Err(e) => error!("Data manager did not stop cleanly: {}", e),
    }
    mqtt.shutdown().await;
    Ok(())
}

async fn print_history(store: &SqliteStore, limit: u32) -> Result<()> {
    store
        .prepare()
        .await
        .map_err(|e| eyre!("Failed to prepare store: {}", e))?;

    let readings = store
        .recent_readings(limit)
        .await
        .map_err(|e| eyre!("Failed to read readings: {}", e))?;
    println!("Readings (newest first):");
    for row in readings {
        let r = row.reading;
        println!(
            "  #{:<6} {}  {:<10} T={:.2}°C H={:.2}%",
            row.id,
            format_ts(&r.timestamp),
            r.sensor_id,
            r.temperature,
            r.humidity
        );
    }

    let events = store
        .recent_events(None, limit)
        .await
        .map_err(|e| eyre!("Failed to read events: {}", e))?;
    println!("Events (newest first):");
    for row in events {
        let e = row.event;
        println!(
            "  #{:<6} {}  {:<8} {:<12} {}",
            row.id,
            format_ts(&e.timestamp),
            e.kind.as_str(),
            e.source,
            e.details
        );
    }

    store.close().await;
    Ok(())
}
