use room_display::config::{ConfigStore, Settings};
use room_display::controller::DisplayController;
use room_display::display::DisplayBus;
use room_display::mqtt_service::MqttTransport;
use room_display::rest_server::run_rest_server;
use room_display::service_utils::{handle_shutdown, start_ingestion, start_network_probe};
use std::sync::Arc;
use tokio::time::Duration;
use tracing::{error, info};

const DISPLAY_EVENT_CAPACITY: usize = 64;

#[tokio::main]
async fn main() {
    // Load configuration
    let settings = match Settings::from_env() {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Error loading configuration: {}", e);
            return;
        }
    };

    // Initialize logging
    tracing_subscriber::fmt()
        .with_max_level(settings.log_level)
        .init();

    let store = ConfigStore::new(settings.config_path.clone());
    let config = store.load();
    info!("Loaded room config for '{}' from {}.", config.room, store.path().display());

    let hostname = settings.hostname();
    info!("Host identity: {}", hostname);

    let bus = DisplayBus::new(&hostname, DISPLAY_EVENT_CAPACITY);

    let (ingestion, ingestion_task) = start_ingestion(
        MqttTransport::from_settings(&settings),
        &settings,
        hostname,
        bus.clone(),
    );

    let controller = Arc::new(DisplayController::new(store, config, ingestion, bus.clone()));
    controller.start().await;

    start_network_probe(
        bus,
        settings.ping_url.clone(),
        Duration::from_millis(settings.ping_interval_ms),
    );

    // Start REST API server
    let rest_api_task = tokio::spawn(run_rest_server(controller.clone()));

    handle_shutdown(controller).await;

    if let Err(e) = ingestion_task.await {
        error!("Ingestion task failed: {:?}", e);
    }
    let _ = tokio::join!(rest_api_task);
    info!("All services shut down successfully.");
}
