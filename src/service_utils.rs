use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration};
use tracing::{error, info, warn};

use crate::config::Settings;
use crate::controller::DisplayController;
use crate::display::{DisplayBus, DisplayEvent};
use crate::ingestion::{Ingestion, IngestionHandle};
use crate::transport::Transport;

/// Spawns the ingestion task plus the task forwarding its events onto `bus`.
pub fn start_ingestion<T: Transport>(
    transport: T,
    settings: &Settings,
    hostname: String,
    bus: DisplayBus,
) -> (IngestionHandle, JoinHandle<()>) {
    let (display_tx, display_rx) = mpsc::unbounded_channel();
    let ingestion = Ingestion::new(
        transport,
        hostname,
        settings.default_credentials.clone(),
        display_tx,
    );
    tokio::spawn(bus.forward(display_rx));
    ingestion.spawn()
}

/// Periodically checks that `url` answers and publishes `network-online` on change.
pub fn start_network_probe(bus: DisplayBus, url: String, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let client = match reqwest::Client::builder().timeout(interval).build() {
            Ok(client) => client,
            Err(e) => {
                error!("Network probe disabled, HTTP client failed to build: {}", e);
                return;
            }
        };

        let mut online = true;
        loop {
            let reachable = match client.get(&url).send().await {
                Ok(_) => true,
                Err(e) => {
                    if online {
                        warn!("Network probe to {} failed: {}", url, e);
                    }
                    false
                }
            };

            if reachable != online {
                online = reachable;
                if online {
                    info!("Network probe to {} recovered.", url);
                }
                bus.publish(DisplayEvent::NetworkOnline(online)).await;
            }

            sleep(interval).await;
        }
    })
}

/// Waits for ctrl-c, then tears the MQTT connection down.
pub async fn handle_shutdown(controller: Arc<DisplayController>) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to handle termination signal: {:?}", e);
    }

    info!("Room display is shutting down...");
    controller.shutdown();
}
