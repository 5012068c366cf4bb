use tokio::sync::Mutex;
use tokio::task;
use tracing::{error, info};

use crate::config::{AppConfig, ConfigPatch, ConfigStore};
use crate::display::{DisplayBus, DisplayEvent};
use crate::ingestion::IngestionHandle;

/// Commands the display surface may issue, and the config they act on.
pub struct DisplayController {
    store: ConfigStore,
    config: Mutex<AppConfig>,
    ingestion: IngestionHandle,
    bus: DisplayBus,
}

impl DisplayController {
    pub fn new(store: ConfigStore, config: AppConfig, ingestion: IngestionHandle, bus: DisplayBus) -> Self {
        Self {
            store,
            config: Mutex::new(config),
            ingestion,
            bus,
        }
    }

    pub fn bus(&self) -> &DisplayBus {
        &self.bus
    }

    pub async fn get_config(&self) -> AppConfig {
        self.config.lock().await.clone()
    }

    /// Starts ingestion with the current config.
    pub async fn start(&self) {
        // Sent under the lock so commands reach ingestion in config order.
        let current = self.config.lock().await;
        self.ingestion.start_or_restart(current.connection());
    }

    /// Merges `patch`, persists the result and restarts ingestion with it.
    ///
    /// Returns `false` only when the store could not be written; in that case
    /// neither the in-memory config nor the connection changes. Whether the
    /// new broker is reachable is reported later through `mqtt-status`.
    pub async fn set_config(&self, patch: ConfigPatch) -> bool {
        let mut current = self.config.lock().await;
        let merged = current.merge(patch);

        let store = self.store.clone();
        let to_save = merged.clone();
        match task::spawn_blocking(move || store.save(&to_save)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                error!("Config save error ({}): {}", self.store.path().display(), e);
                return false;
            }
            Err(e) => {
                error!("Config save task failed: {}", e);
                return false;
            }
        }

        info!("Config updated, restarting ingestion.");
        *current = merged.clone();
        self.ingestion.start_or_restart(merged.connection());
        drop(current);

        self.bus.publish(DisplayEvent::Config(merged)).await;
        true
    }

    pub async fn disable_ingestion(&self, disable: bool) {
        if disable {
            info!("Ingestion disabled by display.");
            let _current = self.config.lock().await;
            self.ingestion.stop();
        } else {
            info!("Ingestion enabled by display.");
            self.start().await;
        }
    }

    pub fn shutdown(&self) {
        self.ingestion.shutdown();
    }
}
