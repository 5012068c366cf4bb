//! Push interface towards the display surface.

use serde::Serialize;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, Mutex};
use tracing::{debug, warn};

use crate::config::AppConfig;
use crate::topic::ResolvedTopic;

/// A single change the display surface has to render.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum DisplayEvent {
    MqttStatus(bool),
    MqttTopic(ResolvedTopic),
    IncomingCall(bool),
    InMeeting(bool),
    Config(AppConfig),
    NetworkOnline(bool),
}

impl DisplayEvent {
    pub fn name(&self) -> &'static str {
        match self {
            DisplayEvent::MqttStatus(_) => "mqtt-status",
            DisplayEvent::MqttTopic(_) => "mqtt-topic",
            DisplayEvent::IncomingCall(_) => "incoming-call",
            DisplayEvent::InMeeting(_) => "in-meeting",
            DisplayEvent::Config(_) => "config",
            DisplayEvent::NetworkOnline(_) => "network-online",
        }
    }
}

/// Last known value of every signal, for surfaces that poll.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DisplaySnapshot {
    pub mqtt_connected: bool,
    pub topic: Option<String>,
    pub hostname: String,
    pub incoming_call: bool,
    pub in_meeting: bool,
    pub network_online: bool,
}

impl DisplaySnapshot {
    pub fn new(hostname: &str) -> Self {
        Self {
            mqtt_connected: false,
            topic: None,
            hostname: hostname.to_string(),
            incoming_call: false,
            in_meeting: false,
            network_online: true,
        }
    }

    pub fn apply(&mut self, event: &DisplayEvent) {
        match event {
            DisplayEvent::MqttStatus(ok) => self.mqtt_connected = *ok,
            DisplayEvent::MqttTopic(resolved) => {
                self.topic = resolved.topic.clone();
                self.hostname = resolved.hostname.clone();
            }
            DisplayEvent::IncomingCall(active) => self.incoming_call = *active,
            DisplayEvent::InMeeting(active) => self.in_meeting = *active,
            DisplayEvent::NetworkOnline(online) => self.network_online = *online,
            DisplayEvent::Config(_) => {}
        }
    }
}

pub type SharedSnapshot = Arc<Mutex<DisplaySnapshot>>;

/// Fan-out of display events to any number of subscribers.
#[derive(Clone)]
pub struct DisplayBus {
    events: broadcast::Sender<DisplayEvent>,
    snapshot: SharedSnapshot,
}

impl DisplayBus {
    pub fn new(hostname: &str, capacity: usize) -> Self {
        let (events, _) = broadcast::channel(capacity);
        Self {
            events,
            snapshot: Arc::new(Mutex::new(DisplaySnapshot::new(hostname))),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DisplayEvent> {
        self.events.subscribe()
    }

    /// A subscription that resyncs from the snapshot when it falls behind.
    pub fn feed(&self) -> DisplayFeed {
        DisplayFeed {
            rx: self.events.subscribe(),
            snapshot: self.snapshot.clone(),
        }
    }

    pub async fn snapshot(&self) -> DisplaySnapshot {
        self.snapshot.lock().await.clone()
    }

    pub async fn publish(&self, event: DisplayEvent) {
        self.snapshot.lock().await.apply(&event);
        debug!("Display event: {}", event.name());
        // No subscribers is fine, the snapshot still holds the value.
        let _ = self.events.send(event);
    }

    /// Drains `rx` into the bus until every sender is gone.
    pub async fn forward(self, mut rx: mpsc::UnboundedReceiver<DisplayEvent>) {
        while let Some(event) = rx.recv().await {
            self.publish(event).await;
        }
    }
}

/// One item of a [`DisplayFeed`].
#[derive(Debug, Clone, PartialEq)]
pub enum FeedItem {
    Event(DisplayEvent),
    Snapshot(DisplaySnapshot),
}

pub struct DisplayFeed {
    rx: broadcast::Receiver<DisplayEvent>,
    snapshot: SharedSnapshot,
}

impl DisplayFeed {
    /// Next item to push, `None` once the bus is gone. Events dropped because
    /// the subscriber lagged are replaced by the current snapshot.
    pub async fn next(&mut self) -> Option<FeedItem> {
        match self.rx.recv().await {
            Ok(event) => Some(FeedItem::Event(event)),
            Err(RecvError::Closed) => None,
            Err(RecvError::Lagged(skipped)) => {
                warn!("Display subscriber lagged by {} events, resending snapshot.", skipped);
                Some(FeedItem::Snapshot(self.snapshot.lock().await.clone()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_updates_snapshot_and_subscribers() {
        let bus = DisplayBus::new("room-pc", 8);
        let mut rx = bus.subscribe();

        bus.publish(DisplayEvent::MqttStatus(true)).await;
        bus.publish(DisplayEvent::MqttTopic(ResolvedTopic {
            topic: Some("teams/room-pc".to_string()),
            hostname: "room-pc".to_string(),
        }))
        .await;

        assert_eq!(rx.recv().await.unwrap(), DisplayEvent::MqttStatus(true));
        assert!(matches!(rx.recv().await.unwrap(), DisplayEvent::MqttTopic(_)));

        let snapshot = bus.snapshot().await;
        assert!(snapshot.mqtt_connected);
        assert_eq!(snapshot.topic.as_deref(), Some("teams/room-pc"));
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_not_an_error() {
        let bus = DisplayBus::new("room-pc", 8);
        bus.publish(DisplayEvent::IncomingCall(true)).await;
        assert!(bus.snapshot().await.incoming_call);
    }

    #[test]
    fn events_serialize_with_kebab_case_tag() {
        let json = serde_json::to_value(DisplayEvent::IncomingCall(true)).unwrap();
        assert_eq!(json, serde_json::json!({"event": "incoming-call", "data": true}));
    }

    #[tokio::test]
    async fn lagging_feed_resyncs_from_snapshot() {
        let bus = DisplayBus::new("room-pc", 2);
        let mut feed = bus.feed();

        bus.publish(DisplayEvent::MqttStatus(true)).await;
        bus.publish(DisplayEvent::IncomingCall(true)).await;
        bus.publish(DisplayEvent::InMeeting(true)).await;
        bus.publish(DisplayEvent::IncomingCall(false)).await;

        let expected = bus.snapshot().await;
        assert!(expected.mqtt_connected);
        assert!(expected.in_meeting);
        assert_eq!(feed.next().await, Some(FeedItem::Snapshot(expected)));

        // The feed carries on with what is still buffered.
        assert_eq!(
            feed.next().await,
            Some(FeedItem::Event(DisplayEvent::InMeeting(true)))
        );
        assert_eq!(
            feed.next().await,
            Some(FeedItem::Event(DisplayEvent::IncomingCall(false)))
        );
    }

    #[tokio::test]
    async fn feed_ends_when_bus_is_dropped() {
        let bus = DisplayBus::new("room-pc", 4);
        let mut feed = bus.feed();
        drop(bus);
        assert_eq!(feed.next().await, None);
    }
}
