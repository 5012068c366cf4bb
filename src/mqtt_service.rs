use rumqttc::{
    AsyncClient, ConnectReturnCode, ConnectionError, Event, EventLoop, MqttOptions, Packet, QoS,
    SubscribeReasonCode,
};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration};
use tokio_retry::strategy::ExponentialBackoff;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::config::Settings;
use crate::transport::{ConnectOptions, Connection, Transport, TransportError, TransportEvent};

pub const DEFAULT_MQTT_PORT: u16 = 1883;
const REQUEST_CAPACITY: usize = 10;
const EVENT_BUFFER: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerAddress {
    pub host: String,
    pub port: u16,
}

/// Accepts `mqtt://host:port`, `tcp://host:port`, `host:port` and bare `host`.
pub fn parse_broker(raw: &str) -> Result<BrokerAddress, TransportError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(TransportError::InvalidBroker(
            raw.to_string(),
            "address is empty".to_string(),
        ));
    }

    let with_scheme = if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("mqtt://{}", trimmed)
    };
    let url = Url::parse(&with_scheme)
        .map_err(|e| TransportError::InvalidBroker(raw.to_string(), e.to_string()))?;

    match url.scheme() {
        "mqtt" | "tcp" => {}
        other => return Err(TransportError::UnsupportedScheme(other.to_string())),
    }

    let host = url
        .host_str()
        .map(|h| h.trim_matches(|c| c == '[' || c == ']'))
        .filter(|h| !h.is_empty())
        .ok_or_else(|| {
            TransportError::InvalidBroker(raw.to_string(), "missing host".to_string())
        })?;

    Ok(BrokerAddress {
        host: host.to_string(),
        port: url.port().unwrap_or(DEFAULT_MQTT_PORT),
    })
}

/// rumqttc backed transport. The event loop is polled on its own task and is
/// polled again after every connection error, which makes rumqttc reconnect;
/// the delay between attempts grows exponentially up to `reconnect_max`.
#[derive(Debug, Clone)]
pub struct MqttTransport {
    reconnect_interval: Duration,
    reconnect_max: Duration,
    keep_alive: Duration,
}

impl MqttTransport {
    pub fn new(reconnect_interval: Duration, reconnect_max: Duration) -> Self {
        Self {
            reconnect_interval,
            reconnect_max,
            keep_alive: Duration::from_secs(10),
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(
            Duration::from_millis(settings.reconnect_interval_ms),
            Duration::from_millis(settings.reconnect_max_ms),
        )
    }

    /// Reconnect delays: `reconnect_interval`, then doubling, capped.
    pub fn reconnect_delays(&self) -> impl Iterator<Item = Duration> {
        let half = (self.reconnect_interval.as_millis() as u64 / 2).max(1);
        ExponentialBackoff::from_millis(2)
            .factor(half)
            .max_delay(self.reconnect_max)
    }
}

impl Transport for MqttTransport {
    type Connection = MqttConnection;

    fn open(
        &self,
        options: &ConnectOptions,
    ) -> Result<(MqttConnection, mpsc::Receiver<TransportEvent>), TransportError> {
        let broker = parse_broker(&options.broker)?;
        let runtime = Handle::try_current().map_err(|e| TransportError::Unavailable(e.to_string()))?;

        debug!("Configuring MQTT broker at {}:{}...", broker.host, broker.port);

        let mut mqtt_options = MqttOptions::new(options.client_id.clone(), broker.host, broker.port);
        mqtt_options.set_keep_alive(self.keep_alive);
        mqtt_options.set_clean_session(true);

        if let Some(credentials) = &options.credentials {
            mqtt_options.set_credentials(
                credentials.username.clone(),
                credentials.password.clone(),
            );
        }

        let (client, eventloop) = AsyncClient::new(mqtt_options, REQUEST_CAPACITY);
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let task = runtime.spawn(drive_event_loop(eventloop, tx, self.clone()));

        Ok((MqttConnection { client, task }, rx))
    }
}

pub struct MqttConnection {
    client: AsyncClient,
    task: JoinHandle<()>,
}

impl Connection for MqttConnection {
    fn subscribe(&mut self, topic: &str) -> Result<(), TransportError> {
        self.client
            .try_subscribe(topic, QoS::AtLeastOnce)
            .map_err(|e| TransportError::Request(e.to_string()))
    }

    fn force_close(&mut self) {
        // Dropping the event loop closes the socket; nothing is flushed.
        self.task.abort();
    }
}

impl Drop for MqttConnection {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// What the event loop does with one poll result.
#[derive(Debug, PartialEq, Eq)]
enum PollOutcome {
    Forward(TransportEvent),
    /// Report the failure, then `Reconnecting`, then back off and poll again.
    Retry(TransportEvent),
    /// The client handle is gone; report `Closed` and stop polling.
    Stop,
    Ignore,
}

fn map_poll_result(result: Result<Event, ConnectionError>) -> PollOutcome {
    match result {
        Ok(Event::Incoming(Packet::ConnAck(ack))) => {
            if ack.code == ConnectReturnCode::Success {
                info!("Connected to MQTT broker.");
                PollOutcome::Forward(TransportEvent::Connected)
            } else {
                PollOutcome::Forward(TransportEvent::Error(format!(
                    "connection refused: {:?}",
                    ack.code
                )))
            }
        }
        Ok(Event::Incoming(Packet::SubAck(ack))) => {
            let accepted = ack
                .return_codes
                .iter()
                .all(|code| matches!(code, SubscribeReasonCode::Success(_)));
            if accepted {
                PollOutcome::Forward(TransportEvent::Subscribed)
            } else {
                PollOutcome::Forward(TransportEvent::SubscribeFailed(format!(
                    "{:?}",
                    ack.return_codes
                )))
            }
        }
        Ok(Event::Incoming(Packet::Publish(publish))) => PollOutcome::Forward(TransportEvent::Message {
            topic: publish.topic,
            payload: publish.payload.to_vec(),
        }),
        Ok(Event::Incoming(Packet::Disconnect)) => PollOutcome::Forward(TransportEvent::Closed),
        Ok(Event::Outgoing(outgoing)) => {
            debug!("Outgoing event: {:?}", outgoing);
            PollOutcome::Ignore
        }
        Ok(event) => {
            debug!("Unhandled event: {:?}", event);
            PollOutcome::Ignore
        }
        Err(ConnectionError::RequestsDone) => {
            info!("MQTT client dropped, stopping event loop.");
            PollOutcome::Stop
        }
        Err(e @ (ConnectionError::Io(_) | ConnectionError::NetworkTimeout)) => {
            warn!("MQTT broker unreachable: {}", e);
            PollOutcome::Retry(TransportEvent::Offline)
        }
        Err(e) => {
            error!("Error in MQTT event loop: {}", e);
            PollOutcome::Retry(TransportEvent::Error(e.to_string()))
        }
    }
}

async fn drive_event_loop(
    mut eventloop: EventLoop,
    events: mpsc::Sender<TransportEvent>,
    transport: MqttTransport,
) {
    let mut delays = transport.reconnect_delays();

    loop {
        match map_poll_result(eventloop.poll().await) {
            PollOutcome::Forward(event) => {
                if event == TransportEvent::Connected {
                    delays = transport.reconnect_delays();
                }
                if events.send(event).await.is_err() {
                    debug!("Event receiver gone, stopping MQTT event loop.");
                    break;
                }
            }
            PollOutcome::Retry(failure) => {
                if events.send(failure).await.is_err() {
                    break;
                }

                let delay = delays.next().unwrap_or(transport.reconnect_max);
                warn!("Lost connection to MQTT broker. Retrying in {:?}...", delay);
                if events.send(TransportEvent::Reconnecting).await.is_err() {
                    break;
                }
                sleep(delay).await;
            }
            PollOutcome::Stop => {
                let _ = events.send(TransportEvent::Closed).await;
                break;
            }
            PollOutcome::Ignore => {}
        }
    }
}
