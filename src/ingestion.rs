//! Presence event ingestion.
//!
//! [`Ingestion`] owns the single broker connection. It runs as one task and
//! handles commands and transport events strictly one after another, so no
//! state in here needs a lock. Callers talk to it through [`IngestionHandle`],
//! whose methods only enqueue a command and never wait for socket I/O.

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::{ConnectionConfig, Credentials};
use crate::display::DisplayEvent;
use crate::payload::parse_presence;
use crate::reconcile::NotifiedState;
use crate::topic::{resolve_topic, ResolvedTopic};
use crate::transport::{ConnectOptions, Connection, Transport, TransportEvent};

#[derive(Debug)]
pub enum Command {
    Start(ConnectionConfig),
    Stop,
    Shutdown,
}

/// Cheap, cloneable front of the ingestion task.
#[derive(Debug, Clone)]
pub struct IngestionHandle {
    commands: mpsc::UnboundedSender<Command>,
}

impl IngestionHandle {
    pub fn start_or_restart(&self, config: ConnectionConfig) {
        self.send(Command::Start(config));
    }

    pub fn stop(&self) {
        self.send(Command::Stop);
    }

    pub fn shutdown(&self) {
        self.send(Command::Shutdown);
    }

    fn send(&self, command: Command) {
        if let Err(e) = self.commands.send(command) {
            warn!("Ingestion task is gone, dropping {:?}", e.0);
        }
    }
}

struct ActiveConnection<C> {
    connection: C,
    events: mpsc::Receiver<TransportEvent>,
    template: String,
}

enum Step {
    Command(Option<Command>),
    Transport(Option<TransportEvent>),
}

pub struct Ingestion<T: Transport> {
    transport: T,
    hostname: String,
    default_credentials: Option<Credentials>,
    notified: NotifiedState,
    active: Option<ActiveConnection<T::Connection>>,
    display: mpsc::UnboundedSender<DisplayEvent>,
}

impl<T: Transport> Ingestion<T> {
    pub fn new(
        transport: T,
        hostname: String,
        default_credentials: Option<Credentials>,
        display: mpsc::UnboundedSender<DisplayEvent>,
    ) -> Self {
        Self {
            notified: NotifiedState::new(&hostname),
            transport,
            hostname,
            default_credentials,
            active: None,
            display,
        }
    }

    /// Spawns the ingestion task and returns its handle.
    pub fn spawn(self) -> (IngestionHandle, tokio::task::JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(self.run(rx));
        (IngestionHandle { commands: tx }, task)
    }

    pub async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        loop {
            let step = match self.active.as_mut() {
                Some(active) => tokio::select! {
                    biased;
                    command = commands.recv() => Step::Command(command),
                    event = active.events.recv() => Step::Transport(event),
                },
                None => Step::Command(commands.recv().await),
            };

            match step {
                Step::Command(Some(Command::Start(config))) => self.start_or_restart(config),
                Step::Command(Some(Command::Stop)) => self.stop(),
                Step::Command(Some(Command::Shutdown)) | Step::Command(None) => {
                    self.stop();
                    info!("Ingestion stopped.");
                    break;
                }
                Step::Transport(Some(event)) => self.handle_event(event),
                Step::Transport(None) => {
                    warn!("MQTT transport ended unexpectedly.");
                    self.close_active();
                    self.degrade();
                }
            }
        }
    }

    /// Replaces any current connection with a new one built from `config`.
    pub fn start_or_restart(&mut self, config: ConnectionConfig) {
        if self.close_active() {
            debug!("Closed previous MQTT connection before restart.");
            self.degrade();
        }

        let options = ConnectOptions {
            broker: config.broker.clone(),
            client_id: format!("room_display_{}", Uuid::new_v4()),
            credentials: config
                .credentials
                .clone()
                .or_else(|| self.default_credentials.clone()),
        };

        match self.transport.open(&options) {
            Ok((connection, events)) => {
                info!("Connecting to MQTT broker {}...", config.broker);
                self.active = Some(ActiveConnection {
                    connection,
                    events,
                    template: config.topic_template,
                });
            }
            Err(e) => {
                error!("MQTT unavailable, not retrying: {}", e);
                self.degrade();
            }
        }
    }

    /// Force-closes the connection and clears every dependent signal.
    pub fn stop(&mut self) {
        if self.close_active() {
            info!("MQTT connection closed.");
        }
        self.degrade();
    }

    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    pub fn notified(&self) -> &NotifiedState {
        &self.notified
    }

    pub fn handle_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Connected => self.on_connected(),
            TransportEvent::Subscribed => {
                let topic = self
                    .active
                    .as_ref()
                    .map(|active| resolve_topic(&active.template, &self.hostname));
                if let Some(topic) = topic {
                    info!("Successfully subscribed to topic '{}'.", topic);
                    let event = self.notified.set_connected(true);
                    self.forward(event);
                    let resolved = ResolvedTopic {
                        topic: Some(topic),
                        hostname: self.hostname.clone(),
                    };
                    let event = self.notified.set_topic(resolved);
                    self.forward(event);
                }
            }
            TransportEvent::SubscribeFailed(reason) => {
                error!("Failed to subscribe: {}", reason);
                let event = self.notified.set_connected(false);
                self.forward(event);
            }
            TransportEvent::Reconnecting => {
                debug!("MQTT reconnecting.");
                self.degrade();
            }
            TransportEvent::Offline => {
                warn!("MQTT offline.");
                self.degrade();
            }
            TransportEvent::Error(message) => {
                error!("MQTT error: {}", message);
                self.degrade();
            }
            TransportEvent::Closed => {
                info!("MQTT connection closed by broker.");
                self.degrade();
            }
            TransportEvent::Message { topic, payload } => {
                let signal = parse_presence(&payload);
                debug!("Presence on '{}': {:?}", topic, signal);
                let incoming = self.notified.set_incoming_call(signal.incoming_call);
                self.forward(incoming);
                let meeting = self.notified.set_in_meeting(signal.meeting_active);
                self.forward(meeting);
            }
        }
    }

    fn on_connected(&mut self) {
        let Some(active) = self.active.as_mut() else {
            return;
        };
        let topic = resolve_topic(&active.template, &self.hostname);
        if let Err(e) = active.connection.subscribe(&topic) {
            error!("Failed to subscribe to topic '{}': {}", topic, e);
            let event = self.notified.set_connected(false);
            self.forward(event);
        }
    }

    /// Returns whether a connection was actually closed.
    fn close_active(&mut self) -> bool {
        match self.active.take() {
            Some(mut active) => {
                active.connection.force_close();
                true
            }
            None => false,
        }
    }

    fn degrade(&mut self) {
        for event in self.notified.degrade() {
            self.forward(Some(event));
        }
    }

    fn forward(&self, event: Option<DisplayEvent>) {
        if let Some(event) = event {
            if self.display.send(event).is_err() {
                debug!("Display channel closed, event dropped.");
            }
        }
    }
}
