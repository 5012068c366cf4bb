mod common;

use common::{wait_until, ScriptedTransport};
use room_display::config::{ConnectionConfig, Credentials};
use room_display::display::DisplayEvent;
use room_display::ingestion::Ingestion;
use room_display::topic::ResolvedTopic;
use room_display::transport::TransportEvent;
use std::time::Duration;
use tokio::sync::mpsc;

const HOST: &str = "Room-PC";

fn connection(broker: &str) -> ConnectionConfig {
    ConnectionConfig {
        broker: broker.to_string(),
        topic_template: "teams/${hostnameUpper}".to_string(),
        credentials: None,
    }
}

fn ingestion(
    transport: &ScriptedTransport,
) -> (
    Ingestion<ScriptedTransport>,
    mpsc::UnboundedReceiver<DisplayEvent>,
) {
    let (tx, rx) = mpsc::unbounded_channel();
    let ingestion = Ingestion::new(transport.clone(), HOST.to_string(), None, tx);
    (ingestion, rx)
}

fn drain(rx: &mut mpsc::UnboundedReceiver<DisplayEvent>) -> Vec<DisplayEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

fn live_topic() -> ResolvedTopic {
    ResolvedTopic {
        topic: Some("teams/room-pc".to_string()),
        hostname: HOST.to_string(),
    }
}

fn message(body: &str) -> TransportEvent {
    TransportEvent::Message {
        topic: "teams/room-pc".to_string(),
        payload: body.as_bytes().to_vec(),
    }
}

fn healthy(
    transport: &ScriptedTransport,
) -> (
    Ingestion<ScriptedTransport>,
    mpsc::UnboundedReceiver<DisplayEvent>,
) {
    let (mut ingestion, mut rx) = ingestion(transport);
    ingestion.start_or_restart(connection("mqtt://broker:1883"));
    ingestion.handle_event(TransportEvent::Connected);
    ingestion.handle_event(TransportEvent::Subscribed);
    drain(&mut rx);
    (ingestion, rx)
}

#[test]
fn health_turns_true_only_after_subscription() {
    let transport = ScriptedTransport::new();
    let (mut ingestion, mut rx) = ingestion(&transport);

    ingestion.start_or_restart(connection("mqtt://broker:1883"));
    ingestion.handle_event(TransportEvent::Connected);

    assert_eq!(transport.subscriptions(), vec!["teams/room-pc".to_string()]);
    assert!(drain(&mut rx).is_empty());

    ingestion.handle_event(TransportEvent::Subscribed);
    assert_eq!(
        drain(&mut rx),
        vec![
            DisplayEvent::MqttStatus(true),
            DisplayEvent::MqttTopic(live_topic()),
        ]
    );
}

#[test]
fn repeated_health_is_forwarded_once() {
    let transport = ScriptedTransport::new();
    let (mut ingestion, mut rx) = healthy(&transport);

    ingestion.handle_event(TransportEvent::Connected);
    ingestion.handle_event(TransportEvent::Subscribed);
    assert!(drain(&mut rx).is_empty());

    ingestion.handle_event(TransportEvent::Offline);
    ingestion.handle_event(TransportEvent::Reconnecting);
    let statuses: Vec<_> = drain(&mut rx)
        .into_iter()
        .filter(|e| matches!(e, DisplayEvent::MqttStatus(_)))
        .collect();
    assert_eq!(statuses, vec![DisplayEvent::MqttStatus(false)]);
}

#[test]
fn every_disconnect_kind_clears_call_and_topic() {
    let failures = [
        TransportEvent::Reconnecting,
        TransportEvent::Offline,
        TransportEvent::Error("broker went away".to_string()),
        TransportEvent::Closed,
    ];

    for failure in failures {
        let transport = ScriptedTransport::new();
        let (mut ingestion, mut rx) = healthy(&transport);
        ingestion.handle_event(message(r#"{"incomingcall": true}"#));
        drain(&mut rx);

        ingestion.handle_event(failure.clone());

        assert_eq!(
            drain(&mut rx),
            vec![
                DisplayEvent::MqttStatus(false),
                DisplayEvent::MqttTopic(ResolvedTopic::unavailable(HOST)),
                DisplayEvent::IncomingCall(false),
            ],
            "{:?}",
            failure
        );
        assert!(ingestion.is_active(), "transport keeps reconnecting on its own");
    }
}

#[test]
fn recovers_after_reconnect() {
    let transport = ScriptedTransport::new();
    let (mut ingestion, mut rx) = healthy(&transport);

    ingestion.handle_event(TransportEvent::Error("reset".to_string()));
    ingestion.handle_event(TransportEvent::Reconnecting);
    drain(&mut rx);

    ingestion.handle_event(TransportEvent::Connected);
    ingestion.handle_event(TransportEvent::Subscribed);
    assert_eq!(
        drain(&mut rx),
        vec![
            DisplayEvent::MqttStatus(true),
            DisplayEvent::MqttTopic(live_topic()),
        ]
    );
    assert_eq!(transport.subscriptions().len(), 2);
}

#[test]
fn incoming_call_is_edge_triggered() {
    let transport = ScriptedTransport::new();
    let (mut ingestion, mut rx) = healthy(&transport);

    ingestion.handle_event(message(r#"{"incomingcall": true}"#));
    ingestion.handle_event(message(r#"{"incomingcall": true}"#));
    assert_eq!(drain(&mut rx), vec![DisplayEvent::IncomingCall(true)]);

    ingestion.handle_event(message(r#"{"incomingcall": false}"#));
    assert_eq!(drain(&mut rx), vec![DisplayEvent::IncomingCall(false)]);
}

#[test]
fn malformed_payloads_still_update_the_display() {
    let transport = ScriptedTransport::new();
    let (mut ingestion, mut rx) = healthy(&transport);

    ingestion.handle_event(message("{\"IncomingCall\": tru"));
    assert_eq!(drain(&mut rx), vec![DisplayEvent::IncomingCall(true)]);

    ingestion.handle_event(message("garbage"));
    assert_eq!(drain(&mut rx), vec![DisplayEvent::IncomingCall(false)]);
}

#[test]
fn meeting_state_is_forwarded() {
    let transport = ScriptedTransport::new();
    let (mut ingestion, mut rx) = healthy(&transport);

    ingestion.handle_event(message(r#"{"is_in_meeting": true}"#));
    assert_eq!(drain(&mut rx), vec![DisplayEvent::InMeeting(true)]);
    assert!(ingestion.notified().in_meeting());
}

#[test]
fn subscribe_failure_reports_unhealthy() {
    let transport = ScriptedTransport::new();
    let (mut ingestion, mut rx) = healthy(&transport);

    ingestion.handle_event(TransportEvent::SubscribeFailed("not authorized".to_string()));
    assert_eq!(drain(&mut rx), vec![DisplayEvent::MqttStatus(false)]);
}

#[test]
fn subscribe_request_failure_reports_unhealthy() {
    let transport = ScriptedTransport::new();
    let (mut ingestion, mut rx) = healthy(&transport);
    transport.set_fail_subscribe(true);

    ingestion.handle_event(TransportEvent::Connected);
    assert_eq!(drain(&mut rx), vec![DisplayEvent::MqttStatus(false)]);
}

#[test]
fn restart_keeps_a_single_live_connection() {
    let transport = ScriptedTransport::new();
    let (mut ingestion, _rx) = ingestion(&transport);

    ingestion.start_or_restart(connection("mqtt://first:1883"));
    ingestion.start_or_restart(connection("mqtt://second:1883"));

    assert_eq!(transport.live(), 1);
    assert_eq!(transport.opened().len(), 2);
    assert_eq!(transport.opened()[1].broker, "mqtt://second:1883");
    assert!(transport.sender(0).is_closed(), "old connection can no longer deliver");
    assert!(!transport.sender(1).is_closed());
}

#[test]
fn restart_of_healthy_connection_degrades_first() {
    let transport = ScriptedTransport::new();
    let (mut ingestion, mut rx) = healthy(&transport);

    ingestion.start_or_restart(connection("mqtt://other:1883"));
    let events = drain(&mut rx);
    assert_eq!(events.first(), Some(&DisplayEvent::MqttStatus(false)));
    assert_eq!(transport.live(), 1);
}

#[test]
fn unavailable_transport_clears_everything_without_retry() {
    let transport = ScriptedTransport::new();
    let (mut ingestion, mut rx) = healthy(&transport);
    ingestion.handle_event(message(r#"{"incomingcall": true}"#));
    drain(&mut rx);

    transport.set_fail_open(true);
    ingestion.start_or_restart(connection("mqtt://broker:1883"));

    assert_eq!(
        drain(&mut rx),
        vec![
            DisplayEvent::MqttStatus(false),
            DisplayEvent::MqttTopic(ResolvedTopic::unavailable(HOST)),
            DisplayEvent::IncomingCall(false),
        ]
    );
    assert!(!ingestion.is_active());
    assert_eq!(transport.live(), 0);
    assert_eq!(transport.opened().len(), 1);
}

#[test]
fn stop_closes_and_clears() {
    let transport = ScriptedTransport::new();
    let (mut ingestion, mut rx) = healthy(&transport);

    ingestion.stop();
    assert_eq!(transport.live(), 0);
    assert_eq!(drain(&mut rx).len(), 2);

    ingestion.stop();
    assert!(drain(&mut rx).is_empty());
}

#[test]
fn default_credentials_fill_in_blank_config() {
    let transport = ScriptedTransport::new();
    let (tx, _rx) = mpsc::unbounded_channel();
    let defaults = Credentials::from_parts(Some("kiosk"), Some("kiosk-pw"));
    let mut ingestion = Ingestion::new(transport.clone(), HOST.to_string(), defaults.clone(), tx);

    ingestion.start_or_restart(connection("mqtt://broker:1883"));
    assert_eq!(transport.opened()[0].credentials, defaults);

    let explicit = Credentials::from_parts(Some("room"), Some("room-pw"));
    ingestion.start_or_restart(ConnectionConfig {
        credentials: explicit.clone(),
        ..connection("mqtt://broker:1883")
    });
    assert_eq!(transport.opened()[1].credentials, explicit);
}

#[tokio::test]
async fn task_ignores_events_from_replaced_connection() {
    let transport = ScriptedTransport::new();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let (handle, task) = Ingestion::new(transport.clone(), HOST.to_string(), None, tx).spawn();

    handle.start_or_restart(connection("mqtt://first:1883"));
    handle.start_or_restart(connection("mqtt://second:1883"));
    assert!(wait_until(|| transport.opened().len() == 2).await);
    assert_eq!(transport.live(), 1);

    let stale = transport.sender(0);
    assert!(stale.send(TransportEvent::Connected).await.is_err());

    let current = transport.sender(1);
    current.send(TransportEvent::Connected).await.unwrap();
    current.send(TransportEvent::Subscribed).await.unwrap();
    current
        .send(message(r#"{"incomingcall": true}"#))
        .await
        .unwrap();

    let mut received = Vec::new();
    while received.len() < 3 {
        let event = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        received.push(event);
    }
    assert_eq!(
        received,
        vec![
            DisplayEvent::MqttStatus(true),
            DisplayEvent::MqttTopic(live_topic()),
            DisplayEvent::IncomingCall(true),
        ]
    );
    assert_eq!(transport.subscriptions(), vec!["teams/room-pc".to_string()]);

    handle.shutdown();
    task.await.unwrap();
    assert_eq!(transport.live(), 0);
}
