use crate::display::DisplayEvent;
use crate::topic::ResolvedTopic;

/// The values most recently forwarded to the display surface.
///
/// Every setter returns the event to forward, or `None` when the value did
/// not change. Retained or repeated broker messages therefore never cause a
/// second notification.
#[derive(Debug, Clone)]
pub struct NotifiedState {
    connected: bool,
    topic: ResolvedTopic,
    incoming_call: bool,
    in_meeting: bool,
}

impl NotifiedState {
    /// The surface starts out assuming an offline, idle display.
    pub fn new(hostname: &str) -> Self {
        Self {
            connected: false,
            topic: ResolvedTopic::unavailable(hostname),
            incoming_call: false,
            in_meeting: false,
        }
    }

    pub fn connected(&self) -> bool {
        self.connected
    }

    pub fn topic(&self) -> &ResolvedTopic {
        &self.topic
    }

    pub fn incoming_call(&self) -> bool {
        self.incoming_call
    }

    pub fn in_meeting(&self) -> bool {
        self.in_meeting
    }

    pub fn set_connected(&mut self, connected: bool) -> Option<DisplayEvent> {
        if self.connected == connected {
            return None;
        }
        self.connected = connected;
        Some(DisplayEvent::MqttStatus(connected))
    }

    pub fn set_topic(&mut self, topic: ResolvedTopic) -> Option<DisplayEvent> {
        if self.topic == topic {
            return None;
        }
        self.topic = topic.clone();
        Some(DisplayEvent::MqttTopic(topic))
    }

    pub fn set_incoming_call(&mut self, active: bool) -> Option<DisplayEvent> {
        if self.incoming_call == active {
            return None;
        }
        self.incoming_call = active;
        Some(DisplayEvent::IncomingCall(active))
    }

    pub fn set_in_meeting(&mut self, active: bool) -> Option<DisplayEvent> {
        if self.in_meeting == active {
            return None;
        }
        self.in_meeting = active;
        Some(DisplayEvent::InMeeting(active))
    }

    /// Health drops to false and the signals depending on it are cleared.
    pub fn degrade(&mut self) -> Vec<DisplayEvent> {
        let hostname = self.topic.hostname.clone();
        [
            self.set_connected(false),
            self.set_topic(ResolvedTopic::unavailable(&hostname)),
            self.set_incoming_call(false),
        ]
        .into_iter()
        .flatten()
        .collect()
    }
}
