//! Presence payload parsing.
//!
//! Publishers are not under our control and some of them send JSON that is
//! only almost right. Parsing therefore happens in two tiers: a strict decode
//! into [`PresencePayload`], and when that fails a case-insensitive token scan
//! over the raw text. Neither tier can fail.

use serde::Deserialize;
use serde_json::Value;

const INCOMING_CALL_FIELD: &str = "incomingcall";
const IN_MEETING_FIELD: &str = "in_meeting";
const IS_IN_MEETING_FIELD: &str = "is_in_meeting";

/// Presence derived from a single message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PresenceSignal {
    pub incoming_call: bool,
    pub meeting_active: bool,
}

/// Shape published by the Teams presence bridge. All fields are optional.
#[derive(Deserialize, Debug, Default)]
pub struct PresencePayload {
    pub incomingcall: Option<Value>,
    pub in_meeting: Option<Value>,
    pub is_in_meeting: Option<Value>,
}

impl PresencePayload {
    pub fn signal(&self) -> PresenceSignal {
        PresenceSignal {
            incoming_call: is_truthy(self.incomingcall.as_ref()),
            meeting_active: is_truthy(self.in_meeting.as_ref())
                || is_truthy(self.is_in_meeting.as_ref()),
        }
    }
}

/// Parses a raw MQTT payload into a [`PresenceSignal`].
pub fn parse_presence(payload: &[u8]) -> PresenceSignal {
    match decode_structured(payload) {
        Some(decoded) => decoded.signal(),
        None => scan_tokens(&String::from_utf8_lossy(payload)),
    }
}

/// Strict tier. Returns `None` when the body is not JSON or is `null`; other
/// JSON values without fields (strings, numbers, arrays) decode as empty.
pub fn decode_structured(payload: &[u8]) -> Option<PresencePayload> {
    match serde_json::from_slice::<Value>(payload) {
        Err(_) | Ok(Value::Null) => None,
        Ok(value @ Value::Object(_)) => serde_json::from_value(value).ok(),
        Ok(_) => Some(PresencePayload::default()),
    }
}

/// Fallback tier: presence of a field name anywhere in the text means "active".
pub fn scan_tokens(text: &str) -> PresenceSignal {
    let lowered = text.to_lowercase();
    PresenceSignal {
        incoming_call: lowered.contains(INCOMING_CALL_FIELD),
        meeting_active: lowered.contains(IN_MEETING_FIELD)
            || lowered.contains(IS_IN_MEETING_FIELD),
    }
}

fn is_truthy(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
        Some(Value::String(s)) => !s.is_empty(),
        Some(Value::Array(_)) | Some(Value::Object(_)) => true,
    }
}
