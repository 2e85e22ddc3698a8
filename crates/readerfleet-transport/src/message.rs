//! Wire messages.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Result, TransportError};
use crate::topic::{Channel, TopicKind, parse_topic};

/// Field set on every decoded telemetry payload.
pub const DEVICE_SERIAL_FIELD: &str = "deviceSerial";

/// Event type used when a telemetry payload does not name one.
pub const DEFAULT_EVENT_TYPE: &str = "event";

/// Cloud -> device command body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandEnvelope {
    /// Command name (`start`, `stop`, `reboot`, ...).
    pub command: String,
    pub command_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_command_id: Option<String>,
    #[serde(default)]
    pub payload: Value,
}

/// Telemetry received on `<ns>/<serial>/events`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryMessage {
    pub device_serial: String,
    pub event_type: String,
    /// Decoded payload with the device serial attached.
    pub payload: Value,
    pub received_at: DateTime<Utc>,
}

/// Command result received on `<ns>/<serial>/command/<channel>/response`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseMessage {
    pub device_serial: String,
    pub channel: Channel,
    pub command: Option<String>,
    pub command_id: Option<String>,
    /// Status token reported by the device (`success`, `error`, ...).
    pub response: Option<String>,
    pub message: Option<String>,
    pub payload: Value,
    pub received_at: DateTime<Utc>,
}

/// Device response body as sent by the reader firmware.
#[derive(Debug, Deserialize)]
struct RawResponse {
    #[serde(default)]
    command: Option<String>,
    #[serde(default, alias = "commandId")]
    command_id: Option<String>,
    #[serde(default)]
    response: Option<Value>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    payload: Value,
}

/// A decoded inbound publish.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    Telemetry(TelemetryMessage),
    Response(ResponseMessage),
}

impl InboundMessage {
    pub fn device_serial(&self) -> &str {
        match self {
            InboundMessage::Telemetry(m) => &m.device_serial,
            InboundMessage::Response(m) => &m.device_serial,
        }
    }
}

/// Decode a raw `(topic, payload)` pair into a typed message.
pub fn decode_publish(namespace: &str, topic: &str, payload: &[u8]) -> Result<InboundMessage> {
    let parsed = parse_topic(namespace, topic)?;
    let malformed = |reason: String| TransportError::MalformedPayload {
        topic: topic.to_string(),
        reason,
    };

    let value: Value = serde_json::from_slice(payload).map_err(|e| malformed(e.to_string()))?;
    let received_at = Utc::now();

    match parsed.kind {
        TopicKind::Events => {
            let Value::Object(mut fields) = value else {
                return Err(malformed("telemetry payload is not a JSON object".into()));
            };
            let event_type = ["eventType", "event_type", "type"]
                .iter()
                .find_map(|k| fields.get(*k).and_then(Value::as_str))
                .unwrap_or(DEFAULT_EVENT_TYPE)
                .to_string();
            fields.insert(
                DEVICE_SERIAL_FIELD.to_string(),
                Value::String(parsed.device_serial.clone()),
            );

            Ok(InboundMessage::Telemetry(TelemetryMessage {
                device_serial: parsed.device_serial,
                event_type,
                payload: Value::Object(fields),
                received_at,
            }))
        }
        TopicKind::Response(channel) => {
            let raw: RawResponse =
                serde_json::from_value(value).map_err(|e| malformed(e.to_string()))?;
            let response = raw.response.map(|v| match v {
                Value::String(s) => s,
                other => other.to_string(),
            });

            Ok(InboundMessage::Response(ResponseMessage {
                device_serial: parsed.device_serial,
                channel,
                command: raw.command,
                command_id: raw.command_id.filter(|id| !id.is_empty()),
                response,
                message: raw.message,
                payload: raw.payload,
                received_at,
            }))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_envelope_wire_shape() {
        let envelope = CommandEnvelope {
            command: "start".into(),
            command_id: "c-1".into(),
            group_command_id: None,
            payload: json!({"antennas": [1, 2]}),
        };
        let value = serde_json::to_value(&envelope).unwrap();
        assert_eq!(
            value,
            json!({"command": "start", "command_id": "c-1", "payload": {"antennas": [1, 2]}})
        );

        let grouped = CommandEnvelope {
            group_command_id: Some("g-1".into()),
            ..envelope
        };
        let value = serde_json::to_value(&grouped).unwrap();
        assert_eq!(value["group_command_id"], "g-1");
    }

    #[test]
    fn test_decode_telemetry_attaches_serial() {
        let msg = decode_publish("ns", "ns/R-1/events", br#"{"eventType": "tag_read", "epc": "E200"}"#).unwrap();
        let InboundMessage::Telemetry(t) = msg else {
            panic!("expected telemetry");
        };
        assert_eq!(t.device_serial, "R-1");
        assert_eq!(t.event_type, "tag_read");
        assert_eq!(t.payload["deviceSerial"], "R-1");
        assert_eq!(t.payload["epc"], "E200");
    }

    #[test]
    fn test_decode_telemetry_default_event_type() {
        let msg = decode_publish("ns", "ns/R-1/events", br#"{"epc": "E200"}"#).unwrap();
        let InboundMessage::Telemetry(t) = msg else {
            panic!("expected telemetry");
        };
        assert_eq!(t.event_type, DEFAULT_EVENT_TYPE);
    }

    #[test]
    fn test_decode_response() {
        let body = br#"{"command": "start", "command_id": "c-9", "response": "success", "message": "ok", "payload": {"x": 1}}"#;
        let msg = decode_publish("ns", "ns/R-2/command/control/response", body).unwrap();
        let InboundMessage::Response(r) = msg else {
            panic!("expected response");
        };
        assert_eq!(r.device_serial, "R-2");
        assert_eq!(r.channel, Channel::Control);
        assert_eq!(r.command_id.as_deref(), Some("c-9"));
        assert_eq!(r.response.as_deref(), Some("success"));
        assert_eq!(r.payload, json!({"x": 1}));
    }

    #[test]
    fn test_decode_response_without_command_id() {
        let msg = decode_publish("ns", "ns/R-2/command/management/response", br#"{"response": "error", "command_id": ""}"#).unwrap();
        let InboundMessage::Response(r) = msg else {
            panic!("expected response");
        };
        assert!(r.command_id.is_none());
    }

    #[test]
    fn test_decode_malformed_json() {
        let err = decode_publish("ns", "ns/R-1/events", b"not json").unwrap_err();
        assert!(matches!(err, TransportError::MalformedPayload { .. }));
    }

    #[test]
    fn test_decode_non_object_telemetry() {
        let err = decode_publish("ns", "ns/R-1/events", b"[1,2,3]").unwrap_err();
        assert!(matches!(err, TransportError::MalformedPayload { .. }));
    }
}
