//! Topic conventions.

use serde::{Deserialize, Serialize};

use crate::error::{Result, TransportError};

/// Command channel on the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    /// Operational commands (start/stop/mode).
    Control,
    /// Device administration (reboot/upgrade).
    Management,
}

impl Channel {
    pub const ALL: [Channel; 2] = [Channel::Control, Channel::Management];

    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Control => "control",
            Channel::Management => "management",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "control" => Some(Channel::Control),
            "management" => Some(Channel::Management),
            _ => None,
        }
    }
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What an inbound topic carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopicKind {
    Events,
    Response(Channel),
}

/// Inbound topic split into its parts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedTopic {
    pub device_serial: String,
    pub kind: TopicKind,
}

/// Subscription filter for telemetry.
pub fn events_filter(namespace: &str) -> String {
    format!("{}/+/events", namespace)
}

/// Subscription filter for command responses on one channel.
pub fn response_filter(namespace: &str, channel: Channel) -> String {
    format!("{}/+/command/{}/response", namespace, channel)
}

/// All filters the bridge subscribes to.
pub fn subscription_filters(namespace: &str) -> Vec<String> {
    let mut filters = vec![events_filter(namespace)];
    filters.extend(Channel::ALL.iter().map(|c| response_filter(namespace, *c)));
    filters
}

/// Outbound command topic for a device.
pub fn command_topic(namespace: &str, device_serial: &str, channel: Channel) -> String {
    format!("{}/{}/command/{}", namespace, device_serial, channel)
}

/// Parse an inbound topic.
///
/// The second segment is always the device serial.
pub fn parse_topic(namespace: &str, topic: &str) -> Result<ParsedTopic> {
    let invalid = |reason: &str| TransportError::InvalidTopic {
        topic: topic.to_string(),
        reason: reason.to_string(),
    };

    let parts: Vec<&str> = topic.split('/').collect();
    if parts.len() < 3 {
        return Err(invalid("too few segments"));
    }
    if parts[0] != namespace {
        return Err(invalid("namespace mismatch"));
    }

    let device_serial = parts[1].trim();
    if device_serial.is_empty() {
        return Err(invalid("empty device serial"));
    }

    let kind = match parts[2..] {
        ["events"] => TopicKind::Events,
        ["command", channel, "response"] => {
            let channel = Channel::parse(channel).ok_or_else(|| invalid("unknown channel"))?;
            TopicKind::Response(channel)
        }
        _ => return Err(invalid("unrecognized topic shape")),
    };

    Ok(ParsedTopic {
        device_serial: device_serial.to_string(),
        kind,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filters() {
        assert_eq!(
            subscription_filters("ns"),
            vec![
                "ns/+/events".to_string(),
                "ns/+/command/control/response".to_string(),
                "ns/+/command/management/response".to_string(),
            ]
        );
        assert_eq!(
            command_topic("ns", "R-100", Channel::Management),
            "ns/R-100/command/management"
        );
    }

    #[test]
    fn test_parse_events_topic() {
        let parsed = parse_topic("ns", "ns/R-100/events").unwrap();
        assert_eq!(parsed.device_serial, "R-100");
        assert_eq!(parsed.kind, TopicKind::Events);
    }

    #[test]
    fn test_parse_response_topic() {
        let parsed = parse_topic("ns", "ns/R-7/command/control/response").unwrap();
        assert_eq!(parsed.device_serial, "R-7");
        assert_eq!(parsed.kind, TopicKind::Response(Channel::Control));
    }

    #[test]
    fn test_parse_rejects_outbound_command_topic() {
        assert!(parse_topic("ns", "ns/R-7/command/control").is_err());
    }

    #[test]
    fn test_parse_rejects_other_namespace() {
        assert!(parse_topic("ns", "other/R-7/events").is_err());
    }

    #[test]
    fn test_parse_rejects_unknown_channel() {
        assert!(parse_topic("ns", "ns/R-7/command/debug/response").is_err());
    }

    #[test]
    fn test_parse_rejects_empty_serial() {
        assert!(parse_topic("ns", "ns//events").is_err());
    }
}
