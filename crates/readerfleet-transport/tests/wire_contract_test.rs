//! Topic and payload contract between the cloud and reader firmware.

use readerfleet_transport::topic::{command_topic, subscription_filters};
use readerfleet_transport::{Channel, CommandEnvelope, InboundMessage, decode_publish};
use serde_json::json;

#[test]
fn test_subscriptions_cover_every_inbound_topic() {
    let filters = subscription_filters("fleet");
    assert_eq!(filters.len(), 3);

    for topic in [
        "fleet/R-1/events",
        "fleet/R-1/command/control/response",
        "fleet/R-1/command/management/response",
    ] {
        assert!(
            decode_publish("fleet", topic, b"{}").is_ok(),
            "inbound topic {topic} should decode"
        );
    }
}

#[test]
fn test_outbound_topics_are_not_routed_back() {
    for channel in Channel::ALL {
        let topic = command_topic("fleet", "R-1", channel);
        assert!(decode_publish("fleet", &topic, b"{}").is_err());
    }
}

#[test]
fn test_firmware_response_roundtrip() {
    // What the firmware sends back after executing a command it received.
    let sent = CommandEnvelope {
        command: "reboot".into(),
        command_id: "0b8f".into(),
        group_command_id: Some("g-42".into()),
        payload: json!({"delay_secs": 5}),
    };
    let reply = json!({
        "command": sent.command,
        "command_id": sent.command_id,
        "response": "success",
        "message": "rebooting",
        "payload": {}
    });

    let decoded = decode_publish(
        "fleet",
        "fleet/R-3/command/management/response",
        reply.to_string().as_bytes(),
    )
    .unwrap();

    match decoded {
        InboundMessage::Response(r) => {
            assert_eq!(r.device_serial, "R-3");
            assert_eq!(r.channel, Channel::Management);
            assert_eq!(r.command.as_deref(), Some("reboot"));
            assert_eq!(r.command_id.as_deref(), Some("0b8f"));
            assert_eq!(r.message.as_deref(), Some("rebooting"));
        }
        other => panic!("unexpected message: {other:?}"),
    }
}

#[test]
fn test_non_string_response_token_is_stringified() {
    let decoded = decode_publish(
        "fleet",
        "fleet/R-3/command/control/response",
        br#"{"command_id": "c-1", "response": 0}"#,
    )
    .unwrap();
    let InboundMessage::Response(r) = decoded else {
        panic!("expected response");
    };
    assert_eq!(r.response.as_deref(), Some("0"));
}
