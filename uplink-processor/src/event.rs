//! Telemetry event assembly.

use crate::message::UplinkMessage;
use serde_json::{Map, Value, json};

/// One normalized telemetry event, ready for the transport.
///
/// `creation_time_utc` travels as a message property so the backend displays
/// the acquisition time rather than the upload time, which matters for
/// messages redelivered long after reception.
#[derive(Debug, Clone, PartialEq)]
pub struct TelemetryEvent {
    pub body: Value,
    pub creation_time_utc: String,
}

/// Builds the telemetry event for one uplink message: the envelope fields
/// plus whatever the network server decoded, forwarded opaquely.
pub fn build_event(message: &UplinkMessage) -> TelemetryEvent {
    let mut body = Map::new();
    body.insert("DeviceEUI".into(), json!(message.device_eui));
    body.insert("Retry".into(), json!(message.is_retry));
    body.insert("Counter".into(), json!(message.counter));
    body.insert("DeviceID".into(), json!(message.device_id));
    body.insert("ApplicationID".into(), json!(message.application_id));
    body.insert("Port".into(), json!(message.port));
    body.insert("PayloadRaw".into(), json!(message.payload_raw));
    body.insert(
        "ReceivedAtUTC".into(),
        json!(message.metadata.received_at.to_rfc3339()),
    );

    // Decoded payload fields ride along untouched. Envelope fields win on
    // a name collision.
    if let Some(Value::Object(fields)) = &message.payload_fields {
        for (name, value) in fields {
            body.entry(name.clone()).or_insert_with(|| value.clone());
        }
    }

    TelemetryEvent {
        body: Value::Object(body),
        creation_time_utc: message
            .metadata
            .received_at
            .format("%Y-%m-%dT%H:%M:%S")
            .to_string(),
    }
}
