//! Inbound uplink message model.
//!
//! Mirrors the network server's uplink JSON. The processor itself only
//! needs the identifiers, the port and the retry flag; the decoded payload
//! fields are carried opaquely into the telemetry event.

use chrono::{DateTime, Utc};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct UplinkMessage {
    #[serde(rename = "app_id")]
    pub application_id: String,

    #[serde(rename = "dev_id")]
    pub device_id: String,

    #[serde(rename = "hardware_serial", default)]
    pub device_eui: String,

    pub port: u16,

    #[serde(default)]
    pub counter: u64,

    #[serde(rename = "is_retry", default)]
    pub is_retry: bool,

    #[serde(rename = "payload_raw", default)]
    pub payload_raw: String,

    /// Fields decoded by the network server, forwarded opaquely.
    #[serde(rename = "payload_fields", default)]
    pub payload_fields: Option<serde_json::Value>,

    pub metadata: UplinkMetadata,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UplinkMetadata {
    /// When the network server received the uplink, not when the bridge saw
    /// the queue message.
    #[serde(rename = "time")]
    pub received_at: DateTime<Utc>,

    #[serde(default)]
    pub frequency: Option<f64>,

    #[serde(default)]
    pub modulation: Option<String>,

    #[serde(default)]
    pub data_rate: Option<String>,

    #[serde(default)]
    pub gateways: Vec<GatewayReception>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GatewayReception {
    #[serde(rename = "gtw_id")]
    pub gateway_id: String,

    #[serde(default)]
    pub rssi: Option<i32>,

    #[serde(default)]
    pub snr: Option<f64>,
}
