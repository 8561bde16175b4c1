//! Uplink telemetry processor for LoRaWAN devices.
//!
//! Messages arrive from a network-server bridge via a [`MessageSource`],
//! each device is provisioned with the backend exactly once on first
//! contact (however many messages race for it), and one normalized
//! telemetry event is dispatched per message over the device's cached
//! connection.
//!
//! The center of the crate is [`ConnectionCache`]: the registration-key ->
//! connection coordinator that resolves first-contact races with an atomic
//! insert-if-absent, lets followers poll for the leader's result, and
//! self-heals by removing entries on provisioning or send failure.
//!
//! [`MessageSource`]: collaborators::MessageSource
//! [`ConnectionCache`]: connection_cache::ConnectionCache

pub mod collaborators;
pub mod connection_cache;
pub mod device_key;
pub mod dispatcher;
pub mod errors;
pub mod event;
pub mod message;
pub mod metrics_defs;
pub mod processor;
pub mod settings;

pub use collaborators::{DeviceConnection, MessageSource, ProvisioningClient, TelemetrySender};
pub use connection_cache::ConnectionCache;
pub use dispatcher::TelemetryDispatcher;
pub use processor::UplinkProcessor;
pub use settings::Settings;
