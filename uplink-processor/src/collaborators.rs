//! Collaborator seams for the external transports.
//!
//! The processor never talks to the network itself; it drives these traits.
//! Production wiring supplies real backend clients, tests and the replay
//! driver supply in-process fakes.

use crate::errors::{ProvisioningError, SendError, SourceError};
use crate::event::TelemetryEvent;
use crate::message::UplinkMessage;
use async_trait::async_trait;

/// Opaque transport handle established by provisioning: the assigned hub
/// endpoint plus the credential to authenticate against it.
///
/// Immutable once created; replacing a stale connection means removing the
/// cache entry and provisioning again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceConnection {
    pub assigned_hub: String,
    pub auth_token: String,
}

/// Exchanges a derived device credential for an assigned backend endpoint.
#[async_trait]
pub trait ProvisioningClient: Send + Sync {
    async fn provision(
        &self,
        global_endpoint: &str,
        id_scope: &str,
        derived_key: &str,
        device_id: &str,
    ) -> Result<DeviceConnection, ProvisioningError>;
}

/// Delivers one telemetry event over an established connection.
#[async_trait]
pub trait TelemetrySender: Send + Sync {
    async fn send(
        &self,
        connection: &DeviceConnection,
        event: &TelemetryEvent,
    ) -> Result<(), SendError>;
}

/// Inbound queue of uplink messages, at-least-once and unordered.
///
/// `Ok(None)` means the source is drained and workers should stop.
#[async_trait]
pub trait MessageSource: Send + Sync {
    async fn next_message(&self) -> Result<Option<UplinkMessage>, SourceError>;
}
