use thiserror::Error;

/// Failures reported by the identity-provisioning backend.
#[derive(Error, Debug)]
pub enum ProvisioningError {
    #[error("provisioning rejected: unauthorized")]
    Unauthorized,

    #[error("provisioning backend unavailable")]
    Unavailable,

    #[error("provisioning request timed out")]
    Timeout,

    #[error("provisioning backend error: {0}")]
    Backend(String),
}

/// Failures reported by the telemetry transport.
#[derive(Error, Debug)]
pub enum SendError {
    #[error("send rejected: unauthorized")]
    Unauthorized,

    #[error("send throttled by backend")]
    Throttled,

    #[error("telemetry backend unavailable")]
    Unavailable,

    #[error("send timed out")]
    Timeout,

    #[error("transport error: {0}")]
    Transport(String),
}

/// Outcome of [`ConnectionCache::acquire`] when no connection could be
/// produced.
///
/// `KeyRemovedWhileWaiting` is deliberately distinct from `Provisioning`:
/// a follower that observes its awaited key disappear knows only that the
/// leader gave up, not that the device is unprovisionable, and may retry
/// `acquire` to become the new leader.
///
/// [`ConnectionCache::acquire`]: crate::connection_cache::ConnectionCache::acquire
#[derive(Error, Debug)]
pub enum AcquireError {
    #[error("provisioning failed: {0}")]
    Provisioning(#[from] ProvisioningError),

    #[error("registration key removed while waiting for provisioning")]
    KeyRemovedWhileWaiting,
}

/// Outcome of a telemetry dispatch attempt.
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("telemetry send failed: {0}")]
    Send(#[from] SendError),
}

/// Failures reported by the inbound message source.
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("malformed message: {0}")]
    Malformed(String),

    #[error("message source unavailable: {0}")]
    Unavailable(String),
}

/// Per-message processing failure surfaced to the host so the upstream
/// at-least-once queue redelivers the message.
#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("configuration invalid: {0}")]
    Settings(#[from] crate::settings::SettingsError),

    #[error(transparent)]
    Acquire(#[from] AcquireError),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}
