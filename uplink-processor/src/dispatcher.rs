//! Telemetry dispatch with invalidate-on-failure.

use crate::collaborators::{DeviceConnection, TelemetrySender};
use crate::connection_cache::ConnectionCache;
use crate::errors::DispatchError;
use crate::event::TelemetryEvent;
use crate::metrics_defs::{TELEMETRY_SEND_FAILED, TELEMETRY_SENT};
use shared::counter;
use std::sync::Arc;

/// Sends one telemetry event over a resolved connection.
///
/// Dispatch is not idempotent: a redelivered message sends its event again.
/// Telemetry is observational, and the upstream retry flag filters the
/// known duplicates before they reach this layer.
pub struct TelemetryDispatcher {
    sender: Arc<dyn TelemetrySender>,
}

impl TelemetryDispatcher {
    pub fn new(sender: Arc<dyn TelemetrySender>) -> Self {
        Self { sender }
    }

    /// Sends `event` over `connection`. A failed send invalidates the cache
    /// slot for `key` before the error propagates, so the next message for
    /// this device provisions a fresh connection instead of hammering a
    /// stale endpoint.
    pub async fn dispatch(
        &self,
        cache: &ConnectionCache,
        key: &str,
        connection: &Arc<DeviceConnection>,
        event: &TelemetryEvent,
    ) -> Result<(), DispatchError> {
        match self.sender.send(connection, event).await {
            Ok(()) => {
                counter!(TELEMETRY_SENT).increment(1);
                Ok(())
            }
            Err(err) => {
                counter!(TELEMETRY_SEND_FAILED).increment(1);
                let invalidated = cache.invalidate(key, connection);
                tracing::warn!(key, error = %err, invalidated, "telemetry send failed");
                Err(DispatchError::Send(err))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::SendError;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct RecordingSender {
        sent: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl TelemetrySender for RecordingSender {
        async fn send(
            &self,
            _connection: &DeviceConnection,
            _event: &TelemetryEvent,
        ) -> Result<(), SendError> {
            self.sent.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(SendError::Unavailable)
            } else {
                Ok(())
            }
        }
    }

    fn event() -> TelemetryEvent {
        TelemetryEvent {
            body: json!({"DeviceID": "dev1"}),
            creation_time_utc: "2020-09-15T02:27:35".into(),
        }
    }

    async fn ready_connection(cache: &ConnectionCache) -> Arc<DeviceConnection> {
        cache
            .acquire("dev1", || async {
                Ok(DeviceConnection {
                    assigned_hub: "hub".into(),
                    auth_token: "token".into(),
                })
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn successful_dispatch_keeps_the_connection() {
        let cache = ConnectionCache::new(Duration::from_millis(2));
        let connection = ready_connection(&cache).await;
        let sender = Arc::new(RecordingSender {
            sent: AtomicUsize::new(0),
            fail: false,
        });
        let dispatcher = TelemetryDispatcher::new(sender.clone());

        dispatcher
            .dispatch(&cache, "dev1", &connection, &event())
            .await
            .unwrap();

        assert_eq!(sender.sent.load(Ordering::SeqCst), 1);
        assert!(cache.contains("dev1"));
    }

    #[tokio::test]
    async fn failed_dispatch_invalidates_the_connection() {
        let cache = ConnectionCache::new(Duration::from_millis(2));
        let connection = ready_connection(&cache).await;
        let dispatcher = TelemetryDispatcher::new(Arc::new(RecordingSender {
            sent: AtomicUsize::new(0),
            fail: true,
        }));

        let result = dispatcher
            .dispatch(&cache, "dev1", &connection, &event())
            .await;

        assert!(matches!(
            result,
            Err(DispatchError::Send(SendError::Unavailable))
        ));
        assert!(!cache.contains("dev1"));
    }
}
