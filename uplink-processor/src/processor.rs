//! Per-message pipeline and the worker pool that drives it.

use crate::collaborators::{MessageSource, ProvisioningClient, TelemetrySender};
use crate::connection_cache::ConnectionCache;
use crate::device_key::derive_device_key;
use crate::dispatcher::TelemetryDispatcher;
use crate::errors::ProcessError;
use crate::event::build_event;
use crate::message::UplinkMessage;
use crate::metrics_defs::{MESSAGES_FAILED, MESSAGES_PROCESSED, MESSAGES_RETRY_SKIPPED};
use crate::settings::Settings;
use shared::counter;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;

/// Processes uplink messages: resolve the registration key, provision the
/// device on first contact through the shared [`ConnectionCache`], dispatch
/// one telemetry event per message.
///
/// One processor is shared by all workers; the cache inside it is the only
/// shared mutable state.
pub struct UplinkProcessor {
    settings: Settings,
    cache: Arc<ConnectionCache>,
    provisioner: Arc<dyn ProvisioningClient>,
    dispatcher: TelemetryDispatcher,
}

impl UplinkProcessor {
    pub fn new(
        settings: Settings,
        provisioner: Arc<dyn ProvisioningClient>,
        sender: Arc<dyn TelemetrySender>,
    ) -> Self {
        let cache = Arc::new(ConnectionCache::new(settings.polling_delay()));
        UplinkProcessor {
            settings,
            cache,
            provisioner,
            dispatcher: TelemetryDispatcher::new(sender),
        }
    }

    pub fn cache(&self) -> &Arc<ConnectionCache> {
        &self.cache
    }

    /// Processes one uplink message end to end. Returns `Ok(false)` when the
    /// message was recognized as a retry and skipped.
    ///
    /// Any error must be surfaced to the host unprocessed so the upstream
    /// at-least-once queue redelivers the message; the cache has already
    /// removed the offending entry, so the redelivery self-heals.
    pub async fn process(&self, message: &UplinkMessage) -> Result<bool, ProcessError> {
        if message.is_retry {
            counter!(MESSAGES_RETRY_SKIPPED).increment(1);
            tracing::info!(
                device_id = %message.device_id,
                counter = message.counter,
                application_id = %message.application_id,
                "uplink message retry, skipping"
            );
            return Ok(false);
        }

        tracing::debug!(
            device_id = %message.device_id,
            counter = message.counter,
            application_id = %message.application_id,
            "uplink message processing start"
        );

        let key = self.settings.registration_key(
            &message.application_id,
            message.port,
            &message.device_id,
        );
        let id_scope = self
            .settings
            .id_scope(&message.application_id, message.port)?;
        let group_key = self
            .settings
            .group_key(&message.application_id, message.port)?;
        let derived_key = derive_device_key(&group_key, &message.device_id);

        let event = build_event(message);

        let connection = self
            .cache
            .acquire(&key, || async {
                self.provisioner
                    .provision(
                        &self.settings.global_device_endpoint,
                        id_scope,
                        &derived_key,
                        &message.device_id,
                    )
                    .await
            })
            .await?;

        self.dispatcher
            .dispatch(&self.cache, &key, &connection, &event)
            .await?;

        counter!(MESSAGES_PROCESSED).increment(1);
        tracing::debug!(
            device_id = %message.device_id,
            counter = message.counter,
            "uplink message processing complete"
        );
        Ok(true)
    }

    /// Runs `workers` parallel tasks draining `source` until it reports
    /// `None`. Returns the number of messages processed (retries excluded).
    /// When a sliding-expiration window is configured, a background sweep
    /// evicts idle connections for as long as the workers run.
    ///
    /// The cache itself never times out a follower; `message_deadline` is
    /// the host-side bound on one message's processing, after which the
    /// message counts as failed and is left to upstream redelivery.
    pub async fn run_workers(
        self: &Arc<Self>,
        source: Arc<dyn MessageSource>,
        workers: usize,
        message_deadline: Option<Duration>,
    ) -> usize {
        let sweeper = self.settings.max_idle().map(|max_idle| {
            let cache = self.cache.clone();
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(max_idle);
                loop {
                    interval.tick().await;
                    cache.evict_idle(max_idle);
                }
            })
        });

        let mut tasks = JoinSet::new();
        for worker in 0..workers.max(1) {
            let processor = self.clone();
            let source = source.clone();
            tasks.spawn(async move { processor.worker_loop(worker, source, message_deadline).await });
        }

        let mut processed = 0;
        while let Some(result) = tasks.join_next().await {
            match result {
                Ok(count) => processed += count,
                Err(err) => tracing::error!(error = %err, "worker task panicked"),
            }
        }

        if let Some(sweeper) = sweeper {
            sweeper.abort();
        }
        processed
    }

    async fn worker_loop(
        &self,
        worker: usize,
        source: Arc<dyn MessageSource>,
        message_deadline: Option<Duration>,
    ) -> usize {
        let mut processed = 0;
        loop {
            let message = match source.next_message().await {
                Ok(Some(message)) => message,
                Ok(None) => break,
                Err(err) => {
                    tracing::error!(worker, error = %err, "message source failed");
                    break;
                }
            };

            let outcome = match message_deadline {
                Some(deadline) => {
                    match tokio::time::timeout(deadline, self.process(&message)).await {
                        Ok(outcome) => outcome,
                        Err(_) => {
                            counter!(MESSAGES_FAILED).increment(1);
                            tracing::error!(
                                worker,
                                device_id = %message.device_id,
                                "message processing deadline exceeded"
                            );
                            continue;
                        }
                    }
                }
                None => self.process(&message).await,
            };

            match outcome {
                Ok(true) => processed += 1,
                Ok(false) => {}
                Err(err) => {
                    counter!(MESSAGES_FAILED).increment(1);
                    tracing::error!(
                        worker,
                        device_id = %message.device_id,
                        counter = message.counter,
                        error = %err,
                        "message processing failed, leaving for redelivery"
                    );
                }
            }
        }
        processed
    }
}
