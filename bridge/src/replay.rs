//! Replay driver: pushes a recorded file of uplink messages through the
//! processor with local stand-ins for the provisioning and telemetry
//! backends. Useful for exercising the provisioning coordinator under load
//! without any backend access.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;
use thiserror::Error;
use uplink_processor::errors::{ProvisioningError, SendError, SourceError};
use uplink_processor::event::TelemetryEvent;
use uplink_processor::message::UplinkMessage;
use uplink_processor::{DeviceConnection, MessageSource, ProvisioningClient, TelemetrySender};

#[derive(Error, Debug)]
pub enum ReplayError {
    #[error("failed to read message file: {0}")]
    Io(#[from] std::io::Error),

    #[error("message file line {line} is not a valid uplink message: {source}")]
    Malformed {
        line: usize,
        #[source]
        source: serde_json::Error,
    },
}

/// Loads a JSON-lines file of uplink messages, failing fast on the first
/// malformed line. Blank lines are allowed.
pub fn load_messages(path: &Path) -> Result<Vec<UplinkMessage>, ReplayError> {
    let contents = std::fs::read_to_string(path)?;
    let mut messages = Vec::new();
    for (index, line) in contents.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let message =
            serde_json::from_str(line).map_err(|source| ReplayError::Malformed {
                line: index + 1,
                source,
            })?;
        messages.push(message);
    }
    Ok(messages)
}

/// In-memory message source fed from a replay file. At-least-once ordering
/// guarantees do not apply here; workers drain it in whatever order they
/// are scheduled.
pub struct FileMessageSource {
    messages: Mutex<VecDeque<UplinkMessage>>,
}

impl FileMessageSource {
    pub fn new(messages: Vec<UplinkMessage>) -> Self {
        FileMessageSource {
            messages: Mutex::new(messages.into()),
        }
    }
}

#[async_trait]
impl MessageSource for FileMessageSource {
    async fn next_message(&self) -> Result<Option<UplinkMessage>, SourceError> {
        Ok(self.messages.lock().expect("source lock poisoned").pop_front())
    }
}

/// Provisioner stand-in that fabricates a connection locally. The simulated
/// latency keeps first-contact races realistic, so concurrent replay
/// workers still exercise the leader/follower paths.
pub struct DryRunProvisioner {
    latency: Duration,
}

impl DryRunProvisioner {
    pub fn new(latency: Duration) -> Self {
        DryRunProvisioner { latency }
    }
}

#[async_trait]
impl ProvisioningClient for DryRunProvisioner {
    async fn provision(
        &self,
        global_endpoint: &str,
        id_scope: &str,
        derived_key: &str,
        device_id: &str,
    ) -> Result<DeviceConnection, ProvisioningError> {
        tokio::time::sleep(self.latency).await;
        tracing::info!(device_id, id_scope, global_endpoint, "dry-run provisioning");
        Ok(DeviceConnection {
            assigned_hub: format!("{id_scope}.{device_id}.dry-run.local"),
            auth_token: derived_key.to_string(),
        })
    }
}

/// Telemetry sender stand-in that logs each event instead of delivering it.
pub struct LoggingSender;

#[async_trait]
impl TelemetrySender for LoggingSender {
    async fn send(
        &self,
        connection: &DeviceConnection,
        event: &TelemetryEvent,
    ) -> Result<(), SendError> {
        tracing::info!(
            assigned_hub = %connection.assigned_hub,
            creation_time_utc = %event.creation_time_utc,
            body = %event.body,
            "dry-run telemetry send"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::Arc;
    use uplink_processor::{Settings, UplinkProcessor};

    fn message_line(device_id: &str) -> String {
        format!(
            r#"{{"app_id":"app1","dev_id":"{device_id}","port":1,"counter":1,"payload_raw":"AQID","metadata":{{"time":"2020-09-15T02:27:35Z"}}}}"#
        )
    }

    #[test]
    fn loads_json_lines() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "{}", message_line("dev1")).unwrap();
        writeln!(file).unwrap();
        writeln!(file, "{}", message_line("dev2")).unwrap();

        let messages = load_messages(file.path()).unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].device_id, "dev1");
        assert_eq!(messages[1].device_id, "dev2");
    }

    #[test]
    fn malformed_line_is_reported_with_its_number() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "{}", message_line("dev1")).unwrap();
        writeln!(file, "not json").unwrap();

        match load_messages(file.path()) {
            Err(ReplayError::Malformed { line, .. }) => assert_eq!(line, 2),
            other => panic!("expected malformed error, got {other:?}"),
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn replay_drains_the_file_through_the_processor() {
        let settings: Settings = serde_yaml::from_str(
            r#"
polling_delay_ms: 2
id_scope: "0ne0replay"
group_key: "ZGVmYXVsdC1rZXk="
"#,
        )
        .unwrap();

        let messages: Vec<UplinkMessage> = (0..8)
            .map(|i| serde_json::from_str(&message_line(&format!("dev{}", i % 2))).unwrap())
            .collect();
        let source = Arc::new(FileMessageSource::new(messages));

        let processor = Arc::new(UplinkProcessor::new(
            settings,
            Arc::new(DryRunProvisioner::new(Duration::from_millis(5))),
            Arc::new(LoggingSender),
        ));

        let processed = processor
            .run_workers(source, 4, Some(Duration::from_secs(5)))
            .await;

        assert_eq!(processed, 8);
        assert!(processor.cache().contains("dev0"));
        assert!(processor.cache().contains("dev1"));
    }
}
