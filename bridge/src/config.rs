use serde::Deserialize;
use thiserror::Error;
use uplink_processor::settings::{Settings, SettingsError};

#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("worker count cannot be 0")]
    InvalidWorkerCount,

    #[error("message deadline cannot be 0")]
    InvalidMessageDeadline,

    #[error(transparent)]
    Processor(#[from] SettingsError),
}

/// Bridge configuration: host-side knobs plus the processor settings.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Config {
    /// Parallel message-processing workers.
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Host-side bound on one message's processing. The connection cache
    /// never times out internally; this is the outer deadline that makes
    /// unbounded follower polling safe.
    #[serde(default)]
    pub message_deadline_secs: Option<u64>,

    /// Optional StatsD exporter for the metrics facade.
    #[serde(default)]
    pub statsd: Option<StatsdConfig>,

    pub processor: Settings,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct StatsdConfig {
    pub host: String,
    pub port: u16,
    #[serde(default = "default_statsd_prefix")]
    pub prefix: String,
}

fn default_workers() -> usize {
    4
}

fn default_statsd_prefix() -> String {
    "uplink_bridge".to_string()
}

impl Config {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.workers == 0 {
            return Err(ValidationError::InvalidWorkerCount);
        }
        if self.message_deadline_secs == Some(0) {
            return Err(ValidationError::InvalidMessageDeadline);
        }
        self.processor.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_valid_config() {
        let yaml = r#"
workers: 8
message_deadline_secs: 30
statsd:
    host: "127.0.0.1"
    port: 8125
processor:
    polling_delay_ms: 500
    id_scope: "0ne0default"
    group_key: "ZGVmYXVsdC1rZXk="
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.workers, 8);
        assert_eq!(config.message_deadline_secs, Some(30));
        assert_eq!(config.statsd.as_ref().unwrap().prefix, "uplink_bridge");
    }

    #[test]
    fn defaults_apply() {
        let yaml = r#"
processor:
    polling_delay_ms: 500
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.workers, 4);
        assert_eq!(config.message_deadline_secs, None);
        assert!(config.statsd.is_none());
    }

    #[test]
    fn validation_errors() {
        let mut config: Config = serde_yaml::from_str("processor: {polling_delay_ms: 500}").unwrap();

        config.workers = 0;
        assert!(matches!(
            config.validate().unwrap_err(),
            ValidationError::InvalidWorkerCount
        ));

        config.workers = 4;
        config.message_deadline_secs = Some(0);
        assert!(matches!(
            config.validate().unwrap_err(),
            ValidationError::InvalidMessageDeadline
        ));

        config.message_deadline_secs = None;
        config.processor.polling_delay_ms = 0;
        assert!(matches!(
            config.validate().unwrap_err(),
            ValidationError::Processor(_)
        ));
    }
}
