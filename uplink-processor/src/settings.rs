//! Processor settings.
//!
//! Provisioning configuration can be specialized per application and per
//! application+port. Lookups fall back application+port -> application ->
//! default; a port-specific group key is also what forces the registration
//! key to carry the port suffix, because such deployments reuse device ids
//! across ports with different enrollment secrets.

use base64::{Engine as _, engine::general_purpose::STANDARD};
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_GLOBAL_ENDPOINT: &str = "global.azure-devices-provisioning.net";

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("no id scope configured for application '{application}' port {port}")]
    MissingIdScope { application: String, port: u16 },

    #[error("no enrollment group key configured for application '{application}' port {port}")]
    MissingGroupKey { application: String, port: u16 },

    #[error("enrollment group key for '{scope}' is not valid base64")]
    InvalidGroupKey {
        scope: String,
        #[source]
        source: base64::DecodeError,
    },

    #[error("polling delay must be greater than zero")]
    InvalidPollingDelay,

    #[error("idle window must be greater than zero")]
    InvalidIdleWindow,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Settings {
    /// Provisioning service endpoint handed to the provisioning client.
    #[serde(default = "default_global_endpoint")]
    pub global_device_endpoint: String,

    /// Delay between follower polls of a Pending cache slot.
    pub polling_delay_ms: u64,

    /// Sliding-expiration window for cached connections. Absent means
    /// connections live for the process lifetime.
    #[serde(default)]
    pub max_idle_secs: Option<u64>,

    /// Default id scope, used when no application or port override matches.
    #[serde(default)]
    pub id_scope: Option<String>,

    /// Default enrollment group key (base64).
    #[serde(default)]
    pub group_key: Option<String>,

    #[serde(default)]
    pub applications: HashMap<String, ApplicationSettings>,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct ApplicationSettings {
    #[serde(default)]
    pub id_scope: Option<String>,

    #[serde(default)]
    pub group_key: Option<String>,

    #[serde(default)]
    pub ports: HashMap<u16, PortSettings>,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct PortSettings {
    #[serde(default)]
    pub id_scope: Option<String>,

    #[serde(default)]
    pub group_key: Option<String>,
}

fn default_global_endpoint() -> String {
    DEFAULT_GLOBAL_ENDPOINT.to_string()
}

impl Settings {
    /// Validates the settings eagerly so a misconfiguration fails at
    /// startup, not on the first message that happens to need it.
    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.polling_delay_ms == 0 {
            return Err(SettingsError::InvalidPollingDelay);
        }
        if self.max_idle_secs == Some(0) {
            return Err(SettingsError::InvalidIdleWindow);
        }

        if let Some(key) = &self.group_key {
            decode_group_key("default", key)?;
        }
        for (app_id, app) in &self.applications {
            if let Some(key) = &app.group_key {
                decode_group_key(app_id, key)?;
            }
            for (port, port_settings) in &app.ports {
                if let Some(key) = &port_settings.group_key {
                    decode_group_key(&format!("{app_id}-{port}"), key)?;
                }
            }
        }

        Ok(())
    }

    pub fn polling_delay(&self) -> Duration {
        Duration::from_millis(self.polling_delay_ms)
    }

    pub fn max_idle(&self) -> Option<Duration> {
        self.max_idle_secs.map(Duration::from_secs)
    }

    /// Id scope for (application, port): port override, then application,
    /// then default.
    pub fn id_scope(&self, application_id: &str, port: u16) -> Result<&str, SettingsError> {
        let app = self.applications.get(application_id);
        app.and_then(|a| a.ports.get(&port))
            .and_then(|p| p.id_scope.as_deref())
            .or_else(|| app.and_then(|a| a.id_scope.as_deref()))
            .or(self.id_scope.as_deref())
            .ok_or_else(|| SettingsError::MissingIdScope {
                application: application_id.to_string(),
                port,
            })
    }

    /// Decoded enrollment group key for (application, port), same fallback
    /// chain as [`Settings::id_scope`].
    pub fn group_key(&self, application_id: &str, port: u16) -> Result<Vec<u8>, SettingsError> {
        let app = self.applications.get(application_id);
        let encoded = app
            .and_then(|a| a.ports.get(&port))
            .and_then(|p| p.group_key.as_deref())
            .or_else(|| app.and_then(|a| a.group_key.as_deref()))
            .or(self.group_key.as_deref())
            .ok_or_else(|| SettingsError::MissingGroupKey {
                application: application_id.to_string(),
                port,
            })?;
        decode_group_key(&format!("{application_id}-{port}"), encoded)
    }

    /// Whether a port-specific enrollment group key exists for
    /// (application, port).
    pub fn has_port_specific_group_key(&self, application_id: &str, port: u16) -> bool {
        self.applications
            .get(application_id)
            .and_then(|a| a.ports.get(&port))
            .map(|p| p.group_key.is_some())
            .unwrap_or(false)
    }

    /// Cache key for the device's connection slot.
    ///
    /// The device id alone is unique across applications (the network
    /// server enforces that), so the port suffix is only needed when a
    /// port-specific group key makes the same device id provisionable under
    /// two different secrets.
    pub fn registration_key(&self, application_id: &str, port: u16, device_id: &str) -> String {
        if self.has_port_specific_group_key(application_id, port) {
            format!("{device_id}-{port}")
        } else {
            device_id.to_string()
        }
    }
}

fn decode_group_key(scope: &str, encoded: &str) -> Result<Vec<u8>, SettingsError> {
    STANDARD
        .decode(encoded)
        .map_err(|source| SettingsError::InvalidGroupKey {
            scope: scope.to_string(),
            source,
        })
}
