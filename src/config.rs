// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Device configuration.

use std::path::PathBuf;
use std::time::Duration;

use crate::device::ControllerSettings;
use crate::error::ConfigError;
use crate::topics::Topics;
use crate::types::Cadence;

/// Default MQTT port without TLS.
pub const DEFAULT_PORT: u16 = 1883;

/// Default MQTT port with TLS.
pub const DEFAULT_TLS_PORT: u16 = 8883;

/// Paths to the TLS material used to reach the broker.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TlsFiles {
    /// Client certificate, PEM.
    pub cert: Option<PathBuf>,
    /// Client private key, PEM.
    pub key: Option<PathBuf>,
    /// Root certificate authority, PEM.
    pub root_ca: Option<PathBuf>,
}

/// How the connection to the broker is secured.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TlsMode {
    /// Plain TCP.
    None,
    /// TLS, verifying the broker against `root_ca`.
    ServerAuth {
        /// Root certificate authority.
        root_ca: PathBuf,
    },
    /// TLS with a client certificate.
    Mutual {
        /// Root certificate authority. Without one, the broker is verified
        /// against the platform trust store.
        root_ca: Option<PathBuf>,
        /// Client certificate.
        cert: PathBuf,
        /// Client private key.
        key: PathBuf,
    },
}

impl TlsFiles {
    /// Resolves which TLS mode these files describe.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::IncompleteClientAuth` if only one of certificate
    /// and key is set.
    pub fn mode(&self) -> Result<TlsMode, ConfigError> {
        match (&self.cert, &self.key, &self.root_ca) {
            (None, None, None) => Ok(TlsMode::None),
            (None, None, Some(root_ca)) => Ok(TlsMode::ServerAuth {
                root_ca: root_ca.clone(),
            }),
            (Some(cert), Some(key), root_ca) => Ok(TlsMode::Mutual {
                root_ca: root_ca.clone(),
                cert: cert.clone(),
                key: key.clone(),
            }),
            _ => Err(ConfigError::IncompleteClientAuth),
        }
    }
}

/// Configuration for a simulated device.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use d20_device::DeviceConfig;
///
/// let config = DeviceConfig::new("abc123-ats.iot.eu-west-1.amazonaws.com", "d20-thing")
///     .with_client_id("d20-lab")
///     .with_root_ca("certs/AmazonRootCA1.pem")
///     .with_client_auth("certs/device.pem.crt", "certs/private.pem.key")
///     .with_drain_delay(Duration::from_secs(1));
///
/// assert_eq!(config.port().unwrap(), 8883);
/// assert_eq!(config.client_id(), "d20-lab");
/// ```
#[derive(Debug, Clone)]
pub struct DeviceConfig {
    endpoint: String,
    port: Option<u16>,
    tls: TlsFiles,
    client_id: String,
    thing_name: String,
    keep_alive: Duration,
    clean_session: bool,
    connection_timeout: Duration,
    topic_prefix: String,
    cadence: Cadence,
    drain_delay: Duration,
    commandable: bool,
}

impl DeviceConfig {
    /// Default keep-alive interval.
    pub const DEFAULT_KEEP_ALIVE: Duration = Duration::from_secs(6);

    /// Default time allowed for the initial connection and each subscription.
    pub const DEFAULT_CONNECTION_TIMEOUT: Duration = Duration::from_secs(10);

    /// Creates a configuration for the broker at `endpoint`.
    #[must_use]
    pub fn new(endpoint: impl Into<String>, thing_name: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            port: None,
            tls: TlsFiles::default(),
            client_id: generate_client_id(),
            thing_name: thing_name.into(),
            keep_alive: Self::DEFAULT_KEEP_ALIVE,
            clean_session: false,
            connection_timeout: Self::DEFAULT_CONNECTION_TIMEOUT,
            topic_prefix: Topics::DEFAULT_PREFIX.to_string(),
            cadence: Cadence::default(),
            drain_delay: ControllerSettings::DEFAULT_DRAIN_DELAY,
            commandable: true,
        }
    }

    /// Sets the broker port. Defaults to 8883 with TLS and 1883 without.
    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Sets the root certificate authority used to verify the broker.
    #[must_use]
    pub fn with_root_ca(mut self, path: impl Into<PathBuf>) -> Self {
        self.tls.root_ca = Some(path.into());
        self
    }

    /// Sets the client certificate and private key.
    #[must_use]
    pub fn with_client_auth(mut self, cert: impl Into<PathBuf>, key: impl Into<PathBuf>) -> Self {
        self.tls.cert = Some(cert.into());
        self.tls.key = Some(key.into());
        self
    }

    /// Sets the MQTT client identifier.
    #[must_use]
    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = client_id.into();
        self
    }

    /// Sets the keep-alive interval (default: 6 seconds).
    #[must_use]
    pub fn with_keep_alive(mut self, keep_alive: Duration) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    /// Sets whether the broker should discard the previous session
    /// (default: `false`).
    #[must_use]
    pub fn with_clean_session(mut self, clean_session: bool) -> Self {
        self.clean_session = clean_session;
        self
    }

    /// Sets the connect and subscribe timeout (default: 10 seconds).
    #[must_use]
    pub fn with_connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout;
        self
    }

    /// Sets the topic prefix (default: `device1/d20`).
    #[must_use]
    pub fn with_topic_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.topic_prefix = prefix.into();
        self
    }

    /// Sets the publish intervals.
    #[must_use]
    pub fn with_cadence(mut self, cadence: Cadence) -> Self {
        self.cadence = cadence;
        self
    }

    /// Sets the grace period between stopping the loop and disconnecting
    /// (default: 5 seconds).
    #[must_use]
    pub fn with_drain_delay(mut self, drain_delay: Duration) -> Self {
        self.drain_delay = drain_delay;
        self
    }

    /// Sets whether the device subscribes to cadence commands
    /// (default: `true`).
    #[must_use]
    pub fn with_commands(mut self, commandable: bool) -> Self {
        self.commandable = commandable;
        self
    }

    /// Returns the broker endpoint.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Returns the broker port, derived from the TLS mode if not set.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the TLS files are inconsistent.
    pub fn port(&self) -> Result<u16, ConfigError> {
        if let Some(port) = self.port {
            return Ok(port);
        }
        Ok(match self.tls.mode()? {
            TlsMode::None => DEFAULT_PORT,
            TlsMode::ServerAuth { .. } | TlsMode::Mutual { .. } => DEFAULT_TLS_PORT,
        })
    }

    /// Returns the TLS file paths.
    #[must_use]
    pub fn tls_files(&self) -> &TlsFiles {
        &self.tls
    }

    /// Returns the MQTT client identifier.
    #[must_use]
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Returns the thing name.
    #[must_use]
    pub fn thing_name(&self) -> &str {
        &self.thing_name
    }

    /// Returns the keep-alive interval.
    #[must_use]
    pub fn keep_alive(&self) -> Duration {
        self.keep_alive
    }

    /// Returns whether a clean session is requested.
    #[must_use]
    pub fn clean_session(&self) -> bool {
        self.clean_session
    }

    /// Returns the connect and subscribe timeout.
    #[must_use]
    pub fn connection_timeout(&self) -> Duration {
        self.connection_timeout
    }

    /// Builds the topic set from the configured prefix.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidTopicPrefix` for an unusable prefix.
    pub fn topics(&self) -> Result<Topics, ConfigError> {
        Topics::new(&self.topic_prefix)
    }

    /// Returns the controller settings described by this configuration.
    #[must_use]
    pub fn controller_settings(&self) -> ControllerSettings {
        ControllerSettings::default()
            .with_cadence(self.cadence)
            .with_drain_delay(self.drain_delay)
            .with_commands(self.commandable)
    }

    /// Checks that the configuration is usable.
    ///
    /// # Errors
    ///
    /// Returns the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.endpoint.trim().is_empty() {
            return Err(ConfigError::Missing("endpoint"));
        }
        if self.thing_name.trim().is_empty() {
            return Err(ConfigError::Missing("thing name"));
        }
        if self.client_id.is_empty() {
            return Err(ConfigError::Missing("client id"));
        }
        self.tls.mode()?;
        self.topics()?;
        Ok(())
    }
}

/// Generates a client identifier of the form `test-<uuid>`.
#[must_use]
pub fn generate_client_id() -> String {
    format!("test-{}", uuid::Uuid::new_v4())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = DeviceConfig::new("broker.local", "thing");
        assert_eq!(config.keep_alive(), Duration::from_secs(6));
        assert!(!config.clean_session());
        assert_eq!(config.connection_timeout(), Duration::from_secs(10));
        assert_eq!(config.port().unwrap(), DEFAULT_PORT);
        assert_eq!(config.topics().unwrap(), Topics::default());
        assert!(config.client_id().starts_with("test-"));

        let settings = config.controller_settings();
        assert_eq!(settings.drain_delay(), Duration::from_secs(5));
        assert!(settings.commandable());
    }

    #[test]
    fn generated_client_ids_are_unique() {
        assert_ne!(generate_client_id(), generate_client_id());
    }

    #[test]
    fn tls_defaults_to_secure_port() {
        let config = DeviceConfig::new("broker.local", "thing").with_root_ca("ca.pem");
        assert_eq!(config.port().unwrap(), DEFAULT_TLS_PORT);
    }

    #[test]
    fn client_auth_without_root_ca_uses_secure_port() {
        let config =
            DeviceConfig::new("broker.local", "thing").with_client_auth("c.pem", "k.pem");
        assert!(config.validate().is_ok());
        assert_eq!(config.port().unwrap(), DEFAULT_TLS_PORT);
    }

    #[test]
    fn explicit_port_wins() {
        let config = DeviceConfig::new("broker.local", "thing")
            .with_root_ca("ca.pem")
            .with_port(443);
        assert_eq!(config.port().unwrap(), 443);
    }

    #[test]
    fn tls_mode_resolution() {
        let files = TlsFiles::default();
        assert_eq!(files.mode().unwrap(), TlsMode::None);

        let files = TlsFiles {
            cert: Some("c.pem".into()),
            key: Some("k.pem".into()),
            root_ca: Some("ca.pem".into()),
        };
        assert!(matches!(files.mode().unwrap(), TlsMode::Mutual { .. }));

        let files = TlsFiles {
            cert: Some("c.pem".into()),
            key: Some("k.pem".into()),
            root_ca: None,
        };
        assert_eq!(
            files.mode().unwrap(),
            TlsMode::Mutual {
                root_ca: None,
                cert: "c.pem".into(),
                key: "k.pem".into(),
            }
        );

        let files = TlsFiles {
            cert: Some("c.pem".into()),
            key: None,
            root_ca: Some("ca.pem".into()),
        };
        assert_eq!(files.mode(), Err(ConfigError::IncompleteClientAuth));
    }

    #[test]
    fn validate_rejects_blank_endpoint() {
        let config = DeviceConfig::new("  ", "thing");
        assert_eq!(config.validate(), Err(ConfigError::Missing("endpoint")));
    }

    #[test]
    fn validate_rejects_wildcard_prefix() {
        let config = DeviceConfig::new("broker.local", "thing").with_topic_prefix("device1/#");
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidTopicPrefix(_))
        ));
    }

    #[test]
    fn publish_only_settings() {
        let settings = DeviceConfig::new("broker.local", "thing")
            .with_commands(false)
            .controller_settings();
        assert!(!settings.commandable());
    }
}
