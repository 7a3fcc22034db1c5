// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Error types for the simulated device.
//!
//! Failures fall into two groups. Startup failures (connecting to the broker,
//! setting up the initial subscriptions, invalid configuration) are fatal and
//! surface to the caller. Steady-state failures (a malformed command payload,
//! a publish that could not be queued) are logged where they happen and never
//! stop the device.

use std::path::PathBuf;

use thiserror::Error;

/// The main error type for this crate.
#[derive(Debug, Error)]
pub enum Error {
    /// Error occurred while talking to the broker.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Error occurred while parsing an inbound payload.
    #[error("parse error: {0}")]
    Parse(#[from] ParseError),

    /// The device configuration is invalid.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The roll loop task panicked or was aborted.
    #[error("roll loop task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Errors related to value validation and constraints.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValueError {
    /// A numeric value is outside the allowed range.
    #[error("value {actual} is out of range [{min}, {max}]")]
    OutOfRange {
        /// Minimum allowed value.
        min: u16,
        /// Maximum allowed value.
        max: u16,
        /// The actual value that was provided.
        actual: u16,
    },
}

/// Errors related to broker communication.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The MQTT client rejected a request.
    #[error("MQTT error: {0}")]
    Mqtt(#[from] rumqttc::ClientError),

    /// Connection to the broker failed.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// A request timed out.
    #[error("request timed out after {0} ms")]
    Timeout(u64),

    /// Invalid broker address.
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    /// The broker refused a subscription.
    #[error("subscription to {topic} failed: {reason}")]
    SubscribeFailed {
        /// The topic filter that was requested.
        topic: String,
        /// Why the subscription failed.
        reason: String,
    },

    /// A publish could not be handed to the connection.
    #[error("publish to {topic} failed: {reason}")]
    PublishFailed {
        /// The destination topic.
        topic: String,
        /// Why the publish failed.
        reason: String,
    },

    /// A certificate or key file could not be read.
    #[error("failed to read {}: {source}", path.display())]
    Certificate {
        /// Path of the unreadable file.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// TLS material could not be used.
    #[error("TLS setup failed: {0}")]
    Tls(String),

    /// Internal channel was closed.
    #[error("channel closed: {0}")]
    ChannelClosed(String),
}

/// Errors related to parsing inbound payloads.
///
/// A command that fails to parse is a malformed command: it is logged and
/// dropped without touching device state.
#[derive(Debug, Error)]
pub enum ParseError {
    /// JSON parsing failed.
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    /// Expected field is missing from the payload.
    #[error("missing field in payload: {0}")]
    MissingField(String),

    /// Unexpected payload format.
    #[error("unexpected payload format: {0}")]
    UnexpectedFormat(String),

    /// A field has the wrong type or value.
    #[error("failed to parse {field}: {message}")]
    InvalidValue {
        /// The field that failed to parse.
        field: String,
        /// Description of the parsing failure.
        message: String,
    },
}

/// Errors related to device configuration.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A required setting was not provided.
    #[error("{0} is required")]
    Missing(&'static str),

    /// Client certificate and private key must be given together.
    #[error("client certificate and private key must be provided together")]
    IncompleteClientAuth,

    /// The topic prefix is not usable as an MQTT topic.
    #[error("invalid topic prefix {0:?}")]
    InvalidTopicPrefix(String),
}

/// A specialized Result type for this crate.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn value_error_display() {
        let err = ValueError::OutOfRange {
            min: 1,
            max: 20,
            actual: 21,
        };
        assert_eq!(err.to_string(), "value 21 is out of range [1, 20]");
    }

    #[test]
    fn error_from_parse_error() {
        let parse_err = ParseError::MissingField("value".to_string());
        let err: Error = parse_err.into();
        assert!(matches!(err, Error::Parse(ParseError::MissingField(_))));
        assert_eq!(
            err.to_string(),
            "parse error: missing field in payload: value"
        );
    }

    #[test]
    fn subscribe_failed_display() {
        let err = ProtocolError::SubscribeFailed {
            topic: "device1/d20/speed".to_string(),
            reason: "refused by broker".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "subscription to device1/d20/speed failed: refused by broker"
        );
    }

    #[test]
    fn certificate_error_names_path() {
        let err = ProtocolError::Certificate {
            path: PathBuf::from("/tmp/missing.pem"),
            source: std::io::Error::from(std::io::ErrorKind::NotFound),
        };
        assert!(err.to_string().starts_with("failed to read /tmp/missing.pem"));
    }

    #[test]
    fn config_error_display() {
        assert_eq!(
            ConfigError::Missing("endpoint").to_string(),
            "endpoint is required"
        );
    }
}
