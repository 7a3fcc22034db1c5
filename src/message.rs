// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! JSON payloads exchanged with the broker.
//!
//! | Topic              | Direction | Payload                                 |
//! |--------------------|-----------|-----------------------------------------|
//! | `<prefix>/roll`      | out     | [`RollReading`] `{"value": 1..20}`      |
//! | `<prefix>/roll/ack`  | in      | opaque, logged verbatim                 |
//! | `<prefix>/speed`     | in      | [`SpeedCommand`] `{"value": "fast"}`    |
//! | `<prefix>/speed/ack` | out     | [`SpeedAck`] `{"oldspeed": .., "newspeed": ..}` |

use serde::{Deserialize, Serialize};

use crate::error::ParseError;
use crate::types::{CadenceMode, Roll};

/// A reading published on the roll topic.
///
/// # Examples
///
/// ```
/// use d20_device::message::RollReading;
/// use d20_device::types::Roll;
///
/// let reading = RollReading::from(Roll::new(17).unwrap());
/// assert_eq!(reading.to_payload().unwrap(), br#"{"value":17}"#);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollReading {
    /// The rolled face (1-20).
    pub value: u8,
}

impl RollReading {
    /// Serializes the reading to its wire form.
    ///
    /// # Errors
    ///
    /// Returns `ParseError::Json` if serialization fails.
    pub fn to_payload(&self) -> Result<Vec<u8>, ParseError> {
        serde_json::to_vec(self).map_err(Into::into)
    }
}

impl From<Roll> for RollReading {
    fn from(roll: Roll) -> Self {
        Self {
            value: roll.value(),
        }
    }
}

/// A command received on the speed topic.
///
/// Only the `value` field is read; any other fields are ignored.
///
/// # Examples
///
/// ```
/// use d20_device::message::SpeedCommand;
/// use d20_device::types::CadenceMode;
///
/// let cmd = SpeedCommand::from_payload(br#"{"value": "fast"}"#).unwrap();
/// assert_eq!(cmd.mode(), CadenceMode::Fast);
///
/// assert!(SpeedCommand::from_payload(b"{}").is_err());
/// assert!(SpeedCommand::from_payload(b"not json").is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpeedCommand {
    value: String,
}

impl SpeedCommand {
    /// Parses a command payload.
    ///
    /// # Errors
    ///
    /// Returns `ParseError` if the payload is not JSON, is not an object,
    /// has no `value` field, or `value` is not a string.
    pub fn from_payload(payload: &[u8]) -> Result<Self, ParseError> {
        let json: serde_json::Value = serde_json::from_slice(payload)?;

        let object = json.as_object().ok_or_else(|| {
            ParseError::UnexpectedFormat(format!("expected a JSON object, got {json}"))
        })?;

        let value = object
            .get("value")
            .ok_or_else(|| ParseError::MissingField("value".to_string()))?;

        let value = value.as_str().ok_or_else(|| ParseError::InvalidValue {
            field: "value".to_string(),
            message: format!("expected a string, got {value}"),
        })?;

        Ok(Self {
            value: value.to_string(),
        })
    }

    /// Returns the raw command value.
    #[must_use]
    pub fn value(&self) -> &str {
        &self.value
    }

    /// Returns the cadence mode this command selects.
    #[must_use]
    pub fn mode(&self) -> CadenceMode {
        CadenceMode::from_command_value(&self.value)
    }
}

/// Acknowledgement published after each applied command.
///
/// # Examples
///
/// ```
/// use d20_device::message::SpeedAck;
/// use d20_device::types::CadenceMode;
///
/// let ack = SpeedAck { oldspeed: CadenceMode::Slow, newspeed: CadenceMode::Fast };
/// assert_eq!(
///     ack.to_payload().unwrap(),
///     br#"{"oldspeed":"slow","newspeed":"fast"}"#
/// );
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpeedAck {
    /// Mode before the command was applied.
    pub oldspeed: CadenceMode,
    /// Mode after the command was applied.
    pub newspeed: CadenceMode,
}

impl SpeedAck {
    /// Serializes the acknowledgement to its wire form.
    ///
    /// # Errors
    ///
    /// Returns `ParseError::Json` if serialization fails.
    pub fn to_payload(&self) -> Result<Vec<u8>, ParseError> {
        serde_json::to_vec(self).map_err(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_fast_command() {
        let cmd = SpeedCommand::from_payload(br#"{"value":"fast"}"#).unwrap();
        assert_eq!(cmd.value(), "fast");
        assert_eq!(cmd.mode(), CadenceMode::Fast);
    }

    #[test]
    fn unknown_value_selects_slow() {
        let cmd = SpeedCommand::from_payload(br#"{"value":"banana"}"#).unwrap();
        assert_eq!(cmd.mode(), CadenceMode::Slow);
    }

    #[test]
    fn extra_fields_are_ignored() {
        let cmd =
            SpeedCommand::from_payload(br#"{"value":"fast","source":"console"}"#).unwrap();
        assert_eq!(cmd.mode(), CadenceMode::Fast);
    }

    #[test]
    fn empty_object_is_missing_field() {
        let err = SpeedCommand::from_payload(b"{}").unwrap_err();
        assert!(matches!(err, ParseError::MissingField(field) if field == "value"));
    }

    #[test]
    fn non_json_is_rejected() {
        let err = SpeedCommand::from_payload(b"fast").unwrap_err();
        assert!(matches!(err, ParseError::Json(_)));
    }

    #[test]
    fn non_object_is_rejected() {
        let err = SpeedCommand::from_payload(br#"["fast"]"#).unwrap_err();
        assert!(matches!(err, ParseError::UnexpectedFormat(_)));
    }

    #[test]
    fn non_string_value_is_rejected() {
        let err = SpeedCommand::from_payload(br#"{"value": 3}"#).unwrap_err();
        assert!(matches!(err, ParseError::InvalidValue { .. }));
    }

    #[test]
    fn ack_field_names_are_exact() {
        let ack = SpeedAck {
            oldspeed: CadenceMode::Fast,
            newspeed: CadenceMode::Slow,
        };
        let json: serde_json::Value = serde_json::from_slice(&ack.to_payload().unwrap()).unwrap();
        assert_eq!(json["oldspeed"], "fast");
        assert_eq!(json["newspeed"], "slow");
    }

    #[test]
    fn reading_serializes_as_integer() {
        let reading = RollReading { value: 1 };
        let json: serde_json::Value =
            serde_json::from_slice(&reading.to_payload().unwrap()).unwrap();
        assert_eq!(json["value"], 1);
    }
}
