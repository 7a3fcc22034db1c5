// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! MQTT topic layout of the device.

use crate::error::ConfigError;

/// Topics used by the device, all derived from one prefix.
///
/// With the default prefix `device1/d20`:
/// - `device1/d20/roll` - outbound readings
/// - `device1/d20/roll/ack` - inbound acknowledgements, logged only
/// - `device1/d20/speed` - inbound cadence commands
/// - `device1/d20/speed/ack` - outbound command acknowledgements
///
/// # Examples
///
/// ```
/// use d20_device::Topics;
///
/// let topics = Topics::default();
/// assert_eq!(topics.roll(), "device1/d20/roll");
/// assert_eq!(topics.speed_ack(), "device1/d20/speed/ack");
///
/// let topics = Topics::new("lab/die7").unwrap();
/// assert_eq!(topics.speed(), "lab/die7/speed");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topics {
    roll: String,
    roll_ack: String,
    speed: String,
    speed_ack: String,
}

impl Topics {
    /// Default topic prefix.
    pub const DEFAULT_PREFIX: &'static str = "device1/d20";

    /// Builds the topic set under `prefix`.
    ///
    /// A trailing `/` is ignored.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidTopicPrefix` if the prefix is empty or
    /// contains MQTT wildcards or NUL characters.
    pub fn new(prefix: &str) -> Result<Self, ConfigError> {
        let trimmed = prefix.trim_end_matches('/');
        if trimmed.is_empty() || trimmed.contains(['+', '#', '\0']) {
            return Err(ConfigError::InvalidTopicPrefix(prefix.to_string()));
        }

        Ok(Self {
            roll: format!("{trimmed}/roll"),
            roll_ack: format!("{trimmed}/roll/ack"),
            speed: format!("{trimmed}/speed"),
            speed_ack: format!("{trimmed}/speed/ack"),
        })
    }

    /// Topic for outbound readings.
    #[must_use]
    pub fn roll(&self) -> &str {
        &self.roll
    }

    /// Topic for inbound reading acknowledgements.
    #[must_use]
    pub fn roll_ack(&self) -> &str {
        &self.roll_ack
    }

    /// Topic for inbound cadence commands.
    #[must_use]
    pub fn speed(&self) -> &str {
        &self.speed
    }

    /// Topic for outbound command acknowledgements.
    #[must_use]
    pub fn speed_ack(&self) -> &str {
        &self.speed_ack
    }
}

impl Default for Topics {
    fn default() -> Self {
        Self {
            roll: "device1/d20/roll".to_string(),
            roll_ack: "device1/d20/roll/ack".to_string(),
            speed: "device1/d20/speed".to_string(),
            speed_ack: "device1/d20/speed/ack".to_string(),
        }
    }
}
