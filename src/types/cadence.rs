// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Publish cadence types.
//!
//! The device publishes a reading, then sleeps for an interval chosen by the
//! current [`CadenceMode`]. The intervals themselves live in [`Cadence`].

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Controls how often the device publishes a reading.
///
/// # Examples
///
/// ```
/// use d20_device::types::CadenceMode;
///
/// assert_eq!(CadenceMode::default(), CadenceMode::Slow);
/// assert_eq!(CadenceMode::Fast.as_str(), "fast");
///
/// // Anything but "fast" selects the slow cadence.
/// assert_eq!(CadenceMode::from_command_value("fast"), CadenceMode::Fast);
/// assert_eq!(CadenceMode::from_command_value("banana"), CadenceMode::Slow);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CadenceMode {
    /// Short publish interval.
    Fast,
    /// Long publish interval.
    #[default]
    Slow,
}

impl CadenceMode {
    /// Returns the wire representation of the mode.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Fast => "fast",
            Self::Slow => "slow",
        }
    }

    /// Maps a command value to a mode.
    ///
    /// This mapping is total: `"fast"` selects [`CadenceMode::Fast`] and every
    /// other string, recognized or not, selects [`CadenceMode::Slow`].
    #[must_use]
    pub fn from_command_value(value: &str) -> Self {
        if value == "fast" { Self::Fast } else { Self::Slow }
    }

    pub(crate) const fn to_u8(self) -> u8 {
        match self {
            Self::Fast => 1,
            Self::Slow => 0,
        }
    }

    pub(crate) const fn from_u8(value: u8) -> Self {
        if value == 1 { Self::Fast } else { Self::Slow }
    }
}

impl fmt::Display for CadenceMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sleep intervals used by the roll loop for each cadence mode.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use d20_device::types::{Cadence, CadenceMode};
///
/// let cadence = Cadence::default();
/// assert_eq!(cadence.interval(CadenceMode::Fast), Duration::from_secs(3));
/// assert_eq!(cadence.interval(CadenceMode::Slow), Duration::from_secs(15));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cadence {
    fast: Duration,
    slow: Duration,
}

impl Cadence {
    /// Default interval for [`CadenceMode::Fast`].
    pub const FAST_INTERVAL: Duration = Duration::from_secs(3);

    /// Default interval for [`CadenceMode::Slow`].
    pub const SLOW_INTERVAL: Duration = Duration::from_secs(15);

    /// Creates a cadence with custom intervals.
    #[must_use]
    pub const fn new(fast: Duration, slow: Duration) -> Self {
        Self { fast, slow }
    }

    /// Creates a cadence that uses the same interval for both modes.
    #[must_use]
    pub const fn fixed(interval: Duration) -> Self {
        Self::new(interval, interval)
    }

    /// Returns the sleep interval for a mode.
    #[must_use]
    pub const fn interval(&self, mode: CadenceMode) -> Duration {
        match mode {
            CadenceMode::Fast => self.fast,
            CadenceMode::Slow => self.slow,
        }
    }
}

impl Default for Cadence {
    fn default() -> Self {
        Self::new(Self::FAST_INTERVAL, Self::SLOW_INTERVAL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_value_mapping_is_permissive() {
        assert_eq!(CadenceMode::from_command_value("fast"), CadenceMode::Fast);
        assert_eq!(CadenceMode::from_command_value("slow"), CadenceMode::Slow);
        assert_eq!(CadenceMode::from_command_value("FAST"), CadenceMode::Slow);
        assert_eq!(CadenceMode::from_command_value(""), CadenceMode::Slow);
        assert_eq!(CadenceMode::from_command_value("banana"), CadenceMode::Slow);
    }

    #[test]
    fn serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&CadenceMode::Fast).unwrap(),
            "\"fast\""
        );
        assert_eq!(
            serde_json::to_string(&CadenceMode::Slow).unwrap(),
            "\"slow\""
        );
    }

    #[test]
    fn u8_encoding_roundtrip() {
        for mode in [CadenceMode::Fast, CadenceMode::Slow] {
            assert_eq!(CadenceMode::from_u8(mode.to_u8()), mode);
        }
    }

    #[test]
    fn fixed_cadence_ignores_mode() {
        let cadence = Cadence::fixed(Duration::from_secs(15));
        assert_eq!(cadence.interval(CadenceMode::Fast), Duration::from_secs(15));
        assert_eq!(cadence.interval(CadenceMode::Slow), Duration::from_secs(15));
    }

    #[test]
    fn display_matches_wire_format() {
        assert_eq!(CadenceMode::Fast.to_string(), "fast");
        assert_eq!(CadenceMode::Slow.to_string(), "slow");
    }
}
