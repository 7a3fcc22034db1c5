// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Connection event types.

use std::fmt;

/// A change in the broker connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// The first connection was established.
    Connected {
        /// Whether the broker resumed a stored session.
        session_present: bool,
    },

    /// An established connection was lost. The transport keeps retrying.
    Interrupted {
        /// Description of the failure.
        error: String,
    },

    /// The connection came back after an interruption.
    Resumed {
        /// The broker's CONNACK return code.
        return_code: String,
        /// Whether the broker resumed a stored session.
        session_present: bool,
    },

    /// The connection was closed on request.
    Disconnected,
}

impl ConnectionEvent {
    /// Returns `true` for [`ConnectionEvent::Interrupted`].
    #[must_use]
    pub fn is_interruption(&self) -> bool {
        matches!(self, Self::Interrupted { .. })
    }
}

impl fmt::Display for ConnectionEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connected { session_present } => {
                write!(f, "Connected. session_present: {session_present}")
            }
            Self::Interrupted { error } => write!(f, "Connection interrupted. error: {error}"),
            Self::Resumed {
                return_code,
                session_present,
            } => write!(
                f,
                "Connection resumed. return_code: {return_code} session_present: {session_present}"
            ),
            Self::Disconnected => f.write_str("Disconnected"),
        }
    }
}
