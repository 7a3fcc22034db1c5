// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Cadence mode transitions.

use crate::message::SpeedAck;
use crate::types::CadenceMode;

/// A cadence mode transition produced by applying a command.
///
/// A transition is reported for every command, including ones that leave
/// the mode unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModeChange {
    /// Mode before the command.
    pub previous: CadenceMode,
    /// Mode after the command.
    pub current: CadenceMode,
}

impl ModeChange {
    /// Creates a transition.
    #[must_use]
    pub const fn new(previous: CadenceMode, current: CadenceMode) -> Self {
        Self { previous, current }
    }

    /// Returns `true` if the mode actually changed.
    #[must_use]
    pub fn is_change(&self) -> bool {
        self.previous != self.current
    }

    /// Returns the acknowledgement published for this transition.
    #[must_use]
    pub const fn ack(&self) -> SpeedAck {
        SpeedAck {
            oldspeed: self.previous,
            newspeed: self.current,
        }
    }
}
