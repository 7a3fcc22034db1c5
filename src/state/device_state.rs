// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Device state tracking.

use std::sync::atomic::{AtomicU8, Ordering};

use crate::types::CadenceMode;

use super::ModeChange;

/// Tracked state of the simulated device.
///
/// The only state is the cadence mode. It is stored in an atomic so the
/// command handler, running on the transport's delivery task, and the roll
/// loop, running on its own task, can share it through an `Arc` without a
/// lock. A reader may observe a write one iteration late; nothing stronger
/// is needed.
///
/// # Examples
///
/// ```
/// use d20_device::state::DeviceState;
/// use d20_device::types::CadenceMode;
///
/// let state = DeviceState::new();
/// assert_eq!(state.mode(), CadenceMode::Slow);
///
/// state.set_mode(CadenceMode::Fast);
/// assert_eq!(state.mode(), CadenceMode::Fast);
/// ```
#[derive(Debug)]
pub struct DeviceState {
    mode: AtomicU8,
}

impl DeviceState {
    /// Creates a state in the default (slow) cadence.
    #[must_use]
    pub fn new() -> Self {
        Self::with_mode(CadenceMode::default())
    }

    /// Creates a state in the given cadence.
    #[must_use]
    pub fn with_mode(mode: CadenceMode) -> Self {
        Self {
            mode: AtomicU8::new(mode.to_u8()),
        }
    }

    /// Returns the current cadence mode.
    #[must_use]
    pub fn mode(&self) -> CadenceMode {
        CadenceMode::from_u8(self.mode.load(Ordering::Acquire))
    }

    /// Sets the cadence mode.
    pub fn set_mode(&self, mode: CadenceMode) {
        self.mode.store(mode.to_u8(), Ordering::Release);
    }

    /// Sets the cadence mode and returns the mode it replaced.
    ///
    /// The read and the write happen as one atomic step, so concurrent
    /// callers never observe a torn update.
    pub fn replace(&self, mode: CadenceMode) -> CadenceMode {
        CadenceMode::from_u8(self.mode.swap(mode.to_u8(), Ordering::AcqRel))
    }

    /// Applies a mode and reports the transition.
    pub fn apply(&self, mode: CadenceMode) -> ModeChange {
        let previous = self.replace(mode);
        ModeChange::new(previous, mode)
    }
}

impl Default for DeviceState {
    fn default() -> Self {
        Self::new()
    }
}
