// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Device state management types.
//!
//! The [`DeviceState`] holds the cadence mode shared between the command
//! handler (the only writer) and the roll loop (the only reader). Each
//! applied command yields a [`ModeChange`] describing the transition.
//!
//! # Examples
//!
//! ```
//! use d20_device::state::DeviceState;
//! use d20_device::types::CadenceMode;
//!
//! let state = DeviceState::new();
//! let change = state.apply(CadenceMode::Fast);
//!
//! assert_eq!(change.previous, CadenceMode::Slow);
//! assert_eq!(change.current, CadenceMode::Fast);
//! assert_eq!(state.mode(), CadenceMode::Fast);
//! ```

mod device_state;
mod mode_change;

pub use device_state::DeviceState;
pub use mode_change::ModeChange;
