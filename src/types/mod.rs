// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Value types for the simulated device.
//!
//! # Types
//!
//! - [`CadenceMode`] - Fast/slow publish cadence selected by commands
//! - [`Cadence`] - Sleep interval for each cadence mode
//! - [`Roll`] - A D20 reading (1-20)

mod cadence;
mod roll;

pub use cadence::{Cadence, CadenceMode};
pub use roll::Roll;
