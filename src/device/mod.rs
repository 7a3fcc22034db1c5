// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The simulated device.
//!
//! A device has three moving parts sharing one [`DeviceState`]:
//!
//! - [`CommandHandler`] switches the cadence when a command arrives on the
//!   speed topic and acknowledges it
//! - [`RollLoop`] publishes a random roll, then sleeps 3 s (fast) or 15 s
//!   (slow)
//! - [`DeviceController`] wires both to a [`Transport`] and runs the
//!   lifecycle
//!
//! ```text
//!  speed ──▶ CommandHandler ──▶ DeviceState ──▶ RollLoop ──▶ roll
//!                 │
//!                 └──▶ speed/ack
//! ```
//!
//! [`DeviceState`]: crate::state::DeviceState
//! [`Transport`]: crate::protocol::Transport
//!
//! # Examples
//!
//! ```
//! use std::sync::Arc;
//! use d20_device::device::{ControllerSettings, DeviceController};
//! use d20_device::protocol::LoopbackTransport;
//! use d20_device::types::CadenceMode;
//! use d20_device::Topics;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> d20_device::Result<()> {
//! let transport = Arc::new(LoopbackTransport::new());
//! let controller = DeviceController::new(
//!     Arc::clone(&transport),
//!     Topics::default(),
//!     ControllerSettings::default().with_drain_delay(std::time::Duration::ZERO),
//! );
//!
//! let running = controller.start().await?;
//! transport.inject("device1/d20/speed", br#"{"value":"fast"}"#);
//! assert_eq!(running.state().mode(), CadenceMode::Fast);
//!
//! running.stop().await?;
//! # Ok(())
//! # }
//! ```

mod command_handler;
mod controller;
mod roll_loop;

pub use command_handler::CommandHandler;
pub use controller::{ControllerPhase, ControllerSettings, DeviceController, RunHandle};
pub use roll_loop::{RollLoop, RollStats};
