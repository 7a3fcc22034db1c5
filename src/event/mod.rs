// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Connection lifecycle events.
//!
//! Transports report connection changes as [`ConnectionEvent`]s on an
//! [`EventBus`]. Events are informational: they never alter device state or
//! pause publishing.
//!
//! # Examples
//!
//! ```
//! use d20_device::event::{ConnectionEvent, EventBus};
//!
//! let bus = EventBus::new();
//! let mut rx = bus.subscribe();
//!
//! bus.publish(ConnectionEvent::Interrupted {
//!     error: "connection reset by peer".to_string(),
//! });
//! assert!(rx.try_recv().unwrap().is_interruption());
//! ```

mod connection_event;
mod event_bus;

pub use connection_event::ConnectionEvent;
pub use event_bus::EventBus;
