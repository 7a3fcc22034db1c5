// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Handlers for inbound MQTT messages.
//!
//! A transport delivers every message received on a subscribed topic to the
//! [`MessageHandler`] registered for it. Handlers run on the transport's
//! delivery task, so they must return quickly and never block.
//!
//! # Usage
//!
//! Closures taking `(&str, &[u8])` are handlers:
//!
//! ```
//! use std::sync::Arc;
//! use d20_device::subscription::MessageHandler;
//!
//! let handler: Arc<dyn MessageHandler> = Arc::new(|topic: &str, payload: &[u8]| {
//!     println!("{topic}: {}", String::from_utf8_lossy(payload));
//! });
//! handler.on_message("device1/d20/roll/ack", b"{}");
//! ```

mod handler;

pub use handler::{LogHandler, MessageHandler};
