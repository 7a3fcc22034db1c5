// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Message handler trait and the pass-through logging handler.

use std::sync::atomic::{AtomicU64, Ordering};

/// Receives messages delivered on a subscribed topic.
///
/// Implementations must be thread-safe: transports may invoke a handler
/// from any task, and concurrently with the rest of the device.
pub trait MessageHandler: Send + Sync {
    /// Handles one inbound message.
    fn on_message(&self, topic: &str, payload: &[u8]);
}

impl<F> MessageHandler for F
where
    F: Fn(&str, &[u8]) + Send + Sync,
{
    fn on_message(&self, topic: &str, payload: &[u8]) {
        self(topic, payload);
    }
}

/// Logs every message verbatim and does nothing else.
///
/// Used for the reading acknowledgement topic, whose payloads are opaque
/// to the device.
#[derive(Debug, Default)]
pub struct LogHandler {
    received: AtomicU64,
}

impl LogHandler {
    /// Creates a new logging handler.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns how many messages were logged.
    #[must_use]
    pub fn received(&self) -> u64 {
        self.received.load(Ordering::Relaxed)
    }
}

impl MessageHandler for LogHandler {
    fn on_message(&self, topic: &str, payload: &[u8]) {
        self.received.fetch_add(1, Ordering::Relaxed);
        tracing::info!(
            topic = %topic,
            payload = %String::from_utf8_lossy(payload),
            "Received message"
        );
    }
}
