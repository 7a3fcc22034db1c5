// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! In-process transport.
//!
//! [`LoopbackTransport`] behaves like a broker with a single client: every
//! publish is recorded and then delivered to the local subscribers whose
//! filter matches. Messages can also be injected as if another client had
//! published them, which makes it the transport of choice for exercising a
//! device without a network.

use std::borrow::Cow;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::time::Instant;

use crate::error::ProtocolError;
use crate::subscription::MessageHandler;

use super::{QoS, TopicRouter, Transport};

/// A message published through a [`LoopbackTransport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedMessage {
    /// Topic the message was published on.
    pub topic: String,
    /// Raw payload.
    pub payload: Vec<u8>,
    /// Requested quality of service.
    pub qos: QoS,
    /// When the publish happened.
    pub at: Instant,
}

impl PublishedMessage {
    /// Returns the payload as text, replacing invalid UTF-8.
    #[must_use]
    pub fn payload_str(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.payload)
    }

    /// Parses the payload as JSON.
    ///
    /// # Errors
    ///
    /// Returns `serde_json::Error` if the payload is not valid JSON.
    pub fn json(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::from_slice(&self.payload)
    }
}

/// A transport that never leaves the process.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use d20_device::protocol::{LoopbackTransport, QoS, Transport};
/// use d20_device::subscription::LogHandler;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> d20_device::Result<()> {
/// let transport = LoopbackTransport::new();
/// let handler = Arc::new(LogHandler::new());
/// transport
///     .subscribe("device1/d20/roll/ack", QoS::AtLeastOnce, handler.clone())
///     .await?;
///
/// transport.inject("device1/d20/roll/ack", b"ok");
/// assert_eq!(handler.received(), 1);
/// # Ok(())
/// # }
/// ```
pub struct LoopbackTransport {
    router: TopicRouter,
    published: Mutex<Vec<PublishedMessage>>,
    subscriptions: Mutex<Vec<(String, QoS)>>,
    publish_count: watch::Sender<usize>,
    fail_publishes: AtomicBool,
    fail_subscriptions: AtomicBool,
    disconnected_at: Mutex<Option<Instant>>,
}

impl Default for LoopbackTransport {
    fn default() -> Self {
        Self {
            router: TopicRouter::new(),
            published: Mutex::new(Vec::new()),
            subscriptions: Mutex::new(Vec::new()),
            publish_count: watch::Sender::new(0),
            fail_publishes: AtomicBool::new(false),
            fail_subscriptions: AtomicBool::new(false),
            disconnected_at: Mutex::new(None),
        }
    }
}

impl LoopbackTransport {
    /// Creates a connected loopback transport.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every following publish fail with `PublishFailed`.
    pub fn set_fail_publishes(&self, fail: bool) {
        self.fail_publishes.store(fail, Ordering::Release);
    }

    /// Makes every following subscribe fail with `SubscribeFailed`.
    pub fn set_fail_subscriptions(&self, fail: bool) {
        self.fail_subscriptions.store(fail, Ordering::Release);
    }

    /// Delivers a message to local subscribers as if another client had
    /// published it. Returns the number of handlers that received it.
    pub fn inject(&self, topic: &str, payload: &[u8]) -> usize {
        tracing::debug!(topic = %topic, bytes = payload.len(), "Injecting loopback message");
        self.router.route(topic, payload)
    }

    /// Returns every message published so far, oldest first.
    #[must_use]
    pub fn published(&self) -> Vec<PublishedMessage> {
        self.published.lock().clone()
    }

    /// Returns the messages published on `topic`, oldest first.
    #[must_use]
    pub fn published_on(&self, topic: &str) -> Vec<PublishedMessage> {
        self.published
            .lock()
            .iter()
            .filter(|message| message.topic == topic)
            .cloned()
            .collect()
    }

    /// Returns the number of messages published so far.
    #[must_use]
    pub fn publish_count(&self) -> usize {
        *self.publish_count.borrow()
    }

    /// Waits until at least `count` messages have been published.
    ///
    /// # Errors
    ///
    /// Returns `ProtocolError::ChannelClosed` if the transport is dropped
    /// first.
    pub async fn wait_for_publishes(&self, count: usize) -> Result<(), ProtocolError> {
        let mut rx = self.publish_count.subscribe();
        rx.wait_for(|published| *published >= count)
            .await
            .map(|_| ())
            .map_err(|_| ProtocolError::ChannelClosed("loopback transport dropped".to_string()))
    }

    /// Returns the filters subscribed so far with their QoS.
    #[must_use]
    pub fn subscriptions(&self) -> Vec<(String, QoS)> {
        self.subscriptions.lock().clone()
    }

    /// Returns when [`Transport::disconnect`] was called, if it was.
    #[must_use]
    pub fn disconnected_at(&self) -> Option<Instant> {
        *self.disconnected_at.lock()
    }

    /// Returns whether the transport is still connected.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.disconnected_at.lock().is_none()
    }

    fn record(&self, topic: &str, payload: Vec<u8>, qos: QoS) -> Result<(), ProtocolError> {
        if !self.is_connected() {
            return Err(ProtocolError::ChannelClosed(
                "loopback transport disconnected".to_string(),
            ));
        }
        if self.fail_publishes.load(Ordering::Acquire) {
            return Err(ProtocolError::PublishFailed {
                topic: topic.to_string(),
                reason: "publish failure injected".to_string(),
            });
        }

        tracing::debug!(topic = %topic, bytes = payload.len(), "Loopback publish");
        self.published.lock().push(PublishedMessage {
            topic: topic.to_string(),
            payload: payload.clone(),
            qos,
            at: Instant::now(),
        });
        self.publish_count.send_modify(|count| *count += 1);

        // Delivered after the lock is released so handlers may publish.
        self.router.route(topic, &payload);
        Ok(())
    }
}

impl Transport for LoopbackTransport {
    async fn publish(&self, topic: &str, payload: Vec<u8>, qos: QoS) -> Result<(), ProtocolError> {
        self.record(topic, payload, qos)
    }

    fn try_publish(&self, topic: &str, payload: Vec<u8>, qos: QoS) -> Result<(), ProtocolError> {
        self.record(topic, payload, qos)
    }

    async fn subscribe(
        &self,
        filter: &str,
        qos: QoS,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<(), ProtocolError> {
        if self.fail_subscriptions.load(Ordering::Acquire) {
            return Err(ProtocolError::SubscribeFailed {
                topic: filter.to_string(),
                reason: "subscription failure injected".to_string(),
            });
        }

        self.router.register(filter, handler);
        self.subscriptions.lock().push((filter.to_string(), qos));
        tracing::info!(filter = %filter, "Subscribed");
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), ProtocolError> {
        tracing::info!("Disconnecting loopback transport");
        self.router.clear();
        self.disconnected_at.lock().get_or_insert_with(Instant::now);
        Ok(())
    }
}

impl std::fmt::Debug for LoopbackTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoopbackTransport")
            .field("published", &self.publish_count())
            .field("router", &self.router)
            .field("connected", &self.is_connected())
            .finish_non_exhaustive()
    }
}
