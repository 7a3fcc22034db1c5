// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Transports carrying the device's MQTT traffic.
//!
//! The device never speaks MQTT itself. Everything it needs from a broker
//! connection is captured by the [`Transport`] trait.
//!
//! # Transports
//!
//! - [`MqttTransport`]: a real broker connection over TCP or TLS, backed by
//!   `rumqttc`
//! - [`LoopbackTransport`]: an in-process stand-in that records publishes and
//!   delivers them to local subscribers

mod loopback;
mod mqtt;
mod topic_router;

use std::future::Future;
use std::sync::Arc;

pub use loopback::{LoopbackTransport, PublishedMessage};
pub use mqtt::{MqttTransport, MqttTransportBuilder};
pub use rumqttc::QoS;
pub use topic_router::{TopicRouter, topic_matches};

use crate::error::ProtocolError;
use crate::subscription::MessageHandler;

/// An established connection to a broker.
///
/// Connecting is the job of each implementation's constructor; a
/// `Transport` value is always connected until [`Transport::disconnect`]
/// is called.
pub trait Transport: Send + Sync + 'static {
    /// Publishes a message, waiting until the connection has accepted it.
    ///
    /// # Errors
    ///
    /// Returns `ProtocolError` if the message could not be handed to the
    /// connection.
    fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        qos: QoS,
    ) -> impl Future<Output = Result<(), ProtocolError>> + Send;

    /// Queues a message without waiting.
    ///
    /// Safe to call from a [`MessageHandler`], which must not block the
    /// delivery task. The queue is unbounded, so a burst of inbound messages
    /// never causes replies to be dropped.
    ///
    /// # Errors
    ///
    /// Returns `ProtocolError` if the transport is disconnected.
    fn try_publish(&self, topic: &str, payload: Vec<u8>, qos: QoS) -> Result<(), ProtocolError>;

    /// Subscribes `handler` to `filter` and waits for the broker to confirm.
    ///
    /// # Errors
    ///
    /// Returns `ProtocolError::SubscribeFailed` if the broker refuses the
    /// subscription, or another `ProtocolError` if the request fails.
    fn subscribe(
        &self,
        filter: &str,
        qos: QoS,
        handler: Arc<dyn MessageHandler>,
    ) -> impl Future<Output = Result<(), ProtocolError>> + Send;

    /// Closes the connection.
    ///
    /// # Errors
    ///
    /// Returns `ProtocolError` if the disconnect request fails.
    fn disconnect(&self) -> impl Future<Output = Result<(), ProtocolError>> + Send;
}
