// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Handler for cadence commands.

use std::sync::Arc;

use crate::error::{ParseError, ProtocolError};
use crate::message::SpeedCommand;
use crate::protocol::{QoS, Transport};
use crate::state::{DeviceState, ModeChange};
use crate::subscription::MessageHandler;

/// Applies cadence commands received on the speed topic.
///
/// Each well-formed command switches the shared [`DeviceState`] and is
/// answered with a `{"oldspeed": .., "newspeed": ..}` acknowledgement.
/// Malformed commands are logged and dropped without touching the state.
///
/// The handler runs on the transport's delivery task, so the
/// acknowledgement is queued with [`Transport::try_publish`] instead of
/// being awaited.
pub struct CommandHandler<T> {
    transport: Arc<T>,
    state: Arc<DeviceState>,
    ack_topic: String,
}

impl<T: Transport> CommandHandler<T> {
    /// Creates a handler that acknowledges on `ack_topic`.
    pub fn new(transport: Arc<T>, state: Arc<DeviceState>, ack_topic: impl Into<String>) -> Self {
        Self {
            transport,
            state,
            ack_topic: ack_topic.into(),
        }
    }

    /// Parses and applies one command payload.
    ///
    /// Returns the mode transition, or the parse error if the payload was
    /// dropped. A failed acknowledgement does not undo the transition.
    ///
    /// # Errors
    ///
    /// Returns `ParseError` if the payload is not a command.
    pub fn apply(&self, payload: &[u8]) -> Result<ModeChange, ParseError> {
        let command = SpeedCommand::from_payload(payload)?;
        let change = self.state.apply(command.mode());

        tracing::info!(
            value = %command.value(),
            oldspeed = %change.previous,
            newspeed = %change.current,
            "Cadence command applied"
        );

        if let Err(e) = self.acknowledge(change) {
            tracing::warn!(topic = %self.ack_topic, error = %e, "Failed to publish acknowledgement");
        }
        Ok(change)
    }

    fn acknowledge(&self, change: ModeChange) -> Result<(), ProtocolError> {
        let payload = change.ack().to_payload().map_err(|e| ProtocolError::PublishFailed {
            topic: self.ack_topic.clone(),
            reason: e.to_string(),
        })?;
        self.transport
            .try_publish(&self.ack_topic, payload, QoS::AtLeastOnce)
    }
}

impl<T: Transport> MessageHandler for CommandHandler<T> {
    fn on_message(&self, topic: &str, payload: &[u8]) {
        tracing::debug!(
            topic = %topic,
            payload = %String::from_utf8_lossy(payload),
            "Received command"
        );

        if let Err(e) = self.apply(payload) {
            tracing::warn!(topic = %topic, error = %e, "Dropping malformed command");
        }
    }
}

impl<T> std::fmt::Debug for CommandHandler<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandHandler")
            .field("ack_topic", &self.ack_topic)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}
