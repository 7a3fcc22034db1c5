// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The periodic reading publisher.

use std::sync::Arc;

use rand::SeedableRng;
use rand::rngs::StdRng;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::message::RollReading;
use crate::protocol::{QoS, Transport};
use crate::state::DeviceState;
use crate::types::{Cadence, Roll};

/// Counts reported by a finished [`RollLoop`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RollStats {
    /// Readings handed to the transport.
    pub published: u64,
    /// Readings the transport rejected.
    pub failed: u64,
}

/// Publishes a random roll, then sleeps for the current cadence, until
/// cancelled.
///
/// The mode is read once per iteration, after publishing. A command that
/// arrives during a sleep therefore only affects the following interval.
/// Cancellation interrupts a sleep but never a publish in progress.
pub struct RollLoop<T> {
    transport: Arc<T>,
    state: Arc<DeviceState>,
    topic: String,
    cadence: Cadence,
    rng: StdRng,
}

impl<T: Transport> RollLoop<T> {
    /// Creates a loop publishing on `topic`.
    pub fn new(
        transport: Arc<T>,
        state: Arc<DeviceState>,
        topic: impl Into<String>,
        cadence: Cadence,
    ) -> Self {
        Self {
            transport,
            state,
            topic: topic.into(),
            cadence,
            rng: StdRng::from_entropy(),
        }
    }

    /// Makes the roll sequence reproducible.
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    /// Runs until `cancel` fires and returns what was published.
    pub async fn run(mut self, cancel: CancellationToken) -> RollStats {
        let mut stats = RollStats::default();
        tracing::info!(topic = %self.topic, "Roll loop started");

        while !cancel.is_cancelled() {
            let roll = Roll::random(&mut self.rng);
            match self.publish(roll).await {
                Ok(()) => {
                    stats.published += 1;
                    tracing::info!(topic = %self.topic, value = roll.value(), "Rolled");
                }
                Err(e) => {
                    stats.failed += 1;
                    tracing::warn!(topic = %self.topic, error = %e, "Failed to publish roll");
                }
            }

            let interval = self.cadence.interval(self.state.mode());
            tokio::select! {
                () = cancel.cancelled() => break,
                () = tokio::time::sleep(interval) => {}
            }
        }

        tracing::info!(
            published = stats.published,
            failed = stats.failed,
            "Roll loop stopped"
        );
        stats
    }

    async fn publish(&self, roll: Roll) -> Result<()> {
        let payload = RollReading::from(roll).to_payload()?;
        self.transport
            .publish(&self.topic, payload, QoS::AtLeastOnce)
            .await?;
        Ok(())
    }
}

impl<T> std::fmt::Debug for RollLoop<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RollLoop")
            .field("topic", &self.topic)
            .field("cadence", &self.cadence)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::time::Instant;

    use super::*;
    use crate::protocol::LoopbackTransport;
    use crate::types::CadenceMode;

    const TOPIC: &str = "device1/d20/roll";

    fn roll_loop(
        mode: CadenceMode,
    ) -> (Arc<LoopbackTransport>, Arc<DeviceState>, RollLoop<LoopbackTransport>) {
        let transport = Arc::new(LoopbackTransport::new());
        let state = Arc::new(DeviceState::with_mode(mode));
        let roll_loop = RollLoop::new(
            Arc::clone(&transport),
            Arc::clone(&state),
            TOPIC,
            Cadence::default(),
        )
        .with_seed(20);
        (transport, state, roll_loop)
    }

    fn gaps(transport: &LoopbackTransport) -> Vec<Duration> {
        transport
            .published_on(TOPIC)
            .windows(2)
            .map(|pair| pair[1].at - pair[0].at)
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn publishes_immediately_then_every_slow_interval() {
        let (transport, _, roll_loop) = roll_loop(CadenceMode::Slow);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(roll_loop.run(cancel.clone()));

        transport.wait_for_publishes(3).await.unwrap();
        cancel.cancel();
        let stats = task.await.unwrap();

        assert_eq!(stats.published, 3);
        assert_eq!(stats.failed, 0);
        assert_eq!(gaps(&transport), vec![Duration::from_secs(15); 2]);
    }

    #[tokio::test(start_paused = true)]
    async fn fast_mode_uses_short_interval() {
        let (transport, _, roll_loop) = roll_loop(CadenceMode::Fast);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(roll_loop.run(cancel.clone()));

        transport.wait_for_publishes(4).await.unwrap();
        cancel.cancel();
        task.await.unwrap();

        assert_eq!(gaps(&transport), vec![Duration::from_secs(3); 3]);
    }

    #[tokio::test(start_paused = true)]
    async fn readings_are_valid_rolls() {
        let (transport, _, roll_loop) = roll_loop(CadenceMode::Fast);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(roll_loop.run(cancel.clone()));

        transport.wait_for_publishes(200).await.unwrap();
        cancel.cancel();
        task.await.unwrap();

        for message in transport.published_on(TOPIC) {
            assert_eq!(message.qos, QoS::AtLeastOnce);
            let value = message.json().unwrap()["value"].as_u64().unwrap();
            assert!((1..=20).contains(&value), "roll {value} out of range");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_during_sleep_returns_without_publishing() {
        let (transport, _, roll_loop) = roll_loop(CadenceMode::Slow);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(roll_loop.run(cancel.clone()));

        transport.wait_for_publishes(1).await.unwrap();
        tokio::time::sleep(Duration::from_secs(4)).await;
        let cancelled_at = Instant::now();
        cancel.cancel();
        let stats = task.await.unwrap();

        assert_eq!(stats.published, 1);
        assert!(Instant::now() - cancelled_at < Duration::from_secs(11));
        assert_eq!(transport.publish_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_before_start_publishes_nothing() {
        let (transport, _, roll_loop) = roll_loop(CadenceMode::Slow);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let stats = roll_loop.run(cancel).await;

        assert_eq!(stats, RollStats::default());
        assert_eq!(transport.publish_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn publish_failures_are_counted_and_loop_continues() {
        let (transport, _, roll_loop) = roll_loop(CadenceMode::Fast);
        transport.set_fail_publishes(true);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(roll_loop.run(cancel.clone()));

        tokio::time::sleep(Duration::from_secs(7)).await;
        transport.set_fail_publishes(false);
        transport.wait_for_publishes(1).await.unwrap();
        cancel.cancel();
        let stats = task.await.unwrap();

        assert_eq!(stats.failed, 3);
        assert_eq!(stats.published, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn mode_change_applies_from_next_interval() {
        let (transport, state, roll_loop) = roll_loop(CadenceMode::Slow);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(roll_loop.run(cancel.clone()));

        transport.wait_for_publishes(1).await.unwrap();
        // Mid-sleep: the current 15 s interval is kept.
        tokio::time::sleep(Duration::from_secs(5)).await;
        state.set_mode(CadenceMode::Fast);

        transport.wait_for_publishes(3).await.unwrap();
        cancel.cancel();
        task.await.unwrap();

        assert_eq!(
            gaps(&transport),
            vec![Duration::from_secs(15), Duration::from_secs(3)]
        );
    }
}
