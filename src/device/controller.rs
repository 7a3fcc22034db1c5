// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Device lifecycle: subscribe, run, drain, disconnect.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::DeviceConfig;
use crate::error::{ProtocolError, Result};
use crate::protocol::{MqttTransport, MqttTransportBuilder, QoS, Transport};
use crate::state::DeviceState;
use crate::subscription::{LogHandler, MessageHandler};
use crate::topics::Topics;
use crate::types::Cadence;

use super::{CommandHandler, RollLoop, RollStats};

/// Where a device is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ControllerPhase {
    /// No broker connection.
    Disconnected,
    /// Connected, subscriptions not yet set up.
    Connected,
    /// Subscribed and publishing readings.
    Running,
    /// Loop stopped, waiting before disconnecting.
    Draining,
}

impl ControllerPhase {
    /// Returns the phase name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connected => "connected",
            Self::Running => "running",
            Self::Draining => "draining",
        }
    }
}

impl std::fmt::Display for ControllerPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Behavior switches for a [`DeviceController`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControllerSettings {
    cadence: Cadence,
    drain_delay: Duration,
    commandable: bool,
}

impl ControllerSettings {
    /// Time allowed for queued messages to leave before disconnecting.
    pub const DEFAULT_DRAIN_DELAY: Duration = Duration::from_secs(5);

    /// Settings for a publish-only device: a fixed slow cadence, no command
    /// subscription and no drain delay.
    #[must_use]
    pub fn publish_only() -> Self {
        Self {
            cadence: Cadence::fixed(Cadence::SLOW_INTERVAL),
            drain_delay: Duration::ZERO,
            commandable: false,
        }
    }

    /// Sets the publish intervals.
    #[must_use]
    pub fn with_cadence(mut self, cadence: Cadence) -> Self {
        self.cadence = cadence;
        self
    }

    /// Sets the delay between stopping the loop and disconnecting.
    #[must_use]
    pub fn with_drain_delay(mut self, drain_delay: Duration) -> Self {
        self.drain_delay = drain_delay;
        self
    }

    /// Sets whether the device subscribes to cadence commands.
    #[must_use]
    pub fn with_commands(mut self, commandable: bool) -> Self {
        self.commandable = commandable;
        self
    }

    /// Returns the publish intervals.
    #[must_use]
    pub fn cadence(&self) -> Cadence {
        self.cadence
    }

    /// Returns the drain delay.
    #[must_use]
    pub fn drain_delay(&self) -> Duration {
        self.drain_delay
    }

    /// Returns whether the device subscribes to cadence commands.
    #[must_use]
    pub fn commandable(&self) -> bool {
        self.commandable
    }
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            cadence: Cadence::default(),
            drain_delay: Self::DEFAULT_DRAIN_DELAY,
            commandable: true,
        }
    }
}

/// Wires the device state, command handler and roll loop to a transport.
///
/// # Examples
///
/// ```no_run
/// use d20_device::{DeviceConfig, DeviceController};
///
/// # async fn example() -> d20_device::Result<()> {
/// let config = DeviceConfig::new("localhost", "d20-thing");
/// let controller = DeviceController::connect(&config).await?;
///
/// let running = controller.start().await?;
/// tokio::signal::ctrl_c().await.ok();
/// let stats = running.stop().await?;
/// println!("published {} readings", stats.published);
/// # Ok(())
/// # }
/// ```
pub struct DeviceController<T> {
    transport: Arc<T>,
    topics: Topics,
    settings: ControllerSettings,
    state: Arc<DeviceState>,
    phase: watch::Sender<ControllerPhase>,
    seed: Option<u64>,
}

impl DeviceController<MqttTransport> {
    /// Connects to the broker described by `config`.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` for an invalid configuration and
    /// `Error::Protocol` if the broker cannot be reached.
    pub async fn connect(config: &DeviceConfig) -> Result<Self> {
        config.validate()?;
        let topics = config.topics()?;
        let transport = MqttTransportBuilder::from_config(config)?.connect().await?;
        Ok(Self::new(
            Arc::new(transport),
            topics,
            config.controller_settings(),
        ))
    }
}

impl<T: Transport> DeviceController<T> {
    /// Creates a controller over an already connected transport.
    pub fn new(transport: Arc<T>, topics: Topics, settings: ControllerSettings) -> Self {
        Self {
            transport,
            topics,
            settings,
            state: Arc::new(DeviceState::new()),
            phase: watch::Sender::new(ControllerPhase::Connected),
            seed: None,
        }
    }

    /// Makes the roll sequence reproducible.
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Returns the shared device state.
    #[must_use]
    pub fn state(&self) -> &Arc<DeviceState> {
        &self.state
    }

    /// Returns the transport.
    #[must_use]
    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    /// Returns the topics in use.
    #[must_use]
    pub fn topics(&self) -> &Topics {
        &self.topics
    }

    /// Returns the controller settings.
    #[must_use]
    pub fn settings(&self) -> &ControllerSettings {
        &self.settings
    }

    /// Returns the current lifecycle phase.
    #[must_use]
    pub fn phase(&self) -> ControllerPhase {
        *self.phase.borrow()
    }

    /// Returns a receiver that follows lifecycle phase changes.
    #[must_use]
    pub fn watch_phase(&self) -> watch::Receiver<ControllerPhase> {
        self.phase.subscribe()
    }

    /// Sets up the subscriptions and starts the roll loop.
    ///
    /// # Errors
    ///
    /// Returns `Error::Protocol` if a subscription fails. The transport is
    /// disconnected before returning.
    pub async fn start(self) -> Result<RunHandle<T>> {
        if self.settings.commandable {
            if let Err(e) = self.subscribe_all().await {
                if let Err(disconnect_error) = self.transport.disconnect().await {
                    tracing::warn!(error = %disconnect_error, "Disconnect after failed start also failed");
                }
                self.phase.send_replace(ControllerPhase::Disconnected);
                return Err(e.into());
            }
        } else {
            tracing::info!("Command subscriptions disabled");
        }

        let cancel = CancellationToken::new();
        let mut roll_loop = RollLoop::new(
            Arc::clone(&self.transport),
            Arc::clone(&self.state),
            self.topics.roll(),
            self.settings.cadence,
        );
        if let Some(seed) = self.seed {
            roll_loop = roll_loop.with_seed(seed);
        }
        let task = tokio::spawn(roll_loop.run(cancel.clone()));

        self.phase.send_replace(ControllerPhase::Running);
        tracing::info!(mode = %self.state.mode(), "Device running");

        Ok(RunHandle {
            transport: self.transport,
            state: self.state,
            phase: self.phase,
            cancel,
            task,
            drain_delay: self.settings.drain_delay,
        })
    }

    async fn subscribe_all(&self) -> std::result::Result<(), ProtocolError> {
        let commands: Arc<dyn MessageHandler> = Arc::new(CommandHandler::new(
            Arc::clone(&self.transport),
            Arc::clone(&self.state),
            self.topics.speed_ack(),
        ));
        self.transport
            .subscribe(self.topics.speed(), QoS::AtLeastOnce, commands)
            .await?;

        self.transport
            .subscribe(
                self.topics.roll_ack(),
                QoS::AtLeastOnce,
                Arc::new(LogHandler::new()),
            )
            .await
    }
}

impl<T> std::fmt::Debug for DeviceController<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceController")
            .field("topics", &self.topics)
            .field("settings", &self.settings)
            .field("phase", &*self.phase.borrow())
            .finish_non_exhaustive()
    }
}

/// A running device.
///
/// Dropping the handle leaves the roll loop running; call
/// [`RunHandle::stop`] for an orderly shutdown.
pub struct RunHandle<T> {
    transport: Arc<T>,
    state: Arc<DeviceState>,
    phase: watch::Sender<ControllerPhase>,
    cancel: CancellationToken,
    task: JoinHandle<RollStats>,
    drain_delay: Duration,
}

impl<T: Transport> RunHandle<T> {
    /// Returns the token that stops the roll loop.
    ///
    /// Cancelling it ends the loop; [`RunHandle::stop`] is still needed to
    /// drain and disconnect.
    #[must_use]
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Returns the shared device state.
    #[must_use]
    pub fn state(&self) -> &Arc<DeviceState> {
        &self.state
    }

    /// Returns the transport.
    #[must_use]
    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    /// Returns the current lifecycle phase.
    #[must_use]
    pub fn phase(&self) -> ControllerPhase {
        *self.phase.borrow()
    }

    /// Returns a receiver that follows lifecycle phase changes.
    #[must_use]
    pub fn watch_phase(&self) -> watch::Receiver<ControllerPhase> {
        self.phase.subscribe()
    }

    /// Stops the roll loop, waits the drain delay, then disconnects.
    ///
    /// The transport is disconnected even if the roll loop failed.
    ///
    /// # Errors
    ///
    /// Returns `Error::Task` if the roll loop panicked and `Error::Protocol`
    /// if the disconnect fails.
    pub async fn stop(self) -> Result<RollStats> {
        tracing::info!("Stopping device");
        self.cancel.cancel();
        self.phase.send_replace(ControllerPhase::Draining);

        let joined = self.task.await;
        if let Err(e) = &joined {
            tracing::error!(error = %e, "Roll loop task failed");
        }

        if !self.drain_delay.is_zero() {
            tracing::info!(
                delay_ms = u64::try_from(self.drain_delay.as_millis()).unwrap_or(u64::MAX),
                "Draining before disconnect"
            );
            tokio::time::sleep(self.drain_delay).await;
        }

        let result = self.transport.disconnect().await;
        self.phase.send_replace(ControllerPhase::Disconnected);
        let stats = joined?;
        result?;

        tracing::info!(
            published = stats.published,
            failed = stats.failed,
            "Device stopped"
        );
        Ok(stats)
    }
}

impl<T> std::fmt::Debug for RunHandle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunHandle")
            .field("phase", &*self.phase.borrow())
            .field("drain_delay", &self.drain_delay)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use super::*;
    use crate::protocol::LoopbackTransport;
    use crate::types::CadenceMode;

    /// Panics on every reading; everything else succeeds.
    #[derive(Default)]
    struct PanickingTransport {
        attempted: AtomicBool,
        disconnected: AtomicBool,
    }

    impl Transport for PanickingTransport {
        async fn publish(
            &self,
            topic: &str,
            _payload: Vec<u8>,
            _qos: QoS,
        ) -> std::result::Result<(), ProtocolError> {
            self.attempted.store(true, Ordering::SeqCst);
            panic!("cannot publish to {topic}");
        }

        fn try_publish(
            &self,
            _topic: &str,
            _payload: Vec<u8>,
            _qos: QoS,
        ) -> std::result::Result<(), ProtocolError> {
            Ok(())
        }

        async fn subscribe(
            &self,
            _filter: &str,
            _qos: QoS,
            _handler: Arc<dyn MessageHandler>,
        ) -> std::result::Result<(), ProtocolError> {
            Ok(())
        }

        async fn disconnect(&self) -> std::result::Result<(), ProtocolError> {
            self.disconnected.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    fn controller(
        settings: ControllerSettings,
    ) -> (Arc<LoopbackTransport>, DeviceController<LoopbackTransport>) {
        let transport = Arc::new(LoopbackTransport::new());
        let controller = DeviceController::new(Arc::clone(&transport), Topics::default(), settings)
            .with_seed(1);
        (transport, controller)
    }

    #[test]
    fn settings_defaults() {
        let settings = ControllerSettings::default();
        assert_eq!(settings.drain_delay(), Duration::from_secs(5));
        assert_eq!(settings.cadence(), Cadence::default());
        assert!(settings.commandable());
    }

    #[test]
    fn publish_only_settings() {
        let settings = ControllerSettings::publish_only();
        assert!(!settings.commandable());
        assert_eq!(settings.drain_delay(), Duration::ZERO);
        assert_eq!(settings.cadence().interval(CadenceMode::Fast), Cadence::SLOW_INTERVAL);
    }

    #[test]
    fn phase_names() {
        assert_eq!(ControllerPhase::Running.to_string(), "running");
        assert_eq!(ControllerPhase::Draining.as_str(), "draining");
    }

    #[tokio::test(start_paused = true)]
    async fn start_subscribes_commands_and_acks() {
        let (transport, controller) = controller(ControllerSettings::default());
        assert_eq!(controller.phase(), ControllerPhase::Connected);

        let running = controller.start().await.unwrap();

        let filters: Vec<String> = transport
            .subscriptions()
            .into_iter()
            .map(|(filter, qos)| {
                assert_eq!(qos, QoS::AtLeastOnce);
                filter
            })
            .collect();
        assert_eq!(filters, ["device1/d20/speed", "device1/d20/roll/ack"]);
        assert_eq!(running.phase(), ControllerPhase::Running);

        running.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn publish_only_skips_subscriptions() {
        let (transport, controller) = controller(ControllerSettings::publish_only());

        let running = controller.start().await.unwrap();
        transport.wait_for_publishes(1).await.unwrap();

        assert!(transport.subscriptions().is_empty());
        assert_eq!(transport.inject("device1/d20/speed", br#"{"value":"fast"}"#), 0);
        running.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn failed_subscription_is_fatal() {
        let (transport, controller) = controller(ControllerSettings::default());
        transport.set_fail_subscriptions(true);
        let phase = controller.watch_phase();

        let err = controller.start().await.unwrap_err();

        assert!(matches!(
            err,
            crate::Error::Protocol(ProtocolError::SubscribeFailed { .. })
        ));
        assert_eq!(*phase.borrow(), ControllerPhase::Disconnected);
        assert!(!transport.is_connected());
        assert_eq!(transport.publish_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_drains_then_disconnects() {
        let (transport, controller) = controller(ControllerSettings::default());
        let running = controller.start().await.unwrap();
        let phase = running.watch_phase();
        transport.wait_for_publishes(1).await.unwrap();

        let stopped_at = tokio::time::Instant::now();
        let stats = running.stop().await.unwrap();

        assert_eq!(stats.published, 1);
        assert_eq!(
            transport.disconnected_at().unwrap() - stopped_at,
            ControllerSettings::DEFAULT_DRAIN_DELAY
        );
        assert_eq!(*phase.borrow(), ControllerPhase::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_disconnects_after_roll_loop_panic() {
        let transport = Arc::new(PanickingTransport::default());
        let settings = ControllerSettings::default().with_drain_delay(Duration::ZERO);
        let running = DeviceController::new(Arc::clone(&transport), Topics::default(), settings)
            .start()
            .await
            .unwrap();
        let phase = running.watch_phase();
        while !transport.attempted.load(Ordering::SeqCst) {
            tokio::task::yield_now().await;
        }

        let err = running.stop().await.unwrap_err();

        assert!(matches!(err, crate::Error::Task(ref e) if e.is_panic()));
        assert!(transport.disconnected.load(Ordering::SeqCst));
        assert_eq!(*phase.borrow(), ControllerPhase::Disconnected);
    }
}
