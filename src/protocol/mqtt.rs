// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! MQTT broker transport backed by `rumqttc`.
//!
//! # Examples
//!
//! ```no_run
//! use d20_device::protocol::{MqttTransport, QoS, Transport};
//!
//! # async fn example() -> d20_device::Result<()> {
//! let transport = MqttTransport::builder()
//!     .host("localhost")
//!     .port(1883)
//!     .client_id("d20-test")
//!     .connect()
//!     .await?;
//!
//! transport
//!     .publish("device1/d20/roll", br#"{"value":12}"#.to_vec(), QoS::AtLeastOnce)
//!     .await?;
//! transport.disconnect().await?;
//! # Ok(())
//! # }
//! ```

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use rumqttc::{
    AsyncClient, ConnectionError, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS, SubAck,
    SubscribeReasonCode, TlsConfiguration,
};
use rumqttc::tokio_rustls::rustls::{ClientConfig, RootCertStore};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::{DeviceConfig, TlsMode};
use crate::error::{ConfigError, ProtocolError};
use crate::event::{ConnectionEvent, EventBus};
use crate::subscription::MessageHandler;

use super::{TopicRouter, Transport};

/// Capacity of the client's request queue.
///
/// Only awaited publishes and subscribes wait on this queue. Messages from
/// [`Transport::try_publish`] go through an unbounded outbox first.
const REQUEST_CAPACITY: usize = 10;

/// Pause between reconnection attempts after the connection drops.
const RECONNECT_DELAY: Duration = Duration::from_secs(1);

type SubscribeResult = Result<(), ProtocolError>;

/// State shared between the transport handle and its event loop task.
struct Shared {
    router: TopicRouter,
    pending: parking_lot::Mutex<PendingSubscriptions>,
    events: EventBus,
    connected: AtomicBool,
    shutdown: CancellationToken,
}

impl Shared {
    fn emit(&self, event: ConnectionEvent) {
        if event.is_interruption() {
            tracing::warn!(event = %event, "MQTT connection event");
        } else {
            tracing::info!(event = %event, "MQTT connection event");
        }
        self.events.publish(event);
    }
}

/// A message waiting in the outbox.
struct QueuedPublish {
    topic: String,
    payload: Vec<u8>,
    qos: QoS,
}

/// Subscribe requests waiting for their SUBACK.
///
/// `rumqttc` assigns packet ids when a request leaves the queue, so requests
/// are first matched in order to the outgoing SUBSCRIBE events, then by
/// packet id to the SUBACKs.
#[derive(Default)]
struct PendingSubscriptions {
    queued: VecDeque<(String, oneshot::Sender<SubscribeResult>)>,
    in_flight: HashMap<u16, (String, oneshot::Sender<SubscribeResult>)>,
}

impl PendingSubscriptions {
    fn sent(&mut self, pkid: u16) {
        if let Some(entry) = self.queued.pop_front() {
            self.in_flight.insert(pkid, entry);
        }
    }

    fn acknowledged(&mut self, suback: &SubAck) {
        let Some((filter, tx)) = self.in_flight.remove(&suback.pkid) else {
            return;
        };

        let refused = suback
            .return_codes
            .iter()
            .any(|code| matches!(code, SubscribeReasonCode::Failure));

        let result = if refused {
            Err(ProtocolError::SubscribeFailed {
                topic: filter,
                reason: "refused by broker".to_string(),
            })
        } else {
            Ok(())
        };
        let _ = tx.send(result);
    }
}

/// Turns raw connection outcomes into lifecycle events.
#[derive(Debug, Default)]
struct ConnectionTracker {
    ever_connected: bool,
    interrupted: bool,
}

impl ConnectionTracker {
    fn on_connack(&mut self, return_code: String, session_present: bool) -> Option<ConnectionEvent> {
        if !self.ever_connected {
            self.ever_connected = true;
            return Some(ConnectionEvent::Connected { session_present });
        }
        if self.interrupted {
            self.interrupted = false;
            return Some(ConnectionEvent::Resumed {
                return_code,
                session_present,
            });
        }
        None
    }

    fn on_error(&mut self, error: String) -> Option<ConnectionEvent> {
        if self.ever_connected && !self.interrupted {
            self.interrupted = true;
            return Some(ConnectionEvent::Interrupted { error });
        }
        None
    }
}

/// A connection to an MQTT broker.
///
/// Inbound messages are dispatched to subscribed handlers from a background
/// task that also drives the connection. When the connection drops, that
/// task keeps reconnecting and reports [`ConnectionEvent::Interrupted`] and
/// [`ConnectionEvent::Resumed`] on the event bus.
///
/// [`Transport::try_publish`] never waits: messages go to an unbounded
/// outbox that a second task hands to the client in order. Handlers running
/// on the event loop can therefore publish any number of replies.
pub struct MqttTransport {
    client: AsyncClient,
    shared: Arc<Shared>,
    event_loop: tokio::sync::Mutex<Option<JoinHandle<()>>>,
    outbox: parking_lot::Mutex<Option<mpsc::UnboundedSender<QueuedPublish>>>,
    outbox_task: tokio::sync::Mutex<Option<JoinHandle<()>>>,
    subscribe_lock: tokio::sync::Mutex<()>,
    host: String,
    port: u16,
    client_id: String,
    timeout: Duration,
}

impl MqttTransport {
    /// Creates a new builder for configuring a broker connection.
    #[must_use]
    pub fn builder() -> MqttTransportBuilder {
        MqttTransportBuilder::default()
    }

    /// Returns whether the broker connection is currently up.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::Acquire)
    }

    /// Returns a receiver for connection lifecycle events.
    ///
    /// Only events emitted after this call are received.
    #[must_use]
    pub fn events(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.shared.events.subscribe()
    }

    /// Returns the host address of the broker.
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Returns the port of the broker.
    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Returns the MQTT client identifier.
    #[must_use]
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Queues a SUBSCRIBE and returns the receiver for its SUBACK.
    async fn request_subscription(
        &self,
        filter: &str,
        qos: QoS,
    ) -> Result<oneshot::Receiver<SubscribeResult>, ProtocolError> {
        // Held until the request is queued so the pending order matches
        // the order SUBSCRIBE packets leave the client.
        let _guard = self.subscribe_lock.lock().await;

        let (tx, rx) = oneshot::channel();
        self.shared
            .pending
            .lock()
            .queued
            .push_back((filter.to_string(), tx));

        if let Err(e) = self.client.subscribe(filter, qos).await {
            self.shared.pending.lock().queued.pop_back();
            return Err(ProtocolError::Mqtt(e));
        }
        Ok(rx)
    }

    async fn await_suback(
        &self,
        filter: &str,
        rx: oneshot::Receiver<SubscribeResult>,
    ) -> SubscribeResult {
        // Safe: timeout in practical use will never exceed u64::MAX milliseconds
        #[allow(clippy::cast_possible_truncation)]
        let timeout_ms = self.timeout.as_millis() as u64;

        match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(ProtocolError::ChannelClosed(format!(
                "event loop stopped before {filter} was acknowledged"
            ))),
            Err(_) => Err(ProtocolError::Timeout(timeout_ms)),
        }
    }
}

impl Transport for MqttTransport {
    async fn publish(&self, topic: &str, payload: Vec<u8>, qos: QoS) -> Result<(), ProtocolError> {
        tracing::debug!(topic = %topic, bytes = payload.len(), "Publishing MQTT message");
        self.client
            .publish(topic, qos, false, payload)
            .await
            .map_err(ProtocolError::Mqtt)
    }

    fn try_publish(&self, topic: &str, payload: Vec<u8>, qos: QoS) -> Result<(), ProtocolError> {
        tracing::debug!(topic = %topic, bytes = payload.len(), "Queueing MQTT message");

        let outbox = self.outbox.lock();
        let Some(outbox) = outbox.as_ref() else {
            return Err(ProtocolError::ChannelClosed(
                "transport is disconnected".to_string(),
            ));
        };
        outbox
            .send(QueuedPublish {
                topic: topic.to_string(),
                payload,
                qos,
            })
            .map_err(|_| ProtocolError::ChannelClosed("outbox task stopped".to_string()))
    }

    async fn subscribe(
        &self,
        filter: &str,
        qos: QoS,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<(), ProtocolError> {
        // Registered first so nothing delivered right after the SUBACK is lost.
        self.shared.router.register(filter, handler);

        let result = match self.request_subscription(filter, qos).await {
            Ok(rx) => self.await_suback(filter, rx).await,
            Err(e) => Err(e),
        };

        match &result {
            Ok(()) => tracing::info!(filter = %filter, "Subscribed"),
            Err(e) => {
                tracing::error!(filter = %filter, error = %e, "Subscription failed");
                self.shared.router.unregister(filter);
            }
        }
        result
    }

    async fn disconnect(&self) -> Result<(), ProtocolError> {
        tracing::info!(host = %self.host, port = %self.port, "Disconnecting from MQTT broker");

        self.shared.router.clear();

        // Close the outbox and let it flush before the DISCONNECT.
        drop(self.outbox.lock().take());
        if let Some(handle) = self.outbox_task.lock().await.take()
            && tokio::time::timeout(self.timeout, handle).await.is_err()
        {
            tracing::warn!("MQTT outbox did not flush in time");
        }

        let result = self.client.disconnect().await.map_err(ProtocolError::Mqtt);

        // Let the event loop flush the DISCONNECT before tearing it down.
        if let Some(handle) = self.event_loop.lock().await.take()
            && tokio::time::timeout(self.timeout, handle).await.is_err()
        {
            tracing::warn!("MQTT event loop did not stop in time");
        }
        self.shared.shutdown.cancel();
        self.shared.connected.store(false, Ordering::Release);

        result
    }
}

impl Drop for MqttTransport {
    fn drop(&mut self) {
        self.shared.shutdown.cancel();
    }
}

impl std::fmt::Debug for MqttTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MqttTransport")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("client_id", &self.client_id)
            .field("connected", &self.is_connected())
            .finish_non_exhaustive()
    }
}

/// Builder for an MQTT broker connection.
///
/// # Examples
///
/// ```no_run
/// use std::time::Duration;
/// use d20_device::protocol::MqttTransport;
///
/// # async fn example() -> d20_device::Result<()> {
/// let transport = MqttTransport::builder()
///     .host("abc123-ats.iot.eu-west-1.amazonaws.com")
///     .port(8883)
///     .mutual_tls("AmazonRootCA1.pem", "device.pem.crt", "private.pem.key")
///     .keep_alive(Duration::from_secs(6))
///     .clean_session(false)
///     .connect()
///     .await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct MqttTransportBuilder {
    host: String,
    port: u16,
    client_id: Option<String>,
    keep_alive: Duration,
    clean_session: bool,
    connection_timeout: Duration,
    tls: TlsMode,
}

impl Default for MqttTransportBuilder {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: crate::config::DEFAULT_PORT,
            client_id: None,
            keep_alive: DeviceConfig::DEFAULT_KEEP_ALIVE,
            clean_session: false,
            connection_timeout: DeviceConfig::DEFAULT_CONNECTION_TIMEOUT,
            tls: TlsMode::None,
        }
    }
}

impl MqttTransportBuilder {
    /// Creates a builder from a device configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the TLS files are inconsistent.
    pub fn from_config(config: &DeviceConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            host: config.endpoint().to_string(),
            port: config.port()?,
            client_id: Some(config.client_id().to_string()),
            keep_alive: config.keep_alive(),
            clean_session: config.clean_session(),
            connection_timeout: config.connection_timeout(),
            tls: config.tls_files().mode()?,
        })
    }

    /// Sets the broker host address.
    #[must_use]
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Sets the broker port (default: 1883).
    #[must_use]
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Sets the client identifier (default: `test-<uuid>`).
    #[must_use]
    pub fn client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    /// Sets the keep-alive interval (default: 6 seconds).
    #[must_use]
    pub fn keep_alive(mut self, duration: Duration) -> Self {
        self.keep_alive = duration;
        self
    }

    /// Sets whether to start a clean session (default: `false`).
    #[must_use]
    pub fn clean_session(mut self, clean_session: bool) -> Self {
        self.clean_session = clean_session;
        self
    }

    /// Sets the connect and subscribe timeout (default: 10 seconds).
    #[must_use]
    pub fn connection_timeout(mut self, duration: Duration) -> Self {
        self.connection_timeout = duration;
        self
    }

    /// Enables TLS, verifying the broker against `root_ca`.
    #[must_use]
    pub fn server_tls(mut self, root_ca: impl AsRef<Path>) -> Self {
        self.tls = TlsMode::ServerAuth {
            root_ca: root_ca.as_ref().to_path_buf(),
        };
        self
    }

    /// Enables mutual TLS with a client certificate.
    #[must_use]
    pub fn mutual_tls(
        mut self,
        root_ca: impl AsRef<Path>,
        cert: impl AsRef<Path>,
        key: impl AsRef<Path>,
    ) -> Self {
        self.tls = TlsMode::Mutual {
            root_ca: Some(root_ca.as_ref().to_path_buf()),
            cert: cert.as_ref().to_path_buf(),
            key: key.as_ref().to_path_buf(),
        };
        self
    }

    /// Connects to the broker and waits for its CONNACK.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - Host is not set
    /// - A certificate or key cannot be read
    /// - The broker refuses or drops the connection
    /// - No CONNACK arrives within the connection timeout
    pub async fn connect(self) -> Result<MqttTransport, ProtocolError> {
        if self.host.is_empty() {
            return Err(ProtocolError::InvalidAddress(
                "MQTT broker host is required".to_string(),
            ));
        }

        let client_id = self
            .client_id
            .unwrap_or_else(crate::config::generate_client_id);

        let mut mqtt_options = MqttOptions::new(&client_id, &self.host, self.port);
        mqtt_options.set_keep_alive(self.keep_alive);
        mqtt_options.set_clean_session(self.clean_session);
        if let Some(transport) = tls_transport(&self.tls)? {
            mqtt_options.set_transport(transport);
        }

        tracing::info!(
            host = %self.host,
            port = %self.port,
            client_id = %client_id,
            "Connecting to MQTT broker"
        );

        let (client, event_loop) = AsyncClient::new(mqtt_options, REQUEST_CAPACITY);

        let shared = Arc::new(Shared {
            router: TopicRouter::new(),
            pending: parking_lot::Mutex::new(PendingSubscriptions::default()),
            events: EventBus::new(),
            connected: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
        });

        let (connack_tx, connack_rx) = oneshot::channel();
        let handle = tokio::spawn(run_event_loop(event_loop, Arc::clone(&shared), connack_tx));

        let timeout = self.connection_timeout;
        let outcome = tokio::time::timeout(timeout, connack_rx).await;
        let failure = match outcome {
            Ok(Ok(Ok(()))) => None,
            Ok(Ok(Err(reason))) => Some(ProtocolError::ConnectionFailed(reason)),
            Ok(Err(_)) => Some(ProtocolError::ConnectionFailed(
                "MQTT event loop terminated unexpectedly".to_string(),
            )),
            Err(_) => Some(ProtocolError::ConnectionFailed(format!(
                "MQTT connection timeout after {}s",
                timeout.as_secs()
            ))),
        };
        if let Some(err) = failure {
            shared.shutdown.cancel();
            return Err(err);
        }

        tracing::info!(host = %self.host, port = %self.port, "Connected to MQTT broker");

        let (outbox_tx, outbox_rx) = mpsc::unbounded_channel();
        let outbox_task = tokio::spawn(run_outbox(
            client.clone(),
            outbox_rx,
            shared.shutdown.clone(),
        ));

        Ok(MqttTransport {
            client,
            shared,
            event_loop: tokio::sync::Mutex::new(Some(handle)),
            outbox: parking_lot::Mutex::new(Some(outbox_tx)),
            outbox_task: tokio::sync::Mutex::new(Some(outbox_task)),
            subscribe_lock: tokio::sync::Mutex::new(()),
            host: self.host,
            port: self.port,
            client_id,
            timeout,
        })
    }
}

/// Builds the `rumqttc` TLS transport for a TLS mode.
fn tls_transport(mode: &TlsMode) -> Result<Option<rumqttc::Transport>, ProtocolError> {
    let config = match mode {
        TlsMode::None => return Ok(None),
        TlsMode::ServerAuth { root_ca } => TlsConfiguration::Simple {
            ca: read_pem(root_ca)?,
            alpn: None,
            client_auth: None,
        },
        TlsMode::Mutual {
            root_ca: Some(root_ca),
            cert,
            key,
        } => TlsConfiguration::Simple {
            ca: read_pem(root_ca)?,
            alpn: None,
            client_auth: Some((read_pem(cert)?, read_pem(key)?)),
        },
        TlsMode::Mutual {
            root_ca: None,
            cert,
            key,
        } => platform_roots_tls(cert, key)?,
    };
    Ok(Some(rumqttc::Transport::Tls(config)))
}

/// Client-certificate TLS that verifies the broker against the platform
/// trust store.
fn platform_roots_tls(cert: &Path, key: &Path) -> Result<TlsConfiguration, ProtocolError> {
    let cert_pem = read_pem(cert)?;
    let chain = rustls_pemfile::certs(&mut cert_pem.as_slice())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|source| ProtocolError::Certificate {
            path: cert.to_path_buf(),
            source,
        })?;
    if chain.is_empty() {
        return Err(ProtocolError::Tls(format!(
            "no certificate found in {}",
            cert.display()
        )));
    }

    let key_pem = read_pem(key)?;
    let private_key = rustls_pemfile::private_key(&mut key_pem.as_slice())
        .map_err(|source| ProtocolError::Certificate {
            path: key.to_path_buf(),
            source,
        })?
        .ok_or_else(|| ProtocolError::Tls(format!("no private key found in {}", key.display())))?;

    let native = rustls_native_certs::load_native_certs();
    for error in &native.errors {
        tracing::warn!(error = %error, "Failed to load platform root certificates");
    }
    let mut roots = RootCertStore::empty();
    let (added, ignored) = roots.add_parsable_certificates(native.certs);
    tracing::debug!(added, ignored, "Loaded platform root certificates");
    if roots.is_empty() {
        return Err(ProtocolError::Tls(
            "no platform root certificates available".to_string(),
        ));
    }

    let config = ClientConfig::builder()
        .with_root_certificates(roots)
        .with_client_auth_cert(chain, private_key)
        .map_err(|e| ProtocolError::Tls(e.to_string()))?;
    Ok(TlsConfiguration::Rustls(Arc::new(config)))
}

fn read_pem(path: &Path) -> Result<Vec<u8>, ProtocolError> {
    std::fs::read(path).map_err(|source| ProtocolError::Certificate {
        path: path.to_path_buf(),
        source,
    })
}

/// Hands queued messages to the client in order until the outbox closes.
async fn run_outbox(
    client: AsyncClient,
    mut outbox: mpsc::UnboundedReceiver<QueuedPublish>,
    shutdown: CancellationToken,
) {
    loop {
        let message = tokio::select! {
            () = shutdown.cancelled() => break,
            message = outbox.recv() => message,
        };
        let Some(QueuedPublish {
            topic,
            payload,
            qos,
        }) = message
        else {
            break;
        };

        if let Err(e) = client.publish(topic.as_str(), qos, false, payload).await {
            tracing::warn!(topic = %topic, error = %e, "Failed to publish queued message");
        }
    }
}

/// Drives the connection and dispatches inbound messages.
async fn run_event_loop(
    mut event_loop: EventLoop,
    shared: Arc<Shared>,
    connack_tx: oneshot::Sender<Result<(), String>>,
) {
    let mut connack_tx = Some(connack_tx);
    let mut tracker = ConnectionTracker::default();

    loop {
        let polled = tokio::select! {
            () = shared.shutdown.cancelled() => break,
            polled = event_loop.poll() => polled,
        };

        match polled {
            Ok(Event::Incoming(Packet::ConnAck(connack))) => {
                tracing::debug!(?connack, "MQTT connected");
                shared.connected.store(true, Ordering::Release);
                if let Some(tx) = connack_tx.take() {
                    let _ = tx.send(Ok(()));
                }
                if let Some(event) =
                    tracker.on_connack(format!("{:?}", connack.code), connack.session_present)
                {
                    shared.emit(event);
                }
            }
            Ok(Event::Outgoing(Outgoing::Subscribe(pkid))) => {
                shared.pending.lock().sent(pkid);
            }
            Ok(Event::Incoming(Packet::SubAck(suback))) => {
                tracing::debug!(?suback, "MQTT subscription acknowledged");
                shared.pending.lock().acknowledged(&suback);
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                tracing::debug!(
                    topic = %publish.topic,
                    payload = %String::from_utf8_lossy(&publish.payload),
                    "MQTT message received"
                );
                shared.router.route(&publish.topic, &publish.payload);
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                shared.connected.store(false, Ordering::Release);
                shared.emit(ConnectionEvent::Disconnected);
                break;
            }
            Ok(_) => {}
            Err(ConnectionError::RequestsDone) => break,
            Err(e) => {
                shared.connected.store(false, Ordering::Release);

                // Failing before the first CONNACK is fatal to `connect`.
                if let Some(tx) = connack_tx.take() {
                    let _ = tx.send(Err(e.to_string()));
                    break;
                }

                match tracker.on_error(e.to_string()) {
                    Some(event) => shared.emit(event),
                    None => tracing::debug!(error = %e, "MQTT reconnection attempt failed"),
                }

                tokio::select! {
                    () = shared.shutdown.cancelled() => break,
                    () = tokio::time::sleep(RECONNECT_DELAY) => {}
                }
            }
        }
    }
}
