// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! `d20_device` - a simulated, commandable MQTT device.
//!
//! The device rolls a twenty-sided die and publishes each roll as a JSON
//! reading. Commands received on its speed topic switch between a fast
//! (3 s) and a slow (15 s) publish interval, and every command is
//! acknowledged with the previous and new cadence.
//!
//! # Topics
//!
//! | Topic                   | Direction | Payload                                  |
//! |-------------------------|-----------|------------------------------------------|
//! | `device1/d20/roll`      | out       | `{"value": 1..20}`                       |
//! | `device1/d20/roll/ack`  | in        | opaque, logged                           |
//! | `device1/d20/speed`     | in        | `{"value": "fast" \| "slow" \| ...}`     |
//! | `device1/d20/speed/ack` | out       | `{"oldspeed": "...", "newspeed": "..."}` |
//!
//! # Quick Start
//!
//! ```no_run
//! use std::time::Duration;
//! use d20_device::{DeviceConfig, DeviceController};
//!
//! #[tokio::main]
//! async fn main() -> d20_device::Result<()> {
//!     let config = DeviceConfig::new("abc123-ats.iot.eu-west-1.amazonaws.com", "d20-thing")
//!         .with_root_ca("AmazonRootCA1.pem")
//!         .with_client_auth("device.pem.crt", "private.pem.key");
//!
//!     let running = DeviceController::connect(&config).await?.start().await?;
//!
//!     tokio::time::sleep(Duration::from_secs(60)).await;
//!     running.stop().await?;
//!     Ok(())
//! }
//! ```
//!
//! # Testing Without a Broker
//!
//! [`protocol::LoopbackTransport`] stands in for a broker connection inside
//! the process, so the whole device can be driven from a test:
//!
//! ```
//! use std::sync::Arc;
//! use d20_device::device::{ControllerSettings, DeviceController};
//! use d20_device::protocol::LoopbackTransport;
//! use d20_device::Topics;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> d20_device::Result<()> {
//! let transport = Arc::new(LoopbackTransport::new());
//! let running = DeviceController::new(
//!     Arc::clone(&transport),
//!     Topics::default(),
//!     ControllerSettings::default().with_drain_delay(std::time::Duration::ZERO),
//! )
//! .start()
//! .await?;
//!
//! transport.inject("device1/d20/speed", br#"{"value":"fast"}"#);
//! let acks = transport.published_on("device1/d20/speed/ack");
//! assert_eq!(acks[0].payload_str(), r#"{"oldspeed":"slow","newspeed":"fast"}"#);
//!
//! running.stop().await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod device;
pub mod error;
pub mod event;
pub mod message;
pub mod protocol;
pub mod state;
pub mod subscription;
pub mod topics;
pub mod types;

pub use config::{DeviceConfig, TlsFiles, TlsMode};
pub use device::{ControllerPhase, ControllerSettings, DeviceController, RollStats, RunHandle};
pub use error::{ConfigError, Error, ParseError, ProtocolError, Result, ValueError};
pub use event::{ConnectionEvent, EventBus};
pub use protocol::{LoopbackTransport, MqttTransport, QoS, Transport};
pub use topics::Topics;
pub use types::{Cadence, CadenceMode, Roll};
