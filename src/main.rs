// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! `d20-device` - run a simulated d20 against an MQTT broker.
//!
//! Modes:
//! - `run` (default): publish rolls and obey cadence commands
//! - `publish`: publish rolls every 15 s, ignore commands
//! - `probe`: connect, then disconnect

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use color_eyre::eyre::WrapErr;
use tracing_subscriber::EnvFilter;

use d20_device::protocol::MqttTransportBuilder;
use d20_device::{Cadence, DeviceConfig, DeviceController, Topics, Transport};

#[derive(Debug, Parser)]
#[command(name = "d20-device", version, about = "Simulated d20 MQTT device")]
struct Cli {
    #[command(flatten)]
    connection: ConnectionArgs,

    #[command(subcommand)]
    mode: Option<Mode>,
}

#[derive(Debug, Args)]
struct ConnectionArgs {
    /// Broker endpoint, e.g. `abc123-ats.iot.eu-west-1.amazonaws.com`
    #[arg(long, env = "AWS_IOT_ENDPOINT")]
    endpoint: String,

    /// Broker port [default: 8883 with TLS, 1883 without]
    #[arg(long, env = "AWS_IOT_PORT")]
    port: Option<u16>,

    /// Client certificate (PEM)
    #[arg(long, env = "AWS_IOT_CERT", requires = "key")]
    cert: Option<PathBuf>,

    /// Client private key (PEM)
    #[arg(long, env = "AWS_IOT_KEY", requires = "cert")]
    key: Option<PathBuf>,

    /// Root certificate authority (PEM)
    #[arg(long, env = "AWS_IOT_ROOT_CA")]
    root_ca: Option<PathBuf>,

    /// MQTT client id [default: test-<uuid>]
    #[arg(long, env = "AWS_IOT_CLIENT_ID")]
    client_id: Option<String>,

    /// Thing name, logged at startup
    #[arg(short = 'n', long, env = "AWS_IOT_THING_NAME")]
    thing_name: String,

    /// Prefix of the roll and speed topics
    #[arg(long, env = "D20_TOPIC_PREFIX", default_value = Topics::DEFAULT_PREFIX)]
    topic_prefix: String,

    /// Seconds to wait between stopping and disconnecting
    #[arg(long, env = "D20_DRAIN_DELAY_SECS", default_value_t = 5)]
    drain_delay_secs: u64,
}

#[derive(Debug, Clone, Copy, Default, Subcommand)]
enum Mode {
    /// Publish rolls and obey cadence commands
    #[default]
    Run,
    /// Publish rolls at a fixed slow cadence without subscribing
    Publish,
    /// Connect to the broker, then disconnect
    Probe,
}

impl ConnectionArgs {
    fn into_config(self, mode: Mode) -> DeviceConfig {
        let mut config = DeviceConfig::new(self.endpoint, self.thing_name)
            .with_topic_prefix(self.topic_prefix)
            .with_drain_delay(Duration::from_secs(self.drain_delay_secs));

        if let Some(port) = self.port {
            config = config.with_port(port);
        }
        if let Some(client_id) = self.client_id {
            config = config.with_client_id(client_id);
        }
        if let Some(root_ca) = self.root_ca {
            config = config.with_root_ca(root_ca);
        }
        if let (Some(cert), Some(key)) = (self.cert, self.key) {
            config = config.with_client_auth(cert, key);
        }

        match mode {
            Mode::Run | Mode::Probe => config,
            Mode::Publish => config
                .with_commands(false)
                .with_drain_delay(Duration::ZERO)
                .with_cadence(Cadence::fixed(Cadence::SLOW_INTERVAL)),
        }
    }
}

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let mode = cli.mode.unwrap_or_default();
    let config = cli.connection.into_config(mode);
    config.validate().wrap_err("invalid configuration")?;

    log_banner(&config);

    match mode {
        Mode::Run | Mode::Publish => run(&config).await,
        Mode::Probe => probe(&config).await,
    }
}

fn log_banner(config: &DeviceConfig) {
    let tls = config.tls_files();
    let show = |path: Option<&PathBuf>| {
        path.map_or_else(|| "-".to_string(), |p| p.display().to_string())
    };

    tracing::info!(root_ca = %show(tls.root_ca.as_ref()), "Root CA");
    tracing::info!(cert = %show(tls.cert.as_ref()), "Certificate");
    tracing::info!(key = %show(tls.key.as_ref()), "Private key");
    tracing::info!(thing_name = %config.thing_name(), "Thing name");
    tracing::info!(
        endpoint = %config.endpoint(),
        client_id = %config.client_id(),
        "Connecting"
    );
}

async fn run(config: &DeviceConfig) -> color_eyre::Result<()> {
    let controller = DeviceController::connect(config)
        .await
        .wrap_err_with(|| format!("failed to connect to {}", config.endpoint()))?;
    let running = controller
        .start()
        .await
        .wrap_err("failed to set up subscriptions")?;

    tokio::signal::ctrl_c()
        .await
        .wrap_err("failed to listen for Ctrl-C")?;
    tracing::info!("Shutdown signal received");

    let stats = running.stop().await?;
    tracing::info!(
        published = stats.published,
        failed = stats.failed,
        "Disconnected"
    );
    Ok(())
}

async fn probe(config: &DeviceConfig) -> color_eyre::Result<()> {
    let transport = MqttTransportBuilder::from_config(config)?
        .connect()
        .await
        .wrap_err_with(|| format!("failed to connect to {}", config.endpoint()))?;
    tracing::info!("Connected");

    transport.disconnect().await?;
    tracing::info!("Disconnected");
    Ok(())
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("d20-device").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn run_is_the_default_mode() {
        let cli = parse(&["--endpoint", "broker.local", "-n", "thing"]);
        assert!(matches!(cli.mode.unwrap_or_default(), Mode::Run));

        let config = cli.connection.into_config(Mode::Run);
        assert_eq!(config.endpoint(), "broker.local");
        assert_eq!(config.thing_name(), "thing");
        assert_eq!(config.port().unwrap(), 1883);
        assert!(config.controller_settings().commandable());
        assert_eq!(config.controller_settings().drain_delay(), Duration::from_secs(5));
    }

    #[test]
    fn tls_flags_select_secure_port() {
        let cli = parse(&[
            "--endpoint",
            "broker.local",
            "-n",
            "thing",
            "--root-ca",
            "ca.pem",
            "--cert",
            "c.pem",
            "--key",
            "k.pem",
            "--client-id",
            "lab",
        ]);
        let config = cli.connection.into_config(Mode::Run);
        assert_eq!(config.port().unwrap(), 8883);
        assert_eq!(config.client_id(), "lab");
    }

    #[test]
    fn client_auth_without_root_ca_is_accepted() {
        let cli = parse(&[
            "--endpoint",
            "broker.local",
            "-n",
            "thing",
            "--cert",
            "c.pem",
            "--key",
            "k.pem",
        ]);
        let config = cli.connection.into_config(Mode::Run);

        assert!(config.validate().is_ok());
        assert_eq!(config.port().unwrap(), 8883);
        log_banner(&config);
    }

    #[test]
    fn publish_mode_disables_commands() {
        let cli = parse(&["--endpoint", "broker.local", "-n", "thing", "publish"]);
        let mode = cli.mode.unwrap_or_default();
        assert!(matches!(mode, Mode::Publish));

        let settings = cli.connection.into_config(mode).controller_settings();
        assert!(!settings.commandable());
        assert_eq!(settings.drain_delay(), Duration::ZERO);
    }

    #[test]
    fn cert_requires_key() {
        let result = Cli::try_parse_from([
            "d20-device",
            "--endpoint",
            "broker.local",
            "-n",
            "thing",
            "--cert",
            "c.pem",
        ]);
        assert!(result.is_err());
    }
}
