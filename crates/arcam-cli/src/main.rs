//! `arcam` — command-line control for Arcam AV receivers.
//!
//! # Usage
//!
//! ```text
//! arcam [--verbose] [--config FILE] <COMMAND>
//!
//! Commands:
//!   client   Send one raw command and print the response payload
//!   state    Optionally change volume/source, then print the zone state
//!   server   Run an emulated receiver
//! ```
//!
//! # Environment variable overrides
//!
//! CLI args take precedence over environment variables, which take
//! precedence over the config file.
//!
//! | Variable       | Description                         |
//! |----------------|-------------------------------------|
//! | `ARCAM_CONFIG` | Path of the TOML config file        |
//! | `ARCAM_HOST`   | Receiver host name or IP address    |
//! | `ARCAM_PORT`   | Receiver TCP port                   |
//! | `RUST_LOG`     | `tracing` filter, overrides all     |
//!
//! Any error ends the process with a non-zero exit status and a one-line
//! description on stderr.

mod report;

use std::path::PathBuf;

use anyhow::{anyhow, bail, Context};
use arcam_client::config::load_config_from;
use arcam_client::{ClientConfig, Dispatcher, FakeDevice, Session, SessionEvent};
use arcam_core::{CommandCode, SourceCode, Zone, QUERY};
use clap::{Args, Parser, Subcommand};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use crate::report::{describe_update, hex, StateReport};

// ── CLI argument definitions ──────────────────────────────────────────────────

#[derive(Debug, Parser)]
#[command(name = "arcam", about = "Control Arcam AV receivers over TCP", version)]
struct Cli {
    /// Log at debug level unless `RUST_LOG` says otherwise.
    #[arg(long, short, global = true)]
    verbose: bool,

    /// TOML file with connection settings; missing files mean defaults.
    #[arg(long, global = true, env = "ARCAM_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Send one raw command and print the response payload.
    Client {
        #[command(flatten)]
        target: Target,

        /// Command code, by name (`VOLUME`) or number (`0x0D`, `13`).
        #[arg(long, value_parser = parse_command)]
        command: CommandCode,

        /// Payload bytes, hex (`0xF0`) or decimal.  Defaults to a query.
        #[arg(long, num_args = 1.., value_parser = parse_byte)]
        data: Vec<u8>,
    },

    /// Optionally change volume and source, then print the zone state.
    State {
        #[command(flatten)]
        target: Target,

        /// Set the volume first.
        #[arg(long)]
        volume: Option<u8>,

        /// Select an input first, by name (`BD`, `PVR`, ...).
        #[arg(long)]
        source: Option<SourceCode>,

        /// Print the state as JSON.
        #[arg(long)]
        json: bool,

        /// Keep printing unsolicited updates until Ctrl-C.
        #[arg(long)]
        monitor: bool,
    },

    /// Run an emulated receiver until Ctrl-C.
    Server {
        #[arg(long, default_value = "localhost")]
        host: String,

        #[arg(long, default_value_t = 50000)]
        port: u16,
    },
}

/// Where to connect, overriding the config file.
#[derive(Debug, Args)]
struct Target {
    #[arg(long, env = "ARCAM_HOST")]
    host: Option<String>,

    #[arg(long, env = "ARCAM_PORT")]
    port: Option<u16>,

    #[arg(long, default_value_t = 1, value_parser = parse_zone)]
    zone: u8,
}

impl Target {
    fn apply(&self, config: &mut ClientConfig) {
        if let Some(host) = &self.host {
            config.host = host.clone();
        }
        if let Some(port) = self.port {
            config.port = port;
        }
    }

    fn zone(&self) -> anyhow::Result<Zone> {
        Zone::new(self.zone).ok_or_else(|| anyhow!("zone 0 does not exist"))
    }
}

fn parse_byte(s: &str) -> Result<u8, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u8::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|e| format!("'{s}' is not a byte: {e}"))
}

fn parse_command(s: &str) -> Result<CommandCode, String> {
    if let Some(code) = CommandCode::from_name(s) {
        return Ok(code);
    }
    parse_byte(s)
        .map(CommandCode)
        .map_err(|_| format!("unknown command '{s}'"))
}

fn parse_zone(s: &str) -> Result<u8, String> {
    match s.parse::<u8>() {
        Ok(0) => Err("zones are numbered from 1".to_string()),
        Ok(n) => Ok(n),
        Err(e) => Err(format!("'{s}' is not a zone: {e}")),
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => load_config_from(path).with_context(|| format!("loading {}", path.display()))?,
        None => ClientConfig::default(),
    };

    // ── Logging setup ─────────────────────────────────────────────────────────
    //
    // `RUST_LOG` wins; otherwise `--verbose` or the configured level.
    let level = if cli.verbose { "debug" } else { config.log_level.as_str() };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Command::Client { target, command, data } => run_client(config, target, command, data).await,
        Command::State {
            target,
            volume,
            source,
            json,
            monitor,
        } => run_state(config, target, volume, source, json, monitor).await,
        Command::Server { host, port } => run_server(&host, port).await,
    }
}

async fn connect(mut config: ClientConfig, target: &Target) -> anyhow::Result<Dispatcher<Session>> {
    target.apply(&mut config);
    let address = config.address();
    let session = Session::connect(&address, config.session_config())
        .await
        .with_context(|| format!("connecting to {address}"))?;
    Ok(Dispatcher::new(session, config.dispatch_config()))
}

async fn run_client(config: ClientConfig, target: Target, command: CommandCode, data: Vec<u8>) -> anyhow::Result<()> {
    let zone = target.zone()?;
    let data = if data.is_empty() { vec![QUERY] } else { data };
    let avr = connect(config, &target).await?;

    debug!(%zone, command = command.0, data = %hex(&data), "sending");
    let payload = avr
        .request(zone, command, data)
        .await
        .with_context(|| format!("{} 0x{:02X} failed", zone, command.0))?;
    println!("{}", hex(&payload));

    avr.transport().close().await;
    Ok(())
}

async fn run_state(
    config: ClientConfig,
    target: Target,
    volume: Option<u8>,
    source: Option<SourceCode>,
    json: bool,
    monitor: bool,
) -> anyhow::Result<()> {
    let zone = target.zone()?;
    let avr = connect(config, &target).await?;
    let mut events = avr.transport().subscribe();

    if let Some(level) = volume {
        avr.set_volume(zone, level).await.context("setting volume")?;
    }
    if let Some(source) = source {
        avr.set_source(zone, source).await.context("selecting source")?;
    }

    let report = StateReport {
        zone: zone.get(),
        power: avr.power(zone).await.context("reading power")?,
        volume: avr.volume(zone).await.context("reading volume")?,
        muted: avr.mute(zone).await.context("reading mute")?,
        source: SourceCode::from_byte(avr.source_code(zone).await.context("reading source")?),
    };
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{report}");
    }

    if monitor {
        info!("monitoring, Ctrl-C to stop");
        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => break,
                event = events.recv() => match event {
                    Ok(SessionEvent::Unsolicited(packet)) => println!("{}", describe_update(&packet)),
                    Ok(SessionEvent::Closed(reason)) => bail!("session closed: {reason}"),
                    Err(RecvError::Lagged(n)) => debug!(skipped = n, "missed updates"),
                    Err(RecvError::Closed) => break,
                },
            }
        }
    }

    avr.transport().close().await;
    Ok(())
}

async fn run_server(host: &str, port: u16) -> anyhow::Result<()> {
    let device = FakeDevice::with_standard_handlers()
        .bind(&format!("{host}:{port}"))
        .await
        .with_context(|| format!("binding {host}:{port}"))?;
    println!("emulated receiver listening on {}", device.local_addr());

    tokio::signal::ctrl_c().await.context("waiting for Ctrl-C")?;
    device.stop().await;
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
