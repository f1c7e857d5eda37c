use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Parser, Subcommand};
use futures::StreamExt as _;
use tokio::io::{AsyncBufReadExt as _, BufReader};

use dronelink_common::btle::search_devices;
use dronelink_common::config::AdapterConfig;
use dronelink_common::logger::*;
use dronelink_common::transport::DeviceFilter;
use dronelink_common::{BluetoothAdapter, ControllerData, LinkError, Result};

#[derive(Debug, Parser)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,
    #[arg(
        short = 'n',
        long = "name-prefix",
        global = true,
        help = "If specified, overrides the configured device name prefix for this run"
    )]
    pub name_prefix: Option<String>,
    #[arg(
        short = 'c',
        long = "config",
        global = true,
        help = "If specified, reads the configuration from this file instead of the default location"
    )]
    pub config_path: Option<PathBuf>,
}

#[derive(Debug, PartialEq, Subcommand, Clone)]
pub enum Command {
    /// Lists nearby devices whose name starts with the configured prefix
    Scan {
        #[arg(
            short = 't',
            long,
            default_value_t = 5,
            help = "Seconds without any new device before the scan stops"
        )]
        timeout: u64,
    },
    /// Connects, sends one controller snapshot and disconnects
    Send {
        #[arg(
            help = r#"Controller snapshot as JSON e.g. {"leftStick":{"x":0,"y":0},"rightStick":{"x":0,"y":0},"buttons":{}}"#
        )]
        json: String,
    },
    /// Connects and sends one controller snapshot per stdin line until EOF
    Stream {
        #[arg(
            short = 'i',
            long,
            default_value_t = 0,
            help = "If specified, waits this many milliseconds after each write"
        )]
        interval_ms: u64,
    },
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    Logs(LogsArgs),
}

#[derive(clap::Args, Clone, Debug, PartialEq)]
pub struct LogsArgs {
    #[arg(
        short = 'f',
        long,
        help = "If specified, keeps the log file open and continuously prints the latest content"
    )]
    pub follow: bool,
    #[arg(short = 't', long, help = "If specified, shows the last x lines")]
    pub tail: Option<usize>,
    #[arg(short = 'd', long, help = "If specified, purges the log file")]
    pub purge: bool,
}

impl LogsArgs {
    /// Only touches the log file, so it runs without a logger or a configuration
    pub async fn run(&self, path: &Path) -> Result<()> {
        if self.purge {
            Logger::purge(path)?;
        } else if self.follow {
            Logger::follow(path, self.tail).await?;
        } else {
            Logger::print(path, self.tail)?;
        }

        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Subcommand)]
pub enum ConfigAction {
    /// Prints the configuration in use
    Show,
    /// Writes the default configuration to the config file
    Reset,
}

impl Args {
    pub fn config_path(&self) -> Result<PathBuf> {
        match &self.config_path {
            Some(path) => Ok(path.clone()),
            None => AdapterConfig::default_path(),
        }
    }

    pub fn load_config(&self, path: &Path) -> Result<AdapterConfig> {
        let mut config = AdapterConfig::load(path)?;

        if let Some(prefix) = &self.name_prefix {
            config.name_prefix = prefix.clone();
        }

        Ok(config)
    }
}

impl Command {
    pub async fn handle(&self, config: AdapterConfig, config_path: &Path) -> Result<()> {
        match self {
            Self::Scan { timeout } => {
                let filter =
                    DeviceFilter::new(config.name_prefix.clone(), vec![config.service_uuid]);
                let mut devices = search_devices(&filter, *timeout).await?;
                let mut found = 0;

                while let Some(device) = devices.next().await {
                    found += 1;
                    info!("{} [{}]", device.name, device.address);
                }

                if found == 0 {
                    warn!("No device found matching \"{}\"", config.name_prefix);
                }

                Ok(())
            }
            Self::Send { json } => {
                let data = parse_snapshot(json)?;
                let adapter = BluetoothAdapter::from_config(&config);

                adapter.connect().await?;
                let sent = adapter.send_data(&data).await;
                adapter.disconnect().await?;

                sent
            }
            Self::Stream { interval_ms } => {
                let adapter = BluetoothAdapter::from_config(&config);
                adapter.connect().await?;

                let streamed = stream_stdin(&adapter, Duration::from_millis(*interval_ms)).await;
                adapter.disconnect().await?;

                streamed
            }
            Self::Config { action } => {
                let shown = match action {
                    ConfigAction::Show => config,
                    ConfigAction::Reset => {
                        let config = AdapterConfig::default();
                        config.save(config_path)?;
                        info!("Configuration reset at {}", config_path.display());
                        config
                    }
                };

                println!("# {}", config_path.display());
                println!(
                    "{}",
                    serde_json::to_string_pretty(&shown)
                        .map_err(|err| LinkError::Config(err.to_string()))?
                );

                Ok(())
            }
            Self::Logs(logs) => logs.run(&Logger::default_path()).await,
        }
    }
}

fn parse_snapshot(json: &str) -> Result<ControllerData> {
    ControllerData::from_payload(json.as_bytes())
}

async fn stream_stdin(adapter: &BluetoothAdapter, interval: Duration) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut status = adapter.subscribe();
    let mut sent = 0usize;

    loop {
        let line = tokio::select! {
            _ = status.wait_for(|status| !status.is_connected) => {
                return Err(LinkError::Disconnected);
            }
            line = lines.next_line() => line,
        };

        let line = match line {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(err) => {
                error!("Failed to read stdin: {err}");
                break;
            }
        };

        if line.trim().is_empty() {
            continue;
        }

        let data = match parse_snapshot(&line) {
            Ok(data) => data,
            Err(err) => {
                warn!("Skipping line {}: {err}", sent + 1);
                continue;
            }
        };

        adapter.send_data(&data).await?;
        sent += 1;

        if !interval.is_zero() {
            tokio::time::sleep(interval).await;
        }
    }

    info!("Sent {sent} snapshots");
    Ok(())
}
