//! Command line front end for the floodlight hub.
//!
//! `simulate` runs the full hub against in-process fixtures, which makes it
//! handy for exercising the discovery and control flow without radio
//! hardware. `config` inspects and edits the persisted settings.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, bail};
use clap::{Args, Parser, Subcommand};
use floodhub_core::{MacAddress, Uuid16};
use floodhub_engine::{
    ConfigStore, ConfigUpdate, Hub, HubCallbacks, HubConfig, JsonFileStore, MemoryStore,
};
use floodhub_protocol::LightCommand;
use floodhub_radio::mock::{Fixture, MockRadio};
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Floodlight gateway hub
#[derive(Parser, Debug)]
#[command(name = "floodhub")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Logging verbosity, overridden by RUST_LOG
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Settings file; settings are kept in memory when omitted
    #[arg(short, long, env = "FLOODHUB_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Discover and drive simulated fixtures
    Simulate {
        /// Number of fixtures in range
        #[arg(short, long, default_value = "3")]
        fixtures: u8,

        /// Switch every discovered fixture on or off
        #[arg(long)]
        power: Option<Toggle>,

        /// Brightness to apply to every discovered fixture
        #[arg(long)]
        brightness: Option<u8>,

        /// Color to apply, as R,G,B
        #[arg(long, value_parser = parse_color)]
        color: Option<(u8, u8, u8)>,

        /// Seconds to let queued commands settle before reporting
        #[arg(long, default_value = "3")]
        settle: u64,
    },

    /// Show the settings, applying any changes given
    Config(ConfigArgs),
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum Toggle {
    On,
    Off,
}

#[derive(Args, Debug)]
struct ConfigArgs {
    /// Advertised name to match
    #[arg(long)]
    device_name: Option<String>,

    #[arg(long)]
    filter_by_name: Option<bool>,

    #[arg(long)]
    filter_by_uuid: Option<bool>,

    /// 16-bit service UUID to match, in hex
    #[arg(long, value_parser = parse_uuid)]
    uuid: Option<u16>,

    /// Transmit power in dBm
    #[arg(long, allow_hyphen_values = true)]
    tx_power: Option<i8>,

    /// Seconds between scans
    #[arg(long)]
    scan_interval: Option<u8>,

    /// Seconds per scan
    #[arg(long)]
    scan_duration: Option<u8>,

    #[arg(long)]
    local_mtu: Option<u16>,
}

impl ConfigArgs {
    fn into_update(self) -> ConfigUpdate {
        ConfigUpdate {
            by_name: self.filter_by_name,
            device_name: self.device_name,
            by_uuid: self.filter_by_uuid,
            uuid: self.uuid.map(Uuid16),
            tx_power: self.tx_power,
            scan_interval: self.scan_interval,
            scan_duration: self.scan_duration,
            local_mtu: self.local_mtu,
        }
    }
}

fn parse_color(raw: &str) -> Result<(u8, u8, u8), String> {
    let parts = raw
        .split(',')
        .map(|p| p.trim().parse::<u8>().map_err(|e| format!("{p:?}: {e}")))
        .collect::<Result<Vec<_>, _>>()?;
    match parts.as_slice() {
        [r, g, b] => Ok((*r, *g, *b)),
        _ => Err(format!("expected R,G,B, got {raw:?}")),
    }
}

fn parse_uuid(raw: &str) -> Result<u16, String> {
    let digits = raw.trim_start_matches("0x").trim_start_matches("0X");
    u16::from_str_radix(digits, 16).map_err(|e| format!("{raw:?}: {e}"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!("floodhub v{}", env!("CARGO_PKG_VERSION"));

    let mut store = open_store(cli.config.as_ref())?;
    let config = HubConfig::load(store.as_mut()).context("loading settings")?;

    match cli.command {
        Commands::Simulate {
            fixtures,
            power,
            brightness,
            color,
            settle,
        } => {
            let mut commands = Vec::new();
            if let Some(toggle) = power {
                commands.push(LightCommand::power(matches!(toggle, Toggle::On)));
            }
            if let Some(level) = brightness {
                commands.push(LightCommand::brightness(level));
            }
            if let Some((r, g, b)) = color {
                commands.push(LightCommand::color(r, g, b));
            }
            simulate(config, store, fixtures, commands, Duration::from_secs(settle)).await
        }
        Commands::Config(args) => {
            let updated = args.into_update().apply_to(&config)?;
            if updated != config {
                updated.persist(store.as_mut())?;
                info!("Saved {} setting(s)", config.changed_keys(&updated).len());
            }
            println!("{}", serde_json::to_string_pretty(&updated)?);
            Ok(())
        }
    }
}

fn open_store(path: Option<&PathBuf>) -> anyhow::Result<Box<dyn ConfigStore>> {
    Ok(match path {
        Some(path) => Box::new(
            JsonFileStore::open(path)
                .with_context(|| format!("opening settings file {}", path.display()))?,
        ),
        None => Box::new(MemoryStore::new()),
    })
}

async fn simulate(
    config: HubConfig,
    store: Box<dyn ConfigStore>,
    fixtures: u8,
    commands: Vec<LightCommand>,
    settle: Duration,
) -> anyhow::Result<()> {
    if fixtures == 0 {
        bail!("at least one fixture is needed");
    }

    let (radio, mock, events) = MockRadio::new();
    mock.set_auto_respond(true).await;
    let name = config.filter.name.as_str().to_string();
    for i in 1..=fixtures {
        let address = MacAddress::new([0xAA, 0xBB, 0xCC, 0x00, 0x00, i]);
        mock.add_fixture(Fixture::floodlight(address, name.clone()).with_rssi(-40 - (i % 40) as i8))
            .await;
    }

    let (found_tx, mut found_rx) = mpsc::unbounded_channel();
    let callbacks = HubCallbacks::new()
        .on_device_found(move |slot, address, name| {
            info!("Found {} ({}) in slot {}", name, address, slot);
            let _ = found_tx.send(address);
        })
        .on_all_devices_found(|| info!("All fixtures found"))
        .on_device_connected(|slot| info!("Slot {} connected", slot))
        .on_device_disconnected(|slot| info!("Slot {} disconnected", slot))
        .on_power_changed(|address, on| {
            info!("{} is now {}", address, if on { "on" } else { "off" });
        });

    let expected = usize::from(fixtures).min(config.capacity);
    let scan_window = config.scan_duration() + Duration::from_secs(1);
    let hub = Hub::spawn(radio, events, config, store, callbacks)?;

    let mut found = Vec::with_capacity(expected);
    let discovery = async {
        while found.len() < expected {
            match found_rx.recv().await {
                Some(address) => found.push(address),
                None => break,
            }
        }
    };
    if tokio::time::timeout(scan_window, discovery).await.is_err() {
        warn!("Only {} of {} fixtures found", found.len(), expected);
    }

    for address in &found {
        for command in &commands {
            let outcome = hub.send_command(*address, *command).await?;
            info!("{} -> {}: {:?}", command, address, outcome);
        }
    }
    if !commands.is_empty() {
        tokio::time::sleep(settle).await;
    }

    let devices = hub.devices().await?;
    println!("{}", serde_json::to_string_pretty(&devices)?);
    hub.shutdown().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_color() {
        assert_eq!(parse_color("255, 0,16"), Ok((255, 0, 16)));
        assert!(parse_color("1,2").is_err());
        assert!(parse_color("1,2,300").is_err());
    }

    #[test]
    fn test_parse_uuid() {
        assert_eq!(parse_uuid("0xFFA0"), Ok(0xFFA0));
        assert_eq!(parse_uuid("ffa0"), Ok(0xFFA0));
        assert!(parse_uuid("zz").is_err());
    }

    #[test]
    fn test_cli_parses_simulate() {
        let cli = Cli::try_parse_from([
            "floodhub",
            "simulate",
            "--fixtures",
            "2",
            "--power",
            "on",
            "--color",
            "1,2,3",
        ])
        .unwrap();
        match cli.command {
            Commands::Simulate {
                fixtures,
                power,
                color,
                ..
            } => {
                assert_eq!(fixtures, 2);
                assert!(matches!(power, Some(Toggle::On)));
                assert_eq!(color, Some((1, 2, 3)));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_config_args_become_update() {
        let cli =
            Cli::try_parse_from(["floodhub", "config", "--tx-power", "-6", "--uuid", "ffa1"]).unwrap();
        let Commands::Config(args) = cli.command else {
            panic!("expected config command");
        };
        let update = args.into_update();
        assert_eq!(update.tx_power, Some(-6));
        assert_eq!(update.uuid, Some(Uuid16(0xFFA1)));
        assert_eq!(update.device_name, None);
    }
}
