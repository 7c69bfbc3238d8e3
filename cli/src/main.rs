//! Valvelink CLI — talk to valve controllers from a terminal.
//!
//! `scan` finds nearby valve controllers; `monitor` connects to one,
//! authenticates, and streams telemetry snapshots as JSON.

mod ble;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use valvelink_core::{
    frame_channel, AuthToken, DeviceProfile, SessionConfig, ValveClient, DEFAULT_QUEUE_DEPTH,
};

#[derive(Parser)]
#[command(name = "valvelink", about = "Valve controller telemetry over BLE", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan for nearby valve controllers
    Scan {
        /// How long to scan, in seconds
        #[arg(long, default_value_t = 10)]
        seconds: u64,
        /// List every BLE device seen, not just valve controllers
        #[arg(long)]
        all: bool,
    },
    /// Connect to a valve and stream telemetry
    Monitor {
        /// Device address or platform peripheral id
        address: String,
        /// 32-hex-digit pairing token (dashes allowed)
        #[arg(short, long)]
        token: String,
        /// Device variant: "softener" or "filtration"
        #[arg(long, default_value = "softener")]
        variant: String,
    },
}

fn profile_for(variant: &str) -> Result<DeviceProfile> {
    match variant {
        "softener" => Ok(DeviceProfile::softener()),
        "filtration" => Ok(DeviceProfile::filtration()),
        other => bail!("unknown variant {other:?} (expected \"softener\" or \"filtration\")"),
    }
}

async fn monitor(address: &str, token: &str, variant: &str) -> Result<()> {
    let profile = profile_for(variant)?;
    let token: AuthToken = token.parse().context("invalid pairing token")?;

    let (sink, inbound) = frame_channel(DEFAULT_QUEUE_DEPTH);
    let link = Arc::new(ble::BleLink::connect(address, &profile, sink).await?);

    let mut client = ValveClient::new(profile, token, link, inbound, SessionConfig::default())?
        .with_event_sink(|snapshot| match serde_json::to_string_pretty(snapshot) {
            Ok(json) => println!("{json}"),
            Err(err) => error!(%err, "failed to render snapshot"),
        });

    client.connect().await.context("handshake failed")?;
    info!("authenticated; streaming telemetry (ctrl-c to stop)");

    tokio::select! {
        result = client.closed() => {
            if let Err(err) = result {
                error!(%err, "session ended");
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("interrupted, disconnecting");
        }
    }

    client.disconnect().await;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Scan { seconds, all } => ble::scan(seconds, all).await,
        Commands::Monitor {
            address,
            token,
            variant,
        } => monitor(&address, &token, &variant).await,
    }
}
