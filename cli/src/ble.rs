//! btleplug-backed link: the real BLE transport behind the engine's
//! `LinkPort` trait.
//!
//! Connection establishment, scanning and characteristic plumbing all live
//! here; the engine only ever sees bytes.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use btleplug::api::{
    Central, Characteristic, Manager as _, Peripheral as _, ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::StreamExt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;
use valvelink_core::protocol::profile::{MANUFACTURER_ID, SERVICE_UUID_ADVERTISED};
use valvelink_core::{DeviceProfile, FrameSink, LinkError, LinkPort};

/// How long `connect` waits for the target device to show up in scan
/// results before giving up.
const DISCOVERY_TIMEOUT: Duration = Duration::from_secs(15);

async fn default_adapter() -> Result<Adapter> {
    let manager = Manager::new().await.context("bluetooth manager")?;
    let adapters = manager.adapters().await.context("enumerate adapters")?;
    adapters
        .into_iter()
        .next()
        .ok_or_else(|| anyhow!("no BLE adapter available"))
}

fn peripheral_matches(peripheral: &Peripheral, needle: &str) -> bool {
    peripheral.id().to_string().eq_ignore_ascii_case(needle)
        || peripheral
            .address()
            .to_string()
            .eq_ignore_ascii_case(needle)
}

async fn find_peripheral(central: &Adapter, address: &str) -> Result<Peripheral> {
    let deadline = tokio::time::Instant::now() + DISCOVERY_TIMEOUT;
    loop {
        for peripheral in central.peripherals().await.context("list peripherals")? {
            if peripheral_matches(&peripheral, address) {
                return Ok(peripheral);
            }
        }
        if tokio::time::Instant::now() >= deadline {
            return Err(anyhow!(
                "device {address} not found. Is it powered on and in range?"
            ));
        }
        sleep(Duration::from_millis(500)).await;
    }
}

/// A connected, subscribed GATT session with the valve.
pub struct BleLink {
    peripheral: Peripheral,
    read_characteristic: Characteristic,
    write_characteristic: Characteristic,
    up: Arc<AtomicBool>,
}

impl BleLink {
    /// Scan for the device, connect, subscribe to the notify
    /// characteristic, and pump every notification into `sink`.
    pub async fn connect(address: &str, profile: &DeviceProfile, sink: FrameSink) -> Result<Self> {
        let central = default_adapter().await?;

        info!(%address, "scanning for device");
        central
            .start_scan(ScanFilter::default())
            .await
            .context("start scan")?;
        let peripheral = find_peripheral(&central, address).await?;
        let _ = central.stop_scan().await;

        info!("connecting");
        peripheral.connect().await.context("BLE connect")?;
        peripheral
            .discover_services()
            .await
            .context("discover services")?;

        let read_uuid = Uuid::parse_str(profile.read_characteristic)?;
        let write_uuid = Uuid::parse_str(profile.write_characteristic)?;
        let characteristics = peripheral.characteristics();
        let read_characteristic = characteristics
            .iter()
            .find(|c| c.uuid == read_uuid)
            .cloned()
            .ok_or_else(|| anyhow!("notify characteristic {read_uuid} not found"))?;
        let write_characteristic = characteristics
            .iter()
            .find(|c| c.uuid == write_uuid)
            .cloned()
            .ok_or_else(|| anyhow!("write characteristic {write_uuid} not found"))?;

        peripheral
            .subscribe(&read_characteristic)
            .await
            .context("subscribe to notifications")?;
        let mut notifications = peripheral
            .notifications()
            .await
            .context("notification stream")?;

        let up = Arc::new(AtomicBool::new(true));
        let pump_up = Arc::clone(&up);
        // The radio callback context: enqueue only, never block.
        tokio::spawn(async move {
            while let Some(notification) = notifications.next().await {
                if notification.uuid == read_uuid {
                    sink.deliver(notification.value);
                }
            }
            debug!("notification stream ended");
            pump_up.store(false, Ordering::SeqCst);
        });

        info!("BLE connection established");
        Ok(Self {
            peripheral,
            read_characteristic,
            write_characteristic,
            up,
        })
    }
}

#[async_trait]
impl LinkPort for BleLink {
    async fn write(&self, bytes: &[u8]) -> Result<(), LinkError> {
        trace!(payload = %hex::encode(bytes), "gatt write");
        self.peripheral
            .write(&self.write_characteristic, bytes, WriteType::WithoutResponse)
            .await
            .map_err(|err| {
                self.up.store(false, Ordering::SeqCst);
                LinkError::WriteFailed(err.to_string())
            })
    }

    fn is_up(&self) -> bool {
        self.up.load(Ordering::SeqCst)
    }

    async fn close(&self) {
        self.up.store(false, Ordering::SeqCst);
        let _ = self.peripheral.unsubscribe(&self.read_characteristic).await;
        // The valve releases its connection slot faster when told that
        // notifications are done.
        let _ = self
            .peripheral
            .write(&self.write_characteristic, b"R", WriteType::WithoutResponse)
            .await;
        let _ = self.peripheral.disconnect().await;
        debug!("link closed");
    }
}

/// `valvelink scan`: list devices, flagging the ones that look like valve
/// controllers (advertised service UUID or manufacturer ID).
pub async fn scan(seconds: u64, all: bool) -> Result<()> {
    let central = default_adapter().await?;
    let service_uuid = Uuid::parse_str(SERVICE_UUID_ADVERTISED)?;

    info!(seconds, "scanning");
    central
        .start_scan(ScanFilter::default())
        .await
        .context("start scan")?;
    sleep(Duration::from_secs(seconds)).await;
    let _ = central.stop_scan().await;

    let mut found = 0usize;
    for peripheral in central.peripherals().await.context("list peripherals")? {
        let properties = match peripheral.properties().await {
            Ok(Some(properties)) => properties,
            Ok(None) => continue,
            Err(err) => {
                warn!(%err, "skipping peripheral");
                continue;
            }
        };

        let is_valve = properties.services.contains(&service_uuid)
            || properties.manufacturer_data.contains_key(&MANUFACTURER_ID);
        if !all && !is_valve {
            continue;
        }
        found += 1;

        let name = properties.local_name.unwrap_or_else(|| "(unnamed)".to_string());
        let rssi = properties
            .rssi
            .map(|r| format!("{r} dBm"))
            .unwrap_or_else(|| "?".to_string());
        let marker = if is_valve { " [valve]" } else { "" };
        println!("{}  {}  {}{}", peripheral.id(), name, rssi, marker);
    }

    if found == 0 {
        println!(
            "No {} found.",
            if all { "devices" } else { "valve controllers" }
        );
    }
    Ok(())
}
