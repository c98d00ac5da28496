//! BlueZ D-Bus backend for beacon scanning.
//!
//! This backend uses the `bluer` crate to run an LE discovery session through
//! the BlueZ daemon. It requires the `bluetoothd` daemon to be running.

use super::{FRAME_CHANNEL_BUFFER_SIZE, FrameResult, ReportError, ScanError};
use crate::frame::AdvertisementFrame;
use bluer::{Adapter, AdapterEvent, Address, DiscoveryFilter, DiscoveryTransport, Session};
use futures::{StreamExt, pin_mut};
use tokio::sync::mpsc;

impl From<bluer::Error> for ScanError {
    fn from(err: bluer::Error) -> Self {
        ScanError::Bluetooth(err.to_string())
    }
}

/// Start an LE discovery session and forward every advertisement as a frame.
///
/// Duplicate reporting is enabled so a beacon that stays in range keeps
/// producing frames; BlueZ re-announces a device whenever one of its
/// advertised properties (including RSSI) changes. Runs until the receiver is
/// dropped or the session ends.
///
/// # Arguments
/// * `verbose` - If true, property read errors are sent as Err values; otherwise they're silently dropped.
pub async fn start_scan(verbose: bool) -> Result<mpsc::Receiver<FrameResult>, ScanError> {
    let session = Session::new().await?;
    let adapter = session.default_adapter().await?;
    adapter.set_powered(true).await?;
    adapter
        .set_discovery_filter(DiscoveryFilter {
            transport: DiscoveryTransport::Le,
            duplicate_data: true,
            ..Default::default()
        })
        .await?;

    let events = adapter.discover_devices_with_changes().await?;
    let (tx, rx) = mpsc::channel(FRAME_CHANNEL_BUFFER_SIZE);

    // The task owns the session; dropping the event stream ends discovery.
    tokio::spawn(async move {
        let _session = session;
        pin_mut!(events);

        while let Some(event) = events.next().await {
            let AdapterEvent::DeviceAdded(address) = event else {
                continue;
            };

            let result = match read_frame(&adapter, address).await {
                Ok(Some(frame)) => Ok(frame),
                Ok(None) => continue,
                Err(e) if verbose => Err(ReportError::Bluetooth(format!("{address}: {e}"))),
                Err(_) => continue,
            };

            if tx.send(result).await.is_err() {
                break;
            }
        }
    });

    Ok(rx)
}

/// Read the advertised properties of a device into a frame.
///
/// Devices without an RSSI are cached entries, not live advertisements, and
/// yield `None`. BlueZ reports UUIDs and data as unordered sets, so they are
/// sorted to keep decoding deterministic.
async fn read_frame(
    adapter: &Adapter,
    address: Address,
) -> Result<Option<AdvertisementFrame>, bluer::Error> {
    let device = adapter.device(address)?;

    let Some(rssi) = device.rssi().await? else {
        return Ok(None);
    };

    let mut frame = AdvertisementFrame::new(address.to_string(), rssi);

    if let Some(uuids) = device.uuids().await? {
        frame.service_uuids = uuids.into_iter().collect();
        frame.service_uuids.sort();
    }

    if let Some(data) = device.manufacturer_data().await? {
        frame.manufacturer_data = data.into_iter().collect();
        frame.manufacturer_data.sort_by_key(|(company, _)| *company);
    }

    if let Some(data) = device.service_data().await? {
        frame.service_data = data.into_iter().collect();
        frame.service_data.sort_by_key(|(uuid, _)| *uuid);
    }

    Ok(Some(frame))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_display_matches_frame_address() {
        let addr = Address([0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF]);
        let frame = AdvertisementFrame::new(addr.to_string(), -60);
        assert_eq!(frame.address, "AA:BB:CC:DD:EE:FF");
    }
}
