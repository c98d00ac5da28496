//! Raw HCI socket backend for beacon scanning.
//!
//! This backend uses raw Linux HCI sockets to receive LE advertising reports
//! without requiring the BlueZ daemon. It requires CAP_NET_RAW and
//! CAP_NET_ADMIN capabilities or root privileges.

use super::{FRAME_CHANNEL_BUFFER_SIZE, FrameResult, ReportError, ScanError};
use crate::frame::AdvertisementFrame;
use libc::{AF_BLUETOOTH, SOCK_CLOEXEC, SOCK_NONBLOCK, SOCK_RAW, c_int, c_void, sockaddr, socklen_t};
use std::io;
use std::mem;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use tokio::io::unix::AsyncFd;
use tokio::sync::mpsc;

// HCI protocol constants
const BTPROTO_HCI: c_int = 1;
const SOL_HCI: c_int = 0;
const HCI_FILTER: c_int = 2;
const HCI_CHANNEL_RAW: u16 = 0;

// HCI packet types
const HCI_COMMAND_PKT: u8 = 0x01;
const HCI_EVENT_PKT: u8 = 0x04;

// HCI events
const EVT_LE_META_EVENT: u8 = 0x3E;
const EVT_LE_ADVERTISING_REPORT: u8 = 0x02;

// LE controller commands
const OGF_LE_CTL: u16 = 0x08;
const OCF_LE_SET_SCAN_PARAMETERS: u16 = 0x000B;
const OCF_LE_SET_SCAN_ENABLE: u16 = 0x000C;

const LE_SCAN_PASSIVE: u8 = 0x00;
const LE_PUBLIC_ADDRESS: u8 = 0x00;
const FILTER_POLICY_ACCEPT_ALL: u8 = 0x00;
/// Scan interval and window, in 0.625 ms units (10 ms)
const SCAN_INTERVAL: u16 = 0x0010;
const SCAN_WINDOW: u16 = 0x0010;

/// Largest HCI event: 3 header bytes plus 255 parameter bytes
const MAX_EVENT_SIZE: usize = 258;

/// Bytes before the first report: packet type, event code, length, subevent, report count
const REPORTS_OFFSET: usize = 5;
/// Bytes of a report before its AD data: event type, address type, address, data length
const REPORT_HEADER_LEN: usize = 9;

#[repr(C)]
struct SockaddrHci {
    hci_family: u16,
    hci_dev: u16,
    hci_channel: u16,
}

/// Kernel-side packet filter for raw HCI sockets.
#[repr(C)]
#[derive(Debug, Default)]
struct HciFilter {
    type_mask: u32,
    event_mask: [u32; 2],
    opcode: u16,
}

impl HciFilter {
    /// Only LE meta events.
    fn le_meta_events() -> Self {
        let mut filter = Self::default();
        filter.type_mask |= 1 << u32::from(HCI_EVENT_PKT);
        let bit = usize::from(EVT_LE_META_EVENT);
        filter.event_mask[bit / 32] |= 1 << (bit % 32);
        filter
    }
}

fn os_error(context: &str) -> ScanError {
    ScanError::Bluetooth(format!("{context}: {}", io::Error::last_os_error()))
}

/// A raw HCI socket bound to one controller.
struct HciSocket {
    fd: OwnedFd,
}

impl HciSocket {
    /// Open a non-blocking raw socket bound to `hciN`.
    fn open(dev_id: u16) -> Result<Self, ScanError> {
        let raw = unsafe {
            libc::socket(
                AF_BLUETOOTH,
                SOCK_RAW | SOCK_CLOEXEC | SOCK_NONBLOCK,
                BTPROTO_HCI,
            )
        };
        if raw < 0 {
            return Err(os_error("Failed to create HCI socket"));
        }
        let socket = Self {
            fd: unsafe { OwnedFd::from_raw_fd(raw) },
        };

        let addr = SockaddrHci {
            hci_family: AF_BLUETOOTH as u16,
            hci_dev: dev_id,
            hci_channel: HCI_CHANNEL_RAW,
        };
        let ret = unsafe {
            libc::bind(
                socket.fd.as_raw_fd(),
                &addr as *const SockaddrHci as *const sockaddr,
                mem::size_of::<SockaddrHci>() as socklen_t,
            )
        };
        if ret < 0 {
            return Err(os_error("Failed to bind HCI socket"));
        }

        Ok(socket)
    }

    fn set_filter(&self, filter: &HciFilter) -> Result<(), ScanError> {
        let ret = unsafe {
            libc::setsockopt(
                self.fd.as_raw_fd(),
                SOL_HCI,
                HCI_FILTER,
                filter as *const HciFilter as *const c_void,
                mem::size_of::<HciFilter>() as socklen_t,
            )
        };
        if ret < 0 {
            return Err(os_error("Failed to set HCI filter"));
        }
        Ok(())
    }

    fn send_command(&self, ogf: u16, ocf: u16, params: &[u8]) -> Result<(), ScanError> {
        let packet = command_packet(ogf, ocf, params);
        let ret = unsafe {
            libc::write(
                self.fd.as_raw_fd(),
                packet.as_ptr() as *const c_void,
                packet.len(),
            )
        };
        if ret < 0 {
            return Err(os_error("Failed to send HCI command"));
        }
        Ok(())
    }

    /// Passive scan without duplicate filtering, so repeated beacon frames keep arriving.
    fn enable_passive_scan(&self) -> Result<(), ScanError> {
        let [interval_lo, interval_hi] = SCAN_INTERVAL.to_le_bytes();
        let [window_lo, window_hi] = SCAN_WINDOW.to_le_bytes();
        self.send_command(
            OGF_LE_CTL,
            OCF_LE_SET_SCAN_PARAMETERS,
            &[
                LE_SCAN_PASSIVE,
                interval_lo,
                interval_hi,
                window_lo,
                window_hi,
                LE_PUBLIC_ADDRESS,
                FILTER_POLICY_ACCEPT_ALL,
            ],
        )?;
        self.send_command(OGF_LE_CTL, OCF_LE_SET_SCAN_ENABLE, &[0x01, 0x00])
    }
}

/// Build an HCI command packet.
fn command_packet(ogf: u16, ocf: u16, params: &[u8]) -> Vec<u8> {
    let opcode = (ogf << 10) | ocf;
    let mut packet = Vec::with_capacity(4 + params.len());
    packet.push(HCI_COMMAND_PKT);
    packet.extend_from_slice(&opcode.to_le_bytes());
    packet.push(params.len() as u8);
    packet.extend_from_slice(params);
    packet
}

/// Format a little-endian on-air address as "AA:BB:CC:DD:EE:FF".
fn format_address(le_bytes: &[u8]) -> String {
    le_bytes
        .iter()
        .rev()
        .map(|b| format!("{b:02X}"))
        .collect::<Vec<_>>()
        .join(":")
}

/// Parse one advertising report, returning the frame and the bytes after it.
fn parse_report(report: &[u8]) -> Option<(AdvertisementFrame, &[u8])> {
    let header = report.get(..REPORT_HEADER_LEN)?;
    let data_len = usize::from(header[8]);
    let data_end = REPORT_HEADER_LEN + data_len;
    let ad_data = report.get(REPORT_HEADER_LEN..data_end)?;
    let rssi = *report.get(data_end)? as i8;

    let frame =
        AdvertisementFrame::from_ad_bytes(format_address(&header[2..8]), i16::from(rssi), ad_data);
    Some((frame, &report[data_end + 1..]))
}

/// Parse every report in an LE advertising report event.
///
/// Reports are laid out back to back. Parsing stops at the first report that
/// does not fit in the packet, which is returned as an error.
fn parse_advertising_event(packet: &[u8]) -> Vec<FrameResult> {
    let Some(&num_reports) = packet.get(REPORTS_OFFSET - 1) else {
        return vec![Err(ReportError::Truncated(format!(
            "advertising event of {} bytes has no report count",
            packet.len()
        )))];
    };

    let mut results = Vec::with_capacity(usize::from(num_reports));
    let mut rest = &packet[REPORTS_OFFSET..];
    for index in 0..num_reports {
        match parse_report(rest) {
            Some((frame, remaining)) => {
                results.push(Ok(frame));
                rest = remaining;
            }
            None => {
                results.push(Err(ReportError::Truncated(format!(
                    "advertising report {} of {} too short ({} bytes left)",
                    index + 1,
                    num_reports,
                    rest.len()
                ))));
                break;
            }
        }
    }
    results
}

fn is_advertising_event(packet: &[u8]) -> bool {
    packet.len() >= REPORTS_OFFSET - 1
        && packet[0] == HCI_EVENT_PKT
        && packet[1] == EVT_LE_META_EVENT
        && packet[3] == EVT_LE_ADVERTISING_REPORT
}

/// Start receiving advertisement frames from raw HCI sockets on hci0.
///
/// One socket receives LE meta events, a second one issues the scan commands.
/// Runs until the receiver is dropped or the socket fails.
///
/// # Arguments
/// * `verbose` - If true, truncated reports are sent as Err values; otherwise they're silently dropped.
///
/// # Requirements
/// - CAP_NET_RAW and CAP_NET_ADMIN capabilities or root privileges
/// - An available HCI device (typically hci0)
pub async fn start_scan(verbose: bool) -> Result<mpsc::Receiver<FrameResult>, ScanError> {
    let events = HciSocket::open(0)?;
    events.set_filter(&HciFilter::le_meta_events())?;

    let commands = HciSocket::open(0)?;
    commands.enable_passive_scan()?;

    let async_fd = AsyncFd::new(events.fd)
        .map_err(|e| ScanError::Bluetooth(format!("Failed to create async fd: {}", e)))?;

    let (tx, rx) = mpsc::channel(FRAME_CHANNEL_BUFFER_SIZE);

    tokio::spawn(async move {
        let _commands = commands;
        let mut buf = [0u8; MAX_EVENT_SIZE];

        'reader: loop {
            let Ok(mut guard) = async_fd.readable().await else {
                break;
            };

            // Drain all available packets before waiting again
            loop {
                let read = guard.try_io(|inner| {
                    let ret = unsafe {
                        libc::read(
                            inner.as_raw_fd(),
                            buf.as_mut_ptr() as *mut c_void,
                            buf.len(),
                        )
                    };
                    if ret < 0 {
                        Err(io::Error::last_os_error())
                    } else {
                        Ok(ret as usize)
                    }
                });

                let n = match read {
                    Ok(Ok(n)) if n > 0 => n,
                    Ok(Ok(_)) | Ok(Err(_)) => break 'reader,
                    Err(_would_block) => break,
                };

                if !is_advertising_event(&buf[..n]) {
                    continue;
                }

                for result in parse_advertising_event(&buf[..n]) {
                    if result.is_err() && !verbose {
                        continue;
                    }
                    if tx.send(result).await.is_err() {
                        break 'reader;
                    }
                }
            }
        }
    });

    Ok(rx)
}
