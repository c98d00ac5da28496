//! BLE advertisement sources.
//!
//! This module provides a common front over the Bluetooth scanning backends.
//! Each backend turns whatever its transport delivers into
//! [`AdvertisementFrame`]s and pushes them through a channel; identifier
//! decoding happens later, in the match engine.

#[cfg(feature = "bluer")]
pub mod bluer;

#[cfg(feature = "hci")]
pub mod hci;

use crate::frame::AdvertisementFrame;
use thiserror::Error;
use tokio::sync::mpsc;

/// Errors for individual advertisements that could not be turned into a frame.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ReportError {
    /// HCI advertising report shorter than its own headers claim
    #[error("Truncated report: {0}")]
    Truncated(String),
    /// Reading device properties failed
    #[error("Bluetooth error: {0}")]
    Bluetooth(String),
}

/// Convenience alias for received frames or report errors.
pub type FrameResult = Result<AdvertisementFrame, ReportError>;

/// Error type for scanner operations.
#[derive(Error, Debug)]
pub enum ScanError {
    /// Bluetooth/adapter related error
    #[error("Bluetooth error: {0}")]
    Bluetooth(String),
    /// Backend not available (not compiled in)
    #[allow(dead_code)]
    #[error("Backend '{0}' not available (not compiled in)")]
    BackendNotAvailable(String),
}

/// Channel buffer size for received frames.
pub const FRAME_CHANNEL_BUFFER_SIZE: usize = 256;

/// Available scanner backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Backend {
    /// BlueZ D-Bus backend (requires bluetoothd daemon)
    #[cfg(feature = "bluer")]
    Bluer,
    /// Raw HCI socket backend (direct kernel access, no daemon required)
    #[cfg(feature = "hci")]
    Hci,
}

impl Default for Backend {
    fn default() -> Self {
        #[cfg(feature = "bluer")]
        return Backend::Bluer;
        #[cfg(all(feature = "hci", not(feature = "bluer")))]
        return Backend::Hci;
        #[cfg(not(any(feature = "bluer", feature = "hci")))]
        compile_error!("At least one backend feature must be enabled");
    }
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            #[cfg(feature = "bluer")]
            Backend::Bluer => write!(f, "bluer"),
            #[cfg(feature = "hci")]
            Backend::Hci => write!(f, "hci"),
        }
    }
}

impl std::str::FromStr for Backend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            #[cfg(feature = "bluer")]
            "bluer" | "bluez" => Ok(Backend::Bluer),
            #[cfg(feature = "hci")]
            "hci" | "raw" => Ok(Backend::Hci),
            _ => Err(format!("Unknown backend: {}", s)),
        }
    }
}

/// Start receiving advertisement frames using the specified backend.
///
/// # Arguments
/// * `backend` - The scanner backend to use
/// * `verbose` - If true, per-advertisement errors are sent as `Err` values;
///   otherwise they are dropped.
///
/// # Returns
/// A receiver for frames (or report errors if verbose).
pub async fn start_scan(
    backend: Backend,
    verbose: bool,
) -> Result<mpsc::Receiver<FrameResult>, ScanError> {
    match backend {
        #[cfg(feature = "bluer")]
        Backend::Bluer => bluer::start_scan(verbose).await,
        #[cfg(feature = "hci")]
        Backend::Hci => hci::start_scan(verbose).await,
    }
}
