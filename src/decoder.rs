//! Beacon identifier extraction.
//!
//! The decoder walks the sections of an [`AdvertisementFrame`] in a fixed order
//! and returns the first identifier it can build. Nothing here fails: frames
//! that carry no usable identifier simply decode to `None`.

use crate::frame::AdvertisementFrame;
use crate::identifier::CanonicalIdentifier;
use uuid::Uuid;

/// Apple Inc. company identifier, the vendor code carried by iBeacon advertisements.
pub const APPLE_COMPANY_ID: u16 = 0x004C;

/// Minimum manufacturer payload length that can hold a 128-bit UUID.
pub const IBEACON_UUID_LEN: usize = 16;

/// Extracts a [`CanonicalIdentifier`] from advertisement frames.
///
/// Precedence is fixed, first success wins:
/// 1. the first advertised service UUID,
/// 2. the first manufacturer block of at least 16 bytes (optionally restricted
///    to one company code), read as a big-endian UUID,
/// 3. the UUID key of the first service data entry with a non-empty payload.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameDecoder {
    company_code_filter: Option<u16>,
}

impl FrameDecoder {
    /// Create a decoder. `None` accepts manufacturer data from any company;
    /// `Some(APPLE_COMPANY_ID)` only looks at Apple blocks.
    pub fn new(company_code_filter: Option<u16>) -> Self {
        Self {
            company_code_filter,
        }
    }

    pub fn company_code_filter(&self) -> Option<u16> {
        self.company_code_filter
    }

    pub fn decode(&self, frame: &AdvertisementFrame) -> Option<CanonicalIdentifier> {
        self.service_uuid_identifier(frame)
            .or_else(|| self.manufacturer_identifier(frame))
            .or_else(|| self.service_data_identifier(frame))
    }

    fn service_uuid_identifier(&self, frame: &AdvertisementFrame) -> Option<CanonicalIdentifier> {
        frame
            .service_uuids
            .first()
            .map(|uuid| CanonicalIdentifier::from(*uuid))
    }

    fn manufacturer_identifier(&self, frame: &AdvertisementFrame) -> Option<CanonicalIdentifier> {
        frame
            .manufacturer_data
            .iter()
            .filter(|(company, _)| self.company_code_filter.is_none_or(|c| c == *company))
            .find_map(|(_, data)| decode_ibeacon(data))
            .map(CanonicalIdentifier::from)
    }

    fn service_data_identifier(&self, frame: &AdvertisementFrame) -> Option<CanonicalIdentifier> {
        frame
            .service_data
            .iter()
            .find(|(_, data)| !data.is_empty())
            .map(|(uuid, _)| CanonicalIdentifier::from(*uuid))
    }
}

/// Read bytes `[0, 16)` of a manufacturer payload as a UUID.
///
/// Bytes 0-7 are the most significant half, 8-15 the least significant half,
/// both big-endian. Returns `None` when fewer than 16 bytes are available.
///
/// # Example
/// ```
/// use beacon_campaign_listener::decoder::decode_ibeacon;
///
/// let bytes = [
///     0xB9, 0x40, 0x7F, 0x30, 0xF5, 0xF8, 0x46, 0x6E,
///     0xAF, 0xF9, 0x25, 0x55, 0x6B, 0x57, 0xFE, 0x6D,
/// ];
/// let uuid = decode_ibeacon(&bytes).unwrap();
/// assert_eq!(uuid.to_string(), "b9407f30-f5f8-466e-aff9-25556b57fe6d");
/// assert!(decode_ibeacon(&bytes[..15]).is_none());
/// ```
pub fn decode_ibeacon(data: &[u8]) -> Option<Uuid> {
    let bytes = data.get(..IBEACON_UUID_LEN)?;
    let msb = u64::from_be_bytes(bytes[..8].try_into().ok()?);
    let lsb = u64::from_be_bytes(bytes[8..].try_into().ok()?);
    Some(Uuid::from_u64_pair(msb, lsb))
}
