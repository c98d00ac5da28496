//! BLE advertisement frames.
//!
//! A frame is the decoded view of one advertisement: who sent it, how strong it
//! was, and the three AD sections that can carry a beacon identifier. Frames can
//! be assembled directly (the BlueZ backend already receives parsed properties)
//! or parsed from the raw AD payload of an HCI advertising report.

use uuid::Uuid;

// AD types (Bluetooth Core Supplement, Part A, Section 1)
pub const AD_TYPE_UUID16_INCOMPLETE: u8 = 0x02;
pub const AD_TYPE_UUID16_COMPLETE: u8 = 0x03;
pub const AD_TYPE_UUID32_INCOMPLETE: u8 = 0x04;
pub const AD_TYPE_UUID32_COMPLETE: u8 = 0x05;
pub const AD_TYPE_UUID128_INCOMPLETE: u8 = 0x06;
pub const AD_TYPE_UUID128_COMPLETE: u8 = 0x07;
pub const AD_TYPE_SERVICE_DATA_UUID16: u8 = 0x16;
pub const AD_TYPE_SERVICE_DATA_UUID32: u8 = 0x20;
pub const AD_TYPE_SERVICE_DATA_UUID128: u8 = 0x21;
pub const AD_TYPE_MANUFACTURER_DATA: u8 = 0xFF;

/// Bluetooth base UUID (`00000000-0000-1000-8000-00805f9b34fb`) used to expand 16/32-bit UUIDs.
const BLUETOOTH_BASE_UUID: u128 = 0x0000_0000_0000_1000_8000_0080_5F9B_34FB;

/// Expand a 16-bit or 32-bit assigned number onto the Bluetooth base UUID.
pub fn expand_short_uuid(short: u32) -> Uuid {
    Uuid::from_u128(BLUETOOTH_BASE_UUID | (u128::from(short) << 96))
}

/// One received BLE advertisement.
///
/// Lists keep advertisement order; "first" in the decoder always means first as advertised.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AdvertisementFrame {
    /// Opaque device address, e.g. "AA:BB:CC:DD:EE:FF"
    pub address: String,
    /// Received signal strength in dBm
    pub rssi: i16,
    /// Advertised service UUIDs, short forms expanded to 128 bits
    pub service_uuids: Vec<Uuid>,
    /// (company code, payload after the company code)
    pub manufacturer_data: Vec<(u16, Vec<u8>)>,
    /// (service UUID, payload after the UUID)
    pub service_data: Vec<(Uuid, Vec<u8>)>,
}

impl AdvertisementFrame {
    pub fn new(address: impl Into<String>, rssi: i16) -> Self {
        Self {
            address: address.into(),
            rssi,
            ..Default::default()
        }
    }

    pub fn with_service_uuid(mut self, uuid: Uuid) -> Self {
        self.service_uuids.push(uuid);
        self
    }

    pub fn with_manufacturer_data(mut self, company: u16, data: impl Into<Vec<u8>>) -> Self {
        self.manufacturer_data.push((company, data.into()));
        self
    }

    pub fn with_service_data(mut self, uuid: Uuid, data: impl Into<Vec<u8>>) -> Self {
        self.service_data.push((uuid, data.into()));
        self
    }

    /// Parse a raw advertising payload (a sequence of `len, type, data` AD structures).
    ///
    /// Parsing is lenient: a zero-length structure or one that overruns the buffer
    /// ends the walk, and anything collected up to that point is kept. Malformed
    /// input therefore yields a frame with fewer sections, never an error.
    pub fn from_ad_bytes(address: impl Into<String>, rssi: i16, payload: &[u8]) -> Self {
        let mut frame = Self::new(address, rssi);

        let mut offset = 0;
        while offset + 2 <= payload.len() {
            let len = payload[offset] as usize;
            if len == 0 || offset + 1 + len > payload.len() {
                break;
            }

            let ad_type = payload[offset + 1];
            let data = &payload[offset + 2..offset + 1 + len];
            frame.push_structure(ad_type, data);

            offset += 1 + len;
        }

        frame
    }

    fn push_structure(&mut self, ad_type: u8, data: &[u8]) {
        match ad_type {
            AD_TYPE_UUID16_INCOMPLETE | AD_TYPE_UUID16_COMPLETE => {
                self.service_uuids
                    .extend(data.chunks_exact(2).filter_map(uuid_from_le_16));
            }
            AD_TYPE_UUID32_INCOMPLETE | AD_TYPE_UUID32_COMPLETE => {
                self.service_uuids
                    .extend(data.chunks_exact(4).filter_map(uuid_from_le_32));
            }
            AD_TYPE_UUID128_INCOMPLETE | AD_TYPE_UUID128_COMPLETE => {
                self.service_uuids
                    .extend(data.chunks_exact(16).filter_map(uuid_from_le_128));
            }
            AD_TYPE_SERVICE_DATA_UUID16 if data.len() >= 2 => {
                if let Some(uuid) = uuid_from_le_16(&data[..2]) {
                    self.service_data.push((uuid, data[2..].to_vec()));
                }
            }
            AD_TYPE_SERVICE_DATA_UUID32 if data.len() >= 4 => {
                if let Some(uuid) = uuid_from_le_32(&data[..4]) {
                    self.service_data.push((uuid, data[4..].to_vec()));
                }
            }
            AD_TYPE_SERVICE_DATA_UUID128 if data.len() >= 16 => {
                if let Some(uuid) = uuid_from_le_128(&data[..16]) {
                    self.service_data.push((uuid, data[16..].to_vec()));
                }
            }
            AD_TYPE_MANUFACTURER_DATA if data.len() >= 2 => {
                let company = u16::from_le_bytes([data[0], data[1]]);
                self.manufacturer_data.push((company, data[2..].to_vec()));
            }
            _ => {}
        }
    }
}

fn uuid_from_le_16(bytes: &[u8]) -> Option<Uuid> {
    let raw: [u8; 2] = bytes.try_into().ok()?;
    Some(expand_short_uuid(u32::from(u16::from_le_bytes(raw))))
}

fn uuid_from_le_32(bytes: &[u8]) -> Option<Uuid> {
    let raw: [u8; 4] = bytes.try_into().ok()?;
    Some(expand_short_uuid(u32::from_le_bytes(raw)))
}

fn uuid_from_le_128(bytes: &[u8]) -> Option<Uuid> {
    let mut raw: [u8; 16] = bytes.try_into().ok()?;
    // fully byte-reversed on air, not the mixed-endian GUID layout of `Uuid::from_bytes_le`
    raw.reverse();
    Some(Uuid::from_bytes(raw))
}
