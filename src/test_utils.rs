use crate::campaign::Campaign;
use crate::frame::AdvertisementFrame;

/// A stable device address for unit tests.
pub const TEST_ADDRESS: &str = "AA:BB:CC:DD:EE:FF";

/// Canonical form of [`DEMO_UUID_BYTES`].
pub const DEMO_UUID: &str = "e2c56db5-dffb-48d2-b060-d0f5a71096e0";

/// Big-endian bytes of the demo beacon UUID.
pub const DEMO_UUID_BYTES: [u8; 16] = [
    0xE2, 0xC5, 0x6D, 0xB5, 0xDF, 0xFB, 0x48, 0xD2, 0xB0, 0x60, 0xD0, 0xF5, 0xA7, 0x10, 0x96, 0xE0,
];

/// Apple manufacturer block whose first 16 bytes are the demo UUID, heard at -70 dBm.
pub fn ibeacon_frame() -> AdvertisementFrame {
    let mut payload = DEMO_UUID_BYTES.to_vec();
    payload.extend_from_slice(&[0x00, 0x01, 0x00, 0x02, 0xC5]);
    AdvertisementFrame::new(TEST_ADDRESS, -70).with_manufacturer_data(0x004C, payload)
}

/// An active campaign named "Demo" bound to [`DEMO_UUID`].
pub fn demo_campaign() -> Campaign {
    Campaign {
        id: "demo".to_string(),
        name: "Demo".to_string(),
        description: "Demo campaign".to_string(),
        website: "https://example.com/demo".to_string(),
        identifier: DEMO_UUID.to_string(),
        active: true,
    }
}
