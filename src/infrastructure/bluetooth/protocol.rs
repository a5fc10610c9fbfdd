//! BLE Mouse Protocol
//!
//! GATT identifiers and characteristic payload parsing for HID mice.

use uuid::Uuid;

/// HID service, advertised by every supported mouse.
pub const HID_SERVICE_UUID: Uuid = Uuid::from_u128(0x00001812_0000_1000_8000_00805f9b34fb);

/// Razer custom service carrying the vendor report characteristic.
pub const RAZER_SERVICE_UUID: Uuid = Uuid::from_u128(0x5240263a_f97c_7f90_0e7f_6c6f4e36db1c);

/// Razer custom mouse input report characteristic.
pub const RAZER_REPORT_UUID: Uuid = Uuid::from_u128(0x52401526_f97c_7f90_0e7f_6c6f4e36db1c);

/// GAP device name characteristic.
pub const DEVICE_NAME_UUID: Uuid = Uuid::from_u128(0x00002a00_0000_1000_8000_00805f9b34fb);

/// Device Information PnP ID characteristic.
pub const PNP_ID_UUID: Uuid = Uuid::from_u128(0x00002a50_0000_1000_8000_00805f9b34fb);

/// Client Characteristic Configuration descriptor.
pub const CCCD_UUID: Uuid = Uuid::from_u128(0x00002902_0000_1000_8000_00805f9b34fb);

/// CCCD value enabling notifications.
pub const ENABLE_NOTIFICATION_VALUE: [u8; 2] = [0x01, 0x00];

/// USB/Bluetooth vendor id assigned to Razer.
pub const RAZER_VENDOR_ID: u16 = 0x1532;

/// GATT success status.
pub const GATT_SUCCESS: i32 = 0;

/// Vendor and product id carried by a PnP ID characteristic value.
///
/// # Layout (7 bytes)
///
/// ```text
/// [0]   : Vendor ID source (1 = Bluetooth SIG, 2 = USB-IF)
/// [1-2] : Vendor ID (u16 little-endian)
/// [3-4] : Product ID (u16 little-endian)
/// [5-6] : Product version
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PnpId {
    pub vendor_id: u16,
    pub product_id: u16,
}

pub fn parse_pnp_id(bytes: &[u8]) -> Option<PnpId> {
    if bytes.len() < 5 {
        return None;
    }
    Some(PnpId {
        vendor_id: u16::from_le_bytes([bytes[1], bytes[2]]),
        product_id: u16::from_le_bytes([bytes[3], bytes[4]]),
    })
}

/// Decode a device name characteristic value (UTF-8, possibly
/// NUL-padded).
pub fn parse_device_name(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).trim().to_string()
}
