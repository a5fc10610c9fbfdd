//! Report Decoder
//!
//! Turns raw HID input reports into [`MouseDelta`]s. Pure functions only.
//!
//! # Standard layout (8 bytes)
//!
//! ```text
//! [0]  : Button bitmask
//! [1-2]: Reserved
//! [3]  : Wheel delta (i8)
//! [4]  : X bits 0-7
//! [5]  : low nibble = X bits 8-11, high nibble = Y bits 8-11
//! [6]  : Y bits 0-7
//! [7]  : Reserved
//! ```
//!
//! # Legacy layout
//!
//! ```text
//! instance 0, click report (1 byte):
//! [0]  : Button bitmask
//!
//! instance 1, XY report (3 bytes):
//! [0]  : X bits 0-7
//! [1]  : low nibble = X bits 8-11, high nibble = Y bits 0-3
//! [2]  : Y bits 4-11
//! ```
//!
//! X and Y are 12-bit two's-complement values in both layouts.

use crate::domain::models::{Buttons, MouseDelta, MouseReport};
use crate::domain::profile::ReportLayout;
use crate::error::DecodeError;
use tracing::trace;

const FIELD_MASK: u16 = 0x0FFF;
const SIGN_BIT: u16 = 0x0800;

/// Interpret the low 12 bits of `raw` as a two's-complement value.
///
/// Negative values are recovered by flipping the magnitude bits and adding
/// one, since 12 bits is not a native integer width.
pub fn decode_12bit(raw: u16) -> i16 {
    let raw = raw & FIELD_MASK;
    if raw & SIGN_BIT == 0 {
        raw as i16
    } else {
        let magnitude = ((raw ^ FIELD_MASK) + 1) & FIELD_MASK;
        -(magnitude as i16)
    }
}

/// Decode one report under the profile resolved at pairing time.
pub fn decode(layout: Option<ReportLayout>, report: &MouseReport) -> Result<MouseDelta, DecodeError> {
    let layout = layout.ok_or(DecodeError::UnknownProfile)?;
    let expected = layout
        .report_len(report.instance)
        .ok_or(DecodeError::UnhandledInstance(report.instance))?;

    let bytes = &report.bytes;
    if bytes.len() < expected {
        return Err(DecodeError::ShortReport {
            expected,
            actual: bytes.len(),
        });
    }

    trace!("Decoding {:?} report {}: {:02X?}", layout, report.instance, bytes);

    let delta = match (layout, report.instance) {
        (ReportLayout::Standard, _) => decode_standard(bytes),
        (ReportLayout::Legacy, 0) => MouseDelta {
            buttons: Some(Buttons(bytes[0])),
            ..Default::default()
        },
        (ReportLayout::Legacy, _) => decode_legacy_xy(bytes),
    };
    Ok(delta)
}

fn decode_standard(bytes: &[u8]) -> MouseDelta {
    let mixed = bytes[5] as u16;
    let x = bytes[4] as u16 | (mixed & 0x0F) << 8;
    let y = bytes[6] as u16 | (mixed >> 4) << 8;

    MouseDelta {
        buttons: Some(Buttons(bytes[0])),
        dx: decode_12bit(x) as i32,
        dy: decode_12bit(y) as i32,
        wheel: bytes[3] as i8 as i32,
    }
}

fn decode_legacy_xy(bytes: &[u8]) -> MouseDelta {
    let mixed = bytes[1] as u16;
    let x = bytes[0] as u16 | (mixed & 0x0F) << 8;
    let y = (bytes[2] as u16) << 4 | mixed >> 4;

    MouseDelta {
        buttons: None,
        dx: decode_12bit(x) as i32,
        dy: decode_12bit(y) as i32,
        wheel: 0,
    }
}
