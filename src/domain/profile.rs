//! Report profiles
//!
//! Maps a recognized device name to the layout its reports use. The
//! registry is data, so new devices can be added from the settings file
//! without touching the decoder.

use crate::infrastructure::bluetooth::protocol::{PnpId, RAZER_REPORT_UUID, RAZER_VENDOR_ID};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Byte layout of a device's input reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportLayout {
    /// Single 8-byte report: buttons, wheel and packed 12-bit X/Y.
    Standard,
    /// Separate 1-byte click report (instance 0) and 3-byte XY report
    /// (instance 1).
    Legacy,
}

impl ReportLayout {
    /// Minimum report length for the given characteristic instance.
    pub fn report_len(self, instance: u16) -> Option<usize> {
        match (self, instance) {
            (Self::Standard, 0) => Some(8),
            (Self::Legacy, 0) => Some(1),
            (Self::Legacy, 1) => Some(3),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportProfile {
    pub device_name: String,
    pub layout: ReportLayout,
    /// Characteristic carrying the input reports.
    #[serde(default = "default_report_characteristic")]
    pub report_characteristic: Uuid,
    /// PnP vendor id the device must present, if any.
    #[serde(default)]
    pub vendor_id: Option<u16>,
    /// PnP product id the device must present, if any.
    #[serde(default)]
    pub product_id: Option<u16>,
}

/// Product id of the Turret mouse.
pub const TURRET_PRODUCT_ID: u16 = 0x1E07;

fn default_report_characteristic() -> Uuid {
    RAZER_REPORT_UUID
}

impl ReportProfile {
    pub fn new(device_name: impl Into<String>, layout: ReportLayout) -> Self {
        Self {
            device_name: device_name.into(),
            layout,
            report_characteristic: RAZER_REPORT_UUID,
            vendor_id: None,
            product_id: None,
        }
    }

    pub fn with_vendor(mut self, vendor_id: u16) -> Self {
        self.vendor_id = Some(vendor_id);
        self
    }

    pub fn with_product(mut self, product_id: u16) -> Self {
        self.product_id = Some(product_id);
        self
    }

    fn accepts(&self, pnp: Option<PnpId>) -> bool {
        let vendor_ok = self.vendor_id.map_or(true, |v| pnp.map(|p| p.vendor_id) == Some(v));
        let product_ok = self.product_id.map_or(true, |v| pnp.map(|p| p.product_id) == Some(v));
        vendor_ok && product_ok
    }
}

/// Profiles known out of the box.
pub fn builtin_profiles() -> Vec<ReportProfile> {
    vec![
        ReportProfile::new("Turret Mouse", ReportLayout::Standard)
            .with_vendor(RAZER_VENDOR_ID)
            .with_product(TURRET_PRODUCT_ID),
        ReportProfile::new("Pearlyn Mouse", ReportLayout::Standard).with_vendor(RAZER_VENDOR_ID),
        ReportProfile::new("Lenovo Mice N700", ReportLayout::Legacy),
    ]
}

/// Capability-keyed lookup from device identity to report profile.
#[derive(Debug, Clone)]
pub struct ProfileRegistry {
    profiles: Vec<ReportProfile>,
}

impl Default for ProfileRegistry {
    fn default() -> Self {
        Self::new(builtin_profiles())
    }
}

impl ProfileRegistry {
    pub fn new(profiles: Vec<ReportProfile>) -> Self {
        Self { profiles }
    }

    /// Whether a scanned device name may become a pairing candidate.
    pub fn supports_name(&self, name: &str) -> bool {
        self.profiles.iter().any(|p| p.device_name == name)
    }

    pub fn by_name(&self, name: &str) -> Option<&ReportProfile> {
        self.profiles.iter().find(|p| p.device_name == name)
    }

    /// Resolve the profile for a finalized identity.
    ///
    /// `pnp` is `None` when the PnP-ID could not be read; profiles that
    /// require a vendor or product then do not match.
    pub fn resolve(&self, name: &str, pnp: Option<PnpId>) -> Option<&ReportProfile> {
        self.by_name(name).filter(|profile| profile.accepts(pnp))
    }

    pub fn profiles(&self) -> &[ReportProfile] {
        &self.profiles
    }
}
