//! Domain Module
//!
//! Pure mouse logic with no transport dependencies: report decoding, motion
//! accumulation, device profiles and persisted settings.

pub mod models;
pub mod motion;
pub mod profile;
pub mod report;
pub mod settings;
