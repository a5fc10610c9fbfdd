//! Bluetooth Module
//!
//! Connection management and report delivery for BLE HID mice.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                      MouseService                         │
//! │   (public handle - consumer API, spawns the tasks)        │
//! └───────────┬───────────────────────────────┬──────────────┘
//!             │ commands / transport events   │ reports
//!             ▼                               ▼
//! ┌──────────────────────┐          ┌──────────────────────┐
//! │ DiscoveryCoordinator │ ───────▶ │    Report task       │
//! │  (driver task)       │ stamped  │ - decode             │
//! │ - ConnectionMachine  │ reports  │ - accumulate         │
//! │ - scan / pair timers │          │ - debounce + push    │
//! └──────────┬───────────┘          └──────────────────────┘
//!            │ effects
//!            ▼
//! ┌──────────────────────┐  ┌──────────┐
//! │ GattTransport /      │  │ Protocol │
//! │ NativeDiscovery      │  │ - UUIDs  │
//! │ (platform glue)      │  │ - PnP ID │
//! └──────────────────────┘  └──────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`] - GATT identifiers and characteristic parsing
//! - [`transport`] - Outbound transport traits and inbound event types
//! - [`connection`] - Connection state machine
//! - [`discovery`] - Driver task executing state machine effects
//! - [`delivery`] - Report pipeline and push-mode debounce
//! - [`service`] - Public service handle

pub mod connection;
pub mod delivery;
pub(crate) mod discovery;
pub mod protocol;
pub mod service;
pub mod transport;

// Re-export main service for convenience
pub use delivery::MouseReceiver;
pub use service::{LinkInfo, MouseService, ServiceConfig, TransportEventSink};
