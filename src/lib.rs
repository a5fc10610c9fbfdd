//! BLE HID mouse connection and report core.
//!
//! Discovers a supported mouse, pairs with it, subscribes to its input
//! reports and turns them into cursor snapshots delivered by polling or
//! by a debounced push callback. The platform radio is supplied by the
//! host through [`GattTransport`] and fed back through a
//! [`TransportEventSink`].

pub mod domain;
pub mod error;
pub mod infrastructure;

pub use domain::models::{
    AppEvent, Buttons, ConnectionState, DeliveryMode, DeviceIdentity, MessageSeverity,
    MouseDelta, MouseReport, MouseSnapshot, StatusMessage,
};
pub use domain::profile::{ProfileRegistry, ReportLayout, ReportProfile};
pub use domain::settings::{Settings, SettingsService};
pub use error::{DecodeError, ErrorKind, MouseError, Result, TransportError};
pub use infrastructure::bluetooth::transport::{
    GattTransport, NativeDiscovery, NativeEvent, NoNativeDiscovery, TransportEvent,
};
pub use infrastructure::bluetooth::{MouseReceiver, MouseService, ServiceConfig, TransportEventSink};
