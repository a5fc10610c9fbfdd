use crate::error::MouseError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Mouse button bitmask as reported in byte 0 of a report.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Buttons(pub u8);

impl Buttons {
    pub const NONE: Buttons = Buttons(0);
    pub const LEFT: Buttons = Buttons(1 << 0);
    pub const RIGHT: Buttons = Buttons(1 << 1);
    pub const MIDDLE: Buttons = Buttons(1 << 2);
    pub const BACK: Buttons = Buttons(1 << 3);
    pub const FORWARD: Buttons = Buttons(1 << 4);
    pub const BUTTON_6: Buttons = Buttons(1 << 5);
    pub const BUTTON_7: Buttons = Buttons(1 << 6);
    pub const BUTTON_8: Buttons = Buttons(1 << 7);

    /// Whether every button in `other` is held.
    pub fn contains(self, other: Buttons) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for Buttons {
    type Output = Buttons;

    fn bitor(self, rhs: Buttons) -> Buttons {
        Buttons(self.0 | rhs.0)
    }
}

/// One decoded report.
///
/// `buttons` is `None` for reports that carry no button field (the legacy
/// XY report); the current mask is then left as it is.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MouseDelta {
    pub buttons: Option<Buttons>,
    pub dx: i32,
    pub dy: i32,
    pub wheel: i32,
}

/// Raw report bytes together with the characteristic instance they
/// arrived on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MouseReport {
    pub instance: u16,
    pub bytes: Vec<u8>,
}

impl MouseReport {
    pub fn new(instance: u16, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            instance,
            bytes: bytes.into(),
        }
    }
}

/// Mouse state handed to consumers by `poll_mouse` or a push receiver.
///
/// `dx`, `dy` and `wheel` are the unscaled amounts accumulated since the
/// previous snapshot; `x` and `y` are the clamped cursor position.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MouseSnapshot {
    pub buttons: Buttons,
    pub dx: i32,
    pub dy: i32,
    pub wheel: i32,
    pub x: f64,
    pub y: f64,
}

/// Identity of the paired peripheral, finalized after the post-bond reads.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceIdentity {
    pub name: String,
    pub address: String,
    pub vendor_id: u16,
    pub product_id: u16,
    pub pnp_id: Vec<u8>,
}

/// Lifecycle of the managed peripheral slot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Scanning,
    Connecting,
    Bonding,
    DiscoveringServices,
    SubscribingNotifications,
    Connected,
    Error,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Disconnected => "disconnected",
            Self::Scanning => "scanning",
            Self::Connecting => "connecting",
            Self::Bonding => "bonding",
            Self::DiscoveringServices => "discovering services",
            Self::SubscribingNotifications => "subscribing notifications",
            Self::Connected => "connected",
            Self::Error => "error",
        };
        f.write_str(s)
    }
}

/// How snapshots reach the consumer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeliveryMode {
    /// Snapshots are pushed to the registered receiver.
    #[default]
    Push,
    /// The consumer calls `poll_mouse`.
    Poll,
}

impl DeliveryMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Push => "push",
            Self::Poll => "poll",
        }
    }
}

/// Events emitted by the service for the host application.
#[derive(Debug, Clone)]
pub enum AppEvent {
    ConnectionStatus(ConnectionState),
    LogMessage(StatusMessage),
    Error(MouseError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusMessage {
    pub message: String,
    pub severity: MessageSeverity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageSeverity {
    Info,
    Success,
    Warning,
    Error,
}
