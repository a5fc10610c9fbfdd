//! Transport boundary
//!
//! The platform GATT stack and the native HID reader are external
//! collaborators. They are driven through [`GattTransport`] /
//! [`NativeDiscovery`] and report back asynchronously with
//! [`TransportEvent`] / [`NativeEvent`].

use crate::error::TransportError;
use uuid::Uuid;

/// Opaque handle to an open GATT link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LinkHandle(pub u64);

/// A characteristic on the remote device. Several characteristics may
/// share a UUID, so the instance id is part of the identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CharacteristicId {
    pub uuid: Uuid,
    pub instance: u16,
}

impl CharacteristicId {
    pub fn new(uuid: Uuid, instance: u16) -> Self {
        Self { uuid, instance }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GattService {
    pub uuid: Uuid,
    pub characteristics: Vec<CharacteristicId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BondState {
    None,
    Bonding,
    Bonded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

/// Callbacks from the GATT stack.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    ScanResult {
        name: Option<String>,
        address: String,
        service_uuids: Vec<Uuid>,
    },
    BondStateChanged {
        address: String,
        state: BondState,
    },
    ConnectionStateChange {
        status: i32,
        new_state: LinkState,
    },
    ServicesDiscovered {
        status: i32,
        services: Vec<GattService>,
    },
    CharacteristicChanged {
        characteristic: CharacteristicId,
        value: Vec<u8>,
    },
    CharacteristicRead {
        characteristic: CharacteristicId,
        value: Vec<u8>,
        status: i32,
    },
    DescriptorWrite {
        status: i32,
    },
}

/// Callbacks from the native HID discovery path.
#[derive(Debug, Clone)]
pub enum NativeEvent {
    MouseDiscovered,
    ReportReceived(Vec<u8>),
    MouseDisconnected,
}

/// Outbound GATT operations. Completion is reported through
/// [`TransportEvent`]s, not return values.
pub trait GattTransport: Send + Sync {
    /// Acquire (or re-acquire) the adapter.
    fn initialize(&self) -> Result<(), TransportError>;

    fn start_scan(&self) -> Result<(), TransportError>;

    fn stop_scan(&self) -> Result<(), TransportError>;

    fn create_bond(&self, address: &str) -> Result<(), TransportError>;

    fn connect(&self, address: &str) -> Result<LinkHandle, TransportError>;

    fn discover_services(&self, handle: LinkHandle) -> Result<(), TransportError>;

    fn read_characteristic(
        &self,
        handle: LinkHandle,
        characteristic: CharacteristicId,
    ) -> Result<(), TransportError>;

    fn set_notification(
        &self,
        handle: LinkHandle,
        characteristic: CharacteristicId,
        enabled: bool,
    ) -> Result<(), TransportError>;

    fn write_descriptor(
        &self,
        handle: LinkHandle,
        characteristic: CharacteristicId,
        descriptor: Uuid,
        value: &[u8],
    ) -> Result<(), TransportError>;

    /// Release the link. Must be safe to call on an already closed handle.
    fn close(&self, handle: LinkHandle);
}

/// Native HID discovery notifier.
pub trait NativeDiscovery: Send + Sync {
    fn discover_mouse(&self);

    fn stop_discover_mouse(&self);

    /// Stop discovery and the report read loop.
    fn stop_mouse(&self);
}

/// For hosts without a native HID path.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoNativeDiscovery;

impl NativeDiscovery for NoNativeDiscovery {
    fn discover_mouse(&self) {}

    fn stop_discover_mouse(&self) {}

    fn stop_mouse(&self) {}
}
