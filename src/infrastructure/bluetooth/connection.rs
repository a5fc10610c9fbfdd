//! Connection State Machine
//!
//! Owns the peripheral lifecycle. [`ConnectionMachine::handle`] maps the
//! current phase and one event to the next phase plus a list of
//! [`Effect`]s; it performs no I/O itself. The driver in
//! [`service`](super::service) executes the effects against the transport
//! and feeds their results back in as events.
//!
//! ```text
//! Disconnected -> Scanning -> Connecting -> Bonding -> DiscoveringServices
//!     -> SubscribingNotifications -> Connected
//! ```

use crate::domain::models::{
    ConnectionState, DeviceIdentity, MessageSeverity, MouseReport, StatusMessage,
};
use crate::domain::profile::{ProfileRegistry, ReportLayout, ReportProfile};
use crate::error::{MouseError, TransportError};
use crate::infrastructure::bluetooth::protocol::{
    self, DEVICE_NAME_UUID, GATT_SUCCESS, HID_SERVICE_UUID, PNP_ID_UUID,
};
use crate::infrastructure::bluetooth::transport::{
    BondState, CharacteristicId, GattService, LinkHandle, LinkState, NativeEvent, TransportEvent,
};
use std::collections::{HashSet, VecDeque};
use tracing::{debug, error, info, trace, warn};

/// Inputs to the state machine.
#[derive(Debug, Clone)]
pub enum MachineEvent {
    /// Begin scanning. `fresh` is set for consumer-initiated scans and
    /// clears the reconnect counter and the rejected-candidate list.
    StartScan { fresh: bool },
    StopScan,
    /// Expected disconnect requested through the API.
    Disconnect,
    /// Result of an [`Effect::Connect`].
    LinkOpened(LinkHandle),
    /// An outbound operation failed synchronously.
    EffectFailed(TransportError),
    ScanTimeout,
    PairingTimeout { attempt: u64 },
    Transport(TransportEvent),
    Native(NativeEvent),
}

/// Work the driver performs on behalf of the machine.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    StartScan,
    StopScan,
    ArmScanTimer,
    CancelScanTimer,
    CreateBond(String),
    Connect(String),
    DiscoverServices(LinkHandle),
    ReadCharacteristic(LinkHandle, CharacteristicId),
    /// Enable notifications locally and write the CCCD.
    EnableNotifications(LinkHandle, CharacteristicId),
    Close(LinkHandle),
    ArmPairingTimer { attempt: u64 },
    CancelPairingTimer,
    StopNativeDiscovery,
    StopNativeMouse,
    /// Invalidate the report generation and drop unreported motion.
    InvalidateReports,
    /// Run a full scan cycle (self-healing path).
    RestartDiscovery,
    ForwardReport {
        layout: ReportLayout,
        report: MouseReport,
    },
    Notify(StatusMessage),
    Surface(MouseError),
}

#[derive(Debug, Clone)]
struct Candidate {
    name: String,
    address: String,
}

#[derive(Debug, Clone)]
struct IdentityReads {
    name_char: Option<CharacteristicId>,
    pnp_char: Option<CharacteristicId>,
    name: Option<String>,
    pnp: Option<Vec<u8>>,
    reports: Vec<CharacteristicId>,
}

#[derive(Debug, Clone)]
enum Phase {
    Idle,
    Scanning,
    Connecting {
        candidate: Candidate,
    },
    Bonding {
        candidate: Candidate,
        handle: Option<LinkHandle>,
    },
    Discovering {
        candidate: Candidate,
        handle: LinkHandle,
        reads: Option<IdentityReads>,
    },
    Subscribing {
        handle: LinkHandle,
        identity: DeviceIdentity,
        profile: ReportProfile,
        pending: VecDeque<CharacteristicId>,
    },
    Connected {
        handle: LinkHandle,
        identity: DeviceIdentity,
        profile: ReportProfile,
    },
    Failed,
}

impl Phase {
    fn state(&self) -> ConnectionState {
        match self {
            Self::Idle => ConnectionState::Disconnected,
            Self::Scanning => ConnectionState::Scanning,
            Self::Connecting { .. } => ConnectionState::Connecting,
            Self::Bonding { .. } => ConnectionState::Bonding,
            Self::Discovering { .. } => ConnectionState::DiscoveringServices,
            Self::Subscribing { .. } => ConnectionState::SubscribingNotifications,
            Self::Connected { .. } => ConnectionState::Connected,
            Self::Failed => ConnectionState::Error,
        }
    }

    fn handle(&self) -> Option<LinkHandle> {
        match self {
            Self::Bonding { handle, .. } => *handle,
            Self::Discovering { handle, .. }
            | Self::Subscribing { handle, .. }
            | Self::Connected { handle, .. } => Some(*handle),
            _ => None,
        }
    }

    /// A pairing attempt or link is in progress.
    fn is_engaged(&self) -> bool {
        !matches!(self, Self::Idle | Self::Scanning | Self::Failed)
    }
}

/// Connection lifecycle for one peripheral slot.
pub struct ConnectionMachine {
    phase: Phase,
    registry: ProfileRegistry,
    /// Set while a self-healing restart is pending; further link errors
    /// are ignored until the next scan cycle starts.
    rebooting: bool,
    reconnect_attempts: u32,
    max_reconnect_attempts: u32,
    pairing_attempt: u64,
    rejected: HashSet<String>,
    /// Whether the native HID reader has announced a mouse. Native reports
    /// are forwarded only while set.
    native_attached: bool,
}

impl ConnectionMachine {
    pub fn new(registry: ProfileRegistry, max_reconnect_attempts: u32) -> Self {
        Self {
            phase: Phase::Idle,
            registry,
            rebooting: false,
            reconnect_attempts: 0,
            max_reconnect_attempts,
            pairing_attempt: 0,
            rejected: HashSet::new(),
            native_attached: false,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.phase.state()
    }

    /// Identity of the device being subscribed to or connected.
    pub fn identity(&self) -> Option<&DeviceIdentity> {
        match &self.phase {
            Phase::Subscribing { identity, .. } | Phase::Connected { identity, .. } => {
                Some(identity)
            }
            _ => None,
        }
    }

    pub fn is_rebooting(&self) -> bool {
        self.rebooting
    }

    pub fn handle(&mut self, event: MachineEvent) -> Vec<Effect> {
        let mut effects = Vec::new();
        match event {
            MachineEvent::StartScan { fresh } => self.on_start_scan(fresh, &mut effects),
            MachineEvent::StopScan => self.on_stop_scan(&mut effects),
            MachineEvent::Disconnect => {
                if self.phase.state() != ConnectionState::Disconnected {
                    info!("Disconnect requested in state {}", self.phase.state());
                }
                self.rebooting = false;
                self.cleanup(&mut effects);
            }
            MachineEvent::LinkOpened(handle) => self.on_link_opened(handle, &mut effects),
            MachineEvent::EffectFailed(err) => self.on_effect_failed(err, &mut effects),
            MachineEvent::ScanTimeout => {
                if matches!(self.phase, Phase::Scanning) {
                    info!("Scan period elapsed without a candidate");
                    self.phase = Phase::Idle;
                    effects.push(Effect::StopScan);
                    notify(&mut effects, MessageSeverity::Info, "Stopped scanning for a mouse");
                }
            }
            MachineEvent::PairingTimeout { attempt } => {
                if attempt == self.pairing_attempt
                    && self.phase.is_engaged()
                    && !matches!(self.phase, Phase::Connected { .. })
                {
                    warn!("Pairing attempt {} timed out in {}", attempt, self.state());
                    self.cleanup(&mut effects);
                    self.schedule_reconnect(MouseError::LinkError { status: -1 }, &mut effects);
                }
            }
            MachineEvent::Transport(event) => self.on_transport(event, &mut effects),
            MachineEvent::Native(event) => self.on_native(event, &mut effects),
        }
        effects
    }

    fn on_start_scan(&mut self, fresh: bool, effects: &mut Vec<Effect>) {
        if fresh {
            self.reconnect_attempts = 0;
            self.rejected.clear();
        }
        if self.phase.is_engaged() {
            self.cleanup(effects);
        }
        self.rebooting = false;
        if !matches!(self.phase, Phase::Scanning) {
            info!("Scanning for a compatible mouse");
            self.phase = Phase::Scanning;
            effects.push(Effect::StartScan);
            effects.push(Effect::ArmScanTimer);
        }
    }

    fn on_stop_scan(&mut self, effects: &mut Vec<Effect>) {
        if matches!(self.phase, Phase::Scanning) {
            self.phase = Phase::Idle;
            effects.push(Effect::StopScan);
            effects.push(Effect::CancelScanTimer);
        }
    }

    fn on_link_opened(&mut self, opened: LinkHandle, effects: &mut Vec<Effect>) {
        match &mut self.phase {
            Phase::Bonding { handle, .. } if handle.is_none() => {
                debug!("GATT link {:?} requested", opened);
                *handle = Some(opened);
            }
            _ => {
                debug!("Closing stale link {:?}", opened);
                effects.push(Effect::Close(opened));
            }
        }
    }

    fn on_effect_failed(&mut self, err: TransportError, effects: &mut Vec<Effect>) {
        // Starting the scan is the only effect that can fail while scanning.
        if matches!(self.phase, Phase::Scanning) {
            error!("Scan could not be started: {}", err);
            self.cleanup(effects);
            self.phase = Phase::Failed;
            effects.push(Effect::Surface(MouseError::from(err)));
            return;
        }
        match err {
            TransportError::Unavailable(msg) => {
                error!("Transport unavailable: {}", msg);
                self.cleanup(effects);
                self.phase = Phase::Failed;
                effects.push(Effect::Surface(MouseError::TransportUnavailable(msg)));
            }
            TransportError::Gatt(status) => self.on_link_error(status, effects),
            other => {
                warn!("Transport operation failed: {}", other);
                self.on_link_error(-1, effects);
            }
        }
    }

    fn on_native(&mut self, event: NativeEvent, effects: &mut Vec<Effect>) {
        match event {
            NativeEvent::MouseDiscovered => {
                info!("Native HID path found a mouse");
                notify(effects, MessageSeverity::Success, "Connected to a compatible mouse");
                self.on_stop_scan(effects);
                self.native_attached = true;
            }
            NativeEvent::ReportReceived(bytes) => {
                if !self.native_attached {
                    trace!("Dropping native report with no attached mouse");
                    return;
                }
                // The native reader only serves standard-layout devices.
                effects.push(Effect::ForwardReport {
                    layout: ReportLayout::Standard,
                    report: MouseReport::new(0, bytes),
                });
            }
            NativeEvent::MouseDisconnected => {
                if !std::mem::take(&mut self.native_attached) {
                    debug!("Native disconnect with no attached mouse, ignored");
                    return;
                }
                info!("Native HID mouse disconnected");
                effects.push(Effect::InvalidateReports);
                effects.push(Effect::RestartDiscovery);
            }
        }
    }

    fn on_transport(&mut self, event: TransportEvent, effects: &mut Vec<Effect>) {
        let phase = std::mem::replace(&mut self.phase, Phase::Idle);
        self.phase = match (phase, event) {
            (
                Phase::Scanning,
                TransportEvent::ScanResult {
                    name,
                    address,
                    service_uuids,
                },
            ) => self.on_scan_result(name, address, service_uuids, effects),

            (
                Phase::Connecting { candidate },
                TransportEvent::BondStateChanged { address, state },
            ) if address == candidate.address => match state {
                BondState::Bonded => {
                    info!("Bonded with {}", candidate.address);
                    effects.push(Effect::Connect(candidate.address.clone()));
                    Phase::Bonding {
                        candidate,
                        handle: None,
                    }
                }
                BondState::Bonding => Phase::Connecting { candidate },
                BondState::None => {
                    self.phase = Phase::Connecting { candidate };
                    self.reject("bonding refused", effects);
                    return;
                }
            },

            (phase, TransportEvent::ConnectionStateChange { status, new_state }) => {
                self.phase = phase;
                self.on_connection_state_change(status, new_state, effects);
                return;
            }

            (
                Phase::Discovering {
                    candidate,
                    handle,
                    reads: None,
                },
                TransportEvent::ServicesDiscovered { status, services },
            ) => {
                if status != GATT_SUCCESS {
                    self.phase = Phase::Discovering {
                        candidate,
                        handle,
                        reads: None,
                    };
                    warn!("Service discovery failed with status {}", status);
                    self.on_link_error(status, effects);
                    return;
                }
                match self.plan_identity_reads(&candidate, &services) {
                    Some(reads) => self.next_identity_step(candidate, handle, reads, effects),
                    None => {
                        self.phase = Phase::Discovering {
                            candidate,
                            handle,
                            reads: None,
                        };
                        self.reject("report service not found", effects);
                        return;
                    }
                }
            }

            (
                Phase::Discovering {
                    candidate,
                    handle,
                    reads: Some(mut reads),
                },
                TransportEvent::CharacteristicRead {
                    characteristic,
                    value,
                    status,
                },
            ) => {
                let ok = status == GATT_SUCCESS;
                if !ok {
                    warn!(
                        "Read of {} failed with status {}",
                        characteristic.uuid, status
                    );
                }
                if reads.name.is_none() && reads.name_char == Some(characteristic) {
                    let name = if ok {
                        protocol::parse_device_name(&value)
                    } else {
                        String::new()
                    };
                    reads.name = Some(name);
                } else if reads.pnp.is_none() && reads.pnp_char == Some(characteristic) {
                    reads.pnp = Some(if ok { value } else { Vec::new() });
                } else {
                    trace!("Ignoring read of {}", characteristic.uuid);
                    return self.restore(Phase::Discovering {
                        candidate,
                        handle,
                        reads: Some(reads),
                    });
                }
                self.next_identity_step(candidate, handle, reads, effects)
            }

            (
                Phase::Subscribing {
                    handle,
                    identity,
                    profile,
                    mut pending,
                },
                TransportEvent::DescriptorWrite { status },
            ) => {
                if status != GATT_SUCCESS {
                    self.phase = Phase::Subscribing {
                        handle,
                        identity,
                        profile,
                        pending,
                    };
                    warn!("Notification descriptor write failed with status {}", status);
                    self.on_link_error(status, effects);
                    return;
                }
                pending.pop_front();
                match pending.front() {
                    Some(next) => {
                        effects.push(Effect::EnableNotifications(handle, *next));
                        Phase::Subscribing {
                            handle,
                            identity,
                            profile,
                            pending,
                        }
                    }
                    None => {
                        info!("Connected to {} ({})", identity.name, identity.address);
                        self.reconnect_attempts = 0;
                        effects.push(Effect::CancelPairingTimer);
                        notify(
                            effects,
                            MessageSeverity::Success,
                            &format!("Connected to {}", identity.name),
                        );
                        Phase::Connected {
                            handle,
                            identity,
                            profile,
                        }
                    }
                }
            }

            (
                Phase::Connected {
                    handle,
                    identity,
                    profile,
                },
                TransportEvent::CharacteristicChanged {
                    characteristic,
                    value,
                },
            ) => {
                if characteristic.uuid == profile.report_characteristic {
                    effects.push(Effect::ForwardReport {
                        layout: profile.layout,
                        report: MouseReport::new(characteristic.instance, value),
                    });
                } else {
                    trace!("Ignoring notification from {}", characteristic.uuid);
                }
                Phase::Connected {
                    handle,
                    identity,
                    profile,
                }
            }

            (phase, event) => {
                trace!("Ignoring {:?} in state {}", event, phase.state());
                phase
            }
        };
    }

    fn restore(&mut self, phase: Phase) {
        self.phase = phase;
    }

    fn on_scan_result(
        &mut self,
        name: Option<String>,
        address: String,
        service_uuids: Vec<uuid::Uuid>,
        effects: &mut Vec<Effect>,
    ) -> Phase {
        let name = name.unwrap_or_default();
        if !service_uuids.contains(&HID_SERVICE_UUID) || !self.registry.supports_name(&name) {
            trace!("Skipping scan result {:?} ({})", name, address);
            return Phase::Scanning;
        }
        if self.rejected.contains(&address) {
            trace!("Skipping previously rejected {}", address);
            return Phase::Scanning;
        }

        info!("Found candidate {} ({})", name, address);
        self.pairing_attempt += 1;
        effects.push(Effect::StopScan);
        effects.push(Effect::CancelScanTimer);
        effects.push(Effect::StopNativeDiscovery);
        effects.push(Effect::CreateBond(address.clone()));
        effects.push(Effect::ArmPairingTimer {
            attempt: self.pairing_attempt,
        });
        notify(effects, MessageSeverity::Info, &format!("Pairing to {}", name));
        Phase::Connecting {
            candidate: Candidate { name, address },
        }
    }

    fn on_connection_state_change(
        &mut self,
        status: i32,
        new_state: LinkState,
        effects: &mut Vec<Effect>,
    ) {
        if status != GATT_SUCCESS {
            self.on_link_error(status, effects);
            return;
        }

        match (new_state, &self.phase) {
            (LinkState::Connected, Phase::Bonding { handle: Some(handle), candidate }) => {
                info!("Connected to GATT server, discovering services");
                let handle = *handle;
                let candidate = candidate.clone();
                effects.push(Effect::DiscoverServices(handle));
                self.phase = Phase::Discovering {
                    candidate,
                    handle,
                    reads: None,
                };
            }
            (LinkState::Disconnected, phase) if phase.handle().is_some() => {
                info!("Disconnected from GATT server");
                self.cleanup(effects);
                self.schedule_reconnect(MouseError::LinkError { status }, effects);
            }
            (state, phase) => trace!("Link {:?} in state {}", state, phase.state()),
        }
    }

    fn on_link_error(&mut self, status: i32, effects: &mut Vec<Effect>) {
        if self.rebooting {
            debug!("Link error {} while rebooting, ignored", status);
            return;
        }
        if !self.phase.is_engaged() {
            debug!("Stale link error {} in state {}", status, self.state());
            return;
        }
        warn!("Link error (status {}) in state {}", status, self.state());
        self.cleanup(effects);
        self.schedule_reconnect(MouseError::LinkError { status }, effects);
    }

    fn schedule_reconnect(&mut self, cause: MouseError, effects: &mut Vec<Effect>) {
        self.reconnect_attempts += 1;
        if self.reconnect_attempts > self.max_reconnect_attempts {
            error!(
                "Giving up after {} reconnect attempts",
                self.max_reconnect_attempts
            );
            self.phase = Phase::Failed;
            effects.push(Effect::Surface(cause));
            return;
        }
        debug!(
            "Reconnect attempt {}/{}",
            self.reconnect_attempts, self.max_reconnect_attempts
        );
        self.rebooting = true;
        effects.push(Effect::RestartDiscovery);
    }

    /// Drop the current candidate and go back to scanning.
    fn reject(&mut self, reason: &str, effects: &mut Vec<Effect>) {
        let address = match &self.phase {
            Phase::Connecting { candidate }
            | Phase::Bonding { candidate, .. }
            | Phase::Discovering { candidate, .. } => Some(candidate.address.clone()),
            Phase::Subscribing { identity, .. } | Phase::Connected { identity, .. } => {
                Some(identity.address.clone())
            }
            _ => None,
        };
        let rejection = MouseError::CandidateRejected(format!(
            "{}: {}",
            address.as_deref().unwrap_or("unknown device"),
            reason
        ));
        info!("{}", rejection);
        if let Some(address) = address {
            self.rejected.insert(address);
        }
        self.cleanup(effects);
        notify(effects, MessageSeverity::Warning, &rejection.to_string());
        effects.push(Effect::RestartDiscovery);
    }

    fn plan_identity_reads(
        &self,
        candidate: &Candidate,
        services: &[GattService],
    ) -> Option<IdentityReads> {
        let expected = self.registry.by_name(&candidate.name)?;
        let characteristics = || services.iter().flat_map(|s| s.characteristics.iter().copied());

        let mut reports: Vec<CharacteristicId> = characteristics()
            .filter(|c| c.uuid == expected.report_characteristic)
            .collect();
        if reports.is_empty() {
            return None;
        }
        reports.sort_by_key(|c| c.instance);
        reports.dedup();

        Some(IdentityReads {
            name_char: characteristics().find(|c| c.uuid == DEVICE_NAME_UUID),
            pnp_char: characteristics().find(|c| c.uuid == PNP_ID_UUID),
            name: None,
            pnp: None,
            reports,
        })
    }

    /// Issue the next outstanding identity read, or finalize the identity.
    fn next_identity_step(
        &mut self,
        candidate: Candidate,
        handle: LinkHandle,
        reads: IdentityReads,
        effects: &mut Vec<Effect>,
    ) -> Phase {
        if reads.name.is_none() {
            if let Some(c) = reads.name_char {
                effects.push(Effect::ReadCharacteristic(handle, c));
                return Phase::Discovering {
                    candidate,
                    handle,
                    reads: Some(reads),
                };
            }
        }
        if reads.pnp.is_none() {
            if let Some(c) = reads.pnp_char {
                effects.push(Effect::ReadCharacteristic(handle, c));
                return Phase::Discovering {
                    candidate,
                    handle,
                    reads: Some(reads),
                };
            }
        }

        let name = reads
            .name
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| candidate.name.clone());
        let pnp_id = reads.pnp.unwrap_or_default();
        let pnp = protocol::parse_pnp_id(&pnp_id);

        let profile = match self.registry.resolve(&name, pnp) {
            Some(profile) => profile.clone(),
            None => {
                self.phase = Phase::Discovering {
                    candidate,
                    handle,
                    reads: None,
                };
                self.reject(&format!("no report profile for {:?}", name), effects);
                return std::mem::replace(&mut self.phase, Phase::Idle);
            }
        };

        let identity = DeviceIdentity {
            name,
            address: candidate.address,
            vendor_id: pnp.map(|p| p.vendor_id).unwrap_or(0),
            product_id: pnp.map(|p| p.product_id).unwrap_or(0),
            pnp_id,
        };
        info!(
            "Identified {} (vendor {:#06x}, product {:#06x}), {:?} layout",
            identity.name, identity.vendor_id, identity.product_id, profile.layout
        );

        let pending: VecDeque<CharacteristicId> = reads.reports.into_iter().collect();
        if let Some(first) = pending.front() {
            effects.push(Effect::EnableNotifications(handle, *first));
        }
        Phase::Subscribing {
            handle,
            identity,
            profile,
            pending,
        }
    }

    /// Release everything tied to the current link and return to idle.
    fn cleanup(&mut self, effects: &mut Vec<Effect>) {
        let phase = std::mem::replace(&mut self.phase, Phase::Idle);
        self.native_attached = false;
        if matches!(phase, Phase::Scanning) {
            effects.push(Effect::StopScan);
            effects.push(Effect::CancelScanTimer);
        }
        if phase.is_engaged() {
            effects.push(Effect::CancelPairingTimer);
        }
        if let Some(handle) = phase.handle() {
            effects.push(Effect::Close(handle));
        }
        effects.push(Effect::InvalidateReports);
        effects.push(Effect::StopNativeMouse);
    }
}

fn notify(effects: &mut Vec<Effect>, severity: MessageSeverity, message: &str) {
    effects.push(Effect::Notify(StatusMessage {
        message: message.to_string(),
        severity,
    }));
}
