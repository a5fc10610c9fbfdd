//! Discovery Coordinator
//!
//! The driver task. Owns the [`ConnectionMachine`], serializes every
//! transport callback and API command through one channel, and executes
//! the machine's effects against the transport and native notifier.

use crate::domain::models::{AppEvent, ConnectionState, DeviceIdentity};
use crate::error::{MouseError, Result, TransportError};
use crate::infrastructure::bluetooth::connection::{ConnectionMachine, Effect, MachineEvent};
use crate::infrastructure::bluetooth::delivery::{sleep_until_deadline, SharedMotion, StampedReport};
use crate::infrastructure::bluetooth::protocol::{CCCD_UUID, ENABLE_NOTIFICATION_VALUE};
use crate::infrastructure::bluetooth::service::{LinkInfo, ServiceConfig};
use crate::infrastructure::bluetooth::transport::{
    GattTransport, NativeDiscovery, NativeEvent, TransportEvent,
};
use std::collections::VecDeque;
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Messages handled by the driver task, in arrival order.
#[derive(Debug)]
pub(crate) enum Command {
    /// Full scan cycle. `reply` is set for consumer calls.
    StartScan {
        fresh: bool,
        reply: Option<oneshot::Sender<Result<()>>>,
    },
    StopScan,
    Disconnect,
    Transport(TransportEvent),
    Native(NativeEvent),
    Shutdown,
}

pub(crate) struct DiscoveryCoordinator {
    machine: ConnectionMachine,
    transport: Arc<dyn GattTransport>,
    native: Arc<dyn NativeDiscovery>,
    shared: Arc<SharedMotion>,
    link: Arc<RwLock<LinkInfo>>,
    config: ServiceConfig,
    reports: mpsc::UnboundedSender<StampedReport>,
    events: mpsc::UnboundedSender<AppEvent>,
    /// Loops restart requests back to the end of the queue.
    restarts: mpsc::WeakUnboundedSender<Command>,
    /// Generation of the current link. An API-side `disconnect` moves the
    /// shared generation past it, so reports still queued here go stale.
    generation: u64,
    scan_deadline: Option<Instant>,
    pairing_deadline: Option<(Instant, u64)>,
    /// Set when the transport refuses to start a scan.
    scan_failure: Option<TransportError>,
    published: (ConnectionState, Option<DeviceIdentity>),
}

impl DiscoveryCoordinator {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        transport: Arc<dyn GattTransport>,
        native: Arc<dyn NativeDiscovery>,
        shared: Arc<SharedMotion>,
        link: Arc<RwLock<LinkInfo>>,
        config: ServiceConfig,
        reports: mpsc::UnboundedSender<StampedReport>,
        events: mpsc::UnboundedSender<AppEvent>,
        restarts: mpsc::WeakUnboundedSender<Command>,
    ) -> Self {
        let machine = ConnectionMachine::new(
            config.profiles.clone(),
            config.max_reconnect_attempts,
        );
        Self {
            machine,
            transport,
            native,
            shared,
            link,
            config,
            reports,
            events,
            restarts,
            generation: 0,
            scan_deadline: None,
            pairing_deadline: None,
            scan_failure: None,
            published: (ConnectionState::Disconnected, None),
        }
    }

    pub(crate) async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        info!("Mouse service driver started");
        loop {
            let scan_deadline = self.scan_deadline;
            let pairing_deadline = self.pairing_deadline;
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Shutdown) | None => break,
                    Some(command) => self.on_command(command).await,
                },
                _ = sleep_until_deadline(scan_deadline) => {
                    self.scan_deadline = None;
                    self.dispatch(MachineEvent::ScanTimeout);
                }
                _ = sleep_until_deadline(pairing_deadline.map(|(at, _)| at)) => {
                    self.pairing_deadline = None;
                    if let Some((_, attempt)) = pairing_deadline {
                        self.dispatch(MachineEvent::PairingTimeout { attempt });
                    }
                }
            }
        }

        self.dispatch(MachineEvent::StopScan);
        self.dispatch(MachineEvent::Disconnect);
        self.native.stop_mouse();
        info!("Mouse service driver stopped");
    }

    async fn on_command(&mut self, command: Command) {
        match command {
            Command::StartScan { fresh, reply } => {
                let result = self.start_scan_for_mouse(fresh).await;
                match reply {
                    Some(reply) => {
                        let _ = reply.send(result);
                    }
                    None => {
                        if let Err(e) = result {
                            warn!("Scan restart failed: {}", e);
                        }
                    }
                }
            }
            Command::StopScan => {
                self.dispatch(MachineEvent::StopScan);
                self.native.stop_discover_mouse();
            }
            Command::Disconnect => self.dispatch(MachineEvent::Disconnect),
            Command::Transport(event) => self.dispatch(MachineEvent::Transport(event)),
            Command::Native(event) => self.dispatch(MachineEvent::Native(event)),
            Command::Shutdown => {}
        }
    }

    /// Stop any scan, drop the current link, then bring the adapter back
    /// up and scan again.
    async fn start_scan_for_mouse(&mut self, fresh: bool) -> Result<()> {
        self.dispatch(MachineEvent::StopScan);
        self.dispatch(MachineEvent::Disconnect);
        self.native.discover_mouse();

        // Let the platform finish releasing the closed link before the
        // adapter is re-acquired.
        tokio::task::yield_now().await;

        if let Err(e) = self.transport.initialize() {
            warn!("Transport failed to initialize: {}", e);
            self.dispatch(MachineEvent::EffectFailed(e.clone()));
            return Err(MouseError::from(e));
        }

        self.scan_failure = None;
        self.dispatch(MachineEvent::StartScan { fresh });
        match self.scan_failure.take() {
            Some(e) => Err(MouseError::from(e)),
            None => Ok(()),
        }
    }

    /// Feed one event to the machine, executing effects and any events
    /// they produce until the queue drains.
    fn dispatch(&mut self, event: MachineEvent) {
        let mut queue = VecDeque::from([event]);
        while let Some(event) = queue.pop_front() {
            for effect in self.machine.handle(event) {
                if let Some(follow_up) = self.execute(effect) {
                    queue.push_back(follow_up);
                }
            }
        }
        self.publish();
    }

    fn execute(&mut self, effect: Effect) -> Option<MachineEvent> {
        let result = match effect {
            Effect::StartScan => self.transport.start_scan().map_err(|e| {
                warn!("Transport failed to start scanning: {}", e);
                self.scan_failure = Some(e.clone());
                e
            }),
            Effect::StopScan => {
                if let Err(e) = self.transport.stop_scan() {
                    debug!("Stop scan failed: {}", e);
                }
                Ok(())
            }
            Effect::ArmScanTimer => {
                self.scan_deadline = Some(Instant::now() + self.config.scan_period);
                Ok(())
            }
            Effect::CancelScanTimer => {
                self.scan_deadline = None;
                Ok(())
            }
            Effect::CreateBond(address) => self.transport.create_bond(&address),
            Effect::Connect(address) => {
                return Some(match self.transport.connect(&address) {
                    Ok(handle) => MachineEvent::LinkOpened(handle),
                    Err(e) => MachineEvent::EffectFailed(e),
                });
            }
            Effect::DiscoverServices(handle) => self.transport.discover_services(handle),
            Effect::ReadCharacteristic(handle, characteristic) => {
                self.transport.read_characteristic(handle, characteristic)
            }
            Effect::EnableNotifications(handle, characteristic) => self
                .transport
                .set_notification(handle, characteristic, true)
                .and_then(|_| {
                    self.transport.write_descriptor(
                        handle,
                        characteristic,
                        CCCD_UUID,
                        &ENABLE_NOTIFICATION_VALUE,
                    )
                }),
            Effect::Close(handle) => {
                debug!("Closing link {:?}", handle);
                self.transport.close(handle);
                Ok(())
            }
            Effect::ArmPairingTimer { attempt } => {
                self.pairing_deadline =
                    Some((Instant::now() + self.config.pairing_timeout, attempt));
                Ok(())
            }
            Effect::CancelPairingTimer => {
                self.pairing_deadline = None;
                Ok(())
            }
            Effect::StopNativeDiscovery => {
                self.native.stop_discover_mouse();
                Ok(())
            }
            Effect::StopNativeMouse => {
                self.native.stop_mouse();
                Ok(())
            }
            Effect::InvalidateReports => {
                self.generation = self.shared.invalidate();
                Ok(())
            }
            Effect::RestartDiscovery => {
                match self.restarts.upgrade() {
                    Some(commands) => {
                        let _ = commands.send(Command::StartScan {
                            fresh: false,
                            reply: None,
                        });
                    }
                    None => debug!("Service shutting down, restart skipped"),
                }
                Ok(())
            }
            Effect::ForwardReport { layout, report } => {
                let _ = self.reports.send(StampedReport {
                    generation: self.generation,
                    layout,
                    report,
                });
                Ok(())
            }
            Effect::Notify(message) => {
                let _ = self.events.send(AppEvent::LogMessage(message));
                Ok(())
            }
            Effect::Surface(error) => {
                let _ = self.events.send(AppEvent::Error(error));
                Ok(())
            }
        };
        result.err().map(MachineEvent::EffectFailed)
    }

    /// Mirror the machine into the shared link info and announce state
    /// changes.
    fn publish(&mut self) {
        let state = self.machine.state();
        let identity = self.machine.identity().cloned();
        if (state, identity.as_ref()) == (self.published.0, self.published.1.as_ref()) {
            return;
        }

        {
            let mut link = self.link.write().unwrap_or_else(PoisonError::into_inner);
            link.state = state;
            link.identity = identity.clone();
        }
        if state != self.published.0 {
            debug!("Connection state: {} -> {}", self.published.0, state);
            let _ = self.events.send(AppEvent::ConnectionStatus(state));
        }
        self.published = (state, identity);
    }
}
