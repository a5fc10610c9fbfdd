//! Mouse Service
//!
//! Public handle for the application. Spawns the driver and report tasks
//! on the current tokio runtime and exposes the consumer API.

use crate::domain::models::{
    AppEvent, ConnectionState, DeliveryMode, DeviceIdentity, MouseSnapshot,
};
use crate::domain::motion::MotionAccumulator;
use crate::domain::profile::ProfileRegistry;
use crate::domain::settings::Settings;
use crate::error::{MouseError, Result};
use crate::infrastructure::bluetooth::delivery::{run_report_task, MouseReceiver, SharedMotion};
use crate::infrastructure::bluetooth::discovery::{Command, DiscoveryCoordinator};
use crate::infrastructure::bluetooth::transport::{
    GattTransport, NativeDiscovery, NativeEvent, TransportEvent,
};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

/// Runtime configuration, derived from [`Settings`].
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub scan_period: Duration,
    pub pairing_timeout: Duration,
    pub debounce_window: Duration,
    pub max_reconnect_attempts: u32,
    pub delivery_mode: DeliveryMode,
    pub sensitivity: (f64, f64),
    pub display_resolution: (u32, u32),
    pub profiles: ProfileRegistry,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self::from(&Settings::default())
    }
}

impl From<&Settings> for ServiceConfig {
    fn from(s: &Settings) -> Self {
        Self {
            scan_period: s.scan_period(),
            pairing_timeout: s.pairing_timeout(),
            debounce_window: s.debounce_window(),
            max_reconnect_attempts: s.max_reconnect_attempts,
            delivery_mode: s.delivery_mode,
            sensitivity: (s.sensitivity_x, s.sensitivity_y),
            display_resolution: (s.display_width, s.display_height),
            profiles: ProfileRegistry::new(s.profiles.clone()),
        }
    }
}

/// Link state as last published by the driver task.
#[derive(Debug, Clone, Default)]
pub struct LinkInfo {
    pub state: ConnectionState,
    pub identity: Option<DeviceIdentity>,
}

/// Handle given to the platform glue for feeding callbacks in.
#[derive(Debug, Clone)]
pub struct TransportEventSink {
    commands: mpsc::UnboundedSender<Command>,
}

impl TransportEventSink {
    /// Forward a GATT transport callback to the driver.
    pub fn send(&self, event: TransportEvent) -> Result<()> {
        self.commands
            .send(Command::Transport(event))
            .map_err(|_| MouseError::ServiceStopped)
    }

    /// Forward a native HID notification to the driver.
    pub fn native(&self, event: NativeEvent) -> Result<()> {
        self.commands
            .send(Command::Native(event))
            .map_err(|_| MouseError::ServiceStopped)
    }
}

/// BLE mouse service.
///
/// One instance manages one peripheral slot. Dropping every handle (this
/// and all [`TransportEventSink`]s) or calling [`shutdown`](Self::shutdown)
/// stops the background tasks.
pub struct MouseService {
    commands: mpsc::UnboundedSender<Command>,
    shared: Arc<SharedMotion>,
    link: Arc<RwLock<LinkInfo>>,
}

impl MouseService {
    /// Spawn the service on the current tokio runtime.
    ///
    /// Returns the handle and the receiving end of the status event channel.
    pub fn spawn(
        transport: Arc<dyn GattTransport>,
        native: Arc<dyn NativeDiscovery>,
        config: ServiceConfig,
    ) -> (Self, mpsc::UnboundedReceiver<AppEvent>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (report_tx, report_rx) = mpsc::unbounded_channel();

        let mut motion = MotionAccumulator::new();
        let (width, height) = config.display_resolution;
        motion.set_display_resolution(width, height);
        let (sx, sy) = config.sensitivity;
        motion.set_sensitivity(sx, sy);

        let shared = Arc::new(SharedMotion::new(motion, config.delivery_mode));
        let link = Arc::new(RwLock::new(LinkInfo::default()));

        tokio::spawn(run_report_task(
            shared.clone(),
            report_rx,
            config.debounce_window,
        ));

        let coordinator = DiscoveryCoordinator::new(
            transport,
            native,
            shared.clone(),
            link.clone(),
            config,
            report_tx,
            event_tx,
            command_tx.downgrade(),
        );
        tokio::spawn(coordinator.run(command_rx));

        info!("Mouse service spawned");
        (
            Self {
                commands: command_tx,
                shared,
                link,
            },
            event_rx,
        )
    }

    // --- Delivery ---

    /// Switch between poll and push delivery.
    pub fn set_polling_mode(&self, enabled: bool) {
        let mode = if enabled {
            DeliveryMode::Poll
        } else {
            DeliveryMode::Push
        };
        debug!("Delivery mode set to {}", mode.as_str());
        self.shared.set_mode(mode);
    }

    /// Get the current delivery mode
    pub fn delivery_mode(&self) -> DeliveryMode {
        self.shared.mode()
    }

    /// Register the push receiver, replacing any previous one.
    pub fn register_receiver(&self, receiver: impl MouseReceiver + 'static) -> Result<()> {
        let mode = self.shared.mode();
        if mode == DeliveryMode::Poll {
            return Err(MouseError::InvalidModeForOperation {
                operation: "register_receiver",
                mode: mode.as_str(),
            });
        }
        self.shared.set_receiver(Arc::new(receiver));
        Ok(())
    }

    /// Current snapshot; resets the accumulated deltas. Poll mode only.
    pub fn poll_mouse(&self) -> Result<MouseSnapshot> {
        let mode = self.shared.mode();
        if mode == DeliveryMode::Push {
            return Err(MouseError::InvalidModeForOperation {
                operation: "poll_mouse",
                mode: mode.as_str(),
            });
        }
        Ok(self.shared.motion().take_snapshot())
    }

    // --- Motion settings ---

    /// Set the cursor bounds, rescaling the current position
    pub fn set_display_resolution(&self, width: u32, height: u32) {
        self.shared.motion().set_display_resolution(width, height);
    }

    /// Get the cursor bounds
    pub fn display_resolution(&self) -> (u32, u32) {
        self.shared.motion().display_resolution()
    }

    /// Move the cursor, clamped to the display. NaN coordinates are ignored.
    pub fn set_cursor_position(&self, x: f64, y: f64) {
        self.shared.motion().set_cursor_position(x, y);
    }

    /// Same sensitivity on both axes.
    pub fn set_sensitivity(&self, sensitivity: f64) {
        self.set_sensitivity_xy(sensitivity, sensitivity);
    }

    /// Per-axis cursor sensitivity. Non-finite factors are ignored.
    pub fn set_sensitivity_xy(&self, x: f64, y: f64) {
        self.shared.motion().set_sensitivity(x, y);
    }

    /// Get the per-axis cursor sensitivity
    pub fn sensitivity(&self) -> (f64, f64) {
        self.shared.motion().sensitivity()
    }

    // --- Link status ---

    fn link_info(&self) -> LinkInfo {
        self.link
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Get the current connection state
    pub fn connection_state(&self) -> ConnectionState {
        self.link_info().state
    }

    /// Check if a mouse is connected and subscribed
    pub fn is_connected(&self) -> bool {
        self.connection_state() == ConnectionState::Connected
    }

    /// Identity of the subscribing or connected device
    pub fn device_identity(&self) -> Option<DeviceIdentity> {
        self.link_info().identity
    }

    /// Get the connected device name
    pub fn device_name(&self) -> Option<String> {
        self.device_identity().map(|i| i.name)
    }

    /// Get the connected device address
    pub fn address(&self) -> Option<String> {
        self.device_identity().map(|i| i.address)
    }

    /// PnP vendor id of the connected device, 0 if it has none
    pub fn vendor_id(&self) -> Option<u16> {
        self.device_identity().map(|i| i.vendor_id)
    }

    /// PnP product id of the connected device, 0 if it has none
    pub fn product_id(&self) -> Option<u16> {
        self.device_identity().map(|i| i.product_id)
    }

    // --- Control ---

    /// Run a full scan cycle: drop any current link, re-initialize the
    /// transport and scan. Completes once scanning has started, or with
    /// the transport error if the scan could not be started.
    pub async fn start_scan_for_mouse(&self) -> Result<()> {
        let (reply, done) = oneshot::channel();
        self.commands
            .send(Command::StartScan {
                fresh: true,
                reply: Some(reply),
            })
            .map_err(|_| MouseError::ServiceStopped)?;
        done.await.map_err(|_| MouseError::ServiceStopped)?
    }

    /// Stop scanning on both the BLE and native paths
    pub fn stop_scan_for_mouse(&self) -> Result<()> {
        self.commands
            .send(Command::StopScan)
            .map_err(|_| MouseError::ServiceStopped)
    }

    /// Expected disconnect. Idempotent; does not rescan.
    pub fn disconnect(&self) {
        // Reports already queued must not reach the consumer.
        self.shared.invalidate();
        if self.commands.send(Command::Disconnect).is_err() {
            debug!("Disconnect after shutdown");
        }
    }

    /// Handle for feeding platform callbacks into the service
    pub fn event_sink(&self) -> TransportEventSink {
        TransportEventSink {
            commands: self.commands.clone(),
        }
    }

    /// Stop the background tasks, closing any open link.
    pub fn shutdown(&self) {
        info!("Shutting down mouse service");
        let _ = self.commands.send(Command::Shutdown);
    }
}
