//! Report Delivery
//!
//! Decodes forwarded reports into the shared [`MotionAccumulator`] and, in
//! push mode, hands snapshots to the registered [`MouseReceiver`] with a
//! debounce window so bursts of reports coalesce into one callback per
//! window.

use crate::domain::models::{DeliveryMode, MouseReport, MouseSnapshot};
use crate::domain::motion::MotionAccumulator;
use crate::domain::profile::ReportLayout;
use crate::domain::report;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, trace};

/// Consumer callback for push delivery.
pub trait MouseReceiver: Send + Sync {
    fn on_mouse_action(&self, snapshot: MouseSnapshot);
}

impl<F> MouseReceiver for F
where
    F: Fn(MouseSnapshot) + Send + Sync,
{
    fn on_mouse_action(&self, snapshot: MouseSnapshot) {
        self(snapshot)
    }
}

/// A forwarded report tagged with the link generation it arrived on.
#[derive(Debug, Clone)]
pub struct StampedReport {
    pub generation: u64,
    pub layout: ReportLayout,
    pub report: MouseReport,
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// State shared between the API surface, the driver and the report task.
pub struct SharedMotion {
    motion: Mutex<MotionAccumulator>,
    generation: AtomicU64,
    mode: Mutex<DeliveryMode>,
    receiver: Mutex<Option<Arc<dyn MouseReceiver>>>,
}

impl SharedMotion {
    pub fn new(motion: MotionAccumulator, mode: DeliveryMode) -> Self {
        Self {
            motion: Mutex::new(motion),
            generation: AtomicU64::new(0),
            mode: Mutex::new(mode),
            receiver: Mutex::new(None),
        }
    }

    pub fn motion(&self) -> MutexGuard<'_, MotionAccumulator> {
        lock(&self.motion)
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Start a new generation. Reports stamped earlier are dropped and
    /// unreported motion is discarded.
    pub fn invalidate(&self) -> u64 {
        let mut motion = lock(&self.motion);
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        motion.reset();
        generation
    }

    pub fn mode(&self) -> DeliveryMode {
        *lock(&self.mode)
    }

    pub fn set_mode(&self, mode: DeliveryMode) {
        *lock(&self.mode) = mode;
    }

    pub fn receiver(&self) -> Option<Arc<dyn MouseReceiver>> {
        lock(&self.receiver).clone()
    }

    pub fn set_receiver(&self, receiver: Arc<dyn MouseReceiver>) {
        *lock(&self.receiver) = Some(receiver);
    }

    /// Decode and accumulate one report. Returns whether it was applied.
    pub fn process(&self, stamped: StampedReport) -> bool {
        let mut motion = lock(&self.motion);
        // Checked under the motion lock so `invalidate` cannot interleave.
        if stamped.generation != self.generation() {
            trace!("Dropping report from stale link generation");
            return false;
        }
        match report::decode(Some(stamped.layout), &stamped.report) {
            Ok(delta) => {
                motion.apply(delta);
                true
            }
            Err(e) => {
                debug!("Dropping report: {}", e);
                false
            }
        }
    }
}

/// Push-mode debounce.
///
/// The first report after a quiet period is delivered immediately and
/// opens a window; reports inside the window are coalesced and flushed as
/// one snapshot when it closes.
#[derive(Debug)]
pub struct DeliveryGate {
    window: Duration,
    deadline: Option<Instant>,
    pending: bool,
}

impl DeliveryGate {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            deadline: None,
            pending: false,
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Called after a report has been applied.
    pub fn on_report(&mut self, shared: &SharedMotion, now: Instant) {
        let Some(receiver) = push_receiver(shared) else {
            return;
        };
        match self.deadline {
            Some(deadline) if now < deadline => self.pending = true,
            _ => self.deliver(shared, receiver.as_ref(), now),
        }
    }

    /// Called when the window deadline passes.
    pub fn on_deadline(&mut self, shared: &SharedMotion, now: Instant) {
        self.deadline = None;
        if !std::mem::take(&mut self.pending) {
            return;
        }
        if let Some(receiver) = push_receiver(shared) {
            self.deliver(shared, receiver.as_ref(), now);
        }
    }

    fn deliver(&mut self, shared: &SharedMotion, receiver: &dyn MouseReceiver, now: Instant) {
        let snapshot = shared.motion().take_snapshot();
        self.pending = false;
        self.deadline = Some(now + self.window);
        receiver.on_mouse_action(snapshot);
    }
}

fn push_receiver(shared: &SharedMotion) -> Option<Arc<dyn MouseReceiver>> {
    match shared.mode() {
        DeliveryMode::Push => shared.receiver(),
        DeliveryMode::Poll => None,
    }
}

/// Sleep until `deadline`, or forever when there is none.
pub(crate) async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Report-processing task: decode in arrival order, then gate delivery.
///
/// Exits when every report sender has been dropped.
pub(crate) async fn run_report_task(
    shared: Arc<SharedMotion>,
    mut reports: mpsc::UnboundedReceiver<StampedReport>,
    window: Duration,
) {
    let mut gate = DeliveryGate::new(window);
    loop {
        let deadline = gate.deadline();
        tokio::select! {
            report = reports.recv() => match report {
                Some(report) => {
                    if shared.process(report) {
                        gate.on_report(&shared, Instant::now());
                    }
                }
                None => break,
            },
            _ = sleep_until_deadline(deadline) => {
                gate.on_deadline(&shared, Instant::now());
            }
        }
    }
    debug!("Report task stopped");
}
