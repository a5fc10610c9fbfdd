use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use turret_mouse::infrastructure::bluetooth::protocol::{
    CCCD_UUID, DEVICE_NAME_UUID, GATT_SUCCESS, HID_SERVICE_UUID, PNP_ID_UUID, RAZER_REPORT_UUID,
    RAZER_SERVICE_UUID,
};
use turret_mouse::infrastructure::bluetooth::transport::{
    BondState, CharacteristicId, GattService, LinkHandle, LinkState,
};
use turret_mouse::{
    AppEvent, Buttons, ConnectionState, ErrorKind, GattTransport, MessageSeverity, MouseError,
    MouseService, MouseSnapshot, NativeDiscovery, NativeEvent, ServiceConfig, TransportError,
    TransportEvent, TransportEventSink,
};
use tokio::sync::mpsc;
use uuid::Uuid;

const ADDRESS: &str = "C8:2E:47:00:11:22";

#[derive(Debug, Clone, PartialEq)]
enum Call {
    Initialize,
    StartScan,
    StopScan,
    CreateBond(String),
    Connect(String),
    DiscoverServices(LinkHandle),
    Read(Uuid),
    SetNotification(CharacteristicId),
    WriteDescriptor(Uuid, Vec<u8>),
    Close(LinkHandle),
}

/// Records every outbound call; completions are injected by the test.
#[derive(Default)]
struct RecordingTransport {
    calls: Mutex<Vec<Call>>,
    adapter_off: AtomicBool,
    scan_refused: AtomicBool,
    next_handle: AtomicU64,
}

impl RecordingTransport {
    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }

    fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    fn count(&self, call: &Call) -> usize {
        self.calls().iter().filter(|c| *c == call).count()
    }
}

impl GattTransport for RecordingTransport {
    fn initialize(&self) -> Result<(), TransportError> {
        self.record(Call::Initialize);
        if self.adapter_off.load(Ordering::SeqCst) {
            return Err(TransportError::Unavailable("adapter off".into()));
        }
        Ok(())
    }

    fn start_scan(&self) -> Result<(), TransportError> {
        self.record(Call::StartScan);
        if self.scan_refused.load(Ordering::SeqCst) {
            return Err(TransportError::Other("scan refused".into()));
        }
        Ok(())
    }

    fn stop_scan(&self) -> Result<(), TransportError> {
        self.record(Call::StopScan);
        Ok(())
    }

    fn create_bond(&self, address: &str) -> Result<(), TransportError> {
        self.record(Call::CreateBond(address.to_string()));
        Ok(())
    }

    fn connect(&self, address: &str) -> Result<LinkHandle, TransportError> {
        self.record(Call::Connect(address.to_string()));
        Ok(LinkHandle(self.next_handle.fetch_add(1, Ordering::SeqCst) + 1))
    }

    fn discover_services(&self, handle: LinkHandle) -> Result<(), TransportError> {
        self.record(Call::DiscoverServices(handle));
        Ok(())
    }

    fn read_characteristic(
        &self,
        _handle: LinkHandle,
        characteristic: CharacteristicId,
    ) -> Result<(), TransportError> {
        self.record(Call::Read(characteristic.uuid));
        Ok(())
    }

    fn set_notification(
        &self,
        _handle: LinkHandle,
        characteristic: CharacteristicId,
        _enabled: bool,
    ) -> Result<(), TransportError> {
        self.record(Call::SetNotification(characteristic));
        Ok(())
    }

    fn write_descriptor(
        &self,
        _handle: LinkHandle,
        _characteristic: CharacteristicId,
        descriptor: Uuid,
        value: &[u8],
    ) -> Result<(), TransportError> {
        self.record(Call::WriteDescriptor(descriptor, value.to_vec()));
        Ok(())
    }

    fn close(&self, handle: LinkHandle) {
        self.record(Call::Close(handle));
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum NativeCall {
    Discover,
    StopDiscover,
    StopMouse,
}

#[derive(Default)]
struct RecordingNative {
    calls: Mutex<Vec<NativeCall>>,
}

impl RecordingNative {
    fn count(&self, call: NativeCall) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| **c == call).count()
    }
}

impl NativeDiscovery for RecordingNative {
    fn discover_mouse(&self) {
        self.calls.lock().unwrap().push(NativeCall::Discover);
    }

    fn stop_discover_mouse(&self) {
        self.calls.lock().unwrap().push(NativeCall::StopDiscover);
    }

    fn stop_mouse(&self) {
        self.calls.lock().unwrap().push(NativeCall::StopMouse);
    }
}

struct Harness {
    service: MouseService,
    events: mpsc::UnboundedReceiver<AppEvent>,
    sink: TransportEventSink,
    transport: Arc<RecordingTransport>,
    native: Arc<RecordingNative>,
}

fn spawn() -> Harness {
    let transport = Arc::new(RecordingTransport::default());
    let native = Arc::new(RecordingNative::default());
    let mut config = ServiceConfig::default();
    config.display_resolution = (1920, 1080);
    let (service, events) = MouseService::spawn(transport.clone(), native.clone(), config);
    let sink = service.event_sink();
    Harness {
        service,
        events,
        sink,
        transport,
        native,
    }
}

/// Let the background tasks drain their queues. Time is paused, so this
/// only advances the clock once every task is idle.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

fn report_char() -> CharacteristicId {
    CharacteristicId::new(RAZER_REPORT_UUID, 0)
}

async fn pair(h: &Harness) {
    h.service.start_scan_for_mouse().await.unwrap();
    let events = [
        TransportEvent::ScanResult {
            name: Some("Turret Mouse".into()),
            address: ADDRESS.into(),
            service_uuids: vec![HID_SERVICE_UUID],
        },
        TransportEvent::BondStateChanged {
            address: ADDRESS.into(),
            state: BondState::Bonded,
        },
        TransportEvent::ConnectionStateChange {
            status: GATT_SUCCESS,
            new_state: LinkState::Connected,
        },
        TransportEvent::ServicesDiscovered {
            status: GATT_SUCCESS,
            services: vec![
                GattService {
                    uuid: Uuid::from_u128(0x00001800_0000_1000_8000_00805f9b34fb),
                    characteristics: vec![CharacteristicId::new(DEVICE_NAME_UUID, 0)],
                },
                GattService {
                    uuid: Uuid::from_u128(0x0000180a_0000_1000_8000_00805f9b34fb),
                    characteristics: vec![CharacteristicId::new(PNP_ID_UUID, 0)],
                },
                GattService {
                    uuid: RAZER_SERVICE_UUID,
                    characteristics: vec![report_char()],
                },
            ],
        },
        TransportEvent::CharacteristicRead {
            characteristic: CharacteristicId::new(DEVICE_NAME_UUID, 0),
            value: b"Turret Mouse".to_vec(),
            status: GATT_SUCCESS,
        },
        TransportEvent::CharacteristicRead {
            characteristic: CharacteristicId::new(PNP_ID_UUID, 0),
            value: vec![0x02, 0x32, 0x15, 0x07, 0x1E, 0x00, 0x01],
            status: GATT_SUCCESS,
        },
        TransportEvent::DescriptorWrite {
            status: GATT_SUCCESS,
        },
    ];
    for event in events {
        h.sink.send(event).unwrap();
    }
    settle().await;
}

fn send_report(h: &Harness, bytes: [u8; 8]) {
    h.sink
        .send(TransportEvent::CharacteristicChanged {
            characteristic: report_char(),
            value: bytes.to_vec(),
        })
        .unwrap();
}

fn native_report() -> NativeEvent {
    NativeEvent::ReportReceived(vec![0x01, 0x00, 0x00, 0x05, 0x0A, 0x00, 0x00, 0x00])
}

fn drain(events: &mut mpsc::UnboundedReceiver<AppEvent>) -> Vec<AppEvent> {
    let mut out = Vec::new();
    while let Ok(event) = events.try_recv() {
        out.push(event);
    }
    out
}

#[tokio::test(start_paused = true)]
async fn test_pair_and_push_reports() {
    let mut h = spawn();
    pair(&h).await;

    assert!(h.service.is_connected());
    assert_eq!(h.service.device_name().as_deref(), Some("Turret Mouse"));
    assert_eq!(h.service.address().as_deref(), Some(ADDRESS));
    assert_eq!(h.service.vendor_id(), Some(0x1532));
    assert_eq!(h.service.product_id(), Some(0x1E07));

    let calls = h.transport.calls();
    assert!(calls.contains(&Call::CreateBond(ADDRESS.into())));
    assert!(calls.contains(&Call::Connect(ADDRESS.into())));
    assert!(calls.contains(&Call::SetNotification(report_char())));
    assert!(calls.contains(&Call::WriteDescriptor(CCCD_UUID, vec![0x01, 0x00])));

    let states: Vec<ConnectionState> = drain(&mut h.events)
        .into_iter()
        .filter_map(|e| match e {
            AppEvent::ConnectionStatus(state) => Some(state),
            _ => None,
        })
        .collect();
    assert_eq!(states.first(), Some(&ConnectionState::Scanning));
    assert_eq!(states.last(), Some(&ConnectionState::Connected));

    let seen = Arc::new(Mutex::new(Vec::<MouseSnapshot>::new()));
    let sink = seen.clone();
    h.service
        .register_receiver(move |s: MouseSnapshot| sink.lock().unwrap().push(s))
        .unwrap();

    send_report(&h, [0x01, 0x00, 0x00, 0x05, 0x0A, 0xF0, 0xFD, 0x00]);
    settle().await;

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].buttons, Buttons::LEFT);
    assert_eq!((seen[0].dx, seen[0].dy, seen[0].wheel), (10, -3, 5));
}

#[tokio::test(start_paused = true)]
async fn test_push_debounce_coalesces() {
    let h = spawn();
    pair(&h).await;

    let seen = Arc::new(Mutex::new(Vec::<MouseSnapshot>::new()));
    let sink = seen.clone();
    h.service
        .register_receiver(move |s: MouseSnapshot| sink.lock().unwrap().push(s))
        .unwrap();

    for _ in 0..5 {
        send_report(&h, [0x00, 0x00, 0x00, 0x00, 0x02, 0x00, 0x00, 0x00]);
    }
    settle().await;
    assert_eq!(seen.lock().unwrap().len(), 1);

    tokio::time::sleep(Duration::from_millis(20)).await;
    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 2);
    assert_eq!(seen.iter().map(|s| s.dx).sum::<i32>(), 10);
    assert_eq!(seen[1].x, 10.0);
}

#[tokio::test(start_paused = true)]
async fn test_poll_mode() {
    let h = spawn();
    assert_eq!(
        h.service.poll_mouse().unwrap_err().kind(),
        ErrorKind::InvalidModeForOperation
    );

    h.service.set_polling_mode(true);
    let err = h.service.register_receiver(|_: MouseSnapshot| {}).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidModeForOperation);

    pair(&h).await;
    send_report(&h, [0x00, 0x00, 0x00, 0x7F, 0x0A, 0x00, 0x00, 0x00]);
    send_report(&h, [0x00, 0x00, 0x00, 0x7F, 0x0A, 0x00, 0x00, 0x00]);
    settle().await;

    let snapshot = h.service.poll_mouse().unwrap();
    assert_eq!(snapshot.dx, 20);
    assert_eq!(snapshot.wheel, 127);
    assert_eq!(snapshot.x, 20.0);

    let snapshot = h.service.poll_mouse().unwrap();
    assert_eq!((snapshot.dx, snapshot.dy, snapshot.wheel), (0, 0, 0));
    assert_eq!(snapshot.x, 20.0);
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_drops_queued_reports() {
    let h = spawn();
    h.service.set_polling_mode(true);
    pair(&h).await;

    send_report(&h, [0x00, 0x00, 0x00, 0x00, 0x05, 0x00, 0x00, 0x00]);
    h.service.disconnect();
    settle().await;

    assert_eq!(h.service.poll_mouse().unwrap().dx, 0);
    assert_eq!(h.service.connection_state(), ConnectionState::Disconnected);
    assert!(h.service.device_name().is_none());
    assert_eq!(h.transport.count(&Call::Close(LinkHandle(1))), 1);

    // Idempotent and no rescan
    h.service.disconnect();
    settle().await;
    assert_eq!(h.transport.count(&Call::StartScan), 1);
}

#[tokio::test(start_paused = true)]
async fn test_link_loss_rescans() {
    let mut h = spawn();
    pair(&h).await;
    drain(&mut h.events);

    h.sink
        .send(TransportEvent::ConnectionStateChange {
            status: 133,
            new_state: LinkState::Disconnected,
        })
        .unwrap();
    h.sink
        .send(TransportEvent::ConnectionStateChange {
            status: 133,
            new_state: LinkState::Disconnected,
        })
        .unwrap();
    settle().await;

    assert_eq!(h.service.connection_state(), ConnectionState::Scanning);
    assert_eq!(h.transport.count(&Call::Initialize), 2);
    assert_eq!(h.transport.count(&Call::StartScan), 2);
    assert!(!drain(&mut h.events)
        .iter()
        .any(|e| matches!(e, AppEvent::Error(_))));
}

#[tokio::test(start_paused = true)]
async fn test_scan_period_ends_scan() {
    let h = spawn();
    h.service.start_scan_for_mouse().await.unwrap();
    assert_eq!(h.service.connection_state(), ConnectionState::Scanning);

    tokio::time::sleep(Duration::from_secs(181)).await;
    assert_eq!(h.service.connection_state(), ConnectionState::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn test_pairing_timeout_rescans() {
    let h = spawn();
    h.service.start_scan_for_mouse().await.unwrap();
    h.sink
        .send(TransportEvent::ScanResult {
            name: Some("Pearlyn Mouse".into()),
            address: ADDRESS.into(),
            service_uuids: vec![HID_SERVICE_UUID],
        })
        .unwrap();
    settle().await;
    assert_eq!(h.service.connection_state(), ConnectionState::Connecting);

    tokio::time::sleep(Duration::from_secs(11)).await;
    assert_eq!(h.service.connection_state(), ConnectionState::Scanning);
    assert_eq!(h.transport.count(&Call::StartScan), 2);
}

#[tokio::test(start_paused = true)]
async fn test_transport_unavailable() {
    let mut h = spawn();
    h.transport.adapter_off.store(true, Ordering::SeqCst);

    let err = h.service.start_scan_for_mouse().await.unwrap_err();
    assert!(matches!(err, MouseError::TransportUnavailable(_)));
    assert_eq!(h.service.connection_state(), ConnectionState::Error);
    assert!(drain(&mut h.events)
        .iter()
        .any(|e| matches!(e, AppEvent::Error(MouseError::TransportUnavailable(_)))));
}

#[tokio::test(start_paused = true)]
async fn test_scan_start_failure_is_reported() {
    let mut h = spawn();
    h.transport.scan_refused.store(true, Ordering::SeqCst);

    let err = h.service.start_scan_for_mouse().await.unwrap_err();
    assert_eq!(err, MouseError::TransportUnavailable("scan refused".into()));
    assert_eq!(h.service.connection_state(), ConnectionState::Error);
    assert!(drain(&mut h.events).iter().any(|e| matches!(
        e,
        AppEvent::Error(MouseError::TransportUnavailable(msg)) if msg == "scan refused"
    )));

    // No scan timer was left running
    tokio::time::sleep(Duration::from_secs(181)).await;
    assert_eq!(h.service.connection_state(), ConnectionState::Error);

    // The next cycle recovers once the transport scans again
    h.transport.scan_refused.store(false, Ordering::SeqCst);
    h.service.start_scan_for_mouse().await.unwrap();
    assert_eq!(h.service.connection_state(), ConnectionState::Scanning);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_stops_service() {
    let h = spawn();
    pair(&h).await;

    h.service.shutdown();
    settle().await;

    assert_eq!(h.transport.count(&Call::Close(LinkHandle(1))), 1);
    assert_eq!(
        h.service.start_scan_for_mouse().await.unwrap_err(),
        MouseError::ServiceStopped
    );
    assert_eq!(
        h.sink.send(TransportEvent::DescriptorWrite { status: 0 }),
        Err(MouseError::ServiceStopped)
    );
}

#[tokio::test(start_paused = true)]
async fn test_settings_round_trip() {
    let h = spawn();
    h.service.set_sensitivity_xy(2.0, 0.5);
    assert_eq!(h.service.sensitivity(), (2.0, 0.5));
    h.service.set_sensitivity(1.5);
    assert_eq!(h.service.sensitivity(), (1.5, 1.5));
    assert_eq!(h.service.display_resolution(), (1920, 1080));
    h.service.set_display_resolution(960, 540);
    assert_eq!(h.service.display_resolution(), (960, 540));
}

#[tokio::test(start_paused = true)]
async fn test_native_report_after_disconnect_dropped() {
    let h = spawn();
    h.service.set_polling_mode(true);

    // No native mouse was ever announced
    h.service.disconnect();
    h.sink.native(native_report()).unwrap();
    settle().await;
    let snapshot = h.service.poll_mouse().unwrap();
    assert_eq!((snapshot.dx, snapshot.wheel, snapshot.buttons), (0, 0, Buttons::NONE));

    // Announced, then explicitly disconnected
    h.service.start_scan_for_mouse().await.unwrap();
    h.sink.native(NativeEvent::MouseDiscovered).unwrap();
    h.sink.native(native_report()).unwrap();
    settle().await;
    assert_eq!(h.service.poll_mouse().unwrap().dx, 10);

    h.service.disconnect();
    h.sink.native(native_report()).unwrap();
    settle().await;
    let snapshot = h.service.poll_mouse().unwrap();
    assert_eq!((snapshot.dx, snapshot.wheel, snapshot.buttons), (0, 0, Buttons::NONE));
    assert!(h.native.count(NativeCall::StopMouse) >= 1);
}

#[tokio::test(start_paused = true)]
async fn test_native_discovery_path() {
    let mut h = spawn();
    h.service.set_polling_mode(true);
    h.service.start_scan_for_mouse().await.unwrap();
    assert_eq!(h.native.count(NativeCall::Discover), 1);
    assert_eq!(h.transport.count(&Call::StopScan), 0);
    drain(&mut h.events);

    // The native reader wins the race: the BLE scan stops
    h.sink.native(NativeEvent::MouseDiscovered).unwrap();
    settle().await;
    assert_eq!(h.transport.count(&Call::StopScan), 1);
    assert_eq!(h.service.connection_state(), ConnectionState::Disconnected);
    assert!(drain(&mut h.events).iter().any(|e| matches!(
        e,
        AppEvent::LogMessage(m) if m.severity == MessageSeverity::Success
    )));

    // A BLE candidate arriving late is ignored
    h.sink
        .send(TransportEvent::ScanResult {
            name: Some("Turret Mouse".into()),
            address: ADDRESS.into(),
            service_uuids: vec![HID_SERVICE_UUID],
        })
        .unwrap();

    h.sink
        .native(NativeEvent::ReportReceived(vec![
            0x01, 0x00, 0x00, 0x05, 0x0A, 0xF0, 0xFD, 0x00,
        ]))
        .unwrap();
    settle().await;
    assert_eq!(h.transport.count(&Call::CreateBond(ADDRESS.into())), 0);
    let snapshot = h.service.poll_mouse().unwrap();
    assert_eq!(snapshot.buttons, Buttons::LEFT);
    assert_eq!((snapshot.dx, snapshot.dy, snapshot.wheel), (10, -3, 5));

    // Losing the native mouse releases its buttons and restarts the cycle
    h.sink.native(NativeEvent::MouseDisconnected).unwrap();
    settle().await;
    assert_eq!(h.service.connection_state(), ConnectionState::Scanning);
    assert_eq!(h.transport.count(&Call::StartScan), 2);
    assert_eq!(h.native.count(NativeCall::Discover), 2);
    assert_eq!(h.service.poll_mouse().unwrap().buttons, Buttons::NONE);
}

#[tokio::test(start_paused = true)]
async fn test_legacy_device_reports() {
    let h = spawn();
    h.service.set_polling_mode(true);
    h.service.start_scan_for_mouse().await.unwrap();

    let click = CharacteristicId::new(RAZER_REPORT_UUID, 0);
    let xy = CharacteristicId::new(RAZER_REPORT_UUID, 1);
    let events = [
        TransportEvent::ScanResult {
            name: Some("Lenovo Mice N700".into()),
            address: ADDRESS.into(),
            service_uuids: vec![HID_SERVICE_UUID],
        },
        TransportEvent::BondStateChanged {
            address: ADDRESS.into(),
            state: BondState::Bonded,
        },
        TransportEvent::ConnectionStateChange {
            status: GATT_SUCCESS,
            new_state: LinkState::Connected,
        },
        TransportEvent::ServicesDiscovered {
            status: GATT_SUCCESS,
            services: vec![GattService {
                uuid: RAZER_SERVICE_UUID,
                characteristics: vec![click, xy],
            }],
        },
        TransportEvent::DescriptorWrite {
            status: GATT_SUCCESS,
        },
        TransportEvent::DescriptorWrite {
            status: GATT_SUCCESS,
        },
    ];
    for event in events {
        h.sink.send(event).unwrap();
    }
    settle().await;

    assert!(h.service.is_connected());
    assert_eq!(h.service.device_name().as_deref(), Some("Lenovo Mice N700"));
    assert_eq!(h.service.vendor_id(), Some(0));
    assert_eq!(h.transport.count(&Call::SetNotification(click)), 1);
    assert_eq!(h.transport.count(&Call::SetNotification(xy)), 1);

    // Click on instance 0, then dx = +10, dy = -3 on instance 1
    h.sink
        .send(TransportEvent::CharacteristicChanged {
            characteristic: click,
            value: vec![0x01],
        })
        .unwrap();
    h.sink
        .send(TransportEvent::CharacteristicChanged {
            characteristic: xy,
            value: vec![0x0A, 0xD0, 0xFF],
        })
        .unwrap();
    settle().await;

    let snapshot = h.service.poll_mouse().unwrap();
    assert_eq!(snapshot.buttons, Buttons::LEFT);
    assert_eq!((snapshot.dx, snapshot.dy, snapshot.wheel), (10, -3, 0));
    assert_eq!((snapshot.x, snapshot.y), (10.0, 0.0));
}

#[tokio::test(start_paused = true)]
async fn test_non_finite_sensitivity_ignored() {
    let h = spawn();
    h.service.set_polling_mode(true);
    pair(&h).await;

    h.service.set_sensitivity(f64::INFINITY);
    assert_eq!(h.service.sensitivity(), (1.0, 1.0));
    h.service.set_cursor_position(f64::NAN, 500.0);

    send_report(&h, [0x00; 8]);
    send_report(&h, [0x00, 0x00, 0x00, 0x00, 0x0A, 0xF0, 0xFD, 0x00]);
    settle().await;

    let snapshot = h.service.poll_mouse().unwrap();
    assert_eq!((snapshot.x, snapshot.y), (10.0, 497.0));
}
