//! End-to-end session lifecycle tests driven through a mock transport:
//! ordering, reconnect recovery, teardown races and the control surface.

use std::io::ErrorKind;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver, Sender};

use audiofork::{
    attribute, mute, sessions, start, stop, ChannelTap, CloseReason, ConnectError, Connector,
    ControlError, Direction, EndReason, ForkConfig, FrameSource, Link, ReconnectPolicy,
    SessionEvent, SessionId, SessionRegistry, SessionState, StartError, TlsOptions, WriteError,
    SAMPLE_RATE,
};

/// Everything written across all links opened by one mock connector, plus
/// the failure injection knobs.
#[derive(Default)]
struct Wire {
    writes: Mutex<Vec<Vec<u8>>>,
    /// Number of upcoming write calls that fail.
    fail_writes: Mutex<u32>,
}

impl Wire {
    fn written(&self) -> Vec<Vec<u8>> {
        self.writes.lock().unwrap().clone()
    }

    fn fail_next_writes(&self, count: u32) {
        *self.fail_writes.lock().unwrap() = count;
    }
}

struct MockLink {
    wire: Arc<Wire>,
}

impl Link for MockLink {
    fn write_binary(&mut self, payload: &[u8]) -> Result<(), WriteError> {
        {
            let mut fail = self.wire.fail_writes.lock().unwrap();
            if *fail > 0 {
                *fail -= 1;
                return Err(WriteError::Closed);
            }
        }
        self.wire.writes.lock().unwrap().push(payload.to_vec());
        Ok(())
    }

    fn close(&mut self, _reason: CloseReason) {}
}

struct MockConnector {
    wire: Arc<Wire>,
    opens: AtomicU32,
    /// Number of upcoming open calls that fail; `u32::MAX` fails forever.
    fail_opens: AtomicU32,
}

impl MockConnector {
    fn new(wire: Arc<Wire>) -> Self {
        Self {
            wire,
            opens: AtomicU32::new(0),
            fail_opens: AtomicU32::new(0),
        }
    }

    fn opens(&self) -> u32 {
        self.opens.load(Ordering::SeqCst)
    }

    fn fail_next_opens(&self, count: u32) {
        self.fail_opens.store(count, Ordering::SeqCst);
    }
}

impl Connector for MockConnector {
    fn open(
        &self,
        _endpoint: &str,
        _tls: Option<&TlsOptions>,
    ) -> Result<Box<dyn Link>, ConnectError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        let remaining = self.fail_opens.load(Ordering::SeqCst);
        if remaining > 0 {
            if remaining != u32::MAX {
                self.fail_opens.fetch_sub(1, Ordering::SeqCst);
            }
            return Err(ConnectError::Io(std::io::Error::new(
                ErrorKind::ConnectionRefused,
                "connection refused",
            )));
        }
        Ok(Box::new(MockLink {
            wire: Arc::clone(&self.wire),
        }))
    }
}

const ENDPOINT: &str = "ws://127.0.0.1:9/ingest";

fn fast_config() -> ForkConfig {
    let mut config = ForkConfig::new(ENDPOINT);
    config.reconnect = ReconnectPolicy {
        max_attempts: 3,
        delay: Duration::from_millis(50),
    };
    config
}

struct Fixture {
    registry: Arc<SessionRegistry>,
    tap: Arc<ChannelTap>,
    wire: Arc<Wire>,
    connector: Arc<MockConnector>,
    events_tx: Sender<SessionEvent>,
    events: Receiver<SessionEvent>,
}

fn fixture() -> Fixture {
    let wire = Arc::new(Wire::default());
    let connector = Arc::new(MockConnector::new(Arc::clone(&wire)));
    let (events_tx, events) = unbounded();
    Fixture {
        registry: Arc::new(SessionRegistry::new()),
        tap: Arc::new(ChannelTap::new(SAMPLE_RATE)),
        wire,
        connector,
        events_tx,
        events,
    }
}

fn try_start(fixture: &Fixture, config: ForkConfig) -> Result<SessionId, StartError> {
    start(
        &fixture.registry,
        Arc::clone(&fixture.tap) as Arc<dyn FrameSource>,
        Arc::clone(&fixture.connector) as Arc<dyn Connector>,
        config,
        Some(fixture.events_tx.clone()),
    )
}

fn start_session(config: ForkConfig) -> (Fixture, SessionId) {
    let fixture = fixture();
    let id = try_start(&fixture, config).expect("start should succeed");
    (fixture, id)
}

fn wait_until(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if check() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    check()
}

/// Collect events until the session reports `Terminated`; returns the full
/// event list with the terminal event last.
fn drain_until_terminated(events: &Receiver<SessionEvent>) -> Vec<SessionEvent> {
    let mut seen = Vec::new();
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        match events.recv_timeout(Duration::from_millis(100)) {
            Ok(event) => {
                let done = matches!(event, SessionEvent::Terminated { .. });
                seen.push(event);
                if done {
                    return seen;
                }
            }
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => continue,
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => break,
        }
    }
    panic!("no Terminated event arrived, saw {:?}", seen);
}

fn terminated_outcome(events: &Receiver<SessionEvent>) -> (u64, EndReason) {
    match drain_until_terminated(events).last() {
        Some(SessionEvent::Terminated {
            frames_sent,
            reason,
        }) => (*frames_sent, *reason),
        _ => unreachable!(),
    }
}

#[test]
fn ten_frames_then_stop_is_a_clean_session() {
    let (fixture, id) = start_session(fast_config());

    let info = sessions(&fixture.registry);
    assert_eq!(info.len(), 1);
    assert_eq!(info[0].state, SessionState::Running);
    assert_eq!(info[0].endpoint, ENDPOINT);

    for i in 0..10i16 {
        fixture.tap.push_samples(vec![i; 10], Direction::Both);
    }
    assert!(wait_until(Duration::from_secs(5), || {
        fixture.wire.written().len() == 10
    }));

    let handle = fixture.registry.lookup(&id).unwrap();
    stop(&fixture.registry, Some(&id)).unwrap();

    let (frames_sent, reason) = terminated_outcome(&fixture.events);
    assert_eq!(frames_sent, 10);
    assert_eq!(reason, EndReason::SourceEnded);
    assert!(wait_until(Duration::from_secs(2), || {
        handle.state() == SessionState::Terminated
    }));

    // 10 frames of 20 bytes each, in push order, and exactly one connect.
    let written = fixture.wire.written();
    assert_eq!(written.len(), 10);
    for (i, payload) in written.iter().enumerate() {
        assert_eq!(payload.len(), 20);
        assert_eq!(payload[0], i as u8);
    }
    assert_eq!(fixture.connector.opens(), 1);
    assert!(fixture.registry.is_empty());
}

#[test]
fn frames_are_forwarded_in_order_without_drops_or_duplicates() {
    let (fixture, _id) = start_session(fast_config());

    for i in 0..50i16 {
        fixture.tap.push_samples(vec![i, i, i, i], Direction::Both);
    }
    assert!(wait_until(Duration::from_secs(5), || {
        fixture.wire.written().len() == 50
    }));

    fixture.tap.end_of_stream();
    let (frames_sent, _) = terminated_outcome(&fixture.events);
    assert_eq!(frames_sent, 50);

    let sent: Vec<i16> = fixture
        .wire
        .written()
        .iter()
        .map(|p| i16::from_le_bytes([p[0], p[1]]))
        .collect();
    let expected: Vec<i16> = (0..50).collect();
    assert_eq!(sent, expected);
}

#[test]
fn a_failed_write_is_retried_exactly_once_after_reconnect() {
    let (fixture, _id) = start_session(fast_config());

    fixture.tap.push_samples(vec![1; 8], Direction::Both);
    assert!(wait_until(Duration::from_secs(2), || {
        fixture.wire.written().len() == 1
    }));

    fixture.wire.fail_next_writes(1);
    fixture.tap.push_samples(vec![2; 8], Direction::Both);
    assert!(wait_until(Duration::from_secs(2), || {
        fixture.wire.written().len() == 2
    }));

    fixture.tap.push_samples(vec![3; 8], Direction::Both);
    assert!(wait_until(Duration::from_secs(2), || {
        fixture.wire.written().len() == 3
    }));

    fixture.tap.end_of_stream();
    let events = drain_until_terminated(&fixture.events);

    // The failed frame shows up once, order intact, on the second link.
    let sent: Vec<i16> = fixture
        .wire
        .written()
        .iter()
        .map(|p| i16::from_le_bytes([p[0], p[1]]))
        .collect();
    assert_eq!(sent, vec![1, 2, 3]);
    assert_eq!(fixture.connector.opens(), 2);

    let reconnects = events
        .iter()
        .filter(|e| matches!(e, SessionEvent::Reconnected { .. }))
        .count();
    assert_eq!(reconnects, 1);
    assert!(matches!(
        events.last(),
        Some(SessionEvent::Terminated {
            frames_sent: 3,
            reason: EndReason::SourceEnded,
        })
    ));
}

#[test]
fn reconnect_exhaustion_ends_the_session_not_the_process() {
    let (fixture, id) = start_session(fast_config());

    fixture.wire.fail_next_writes(u32::MAX);
    fixture.connector.fail_next_opens(u32::MAX);
    fixture.tap.push_samples(vec![1; 8], Direction::Both);

    let (frames_sent, reason) = terminated_outcome(&fixture.events);
    assert_eq!(frames_sent, 0);
    assert_eq!(reason, EndReason::LinkFailed);

    // Initial open plus the whole retry budget.
    assert_eq!(fixture.connector.opens(), 1 + 3);
    assert!(fixture.registry.is_empty());
    assert_eq!(stop(&fixture.registry, Some(&id)), Err(ControlError::NotFound));
}

#[test]
fn a_failed_resend_after_reconnect_is_fatal() {
    let (fixture, _id) = start_session(fast_config());

    // Both the first write and the post-reconnect retry fail.
    fixture.wire.fail_next_writes(2);
    fixture.tap.push_samples(vec![1; 8], Direction::Both);

    let (frames_sent, reason) = terminated_outcome(&fixture.events);
    assert_eq!(frames_sent, 0);
    assert_eq!(reason, EndReason::LinkFailed);
    assert_eq!(fixture.connector.opens(), 2);
    assert!(fixture.registry.is_empty());
}

#[test]
fn unreachable_endpoint_fails_start_with_nothing_registered() {
    let fixture = fixture();
    fixture.connector.fail_next_opens(u32::MAX);

    let result = try_start(&fixture, fast_config());
    match result {
        Err(StartError::Connect(ConnectError::Exhausted { attempts })) => {
            assert_eq!(attempts, 3)
        }
        other => panic!("expected exhaustion, got {:?}", other.map(|_| ())),
    }

    assert_eq!(fixture.connector.opens(), 3);
    assert!(fixture.registry.is_empty());
    let (frames_sent, reason) = terminated_outcome(&fixture.events);
    assert_eq!(frames_sent, 0);
    assert_eq!(reason, EndReason::NeverConnected);
}

#[test]
fn stopping_twice_reports_not_found_the_second_time() {
    let (fixture, id) = start_session(fast_config());

    stop(&fixture.registry, Some(&id)).unwrap();
    assert_eq!(stop(&fixture.registry, Some(&id)), Err(ControlError::NotFound));

    let (_, reason) = terminated_outcome(&fixture.events);
    assert_eq!(reason, EndReason::SourceEnded);
    assert!(fixture.registry.is_empty());
}

#[test]
fn stop_without_an_id_takes_any_session() {
    let (fixture, _id) = start_session(fast_config());

    stop(&fixture.registry, None).unwrap();
    terminated_outcome(&fixture.events);
    assert_eq!(stop(&fixture.registry, None), Err(ControlError::NotFound));
}

#[test]
fn stop_racing_end_of_stream_tears_down_exactly_once() {
    for _ in 0..30 {
        let (fixture, id) = start_session(fast_config());
        fixture.tap.push_samples(vec![7; 8], Direction::Both);

        let registry = Arc::clone(&fixture.registry);
        let stopper = thread::spawn(move || {
            // Losing the race to the pump's own teardown is fine.
            let _ = stop(&registry, Some(&id));
        });
        let tap = Arc::clone(&fixture.tap);
        let ender = thread::spawn(move || tap.end_of_stream());

        stopper.join().unwrap();
        ender.join().unwrap();

        let mut terminated = drain_until_terminated(&fixture.events)
            .iter()
            .filter(|e| matches!(e, SessionEvent::Terminated { .. }))
            .count();

        // Nothing further may arrive once the session is gone.
        while let Ok(event) = fixture.events.recv_timeout(Duration::from_millis(100)) {
            if matches!(event, SessionEvent::Terminated { .. }) {
                terminated += 1;
            }
        }

        assert_eq!(terminated, 1);
        assert!(fixture.registry.is_empty());
    }
}

#[test]
fn post_command_runs_after_the_fork_finishes() {
    let dir = tempfile::tempdir().unwrap();
    let marker = dir.path().join("fork-done");

    let mut config = fast_config();
    config.post_command = Some(format!("touch {}", marker.display()));
    let (fixture, _id) = start_session(config);

    fixture.tap.push_samples(vec![1; 8], Direction::Both);
    fixture.tap.end_of_stream();
    terminated_outcome(&fixture.events);

    assert!(wait_until(Duration::from_secs(3), || marker.exists()));
}

#[test]
fn mute_zeroes_the_forwarded_payload() {
    let mut config = fast_config();
    config.direction = Direction::In;
    let (fixture, id) = start_session(config);

    mute(&fixture.registry, Some(&id), Direction::In, true).unwrap();
    fixture.tap.push_samples(vec![1234; 8], Direction::In);
    assert!(wait_until(Duration::from_secs(2), || {
        fixture.wire.written().len() == 1
    }));
    assert!(fixture.wire.written()[0].iter().all(|&b| b == 0));

    mute(&fixture.registry, Some(&id), Direction::In, false).unwrap();
    fixture.tap.push_samples(vec![1234; 8], Direction::In);
    assert!(wait_until(Duration::from_secs(2), || {
        fixture.wire.written().len() == 2
    }));
    assert!(fixture.wire.written()[1].iter().any(|&b| b != 0));

    stop(&fixture.registry, Some(&id)).unwrap();
    terminated_outcome(&fixture.events);

    // The binding is gone with the session.
    assert_eq!(
        mute(&fixture.registry, Some(&id), Direction::In, true),
        Err(ControlError::NotFound)
    );
}

#[test]
fn volume_adjustment_scales_the_forwarded_payload() {
    let mut config = fast_config();
    config.direction = Direction::In;
    config.volume.read = 1;
    let (fixture, id) = start_session(config);

    fixture.tap.push_samples(vec![100; 8], Direction::In);
    assert!(wait_until(Duration::from_secs(2), || {
        fixture.wire.written().len() == 1
    }));
    let payload = fixture.wire.written()[0].clone();
    assert_eq!(i16::from_le_bytes([payload[0], payload[1]]), 200);

    stop(&fixture.registry, Some(&id)).unwrap();
    terminated_outcome(&fixture.events);
}

#[test]
fn attribute_exposes_only_the_endpoint() {
    let (fixture, id) = start_session(fast_config());

    assert_eq!(
        attribute(&fixture.registry, &id, "endpoint").unwrap(),
        ENDPOINT
    );
    assert_eq!(
        attribute(&fixture.registry, &id, "filename"),
        Err(ControlError::UnknownAttribute("filename".into()))
    );

    stop(&fixture.registry, Some(&id)).unwrap();
    terminated_outcome(&fixture.events);
    assert_eq!(
        attribute(&fixture.registry, &id, "endpoint"),
        Err(ControlError::NotFound)
    );
}

#[test]
fn invalid_config_is_rejected_before_any_connection() {
    let fixture = fixture();

    let result = try_start(&fixture, ForkConfig::new("http://example.com/x"));
    assert!(matches!(result, Err(StartError::Config(_))));
    assert_eq!(fixture.connector.opens(), 0);
    assert!(fixture.registry.is_empty());
}
