//! Session behavior over the full stack: a mock transport feeds the
//! connection manager, which feeds the session manager.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use edmo_host::link::TransportEvent;
use edmo_host::session::plugin::{
    Objective, ObjectiveGroup, PluginCapabilities, PluginCtx, PluginFactory, SessionPlugin,
};
use edmo_host::{ConnectionManager, ControllerEvent, ControllerHandle, SessionManager};
use edmo_test_utils::{identification_frame, MockChannel};
use edmo_types::{AdmissionError, DEFAULT_OFFSET};
use tokio::sync::mpsc;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

const SNAKE_HUES: [u16; 4] = [0, 120, 240, 360];

struct Harness {
    transports: mpsc::UnboundedSender<TransportEvent>,
    #[allow(dead_code)]
    connections: ConnectionManager,
    sessions: Arc<SessionManager>,
    #[allow(dead_code)]
    root: CancellationToken,
}

fn harness(factory: Option<Arc<dyn PluginFactory>>) -> Harness {
    let root = CancellationToken::new();
    let (transports, transport_rx) = mpsc::unbounded_channel();
    let connections = ConnectionManager::from_transport_stream(transport_rx, &root);
    let sessions = SessionManager::spawn(
        connections.subscribe(),
        factory,
        Duration::from_millis(50),
        &root,
    );
    Harness {
        transports,
        connections,
        sessions,
        root,
    }
}

impl Harness {
    /// Plug a mock channel in and identify it; waits until the identifier
    /// shows up as an available session.
    async fn attach_device(&self, mock: &MockChannel, identifier: &str, locked: bool) {
        self.transports
            .send(TransportEvent::ChannelEstablished(mock.channel()))
            .expect("connection manager alive");
        mock.feed(&identification_frame(identifier, &SNAKE_HUES, locked));
        if !locked {
            self.wait_available(identifier).await;
        } else {
            // Candidate registration still has to settle.
            sleep(Duration::from_secs(2)).await;
        }
    }

    async fn wait_available(&self, identifier: &str) {
        let mut available = self.sessions.watch_available();
        loop {
            if available
                .borrow_and_update()
                .iter()
                .any(|id| id == identifier)
            {
                return;
            }
            available.changed().await.expect("session manager alive");
        }
    }

    fn join(&self, identifier: &str, user: &str) -> Result<ControllerHandle, AdmissionError> {
        self.sessions.attempt_connection_to(identifier, user)
    }
}

fn drain(handle: &mut ControllerHandle) -> Vec<ControllerEvent> {
    let mut events = Vec::new();
    while let Some(event) = handle.try_next_event() {
        events.push(event);
    }
    events
}

#[tokio::test(start_paused = true)]
async fn admission_hands_out_slots_lowest_first() {
    let harness = harness(None);
    let mock = MockChannel::connected("mock:snake1");
    harness.attach_device(&mock, "Snake1", false).await;

    let a = harness.join("Snake1", "ada").unwrap();
    let b = harness.join("Snake1", "grace").unwrap();
    let c = harness.join("Snake1", "edsger").unwrap();
    let d = harness.join("Snake1", "barbara").unwrap();
    assert_eq!(
        [a.slot(), b.slot(), c.slot(), d.slot()],
        [0, 1, 2, 3]
    );

    // The device has four oscillators; a fifth controller must wait.
    assert!(matches!(
        harness.join("Snake1", "alan"),
        Err(AdmissionError::SessionFull)
    ));

    // Releasing slot 1 re-issues exactly slot 1.
    drop(b);
    let b2 = harness.join("Snake1", "niklaus").unwrap();
    assert_eq!(b2.slot(), 1);
}

#[tokio::test(start_paused = true)]
async fn joining_an_unknown_identifier_fails() {
    let harness = harness(None);
    assert!(matches!(
        harness.join("Nobody", "ada"),
        Err(AdmissionError::NoSuchSession(_))
    ));
}

#[tokio::test(start_paused = true)]
async fn frequency_is_global_and_broadcast_once() {
    let harness = harness(None);
    let mock = MockChannel::connected("mock:snake1");
    harness.attach_device(&mock, "Snake1", false).await;

    let first = harness.join("Snake1", "ada").unwrap();
    let mut second = harness.join("Snake1", "grace").unwrap();
    drain(&mut second);

    first.set_frequency(1.5);

    let events = drain(&mut second);
    assert_eq!(
        events,
        vec![ControllerEvent::ParamsUpdatedExternally],
        "exactly one external update expected"
    );

    // Every oscillator follows, including ones nobody controls.
    let params = first.session().oscillator_params();
    assert_eq!(params.len(), 4);
    assert!(params.iter().all(|p| p.frequency == 1.5));

    // Setting the same value again is a no-op.
    first.set_frequency(1.5);
    assert!(drain(&mut second).is_empty());
}

#[tokio::test(start_paused = true)]
async fn per_slot_parameters_stay_private_to_their_owner() {
    let harness = harness(None);
    let mock = MockChannel::connected("mock:snake1");
    harness.attach_device(&mock, "Snake1", false).await;

    let first = harness.join("Snake1", "ada").unwrap();
    let mut second = harness.join("Snake1", "grace").unwrap();
    drain(&mut second);

    first.set_amplitude(25.0);
    first.set_offset(100.0);
    assert!(drain(&mut second).is_empty(), "amplitude and offset are slot-private");

    // Phase shift changes a relation other controllers can observe.
    first.set_phase_shift(45.0);
    assert_eq!(drain(&mut second), vec![ControllerEvent::ExternalRelationChanged]);

    let params = first.params();
    assert_eq!(params.amplitude, 25.0);
    assert_eq!(params.offset, 100.0);
    assert_eq!(params.phase_shift, 45.0);
    // The neighbor's slot is untouched.
    assert_eq!(second.params().amplitude, 0.0);
    assert_eq!(second.params().offset, DEFAULT_OFFSET);
}

/// Records plugin callbacks for assertions.
#[derive(Default)]
struct RecorderState {
    log: Vec<String>,
}

struct RecorderPlugin {
    state: Arc<Mutex<RecorderState>>,
}

impl SessionPlugin for RecorderPlugin {
    fn name(&self) -> &str {
        "recorder"
    }

    fn capabilities(&self) -> PluginCapabilities {
        PluginCapabilities::SESSION_STARTED
            | PluginCapabilities::SESSION_ENDED
            | PluginCapabilities::USER_JOINED
            | PluginCapabilities::USER_LEFT
            | PluginCapabilities::FREQUENCY_CHANGED_BY_USER
            | PluginCapabilities::AMPLITUDE_CHANGED_BY_USER
    }

    fn session_started(&mut self, ctx: &mut PluginCtx<'_>) {
        self.log(format!("started:{}", ctx.identifier()));
    }

    fn session_ended(&mut self, _ctx: &mut PluginCtx<'_>) {
        self.log("ended".to_owned());
    }

    fn user_joined(&mut self, ctx: &mut PluginCtx<'_>, slot: usize, name: &str) {
        self.log(format!("joined:{slot}:{name}"));
        ctx.send_feedback(Some(slot), &format!("welcome {name}"));
        if slot == 0 {
            let mut group = ObjectiveGroup::new("warm-up");
            group.objectives.push(Objective::new("set a frequency"));
            ctx.publish_objective_group(group);
        }
    }

    fn user_left(&mut self, _ctx: &mut PluginCtx<'_>, slot: usize, name: &str) {
        self.log(format!("left:{slot}:{name}"));
    }

    fn frequency_changed_by_user(&mut self, _ctx: &mut PluginCtx<'_>, slot: usize, value: f32) {
        self.log(format!("frequency:{slot}:{value}"));
    }

    fn amplitude_changed_by_user(&mut self, _ctx: &mut PluginCtx<'_>, slot: usize, value: f32) {
        self.log(format!("amplitude:{slot}:{value}"));
    }
}

impl RecorderPlugin {
    fn log(&self, line: String) {
        self.state.lock().unwrap().log.push(line);
    }
}

struct RecorderFactory {
    state: Arc<Mutex<RecorderState>>,
}

impl PluginFactory for RecorderFactory {
    fn build(&self, _identifier: &str) -> Vec<Box<dyn SessionPlugin>> {
        vec![Box::new(RecorderPlugin {
            state: self.state.clone(),
        })]
    }
}

#[tokio::test(start_paused = true)]
async fn plugins_observe_the_session_lifecycle() {
    let state = Arc::new(Mutex::new(RecorderState::default()));
    let harness = harness(Some(Arc::new(RecorderFactory {
        state: state.clone(),
    })));
    let mock = MockChannel::connected("mock:snake1");
    harness.attach_device(&mock, "Snake1", false).await;

    let mut first = harness.join("Snake1", "ada").unwrap();
    let second = harness.join("Snake1", "grace").unwrap();

    // The plugin greeted the first controller and published its objectives.
    let events = drain(&mut first);
    assert!(events.contains(&ControllerEvent::Feedback("welcome ada".to_owned())));
    assert!(events.contains(&ControllerEvent::ObjectivesUpdated));
    let groups = first.session().objective_groups();
    assert_eq!(groups.len(), 1);
    assert_eq!(groups[0].title, "warm-up");

    first.set_frequency(1.5);
    first.set_frequency(1.5); // unchanged, must not re-fire
    second.set_amplitude(30.0);

    drop(second);
    drop(first); // last controller out closes the session

    let log = state.lock().unwrap().log.clone();
    assert_eq!(
        log,
        vec![
            "started:Snake1",
            "joined:0:ada",
            "joined:1:grace",
            "frequency:0:1.5",
            "amplitude:1:30",
            "left:1:grace",
            "left:0:ada",
            "ended",
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn teardown_parks_the_hardware_and_ends_the_session() {
    let harness = harness(None);
    let mut mock = MockChannel::connected("mock:snake1");
    harness.attach_device(&mock, "Snake1", false).await;

    let controller = harness.join("Snake1", "ada").unwrap();
    let session = controller.session().clone();
    mock.drain_write_payloads();

    drop(controller);
    assert!(session.is_closed());

    let payloads = mock.drain_write_payloads();
    let end_at = payloads
        .iter()
        .position(|p| p.as_slice() == [6u8])
        .expect("session end written");
    // The four teardown parameter writes immediately precede the end marker.
    assert!(end_at >= 4);
    for (slot, payload) in payloads[end_at - 4..end_at].iter().enumerate() {
        assert_eq!(payload[0], 3, "update-oscillator tag");
        assert_eq!(payload[1] as usize, slot);
        let offset = f32::from_le_bytes(payload[10..14].try_into().unwrap());
        let frequency = f32::from_le_bytes(payload[2..6].try_into().unwrap());
        assert_eq!(offset, DEFAULT_OFFSET);
        assert_eq!(frequency, 0.0);
    }
    // Nothing is written after the end marker.
    assert_eq!(end_at, payloads.len() - 1);

    // A closed session never re-opens.
    assert!(matches!(
        session.create_context("late"),
        Err(AdmissionError::SessionClosed)
    ));
}

#[tokio::test(start_paused = true)]
async fn soft_locked_devices_are_not_available() {
    let harness = harness(None);
    let mock = MockChannel::connected("mock:snake1");
    harness.attach_device(&mock, "Snake1", true).await;

    assert!(harness.sessions.available_sessions().is_empty());
    assert!(matches!(
        harness.join("Snake1", "ada"),
        Err(AdmissionError::LockedByOtherHost(_))
    ));

    // The other host releases the lock; the next identification clears it.
    mock.feed(&identification_frame("Snake1", &SNAKE_HUES, false));
    harness.wait_available("Snake1").await;
    let controller = harness.join("Snake1", "ada").unwrap();
    assert_eq!(controller.slot(), 0);
}

#[tokio::test(start_paused = true)]
async fn session_survives_device_loss_and_rebind() {
    let harness = harness(None);
    let mock = MockChannel::connected("mock:snake1");
    harness.attach_device(&mock, "Snake1", false).await;

    let controller = harness.join("Snake1", "ada").unwrap();
    controller.set_amplitude(42.0);
    let session = controller.session().clone();

    // The transport dies; the session keeps its users and parameters.
    harness
        .transports
        .send(TransportEvent::ChannelLost(mock.channel()))
        .unwrap();
    let mut available = harness.sessions.watch_available();
    loop {
        if !session.has_device() {
            break;
        }
        let _ = tokio::time::timeout(Duration::from_secs(1), available.changed()).await;
    }
    assert!(!session.is_closed());
    assert_eq!(session.oscillator_params()[0].amplitude, 42.0);

    // The device comes back over a fresh channel; the session rebinds and
    // re-asserts its parameters.
    let mut mock2 = MockChannel::connected("mock:snake1-return");
    harness
        .transports
        .send(TransportEvent::ChannelEstablished(mock2.channel()))
        .unwrap();
    mock2.feed(&identification_frame("Snake1", &SNAKE_HUES, false));
    loop {
        if session.has_device() {
            break;
        }
        sleep(Duration::from_millis(100)).await;
    }

    sleep(Duration::from_millis(10)).await;
    let payloads = mock2.drain_write_payloads();
    let reassert = payloads
        .iter()
        .find(|p| p[0] == 3 && p[1] == 0)
        .expect("parameters re-asserted");
    let amplitude = f32::from_le_bytes(reassert[6..10].try_into().unwrap());
    assert_eq!(amplitude, 42.0);
    assert!(
        payloads.iter().any(|p| p[0] == 1),
        "session start written on rebind"
    );

    drop(mock);
}
