//! The session core: one shared device, many controllers.
//!
//! A session owns the authoritative oscillator parameters for one device
//! and arbitrates who may change what. Admission hands out the lowest free
//! slot; amplitude, offset and phase shift belong to a slot's owner,
//! frequency is global. A reconciliation task re-asserts the parameter
//! snapshot to the hardware every tick, which debounces bursty edits and
//! tolerates packet loss on its own.
//!
//! All session state mutates under one mutex. Plugin callbacks run with the
//! mutex held through a [`PluginCtx`] that operates on the locked state
//! directly, so plugins can never deadlock by calling back in; cross-plugin
//! notifications are queued and delivered after the originating callback
//! returns.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use edmo_types::{AdmissionError, OscillatorParams};
use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::context::{ControllerEvent, ControllerHandle};
use super::plugin::{ObjectiveGroup, PluginCapabilities, SessionPlugin};
use crate::device::connection::DeviceEvent;
use crate::device::fused::FusedDevice;
use crate::protocol::packets::Command;

/// Default cadence of the reconciliation loop.
pub const RECONCILE_INTERVAL: Duration = Duration::from_millis(50);

/// Bound on chained plugin-to-plugin notification rounds.
const MAX_EFFECT_ROUNDS: usize = 8;

/// Notices a session sends its manager.
#[derive(Debug)]
pub(crate) enum SessionNotice {
    /// Something that feeds the available-session view changed.
    AvailabilityChanged,
    /// The named session closed and must leave the active catalog.
    Closed(String),
}

struct Seat {
    display_name: String,
    events: mpsc::UnboundedSender<ControllerEvent>,
}

struct PluginEntry {
    plugin: Box<dyn SessionPlugin>,
    capabilities: PluginCapabilities,
    priority: usize,
}

struct SessionInner {
    identifier: String,
    closed: bool,
    device: Option<Arc<FusedDevice>>,
    oscillator_params: Vec<OscillatorParams>,
    arm_hues: Vec<u16>,
    slot_pool: BinaryHeap<Reverse<usize>>,
    seats: HashMap<usize, Seat>,
    plugins: Vec<PluginEntry>,
    objectives: Vec<ObjectiveGroup>,
    last_known_time: u32,
    reconcile: Option<CancellationToken>,
    listener: Option<CancellationToken>,
}

/// A live session against one device identifier.
pub struct Session {
    identifier: String,
    inner: Mutex<SessionInner>,
    notices: mpsc::UnboundedSender<SessionNotice>,
    reconcile_interval: Duration,
    cancel: CancellationToken,
}

impl Session {
    /// Create a session with its plugin set installed.
    ///
    /// Plugin order is priority order. `session_started` fires before the
    /// constructor returns.
    pub(crate) fn new(
        identifier: impl Into<String>,
        plugins: Vec<Box<dyn SessionPlugin>>,
        notices: mpsc::UnboundedSender<SessionNotice>,
        reconcile_interval: Duration,
    ) -> Arc<Self> {
        let identifier = identifier.into();
        let plugins = plugins
            .into_iter()
            .enumerate()
            .map(|(priority, plugin)| PluginEntry {
                capabilities: plugin.capabilities(),
                plugin,
                priority,
            })
            .collect();
        let session = Arc::new(Self {
            identifier: identifier.clone(),
            inner: Mutex::new(SessionInner {
                identifier,
                closed: false,
                device: None,
                oscillator_params: Vec::new(),
                arm_hues: Vec::new(),
                slot_pool: BinaryHeap::new(),
                seats: HashMap::new(),
                plugins,
                objectives: Vec::new(),
                last_known_time: 0,
                reconcile: None,
                listener: None,
            }),
            notices,
            reconcile_interval,
            cancel: CancellationToken::new(),
        });
        {
            let mut inner = session.lock();
            dispatch_plugins(
                &mut inner,
                PluginCapabilities::SESSION_STARTED,
                |entry, ctx| entry.plugin.session_started(ctx),
            );
        }
        session
    }

    /// The device identifier this session serves.
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// Whether the session has been closed. Closed sessions never re-open.
    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Whether every controller slot is taken.
    pub fn is_full(&self) -> bool {
        self.lock().slot_pool.is_empty()
    }

    /// Whether a fused device is currently bound.
    pub fn has_device(&self) -> bool {
        self.lock().device.is_some()
    }

    /// Snapshot of the authoritative parameter array.
    pub fn oscillator_params(&self) -> Vec<OscillatorParams> {
        self.lock().oscillator_params.clone()
    }

    /// Arm hues copied from the bound device.
    pub fn arm_hues(&self) -> Vec<u16> {
        self.lock().arm_hues.clone()
    }

    /// Connected users as `(slot, name)` pairs in slot order.
    pub fn connected_users(&self) -> Vec<(usize, String)> {
        let inner = self.lock();
        let mut users: Vec<_> = inner
            .seats
            .iter()
            .map(|(slot, seat)| (*slot, seat.display_name.clone()))
            .collect();
        users.sort();
        users
    }

    /// Snapshot of the published objective groups.
    pub fn objective_groups(&self) -> Vec<ObjectiveGroup> {
        self.lock().objectives.clone()
    }

    /// Bind (or rebind) a fused device.
    ///
    /// Grows the parameter array to the device's oscillator count, rebuilds
    /// the slot pool around the occupied slots, re-asserts the host's
    /// parameter snapshot, and starts the reconciliation loop. Existing
    /// controller contexts stay valid across a rebind.
    pub fn bind_device(self: &Arc<Self>, device: Arc<FusedDevice>) {
        let (reconcile, listener) = {
            let mut inner = self.lock();
            if inner.closed {
                return;
            }
            if let Some(token) = inner.reconcile.take() {
                token.cancel();
            }
            if let Some(token) = inner.listener.take() {
                token.cancel();
            }

            let count = device.oscillator_count() as usize;
            if count > inner.oscillator_params.len() {
                // New entries inherit the session-wide frequency so it stays
                // uniform across the array.
                let frequency = inner
                    .oscillator_params
                    .first()
                    .map(|params| params.frequency)
                    .unwrap_or(0.0);
                inner.oscillator_params.resize_with(count, || OscillatorParams {
                    frequency,
                    ..OscillatorParams::default()
                });
            }
            let pool: BinaryHeap<Reverse<usize>> = (0..count)
                .filter(|slot| !inner.seats.contains_key(slot))
                .map(Reverse)
                .collect();
            inner.slot_pool = pool;
            inner.arm_hues = device.arm_hues();

            for (index, params) in inner.oscillator_params.iter().enumerate() {
                device.write_command(&Command::UpdateOscillator {
                    index: index as u8,
                    params: *params,
                });
            }
            device.write_command(&Command::SessionStart {
                time: inner.last_known_time,
            });

            inner.device = Some(device.clone());
            let reconcile = self.cancel.child_token();
            let listener = self.cancel.child_token();
            inner.reconcile = Some(reconcile.clone());
            inner.listener = Some(listener.clone());
            info!(identifier = %self.identifier, oscillators = count, "session bound to device");
            (reconcile, listener)
        };
        tokio::spawn(run_reconciliation(self.clone(), reconcile));
        tokio::spawn(run_device_listener(self.clone(), device, listener));
        self.notify_availability();
    }

    /// Forget the bound device. Parameters and users are retained so a
    /// future rebind is seamless.
    pub fn unbind_device(&self) {
        {
            let mut inner = self.lock();
            if let Some(token) = inner.reconcile.take() {
                token.cancel();
            }
            if let Some(token) = inner.listener.take() {
                token.cancel();
            }
            if inner.device.take().is_some() {
                info!(identifier = %self.identifier, "session unbound from device");
            }
        }
        self.notify_availability();
    }

    /// Admit a user, handing out the lowest free slot.
    pub fn create_context(
        self: &Arc<Self>,
        user_name: &str,
    ) -> Result<ControllerHandle, AdmissionError> {
        let (slot, events) = {
            let mut inner = self.lock();
            if inner.closed {
                return Err(AdmissionError::SessionClosed);
            }
            let Some(Reverse(slot)) = inner.slot_pool.pop() else {
                return Err(AdmissionError::SessionFull);
            };
            let (events_tx, events_rx) = mpsc::unbounded_channel();
            inner.seats.insert(
                slot,
                Seat {
                    display_name: user_name.to_owned(),
                    events: events_tx,
                },
            );
            let roster = inner.roster();
            inner.notify_controllers(None, || ControllerEvent::PlayerListUpdated(roster.clone()));
            debug!(identifier = %self.identifier, slot, user = %user_name, "controller admitted");
            (slot, events_rx)
        };
        // Plugin callbacks run outside the admission critical section.
        {
            let mut inner = self.lock();
            dispatch_plugins(&mut inner, PluginCapabilities::USER_JOINED, |entry, ctx| {
                entry.plugin.user_joined(ctx, slot, user_name)
            });
        }
        Ok(ControllerHandle::new(
            self.clone(),
            slot,
            user_name.to_owned(),
            events,
        ))
    }

    /// Return a slot to the pool; closes the session when the last user
    /// departs. Called from [`ControllerHandle`]'s drop.
    pub(crate) fn release_slot(&self, slot: usize) {
        let empty = {
            let mut inner = self.lock();
            if inner.closed {
                return;
            }
            let Some(seat) = inner.seats.remove(&slot) else {
                return;
            };
            dispatch_plugins(&mut inner, PluginCapabilities::USER_LEFT, |entry, ctx| {
                entry.plugin.user_left(ctx, slot, &seat.display_name)
            });
            inner.slot_pool.push(Reverse(slot));
            let roster = inner.roster();
            inner.notify_controllers(None, || ControllerEvent::PlayerListUpdated(roster.clone()));
            debug!(identifier = %self.identifier, slot, user = %seat.display_name, "controller departed");
            inner.seats.is_empty()
        };
        if empty {
            self.close();
        }
        self.notify_availability();
    }

    /// Tear the session down: park the hardware, end the session on the
    /// wire, dispose the plugins. Idempotent; a closed session never
    /// re-opens.
    pub fn close(&self) {
        {
            let mut inner = self.lock();
            if inner.closed {
                return;
            }
            inner.closed = true;
            if let Some(token) = inner.reconcile.take() {
                token.cancel();
            }
            if let Some(token) = inner.listener.take() {
                token.cancel();
            }
            if let Some(device) = inner.device.take() {
                for index in 0..inner.oscillator_params.len() {
                    device.write_command(&Command::UpdateOscillator {
                        index: index as u8,
                        params: OscillatorParams::default(),
                    });
                }
                device.write_command(&Command::SessionEnd);
            }
            dispatch_plugins(&mut inner, PluginCapabilities::SESSION_ENDED, |entry, ctx| {
                entry.plugin.session_ended(ctx)
            });
            inner.plugins.clear();
            inner.seats.clear();
            info!(identifier = %self.identifier, "session closed");
        }
        self.cancel.cancel();
        let _ = self
            .notices
            .send(SessionNotice::Closed(self.identifier.clone()));
    }

    /// Parameters of one slot; default when the slot is out of range.
    pub(crate) fn params_for(&self, slot: usize) -> OscillatorParams {
        self.lock()
            .oscillator_params
            .get(slot)
            .copied()
            .unwrap_or_default()
    }

    pub(crate) fn set_frequency_from(&self, slot: usize, value: f32) {
        let mut inner = self.lock();
        if inner.closed || !inner.seats.contains_key(&slot) {
            return;
        }
        if !inner.set_frequency_value(value, Some(slot)) {
            return;
        }
        dispatch_plugins(
            &mut inner,
            PluginCapabilities::FREQUENCY_CHANGED_BY_USER,
            |entry, ctx| entry.plugin.frequency_changed_by_user(ctx, slot, value),
        );
    }

    pub(crate) fn set_amplitude_from(&self, slot: usize, value: f32) {
        let mut inner = self.lock();
        if inner.closed || !inner.seats.contains_key(&slot) {
            return;
        }
        if !inner.set_amplitude_value(slot, value) {
            return;
        }
        dispatch_plugins(
            &mut inner,
            PluginCapabilities::AMPLITUDE_CHANGED_BY_USER,
            |entry, ctx| entry.plugin.amplitude_changed_by_user(ctx, slot, value),
        );
    }

    pub(crate) fn set_offset_from(&self, slot: usize, value: f32) {
        let mut inner = self.lock();
        if inner.closed || !inner.seats.contains_key(&slot) {
            return;
        }
        if !inner.set_offset_value(slot, value) {
            return;
        }
        dispatch_plugins(
            &mut inner,
            PluginCapabilities::OFFSET_CHANGED_BY_USER,
            |entry, ctx| entry.plugin.offset_changed_by_user(ctx, slot, value),
        );
    }

    pub(crate) fn set_phase_shift_from(&self, slot: usize, value: f32) {
        let mut inner = self.lock();
        if inner.closed || !inner.seats.contains_key(&slot) {
            return;
        }
        if !inner.set_phase_shift_value(slot, value, Some(slot)) {
            return;
        }
        dispatch_plugins(
            &mut inner,
            PluginCapabilities::PHASE_SHIFT_CHANGED_BY_USER,
            |entry, ctx| entry.plugin.phase_shift_changed_by_user(ctx, slot, value),
        );
    }

    fn notify_availability(&self) {
        let _ = self.notices.send(SessionNotice::AvailabilityChanged);
    }

    fn lock(&self) -> MutexGuard<'_, SessionInner> {
        self.inner.lock().expect("session lock poisoned")
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("identifier", &self.identifier)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl SessionInner {
    fn roster(&self) -> Vec<String> {
        let mut seats: Vec<_> = self.seats.iter().collect();
        seats.sort_by_key(|(slot, _)| **slot);
        seats
            .into_iter()
            .map(|(_, seat)| seat.display_name.clone())
            .collect()
    }

    fn notify_controllers(
        &self,
        exclude_slot: Option<usize>,
        event: impl Fn() -> ControllerEvent,
    ) {
        for (slot, seat) in &self.seats {
            if Some(*slot) == exclude_slot {
                continue;
            }
            let _ = seat.events.send(event());
        }
    }

    /// Set the global frequency. Returns whether anything changed.
    fn set_frequency_value(&mut self, value: f32, origin_slot: Option<usize>) -> bool {
        if self
            .oscillator_params
            .iter()
            .all(|params| params.frequency == value)
        {
            return false;
        }
        for params in &mut self.oscillator_params {
            params.frequency = value;
        }
        self.notify_controllers(origin_slot, || ControllerEvent::ParamsUpdatedExternally);
        true
    }

    fn set_amplitude_value(&mut self, index: usize, value: f32) -> bool {
        match self.oscillator_params.get_mut(index) {
            Some(params) if params.amplitude != value => {
                params.amplitude = value;
                true
            }
            _ => false,
        }
    }

    fn set_offset_value(&mut self, index: usize, value: f32) -> bool {
        match self.oscillator_params.get_mut(index) {
            Some(params) if params.offset != value => {
                params.offset = value;
                true
            }
            _ => false,
        }
    }

    fn set_phase_shift_value(
        &mut self,
        index: usize,
        value: f32,
        origin_slot: Option<usize>,
    ) -> bool {
        match self.oscillator_params.get_mut(index) {
            Some(params) if params.phase_shift != value => {
                params.phase_shift = value;
                self.notify_controllers(origin_slot, || ControllerEvent::ExternalRelationChanged);
                true
            }
            _ => false,
        }
    }
}

/// A queued cross-plugin notification, delivered after the callback that
/// produced it returns.
enum PluginEffect {
    Frequency { origin: usize, value: f32 },
    Amplitude { origin: usize, index: usize, value: f32 },
    Offset { origin: usize, index: usize, value: f32 },
    PhaseShift { origin: usize, index: usize, value: f32 },
}

impl PluginEffect {
    fn origin(&self) -> usize {
        match self {
            PluginEffect::Frequency { origin, .. }
            | PluginEffect::Amplitude { origin, .. }
            | PluginEffect::Offset { origin, .. }
            | PluginEffect::PhaseShift { origin, .. } => *origin,
        }
    }

    fn capability(&self) -> PluginCapabilities {
        match self {
            PluginEffect::Frequency { .. } => PluginCapabilities::FREQUENCY_CHANGED_BY_PLUGIN,
            PluginEffect::Amplitude { .. } => PluginCapabilities::AMPLITUDE_CHANGED_BY_PLUGIN,
            PluginEffect::Offset { .. } => PluginCapabilities::OFFSET_CHANGED_BY_PLUGIN,
            PluginEffect::PhaseShift { .. } => PluginCapabilities::PHASE_SHIFT_CHANGED_BY_PLUGIN,
        }
    }
}

/// The session surface exposed to a plugin while one of its callbacks runs.
///
/// Operates directly on the locked session state, so a plugin can never
/// deadlock against the session mutex.
pub struct PluginCtx<'a> {
    state: &'a mut SessionInner,
    origin: usize,
    effects: &'a mut Vec<PluginEffect>,
}

impl PluginCtx<'_> {
    /// The device identifier of the session.
    pub fn identifier(&self) -> &str {
        &self.state.identifier
    }

    /// Number of oscillators the session manages.
    pub fn oscillator_count(&self) -> usize {
        self.state.oscillator_params.len()
    }

    /// Parameters of one oscillator.
    pub fn params(&self, index: usize) -> Option<OscillatorParams> {
        self.state.oscillator_params.get(index).copied()
    }

    /// Arm hues copied from the bound device.
    pub fn arm_hues(&self) -> &[u16] {
        &self.state.arm_hues
    }

    /// Connected users as `(slot, name)` pairs in slot order.
    pub fn users(&self) -> Vec<(usize, String)> {
        let mut users: Vec<_> = self
            .state
            .seats
            .iter()
            .map(|(slot, seat)| (*slot, seat.display_name.clone()))
            .collect();
        users.sort();
        users
    }

    /// Set the global frequency on behalf of this plugin.
    pub fn set_frequency(&mut self, value: f32) {
        if self.state.set_frequency_value(value, None) {
            self.effects.push(PluginEffect::Frequency {
                origin: self.origin,
                value,
            });
        }
    }

    /// Set one oscillator's amplitude on behalf of this plugin.
    pub fn set_amplitude(&mut self, index: usize, value: f32) {
        if self.state.set_amplitude_value(index, value) {
            self.state
                .notify_controllers(None, || ControllerEvent::ParamsUpdatedExternally);
            self.effects.push(PluginEffect::Amplitude {
                origin: self.origin,
                index,
                value,
            });
        }
    }

    /// Set one oscillator's offset on behalf of this plugin.
    pub fn set_offset(&mut self, index: usize, value: f32) {
        if self.state.set_offset_value(index, value) {
            self.state
                .notify_controllers(None, || ControllerEvent::ParamsUpdatedExternally);
            self.effects.push(PluginEffect::Offset {
                origin: self.origin,
                index,
                value,
            });
        }
    }

    /// Set one oscillator's phase shift on behalf of this plugin.
    pub fn set_phase_shift(&mut self, index: usize, value: f32) {
        if self.state.set_phase_shift_value(index, value, None) {
            self.effects.push(PluginEffect::PhaseShift {
                origin: self.origin,
                index,
                value,
            });
        }
    }

    /// Send a user-visible feedback line to one controller, or to all.
    pub fn send_feedback(&mut self, slot: Option<usize>, message: &str) {
        match slot {
            Some(slot) => {
                if let Some(seat) = self.state.seats.get(&slot) {
                    let _ = seat.events.send(ControllerEvent::Feedback(message.to_owned()));
                }
            }
            None => self
                .state
                .notify_controllers(None, || ControllerEvent::Feedback(message.to_owned())),
        }
    }

    /// Publish an objective group to every controller.
    pub fn publish_objective_group(&mut self, group: ObjectiveGroup) {
        self.state.objectives.push(group);
        self.state
            .notify_controllers(None, || ControllerEvent::ObjectivesUpdated);
    }
}

/// Invoke one callback on every plugin declaring `capability`, in priority
/// order, then deliver any queued cross-plugin notifications.
fn dispatch_plugins<F>(inner: &mut SessionInner, capability: PluginCapabilities, mut callback: F)
where
    F: FnMut(&mut PluginEntry, &mut PluginCtx<'_>),
{
    let mut plugins = std::mem::take(&mut inner.plugins);
    let mut effects = Vec::new();
    for entry in plugins.iter_mut() {
        if !entry.capabilities.contains(capability) {
            continue;
        }
        let mut ctx = PluginCtx {
            state: &mut *inner,
            origin: entry.priority,
            effects: &mut effects,
        };
        callback(entry, &mut ctx);
    }
    inner.plugins = plugins;
    deliver_effects(inner, effects);
}

fn deliver_effects(inner: &mut SessionInner, mut effects: Vec<PluginEffect>) {
    for _ in 0..MAX_EFFECT_ROUNDS {
        if effects.is_empty() {
            return;
        }
        let round = std::mem::take(&mut effects);
        let mut plugins = std::mem::take(&mut inner.plugins);
        for effect in round {
            let origin_name = plugins
                .iter()
                .find(|entry| entry.priority == effect.origin())
                .map(|entry| entry.plugin.name().to_owned())
                .unwrap_or_default();
            for entry in plugins.iter_mut() {
                if entry.priority == effect.origin()
                    || !entry.capabilities.contains(effect.capability())
                {
                    continue;
                }
                let mut ctx = PluginCtx {
                    state: &mut *inner,
                    origin: entry.priority,
                    effects: &mut effects,
                };
                match effect {
                    PluginEffect::Frequency { value, .. } => {
                        entry
                            .plugin
                            .frequency_changed_by_plugin(&mut ctx, &origin_name, value);
                    }
                    PluginEffect::Amplitude { index, value, .. } => {
                        entry
                            .plugin
                            .amplitude_changed_by_plugin(&mut ctx, &origin_name, index, value);
                    }
                    PluginEffect::Offset { index, value, .. } => {
                        entry
                            .plugin
                            .offset_changed_by_plugin(&mut ctx, &origin_name, index, value);
                    }
                    PluginEffect::PhaseShift { index, value, .. } => {
                        entry
                            .plugin
                            .phase_shift_changed_by_plugin(&mut ctx, &origin_name, index, value);
                    }
                }
            }
        }
        inner.plugins = plugins;
    }
    if !effects.is_empty() {
        warn!("plugin notification cascade truncated");
    }
}

async fn run_reconciliation(session: Arc<Session>, cancel: CancellationToken) {
    let mut tick = interval(session.reconcile_interval);
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tick.tick() => {}
        }
        let mut inner = session.lock();
        if inner.closed {
            break;
        }
        let Some(device) = inner.device.clone() else {
            break;
        };
        dispatch_plugins(&mut inner, PluginCapabilities::UPDATE, |entry, ctx| {
            entry.plugin.update(ctx)
        });
        for (index, params) in inner.oscillator_params.iter().enumerate() {
            device.write_command(&Command::UpdateOscillator {
                index: index as u8,
                params: *params,
            });
        }
    }
}

async fn run_device_listener(
    session: Arc<Session>,
    device: Arc<FusedDevice>,
    cancel: CancellationToken,
) {
    let mut events = device.subscribe();
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            event = events.recv() => match event {
                Ok(DeviceEvent::TimeReceived(time)) => {
                    session.lock().last_known_time = time;
                }
                Ok(DeviceEvent::OscillationData { index, state }) => {
                    let mut inner = session.lock();
                    if inner.closed {
                        break;
                    }
                    dispatch_plugins(
                        &mut inner,
                        PluginCapabilities::OSCILLATOR_DATA,
                        |entry, ctx| entry.plugin.oscillator_data_received(ctx, index, &state),
                    );
                }
                Ok(DeviceEvent::ImuData(imu)) => {
                    let mut inner = session.lock();
                    if inner.closed {
                        break;
                    }
                    dispatch_plugins(&mut inner, PluginCapabilities::IMU_DATA, |entry, ctx| {
                        entry.plugin.imu_data_received(ctx, &imu)
                    });
                }
                // Lock observation is the session manager's concern.
                Ok(DeviceEvent::LockStateChanged(_)) | Ok(DeviceEvent::UnknownPacket(_)) => {}
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!(identifier = %session.identifier, skipped, "device event stream lagged");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            },
        }
    }
}
