//! The controller context: the handle an admitted user holds.
//!
//! A handle names exactly one oscillator slot. Parameter setters go through
//! the session's authority rules; dropping the handle returns the slot to
//! the pool. The session finds the seat by slot index, so the handle never
//! holds anything the session also points back at.

use std::sync::Arc;

use edmo_types::OscillatorParams;
use tokio::sync::mpsc;

use super::core::Session;

/// Events delivered to one controller.
#[derive(Debug, Clone, PartialEq)]
pub enum ControllerEvent {
    /// The set of connected users changed; names in slot order.
    PlayerListUpdated(Vec<String>),
    /// Another actor changed parameters that affect this controller.
    ParamsUpdatedExternally,
    /// Another actor changed a phase relation between oscillators.
    ExternalRelationChanged,
    /// A plugin sent a user-visible feedback line.
    Feedback(String),
    /// The published objective groups changed.
    ObjectivesUpdated,
}

/// The handle an admitted user holds; exactly one per occupied slot.
pub struct ControllerHandle {
    session: Arc<Session>,
    slot: usize,
    display_name: String,
    events: mpsc::UnboundedReceiver<ControllerEvent>,
}

impl ControllerHandle {
    pub(crate) fn new(
        session: Arc<Session>,
        slot: usize,
        display_name: String,
        events: mpsc::UnboundedReceiver<ControllerEvent>,
    ) -> Self {
        Self {
            session,
            slot,
            display_name,
            events,
        }
    }

    /// The oscillator index this controller owns.
    pub fn slot(&self) -> usize {
        self.slot
    }

    /// The name this controller was admitted under.
    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    /// The session this controller belongs to.
    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    /// Snapshot of this controller's oscillator parameters.
    pub fn params(&self) -> OscillatorParams {
        self.session.params_for(self.slot)
    }

    /// Set the global frequency. Every oscillator follows.
    pub fn set_frequency(&self, value: f32) {
        self.session.set_frequency_from(self.slot, value);
    }

    /// Set this oscillator's amplitude.
    pub fn set_amplitude(&self, value: f32) {
        self.session.set_amplitude_from(self.slot, value);
    }

    /// Set this oscillator's offset.
    pub fn set_offset(&self, value: f32) {
        self.session.set_offset_from(self.slot, value);
    }

    /// Set this oscillator's phase shift.
    pub fn set_phase_shift(&self, value: f32) {
        self.session.set_phase_shift_from(self.slot, value);
    }

    /// Return every parameter to its reset value.
    pub fn reset(&self) {
        let defaults = OscillatorParams::default();
        self.set_frequency(defaults.frequency);
        self.set_amplitude(defaults.amplitude);
        self.set_offset(defaults.offset);
        self.set_phase_shift(defaults.phase_shift);
    }

    /// Await the next controller event.
    pub async fn next_event(&mut self) -> Option<ControllerEvent> {
        self.events.recv().await
    }

    /// Take an already-delivered event, if any.
    pub fn try_next_event(&mut self) -> Option<ControllerEvent> {
        self.events.try_recv().ok()
    }
}

impl Drop for ControllerHandle {
    fn drop(&mut self) {
        self.session.release_slot(self.slot);
    }
}

impl std::fmt::Debug for ControllerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControllerHandle")
            .field("slot", &self.slot)
            .field("display_name", &self.display_name)
            .finish()
    }
}
