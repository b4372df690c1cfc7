//! The host-facing plugin contract.
//!
//! Plugins attach to a session and observe it through optional callbacks;
//! which callbacks a plugin cares about is declared once, at construction,
//! as a capability bitset the host dispatches through. Priority is assigned
//! by the loader from its enumeration order; lower priority runs first.
//!
//! Plugins call back into the session through [`PluginCtx`]: global
//! frequency, per-index amplitude/offset/phase-shift, user-visible feedback
//! lines, and objective groups.

use bitflags::bitflags;
use edmo_types::{ImuSample, OscillatorState};

pub use super::core::PluginCtx;

bitflags! {
    /// Declarative descriptor of the callbacks a plugin implements.
    ///
    /// Built once at plugin construction; the host skips any callback whose
    /// bit is absent.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PluginCapabilities: u32 {
        /// Wants [`SessionPlugin::session_started`].
        const SESSION_STARTED = 1 << 0;
        /// Wants [`SessionPlugin::session_ended`].
        const SESSION_ENDED = 1 << 1;
        /// Wants [`SessionPlugin::user_joined`].
        const USER_JOINED = 1 << 2;
        /// Wants [`SessionPlugin::user_left`].
        const USER_LEFT = 1 << 3;
        /// Wants [`SessionPlugin::imu_data_received`].
        const IMU_DATA = 1 << 4;
        /// Wants [`SessionPlugin::oscillator_data_received`].
        const OSCILLATOR_DATA = 1 << 5;
        /// Wants [`SessionPlugin::frequency_changed_by_user`].
        const FREQUENCY_CHANGED_BY_USER = 1 << 6;
        /// Wants [`SessionPlugin::amplitude_changed_by_user`].
        const AMPLITUDE_CHANGED_BY_USER = 1 << 7;
        /// Wants [`SessionPlugin::offset_changed_by_user`].
        const OFFSET_CHANGED_BY_USER = 1 << 8;
        /// Wants [`SessionPlugin::phase_shift_changed_by_user`].
        const PHASE_SHIFT_CHANGED_BY_USER = 1 << 9;
        /// Wants [`SessionPlugin::frequency_changed_by_plugin`].
        const FREQUENCY_CHANGED_BY_PLUGIN = 1 << 10;
        /// Wants [`SessionPlugin::amplitude_changed_by_plugin`].
        const AMPLITUDE_CHANGED_BY_PLUGIN = 1 << 11;
        /// Wants [`SessionPlugin::offset_changed_by_plugin`].
        const OFFSET_CHANGED_BY_PLUGIN = 1 << 12;
        /// Wants [`SessionPlugin::phase_shift_changed_by_plugin`].
        const PHASE_SHIFT_CHANGED_BY_PLUGIN = 1 << 13;
        /// Wants [`SessionPlugin::update`].
        const UPDATE = 1 << 14;
    }
}

/// A session plugin. Every callback has a no-op default; the capability
/// bitset decides which ones are ever invoked.
#[allow(unused_variables)]
pub trait SessionPlugin: Send {
    /// Stable plugin name, used to attribute plugin-originated changes.
    fn name(&self) -> &str;

    /// The callbacks this plugin implements.
    fn capabilities(&self) -> PluginCapabilities;

    /// The session came to life.
    fn session_started(&mut self, ctx: &mut PluginCtx<'_>) {}

    /// The session is being torn down; the plugin is disposed afterwards.
    fn session_ended(&mut self, ctx: &mut PluginCtx<'_>) {}

    /// A user was admitted to `slot`.
    fn user_joined(&mut self, ctx: &mut PluginCtx<'_>, slot: usize, name: &str) {}

    /// The user holding `slot` departed.
    fn user_left(&mut self, ctx: &mut PluginCtx<'_>, slot: usize, name: &str) {}

    /// The device reported an IMU aggregate.
    fn imu_data_received(&mut self, ctx: &mut PluginCtx<'_>, imu: &ImuSample) {}

    /// The device reported one oscillator's state.
    fn oscillator_data_received(
        &mut self,
        ctx: &mut PluginCtx<'_>,
        index: u8,
        state: &OscillatorState,
    ) {
    }

    /// A user changed the global frequency.
    fn frequency_changed_by_user(&mut self, ctx: &mut PluginCtx<'_>, slot: usize, value: f32) {}

    /// A user changed their oscillator's amplitude.
    fn amplitude_changed_by_user(&mut self, ctx: &mut PluginCtx<'_>, slot: usize, value: f32) {}

    /// A user changed their oscillator's offset.
    fn offset_changed_by_user(&mut self, ctx: &mut PluginCtx<'_>, slot: usize, value: f32) {}

    /// A user changed their oscillator's phase shift.
    fn phase_shift_changed_by_user(&mut self, ctx: &mut PluginCtx<'_>, slot: usize, value: f32) {}

    /// Another plugin changed the global frequency.
    fn frequency_changed_by_plugin(&mut self, ctx: &mut PluginCtx<'_>, origin: &str, value: f32) {}

    /// Another plugin changed an oscillator's amplitude.
    fn amplitude_changed_by_plugin(
        &mut self,
        ctx: &mut PluginCtx<'_>,
        origin: &str,
        index: usize,
        value: f32,
    ) {
    }

    /// Another plugin changed an oscillator's offset.
    fn offset_changed_by_plugin(
        &mut self,
        ctx: &mut PluginCtx<'_>,
        origin: &str,
        index: usize,
        value: f32,
    ) {
    }

    /// Another plugin changed an oscillator's phase shift.
    fn phase_shift_changed_by_plugin(
        &mut self,
        ctx: &mut PluginCtx<'_>,
        origin: &str,
        index: usize,
        value: f32,
    ) {
    }

    /// One reconciliation tick, before the parameter snapshot is written.
    fn update(&mut self, ctx: &mut PluginCtx<'_>) {}
}

/// Builds the plugin set for a new session.
///
/// The returned order is the loader's enumeration order and therefore the
/// priority order: index 0 runs first.
pub trait PluginFactory: Send + Sync {
    /// Build plugins for a session on the named device.
    fn build(&self, identifier: &str) -> Vec<Box<dyn SessionPlugin>>;
}

/// A single goal a plugin surfaces to users.
#[derive(Debug, Clone)]
pub struct Objective {
    /// Short goal title.
    pub title: String,
    /// Optional longer description.
    pub description: Option<String>,
    completed: bool,
}

impl Objective {
    /// A fresh, uncompleted objective.
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            description: None,
            completed: false,
        }
    }

    /// Attach a description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Mark completed. Completion is monotone: once true, never false.
    pub fn complete(&mut self) {
        self.completed = true;
    }

    /// Whether the objective has been completed.
    pub fn is_completed(&self) -> bool {
        self.completed
    }
}

/// A titled group of objectives published as one unit.
#[derive(Debug, Clone)]
pub struct ObjectiveGroup {
    /// Group title.
    pub title: String,
    /// Optional longer description.
    pub description: Option<String>,
    /// Member objectives.
    pub objectives: Vec<Objective>,
}

impl ObjectiveGroup {
    /// A group with no objectives yet.
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            description: None,
            objectives: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completion_is_monotone() {
        let mut objective = Objective::new("spin the arm");
        assert!(!objective.is_completed());
        objective.complete();
        objective.complete();
        assert!(objective.is_completed());
    }
}
