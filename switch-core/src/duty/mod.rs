//! Duty-cycle state machine that toggles the load between ON and OFF.
//!
//! The machine is a pure transition function: it inspects the current state
//! and the number of wake ticks accumulated since the last switch, and returns
//! the next state together with the load action to apply. The caller owns the
//! counter and the load pin, which keeps the logic testable without hardware.

use core::fmt;

use crate::config::FeatureMode;

/// Physical level requested for the load switch.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum LoadLevel {
    Energized,
    DeEnergized,
}

impl LoadLevel {
    /// Returns `true` for [`LoadLevel::Energized`].
    #[must_use]
    pub const fn is_energized(self) -> bool {
        matches!(self, LoadLevel::Energized)
    }

    #[must_use]
    pub const fn from_energized(energized: bool) -> Self {
        if energized {
            LoadLevel::Energized
        } else {
            LoadLevel::DeEnergized
        }
    }
}

impl fmt::Display for LoadLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadLevel::Energized => f.write_str("energized"),
            LoadLevel::DeEnergized => f.write_str("de-energized"),
        }
    }
}

/// Duty-cycle phase. The load starts energized, so the initial phase is ON.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum DutyState {
    #[default]
    On,
    Off,
}

impl DutyState {
    const ON_RAW: u8 = 0;
    const OFF_RAW: u8 = 1;

    /// Compact encoding used by diagnostics and state injection.
    #[must_use]
    pub const fn to_raw(self) -> u8 {
        match self {
            DutyState::On => Self::ON_RAW,
            DutyState::Off => Self::OFF_RAW,
        }
    }

    /// Decodes a raw state, returning `None` for unknown values.
    #[must_use]
    pub const fn from_raw(raw: u8) -> Option<Self> {
        match raw {
            Self::ON_RAW => Some(DutyState::On),
            Self::OFF_RAW => Some(DutyState::Off),
            _ => None,
        }
    }

    /// Decodes a raw state, resetting unknown values to [`DutyState::Off`].
    #[must_use]
    pub const fn normalize(raw: u8) -> Self {
        match Self::from_raw(raw) {
            Some(state) => state,
            None => DutyState::Off,
        }
    }

    /// Load level the phase drives when it is entered.
    #[must_use]
    pub const fn load_level(self) -> LoadLevel {
        match self {
            DutyState::On => LoadLevel::Energized,
            DutyState::Off => LoadLevel::DeEnergized,
        }
    }
}

impl fmt::Display for DutyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DutyState::On => f.write_str("ON"),
            DutyState::Off => f.write_str("OFF"),
        }
    }
}

/// Number of wake ticks spent in each phase.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct DutyTimings {
    pub on_cycles: u32,
    pub off_cycles: u32,
}

impl DutyTimings {
    #[must_use]
    pub const fn new(on_cycles: u32, off_cycles: u32) -> Self {
        Self {
            on_cycles,
            off_cycles,
        }
    }

    /// Ticks the given phase lasts before switching.
    #[must_use]
    pub const fn cycles_for(&self, state: DutyState) -> u32 {
        match state {
            DutyState::On => self.on_cycles,
            DutyState::Off => self.off_cycles,
        }
    }
}

/// Result of evaluating the machine for one wake tick.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct DutyTransition {
    /// Phase after this tick.
    pub state: DutyState,
    /// Load action to apply, if the phase switched.
    pub load: Option<LoadLevel>,
    /// Whether the duty counter restarts from zero.
    pub reset_counter: bool,
}

impl DutyTransition {
    /// Leaves the phase, the load, and the counter untouched.
    #[must_use]
    pub const fn hold(state: DutyState) -> Self {
        Self {
            state,
            load: None,
            reset_counter: false,
        }
    }

    const fn switch_to(state: DutyState) -> Self {
        Self {
            state,
            load: Some(state.load_level()),
            reset_counter: true,
        }
    }

    /// Returns `true` when the phase changed.
    #[must_use]
    pub const fn switched(&self) -> bool {
        self.reset_counter
    }
}

/// Advances the machine given `elapsed` ticks in the current phase.
///
/// The counter itself is advanced once per tick by the caller; a phase that
/// has not yet run its course leaves it accumulating.
#[must_use]
pub const fn advance(state: DutyState, elapsed: u32, timings: &DutyTimings) -> DutyTransition {
    match state {
        DutyState::On if elapsed >= timings.on_cycles => DutyTransition::switch_to(DutyState::Off),
        DutyState::Off if elapsed >= timings.off_cycles => DutyTransition::switch_to(DutyState::On),
        _ => DutyTransition::hold(state),
    }
}

/// Gated evaluation: the machine only runs in [`FeatureMode::FullFeature`]
/// while the undervoltage latch is clear. Otherwise the load stays exactly as
/// it was last driven.
#[must_use]
pub const fn evaluate(
    state: DutyState,
    elapsed: u32,
    timings: &DutyTimings,
    mode: FeatureMode,
    latched: bool,
) -> DutyTransition {
    if latched || !mode.duty_cycle_enabled() {
        return DutyTransition::hold(state);
    }

    advance(state, elapsed, timings)
}
