//! Telemetry event catalog and the fixed-capacity ring the controller records into.
//!
//! The controller has no output channel of its own beyond the load switch, so
//! every observable decision is written here instead. Firmware mirrors the
//! ring to its RTT channel and the emulator prints it; both read the same
//! records. Event kinds serialize to compact numeric codes so they can travel
//! over constrained diagnostics links.

use core::fmt;

use heapless::{HistoryBuf, OldestOrdered};

use crate::duty::LoadLevel;

/// Monotonic identifier assigned to each telemetry record (wraps on overflow).
pub type EventId = u32;

/// Total number of telemetry entries retained in memory.
pub const TELEMETRY_RING_CAPACITY: usize = 64;

/// Nominal wake period in milliseconds, used only to render elapsed time.
pub const NOMINAL_WAKE_PERIOD_MS: u64 = 8_192;

/// Position in the wake-tick stream. Tick zero is boot.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Ord, PartialOrd)]
pub struct WakeInstant(u32);

impl WakeInstant {
    pub const BOOT: Self = Self(0);

    #[must_use]
    pub const fn from_ticks(ticks: u32) -> Self {
        Self(ticks)
    }

    #[must_use]
    pub const fn ticks(self) -> u32 {
        self.0
    }

    /// Returns the instant one tick later, saturating at the end of the range.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0.saturating_add(1))
    }

    /// Returns the saturating number of ticks from `earlier` to `self`.
    #[must_use]
    pub const fn ticks_since(self, earlier: Self) -> u32 {
        self.0.saturating_sub(earlier.0)
    }

    /// Approximate wall time since boot, assuming a nominal wake period.
    #[must_use]
    pub fn nominal_millis(self) -> u64 {
        u64::from(self.0) * NOMINAL_WAKE_PERIOD_MS
    }
}

impl fmt::Display for WakeInstant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "t{}", self.0)
    }
}

/// Discriminated telemetry events.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum TelemetryEventKind {
    Booted,
    LoadEnergized,
    LoadDeEnergized,
    SupplySampled,
    UndervoltageTripped,
    SampleFailed,
    LoadDriveFailed,
    WakeDisarmFailed,
    DutyStateNormalized,
    Custom(u16),
}

impl fmt::Display for TelemetryEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TelemetryEventKind::Booted => f.write_str("booted"),
            TelemetryEventKind::LoadEnergized => f.write_str("load-energized"),
            TelemetryEventKind::LoadDeEnergized => f.write_str("load-de-energized"),
            TelemetryEventKind::SupplySampled => f.write_str("supply-sampled"),
            TelemetryEventKind::UndervoltageTripped => f.write_str("undervoltage-tripped"),
            TelemetryEventKind::SampleFailed => f.write_str("sample-failed"),
            TelemetryEventKind::LoadDriveFailed => f.write_str("load-drive-failed"),
            TelemetryEventKind::WakeDisarmFailed => f.write_str("wake-disarm-failed"),
            TelemetryEventKind::DutyStateNormalized => f.write_str("duty-state-normalized"),
            TelemetryEventKind::Custom(code) => write!(f, "custom({code:#06x})"),
        }
    }
}

impl TelemetryEventKind {
    const BOOTED_CODE: u16 = 0x0000;
    const LOAD_ENERGIZED_CODE: u16 = 0x0001;
    const LOAD_DE_ENERGIZED_CODE: u16 = 0x0002;
    const SUPPLY_SAMPLED_CODE: u16 = 0x0010;
    const UNDERVOLTAGE_TRIPPED_CODE: u16 = 0x0011;
    const SAMPLE_FAILED_CODE: u16 = 0x0012;
    const LOAD_DRIVE_FAILED_CODE: u16 = 0x0020;
    const WAKE_DISARM_FAILED_CODE: u16 = 0x0021;
    const DUTY_STATE_NORMALIZED_CODE: u16 = 0x0022;

    /// Encodes the event into a compact transport-friendly discriminant.
    #[must_use]
    pub const fn to_raw(self) -> u16 {
        match self {
            TelemetryEventKind::Booted => Self::BOOTED_CODE,
            TelemetryEventKind::LoadEnergized => Self::LOAD_ENERGIZED_CODE,
            TelemetryEventKind::LoadDeEnergized => Self::LOAD_DE_ENERGIZED_CODE,
            TelemetryEventKind::SupplySampled => Self::SUPPLY_SAMPLED_CODE,
            TelemetryEventKind::UndervoltageTripped => Self::UNDERVOLTAGE_TRIPPED_CODE,
            TelemetryEventKind::SampleFailed => Self::SAMPLE_FAILED_CODE,
            TelemetryEventKind::LoadDriveFailed => Self::LOAD_DRIVE_FAILED_CODE,
            TelemetryEventKind::WakeDisarmFailed => Self::WAKE_DISARM_FAILED_CODE,
            TelemetryEventKind::DutyStateNormalized => Self::DUTY_STATE_NORMALIZED_CODE,
            TelemetryEventKind::Custom(code) => code,
        }
    }

    /// Decodes a raw discriminant, falling back to [`TelemetryEventKind::Custom`].
    #[must_use]
    pub const fn from_raw(code: u16) -> Self {
        match code {
            Self::BOOTED_CODE => TelemetryEventKind::Booted,
            Self::LOAD_ENERGIZED_CODE => TelemetryEventKind::LoadEnergized,
            Self::LOAD_DE_ENERGIZED_CODE => TelemetryEventKind::LoadDeEnergized,
            Self::SUPPLY_SAMPLED_CODE => TelemetryEventKind::SupplySampled,
            Self::UNDERVOLTAGE_TRIPPED_CODE => TelemetryEventKind::UndervoltageTripped,
            Self::SAMPLE_FAILED_CODE => TelemetryEventKind::SampleFailed,
            Self::LOAD_DRIVE_FAILED_CODE => TelemetryEventKind::LoadDriveFailed,
            Self::WAKE_DISARM_FAILED_CODE => TelemetryEventKind::WakeDisarmFailed,
            Self::DUTY_STATE_NORMALIZED_CODE => TelemetryEventKind::DutyStateNormalized,
            other => TelemetryEventKind::Custom(other),
        }
    }

    /// Returns `true` for events that indicate a peripheral fault.
    #[must_use]
    pub const fn is_fault(self) -> bool {
        matches!(
            self,
            TelemetryEventKind::SampleFailed
                | TelemetryEventKind::LoadDriveFailed
                | TelemetryEventKind::WakeDisarmFailed
                | TelemetryEventKind::DutyStateNormalized
        )
    }
}

/// What caused the load to change level.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum LoadTransitionCause {
    Boot,
    DutyCycle,
    Undervoltage,
}

impl fmt::Display for LoadTransitionCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadTransitionCause::Boot => f.write_str("boot"),
            LoadTransitionCause::DutyCycle => f.write_str("duty-cycle"),
            LoadTransitionCause::Undervoltage => f.write_str("undervoltage"),
        }
    }
}

/// Load transition payload.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct LoadTelemetry {
    pub level: LoadLevel,
    pub cause: LoadTransitionCause,
    /// Ticks spent at the previous level; `None` for the first transition.
    pub ticks_since_previous: Option<u32>,
}

/// Averaged supply reading payload.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SupplyTelemetry {
    pub raw: u16,
    pub threshold: u16,
}

impl SupplyTelemetry {
    #[must_use]
    pub const fn new(raw: u16, threshold: u16) -> Self {
        Self { raw, threshold }
    }

    /// Returns `true` when the reading is strictly below the threshold.
    #[must_use]
    pub const fn is_below_threshold(&self) -> bool {
        self.raw < self.threshold
    }
}

/// Payloads carried alongside telemetry events.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TelemetryPayload {
    None,
    Load(LoadTelemetry),
    Supply(SupplyTelemetry),
    /// Raw duty-state value that was rejected.
    DutyState(u8),
}

impl TelemetryPayload {
    #[must_use]
    pub const fn none() -> Self {
        TelemetryPayload::None
    }
}

impl fmt::Display for TelemetryPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TelemetryPayload::None => Ok(()),
            TelemetryPayload::Load(load) => {
                write!(f, "cause={}", load.cause)?;
                if let Some(ticks) = load.ticks_since_previous {
                    write!(f, " after={ticks}")?;
                }
                Ok(())
            }
            TelemetryPayload::Supply(supply) => {
                write!(f, "raw={} threshold={}", supply.raw, supply.threshold)
            }
            TelemetryPayload::DutyState(raw) => write!(f, "raw={raw}"),
        }
    }
}

/// Telemetry record stored in the ring buffer.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct TelemetryRecord {
    pub id: EventId,
    pub timestamp: WakeInstant,
    pub event: TelemetryEventKind,
    pub details: TelemetryPayload,
}

impl fmt::Display for TelemetryRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{} {} {}", self.id, self.timestamp, self.event)?;
        if !matches!(self.details, TelemetryPayload::None) {
            write!(f, " {}", self.details)?;
        }
        Ok(())
    }
}

/// Telemetry ring buffer type alias.
pub type TelemetryRing<const CAPACITY: usize = TELEMETRY_RING_CAPACITY> =
    HistoryBuf<TelemetryRecord, CAPACITY>;

/// Records telemetry events into a fixed-size ring buffer.
pub struct TelemetryRecorder<const CAPACITY: usize = TELEMETRY_RING_CAPACITY> {
    ring: TelemetryRing<CAPACITY>,
    last_transition_at: Option<WakeInstant>,
    next_event_id: EventId,
}

impl<const CAPACITY: usize> TelemetryRecorder<CAPACITY> {
    /// Creates a new telemetry recorder with an empty history.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            ring: HistoryBuf::new(),
            last_transition_at: None,
            next_event_id: 0,
        }
    }

    /// Returns an iterator over the recorded telemetry in chronological order.
    #[must_use]
    pub fn oldest_first(&self) -> OldestOrdered<'_, TelemetryRecord> {
        self.ring.oldest_ordered()
    }

    /// Returns the most recent telemetry record, if available.
    #[must_use]
    pub fn latest(&self) -> Option<&TelemetryRecord> {
        self.ring.recent()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.ring.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    /// Identifier the next record will receive.
    #[must_use]
    pub fn next_id(&self) -> EventId {
        self.next_event_id
    }

    /// Records an arbitrary telemetry event with the supplied payload.
    pub fn record(
        &mut self,
        event: TelemetryEventKind,
        payload: TelemetryPayload,
        timestamp: WakeInstant,
    ) -> EventId {
        let id = self.next_event_id;
        self.next_event_id = self.next_event_id.wrapping_add(1);

        self.ring.write(TelemetryRecord {
            id,
            timestamp,
            event,
            details: payload,
        });

        id
    }

    /// Records a load transition along with the ticks spent at the previous level.
    pub fn record_load_transition(
        &mut self,
        level: LoadLevel,
        cause: LoadTransitionCause,
        timestamp: WakeInstant,
    ) -> EventId {
        let ticks_since_previous = self
            .last_transition_at
            .map(|previous| timestamp.ticks_since(previous));
        self.last_transition_at = Some(timestamp);

        let payload = TelemetryPayload::Load(LoadTelemetry {
            level,
            cause,
            ticks_since_previous,
        });
        let event = if level.is_energized() {
            TelemetryEventKind::LoadEnergized
        } else {
            TelemetryEventKind::LoadDeEnergized
        };

        self.record(event, payload, timestamp)
    }

    /// Records an averaged supply reading and whether it tripped the latch.
    pub fn record_supply_sample(
        &mut self,
        supply: SupplyTelemetry,
        timestamp: WakeInstant,
    ) -> EventId {
        let event = if supply.is_below_threshold() {
            TelemetryEventKind::UndervoltageTripped
        } else {
            TelemetryEventKind::SupplySampled
        };

        self.record(event, TelemetryPayload::Supply(supply), timestamp)
    }
}

impl<const CAPACITY: usize> Default for TelemetryRecorder<CAPACITY> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_codes_decode_and_unknown_codes_become_custom() {
        let known = [
            TelemetryEventKind::Booted,
            TelemetryEventKind::LoadEnergized,
            TelemetryEventKind::LoadDeEnergized,
            TelemetryEventKind::SupplySampled,
            TelemetryEventKind::UndervoltageTripped,
            TelemetryEventKind::SampleFailed,
            TelemetryEventKind::LoadDriveFailed,
            TelemetryEventKind::WakeDisarmFailed,
            TelemetryEventKind::DutyStateNormalized,
        ];
        for kind in known {
            assert_eq!(TelemetryEventKind::from_raw(kind.to_raw()), kind);
        }

        let unknown = TelemetryEventKind::from_raw(0x0BAD);
        assert_eq!(unknown, TelemetryEventKind::Custom(0x0BAD));
        assert_eq!(unknown.to_raw(), 0x0BAD);
    }

    #[test]
    fn records_ticks_between_load_transitions() {
        let mut recorder = TelemetryRecorder::<8>::new();

        let id1 = recorder.record_load_transition(
            LoadLevel::Energized,
            LoadTransitionCause::Boot,
            WakeInstant::BOOT,
        );
        assert_eq!(id1, 0);

        let first = recorder.latest().copied().unwrap();
        assert_eq!(first.event, TelemetryEventKind::LoadEnergized);
        match first.details {
            TelemetryPayload::Load(details) => assert_eq!(details.ticks_since_previous, None),
            _ => panic!("expected load payload"),
        }

        let id2 = recorder.record_load_transition(
            LoadLevel::DeEnergized,
            LoadTransitionCause::DutyCycle,
            WakeInstant::from_ticks(7_031),
        );
        assert_eq!(id2, 1);

        let second = recorder.latest().copied().unwrap();
        assert_eq!(second.event, TelemetryEventKind::LoadDeEnergized);
        match second.details {
            TelemetryPayload::Load(details) => {
                assert_eq!(details.ticks_since_previous, Some(7_031));
                assert_eq!(details.cause, LoadTransitionCause::DutyCycle);
            }
            _ => panic!("expected load payload"),
        }
    }

    #[test]
    fn supply_samples_below_threshold_are_tagged_as_trips() {
        let mut recorder = TelemetryRecorder::<8>::new();

        recorder.record_supply_sample(SupplyTelemetry::new(721, 721), WakeInstant::from_ticks(110));
        assert_eq!(
            recorder.latest().map(|record| record.event),
            Some(TelemetryEventKind::SupplySampled)
        );

        recorder.record_supply_sample(SupplyTelemetry::new(700, 721), WakeInstant::from_ticks(220));
        assert_eq!(
            recorder.latest().map(|record| record.event),
            Some(TelemetryEventKind::UndervoltageTripped)
        );
    }

    #[test]
    fn ring_keeps_the_most_recent_records_in_order() {
        let mut recorder = TelemetryRecorder::<4>::new();
        for tick in 0..6 {
            recorder.record(
                TelemetryEventKind::SampleFailed,
                TelemetryPayload::none(),
                WakeInstant::from_ticks(tick),
            );
        }

        assert_eq!(recorder.len(), 4);
        assert_eq!(recorder.next_id(), 6);
        let ids: heapless::Vec<EventId, 4> = recorder.oldest_first().map(|record| record.id).collect();
        assert_eq!(ids.as_slice(), &[2, 3, 4, 5]);
    }

    #[test]
    fn nominal_millis_uses_the_wake_period() {
        assert_eq!(WakeInstant::from_ticks(10).nominal_millis(), 81_920);
        assert_eq!(WakeInstant::from_ticks(5).ticks_since(WakeInstant::from_ticks(9)), 0);
    }

    #[test]
    fn transition_causes_render_their_labels() {
        use core::fmt::Write as _;

        let cases = [
            (LoadTransitionCause::Boot, "boot"),
            (LoadTransitionCause::DutyCycle, "duty-cycle"),
            (LoadTransitionCause::Undervoltage, "undervoltage"),
        ];
        for (cause, label) in cases {
            let mut rendered = heapless::String::<16>::new();
            write!(rendered, "{cause}").unwrap();
            assert_eq!(rendered.as_str(), label);
        }
    }
}
