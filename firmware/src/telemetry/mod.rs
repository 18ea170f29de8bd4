//! Mirrors the controller's telemetry ring to the debug log.
//!
//! The core only records into its ring; this module walks the ring after each
//! tick and emits whatever is new through defmt (target) or stdout (host), so
//! a debugger attached to a running board sees every transition without the
//! controller itself knowing about logging.

#![cfg_attr(not(target_os = "none"), allow(dead_code))]

use switch_core::calibration::CalibrationFactor;
use switch_core::config::{Configuration, SelectorReadError};
use switch_core::controller::TickReport;
use switch_core::telemetry::{EventId, TelemetryRecord, TelemetryRecorder};

/// Ids at most this far ahead of the cursor count as new; anything further is
/// treated as already seen after a wrap.
const PENDING_WINDOW: EventId = EventId::MAX / 2;

/// Result of a single mirror pass.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct FlushSummary {
    pub emitted: usize,
    /// Records overwritten in the ring before they could be mirrored.
    pub dropped: u32,
}

/// Cursor over the telemetry ring tracking what has already been logged.
pub struct TelemetryMirror {
    next_id: EventId,
}

impl TelemetryMirror {
    pub const fn new() -> Self {
        Self { next_id: 0 }
    }

    /// Emits every record newer than the previous pass.
    pub fn flush<const N: usize>(&mut self, recorder: &TelemetryRecorder<N>) -> FlushSummary {
        let mut summary = FlushSummary::default();

        for record in recorder.oldest_first() {
            let ahead = record.id.wrapping_sub(self.next_id);
            if ahead > PENDING_WINDOW {
                continue;
            }
            if summary.emitted == 0 && ahead > 0 {
                summary.dropped = ahead;
                emit_dropped(ahead);
            }
            emit_record(record);
            summary.emitted += 1;
        }

        self.next_id = recorder.next_id();
        summary
    }
}

impl Default for TelemetryMirror {
    fn default() -> Self {
        Self::new()
    }
}

/// Logs the resolved configuration once at boot.
pub fn log_boot(config: &Configuration, factor: CalibrationFactor) {
    emit_boot(config, factor);
}

/// Logs that the selectors could not be read and the fallback applies.
pub fn log_selector_fallback(error: &SelectorReadError) {
    emit_selector_fallback(error);
}

/// Per-tick trace, compiled in only for `debug-mode` builds.
#[cfg(feature = "debug-mode")]
pub fn trace_tick(report: &TickReport) {
    emit_tick(report);
}

#[cfg(not(feature = "debug-mode"))]
pub fn trace_tick(_report: &TickReport) {}

#[cfg(target_os = "none")]
fn emit_record(record: &TelemetryRecord) {
    if record.event.is_fault() {
        defmt::warn!("telemetry {}", defmt::Display2Format(record));
    } else {
        defmt::info!("telemetry {}", defmt::Display2Format(record));
    }
}

#[cfg(not(target_os = "none"))]
fn emit_record(record: &TelemetryRecord) {
    println!("telemetry {record}");
}

#[cfg(target_os = "none")]
fn emit_dropped(count: u32) {
    defmt::warn!("telemetry dropped={}", count);
}

#[cfg(not(target_os = "none"))]
fn emit_dropped(count: u32) {
    println!("telemetry dropped={count}");
}

#[cfg(target_os = "none")]
fn emit_boot(config: &Configuration, factor: CalibrationFactor) {
    defmt::info!(
        "boot config={} calibration={}",
        defmt::Display2Format(config),
        defmt::Display2Format(&factor)
    );
}

#[cfg(not(target_os = "none"))]
fn emit_boot(config: &Configuration, factor: CalibrationFactor) {
    println!("boot config={config} calibration={factor}");
}

#[cfg(target_os = "none")]
fn emit_selector_fallback(error: &SelectorReadError) {
    defmt::warn!("selectors unreadable ({}); using fallback", defmt::Display2Format(error));
}

#[cfg(not(target_os = "none"))]
fn emit_selector_fallback(error: &SelectorReadError) {
    println!("selectors unreadable ({error}); using fallback");
}

#[cfg(all(feature = "debug-mode", target_os = "none"))]
fn emit_tick(report: &TickReport) {
    defmt::debug!(
        "tick {} load={} duty={}",
        report.tick.ticks(),
        defmt::Display2Format(&report.load),
        defmt::Display2Format(&report.duty.state)
    );
}

#[cfg(all(feature = "debug-mode", not(target_os = "none")))]
fn emit_tick(report: &TickReport) {
    println!(
        "tick {} load={} duty={}",
        report.tick.ticks(),
        report.load,
        report.duty.state
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use switch_core::telemetry::{TelemetryEventKind, TelemetryPayload, WakeInstant};

    fn record_n<const N: usize>(recorder: &mut TelemetryRecorder<N>, count: u32) {
        for tick in 0..count {
            recorder.record(
                TelemetryEventKind::SupplySampled,
                TelemetryPayload::none(),
                WakeInstant::from_ticks(tick),
            );
        }
    }

    #[test]
    fn flush_emits_only_new_records() {
        let mut recorder = TelemetryRecorder::<8>::new();
        let mut mirror = TelemetryMirror::new();

        record_n(&mut recorder, 3);
        assert_eq!(mirror.flush(&recorder).emitted, 3);
        assert_eq!(mirror.flush(&recorder), FlushSummary::default());

        record_n(&mut recorder, 2);
        assert_eq!(mirror.flush(&recorder).emitted, 2);
    }

    #[test]
    fn flush_reports_records_lost_to_ring_overwrite() {
        let mut recorder = TelemetryRecorder::<4>::new();
        let mut mirror = TelemetryMirror::new();

        record_n(&mut recorder, 10);
        let summary = mirror.flush(&recorder);

        assert_eq!(summary.emitted, 4);
        assert_eq!(summary.dropped, 6);
    }
}
