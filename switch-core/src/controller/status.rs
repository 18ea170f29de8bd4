//! Read-only status snapshot and its human-readable rendering.

use core::fmt;

use crate::config::Configuration;
use crate::duty::{DutyState, LoadLevel};
use crate::telemetry::WakeInstant;

/// Point-in-time view of the controller state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StatusSnapshot {
    pub now: WakeInstant,
    pub config: Configuration,
    pub duty_state: DutyState,
    pub duty_counter: u32,
    pub measurement_counter: u32,
    pub latched: bool,
    pub load: LoadLevel,
    pub last_supply_raw: Option<u16>,
}

/// Renders a [`StatusSnapshot`] into human-readable lines.
#[derive(Clone, Copy, Debug)]
pub struct StatusFormatter<'a> {
    snapshot: &'a StatusSnapshot,
}

impl<'a> StatusFormatter<'a> {
    #[must_use]
    pub const fn new(snapshot: &'a StatusSnapshot) -> Self {
        Self { snapshot }
    }

    /// Writes the configuration line (e.g. `config 12V full on=7031 off=3516 threshold=721`).
    ///
    /// # Errors
    ///
    /// Propagates writer failures.
    pub fn write_config_line<W: fmt::Write>(&self, writer: &mut W) -> fmt::Result {
        write!(writer, "config {}", self.snapshot.config)
    }

    /// Writes the duty line (e.g. `duty state=ON counter=12 load=energized`).
    ///
    /// # Errors
    ///
    /// Propagates writer failures.
    pub fn write_duty_line<W: fmt::Write>(&self, writer: &mut W) -> fmt::Result {
        write!(
            writer,
            "duty tick={} state={} counter={} load={}",
            self.snapshot.now.ticks(),
            self.snapshot.duty_state,
            self.snapshot.duty_counter,
            self.snapshot.load
        )
    }

    /// Writes the supply line (e.g. `supply latch=clear counter=3 last=812`).
    ///
    /// # Errors
    ///
    /// Propagates writer failures.
    pub fn write_supply_line<W: fmt::Write>(&self, writer: &mut W) -> fmt::Result {
        writer.write_str("supply latch=")?;
        writer.write_str(if self.snapshot.latched {
            "tripped"
        } else {
            "clear"
        })?;
        write!(writer, " counter={} last=", self.snapshot.measurement_counter)?;
        match self.snapshot.last_supply_raw {
            Some(raw) => write!(writer, "{raw}"),
            None => writer.write_str("n/a"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::resolve;
    use heapless::String;

    fn snapshot() -> StatusSnapshot {
        StatusSnapshot {
            now: WakeInstant::from_ticks(42),
            config: resolve(true, false),
            duty_state: DutyState::On,
            duty_counter: 42,
            measurement_counter: 42,
            latched: false,
            load: LoadLevel::Energized,
            last_supply_raw: None,
        }
    }

    #[test]
    fn renders_each_status_line() {
        let snapshot = snapshot();
        let formatter = StatusFormatter::new(&snapshot);

        let mut line: String<96> = String::new();
        formatter.write_config_line(&mut line).unwrap();
        assert_eq!(line.as_str(), "config 12V full on=7031 off=3516 threshold=721");

        line.clear();
        formatter.write_duty_line(&mut line).unwrap();
        assert_eq!(line.as_str(), "duty tick=42 state=ON counter=42 load=energized");

        line.clear();
        formatter.write_supply_line(&mut line).unwrap();
        assert_eq!(line.as_str(), "supply latch=clear counter=42 last=n/a");
    }
}
