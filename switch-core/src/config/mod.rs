//! Boot-time configuration resolved from the two selector jumpers.
//!
//! One jumper picks the supply class (12 V or 24 V battery), which fixes the
//! on/off durations and the undervoltage threshold. The other picks whether
//! the duty cycle runs at all or the device only provides undervoltage
//! protection. Both are sampled once at boot; changing a jumper requires a
//! reset.

use core::fmt;

use embedded_hal::digital::{self, InputPin};

use crate::calibration::{CalibrationFactor, SleepClock};
use crate::duty::DutyTimings;

/// Supply-voltage class selected by the voltage jumper.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum VoltageClass {
    Nominal12V,
    Nominal24V,
}

impl fmt::Display for VoltageClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VoltageClass::Nominal12V => f.write_str("12V"),
            VoltageClass::Nominal24V => f.write_str("24V"),
        }
    }
}

/// Feature set selected by the feature jumper.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum FeatureMode {
    /// Duty cycle plus undervoltage protection.
    FullFeature,
    /// Undervoltage protection only; the load stays on until the latch trips.
    ProtectionOnly,
}

impl FeatureMode {
    /// Returns `true` when the duty-cycle machine is allowed to run.
    #[must_use]
    pub const fn duty_cycle_enabled(self) -> bool {
        matches!(self, FeatureMode::FullFeature)
    }
}

impl fmt::Display for FeatureMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FeatureMode::FullFeature => f.write_str("full"),
            FeatureMode::ProtectionOnly => f.write_str("protection-only"),
        }
    }
}

/// Durations and threshold paired with one supply class.
///
/// Durations count wake ticks of the nominal 8.192 s period. Thresholds are
/// raw 10-bit ADC codes against the 2.56 V reference, after the sense divider.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct VoltageProfile {
    pub class: VoltageClass,
    pub on_cycles: u32,
    pub off_cycles: u32,
    pub undervoltage_threshold: u16,
}

/// 12 V battery: 16 h on, 8 h off, cut off below 10 V (100k/22k divider).
pub const PROFILE_12V: VoltageProfile = VoltageProfile {
    class: VoltageClass::Nominal12V,
    on_cycles: 7_031,
    off_cycles: 3_516,
    undervoltage_threshold: 721,
};

/// 24 V battery: 20 h on, 4 h off, cut off below 20 V (100k/10k divider).
pub const PROFILE_24V: VoltageProfile = VoltageProfile {
    class: VoltageClass::Nominal24V,
    on_cycles: 8_789,
    off_cycles: 1_758,
    undervoltage_threshold: 726,
};

impl VoltageProfile {
    /// Looks up the profile for a supply class.
    #[must_use]
    pub const fn for_class(class: VoltageClass) -> Self {
        match class {
            VoltageClass::Nominal12V => PROFILE_12V,
            VoltageClass::Nominal24V => PROFILE_24V,
        }
    }
}

/// Logical selector positions latched at boot.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Selectors {
    pub voltage: VoltageClass,
    pub feature: FeatureMode,
}

impl Selectors {
    /// Positions assumed when the jumpers cannot be read.
    pub const FALLBACK: Self = Self {
        voltage: VoltageClass::Nominal24V,
        feature: FeatureMode::ProtectionOnly,
    };

    /// Interprets raw line levels: a high voltage line selects 12 V and a low
    /// (jumpered) feature line enables the full feature set.
    #[must_use]
    pub const fn from_levels(voltage_line_high: bool, feature_line_high: bool) -> Self {
        Self {
            voltage: if voltage_line_high {
                VoltageClass::Nominal12V
            } else {
                VoltageClass::Nominal24V
            },
            feature: if feature_line_high {
                FeatureMode::ProtectionOnly
            } else {
                FeatureMode::FullFeature
            },
        }
    }

    /// Samples both selector lines.
    ///
    /// # Errors
    ///
    /// Returns [`SelectorReadError`] naming the first line that failed.
    pub fn read<V, F>(voltage_line: &mut V, feature_line: &mut F) -> Result<Self, SelectorReadError>
    where
        V: InputPin,
        F: InputPin,
    {
        let voltage_high = voltage_line
            .is_high()
            .map_err(|err| SelectorReadError::new(SelectorLine::Voltage, &err))?;
        let feature_high = feature_line
            .is_high()
            .map_err(|err| SelectorReadError::new(SelectorLine::Feature, &err))?;

        Ok(Self::from_levels(voltage_high, feature_high))
    }

    /// Samples both selector lines, falling back to [`Self::FALLBACK`] and
    /// handing the read failure to `on_error`.
    pub fn read_or_fallback<V, F, E>(voltage_line: &mut V, feature_line: &mut F, on_error: E) -> Self
    where
        V: InputPin,
        F: InputPin,
        E: FnOnce(&SelectorReadError),
    {
        match Self::read(voltage_line, feature_line) {
            Ok(selectors) => selectors,
            Err(error) => {
                on_error(&error);
                Self::FALLBACK
            }
        }
    }
}

/// Identifies a selector input.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SelectorLine {
    Voltage,
    Feature,
}

/// Failure reading one of the selector inputs.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct SelectorReadError {
    pub line: SelectorLine,
    pub kind: digital::ErrorKind,
}

impl SelectorReadError {
    fn new<E: digital::Error>(line: SelectorLine, err: &E) -> Self {
        Self {
            line,
            kind: err.kind(),
        }
    }
}

impl fmt::Display for SelectorReadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "failed to read {:?} selector: {:?}", self.line, self.kind)
    }
}

/// Immutable configuration active for the lifetime of the boot.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Configuration {
    pub voltage_class: VoltageClass,
    pub feature_mode: FeatureMode,
    pub on_cycles: u32,
    pub off_cycles: u32,
    pub undervoltage_threshold: u16,
}

impl Configuration {
    /// Pairs the selected profile with the selected feature mode.
    #[must_use]
    pub const fn from_selectors(selectors: Selectors) -> Self {
        let profile = VoltageProfile::for_class(selectors.voltage);
        Self {
            voltage_class: profile.class,
            feature_mode: selectors.feature,
            on_cycles: profile.on_cycles,
            off_cycles: profile.off_cycles,
            undervoltage_threshold: profile.undervoltage_threshold,
        }
    }

    /// Rescales the on/off durations for oscillator drift.
    ///
    /// The threshold is an ADC code rather than a duration and is kept as-is.
    #[must_use]
    pub fn calibrated(self, clock: &SleepClock, factor: CalibrationFactor) -> Self {
        Self {
            on_cycles: clock.calibrate(factor, self.on_cycles),
            off_cycles: clock.calibrate(factor, self.off_cycles),
            ..self
        }
    }

    #[must_use]
    pub const fn duty_timings(&self) -> DutyTimings {
        DutyTimings::new(self.on_cycles, self.off_cycles)
    }
}

impl fmt::Display for Configuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} on={} off={} threshold={}",
            self.voltage_class,
            self.feature_mode,
            self.on_cycles,
            self.off_cycles,
            self.undervoltage_threshold
        )
    }
}

/// Resolves the configuration from raw selector line levels.
#[must_use]
pub const fn resolve(selector_a: bool, selector_b: bool) -> Configuration {
    Configuration::from_selectors(Selectors::from_levels(selector_a, selector_b))
}

/// Resolves the configuration and applies calibration in one step.
#[must_use]
pub fn resolve_calibrated(
    selectors: Selectors,
    clock: &SleepClock,
    factor: CalibrationFactor,
) -> Configuration {
    Configuration::from_selectors(selectors).calibrated(clock, factor)
}
