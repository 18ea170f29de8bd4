//! Oscillator-drift calibration for wake-tick durations.
//!
//! The low-power oscillator that paces the wake timer drifts from part to
//! part. Each chip can carry its measured oscillator frequency in nonvolatile
//! memory; at boot the nominal cycle counts are rescaled by that factor so the
//! physical on/off durations land where the tables intend. A factor that is
//! missing or implausible is ignored and the nominal counts are used as-is.

use core::{convert::Infallible, fmt};

/// Magic byte that marks a programmed calibration record.
pub const CALIBRATION_MAGIC: u8 = 0xCD;
/// Size of the nonvolatile calibration record in bytes.
pub const CALIBRATION_RECORD_LEN: usize = 5;
/// Nominal frequency of the sleep oscillator the cycle tables were computed for.
pub const NOMINAL_SLEEP_CLOCK_HZ: u32 = 128_000;
/// Deviation from the nominal frequency beyond which a factor is discarded.
pub const MAX_SLEEP_CLOCK_DEVIATION_HZ: u32 = 30_000;
/// Nominal frequency of the STM32G0 LSI oscillator clocking the RTC wake timer.
pub const LSI_SLEEP_CLOCK_HZ: u32 = 32_000;
/// Accepted LSI deviation: ±25 % of nominal, the calibration table limit.
pub const LSI_MAX_DEVIATION_HZ: u32 = LSI_SLEEP_CLOCK_HZ / 4;

/// Factor value read back from erased storage.
const ERASED_FACTOR: u32 = 0xFFFF_FFFF;

/// Measured sleep oscillator frequency in Hz.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct CalibrationFactor {
    hz: u32,
}

impl CalibrationFactor {
    /// Sentinel used when no usable calibration is stored.
    pub const ABSENT: Self = Self { hz: 0 };

    /// Wraps a measured frequency. Erased storage maps to [`Self::ABSENT`].
    #[must_use]
    pub const fn from_hz(hz: u32) -> Self {
        if hz == ERASED_FACTOR {
            Self::ABSENT
        } else {
            Self { hz }
        }
    }

    /// Returns the stored frequency in Hz (zero when absent).
    #[must_use]
    pub const fn hz(self) -> u32 {
        self.hz
    }

    /// Returns `true` for the absent sentinel.
    #[must_use]
    pub const fn is_absent(self) -> bool {
        self.hz == 0
    }
}

impl Default for CalibrationFactor {
    fn default() -> Self {
        Self::ABSENT
    }
}

impl fmt::Display for CalibrationFactor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_absent() {
            f.write_str("absent")
        } else {
            write!(f, "{} Hz", self.hz)
        }
    }
}

/// Nominal frequency and tolerance band of a sleep oscillator.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct SleepClock {
    nominal_hz: u32,
    max_deviation_hz: u32,
}

impl SleepClock {
    /// 128 kHz watchdog oscillator the cycle tables were derived from.
    pub const WATCHDOG_128K: Self = Self::new(NOMINAL_SLEEP_CLOCK_HZ, MAX_SLEEP_CLOCK_DEVIATION_HZ);
    /// 32 kHz LSI oscillator the firmware's RTC runs from.
    pub const LSI_32K: Self = Self::new(LSI_SLEEP_CLOCK_HZ, LSI_MAX_DEVIATION_HZ);

    /// Band of ±`percent` around `nominal_hz`, as used when vetting measured
    /// frequencies before they are programmed.
    #[must_use]
    pub fn with_percent_band(nominal_hz: u32, percent: u32) -> Self {
        let deviation = u64::from(nominal_hz) * u64::from(percent) / 100;
        let deviation = u32::try_from(deviation).unwrap_or(u32::MAX);
        Self::new(nominal_hz, deviation)
    }

    #[must_use]
    pub const fn new(nominal_hz: u32, max_deviation_hz: u32) -> Self {
        Self {
            nominal_hz,
            max_deviation_hz,
        }
    }

    #[must_use]
    pub const fn nominal_hz(&self) -> u32 {
        self.nominal_hz
    }

    #[must_use]
    pub const fn max_deviation_hz(&self) -> u32 {
        self.max_deviation_hz
    }

    /// Returns `true` when the factor lies inside the inclusive tolerance band.
    #[must_use]
    pub const fn accepts(&self, factor: CalibrationFactor) -> bool {
        if factor.is_absent() || self.nominal_hz == 0 {
            return false;
        }

        let low = self.nominal_hz.saturating_sub(self.max_deviation_hz);
        let high = self.nominal_hz.saturating_add(self.max_deviation_hz);
        factor.hz >= low && factor.hz <= high
    }

    /// Rescales `raw_count` by `factor / nominal`, rounding down.
    ///
    /// Factors outside the tolerance band (including the absent sentinel)
    /// return `raw_count` unchanged.
    #[must_use]
    pub fn calibrate(&self, factor: CalibrationFactor, raw_count: u32) -> u32 {
        if !self.accepts(factor) {
            return raw_count;
        }

        let scaled = u64::from(factor.hz) * u64::from(raw_count) / u64::from(self.nominal_hz);
        u32::try_from(scaled).unwrap_or(u32::MAX)
    }
}

impl Default for SleepClock {
    fn default() -> Self {
        Self::WATCHDOG_128K
    }
}

/// Calibrates `raw_count` against the default 128 kHz sleep clock.
#[must_use]
pub fn calibrate(factor: CalibrationFactor, raw_count: u32) -> u32 {
    SleepClock::WATCHDOG_128K.calibrate(factor, raw_count)
}

/// Reasons a stored record does not yield a factor.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum CalibrationRecordError {
    /// Magic byte did not match [`CALIBRATION_MAGIC`].
    MissingMagic(u8),
}

impl fmt::Display for CalibrationRecordError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CalibrationRecordError::MissingMagic(found) => {
                write!(f, "calibration magic missing (found {found:#04x})")
            }
        }
    }
}

/// Raw 5-byte nonvolatile layout: big-endian frequency then the magic byte.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct CalibrationRecord {
    bytes: [u8; CALIBRATION_RECORD_LEN],
}

impl CalibrationRecord {
    /// Record as read from erased storage.
    pub const ERASED: Self = Self {
        bytes: [0xFF; CALIBRATION_RECORD_LEN],
    };

    #[must_use]
    pub const fn from_bytes(bytes: [u8; CALIBRATION_RECORD_LEN]) -> Self {
        Self { bytes }
    }

    /// Builds the image programmed for a chip measured at `hz`.
    #[must_use]
    pub const fn encode(hz: u32) -> Self {
        let be = hz.to_be_bytes();
        Self {
            bytes: [be[0], be[1], be[2], be[3], CALIBRATION_MAGIC],
        }
    }

    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; CALIBRATION_RECORD_LEN] {
        &self.bytes
    }

    /// Returns `true` when the magic byte is present.
    #[must_use]
    pub const fn is_programmed(&self) -> bool {
        self.bytes[4] == CALIBRATION_MAGIC
    }

    /// Decodes the stored factor.
    ///
    /// # Errors
    ///
    /// Returns [`CalibrationRecordError::MissingMagic`] when the record was
    /// never programmed.
    pub fn factor(&self) -> Result<CalibrationFactor, CalibrationRecordError> {
        if !self.is_programmed() {
            return Err(CalibrationRecordError::MissingMagic(self.bytes[4]));
        }

        let [b3, b2, b1, b0, _] = self.bytes;
        Ok(CalibrationFactor::from_hz(u32::from_be_bytes([
            b3, b2, b1, b0,
        ])))
    }

    /// Decodes the stored factor, mapping any defect to the absent sentinel.
    #[must_use]
    pub fn factor_or_absent(&self) -> CalibrationFactor {
        self.factor().unwrap_or(CalibrationFactor::ABSENT)
    }
}

/// Access to the nonvolatile calibration record.
pub trait CalibrationStore {
    /// Storage-specific error type.
    type Error;

    /// Reads the raw calibration record.
    ///
    /// # Errors
    ///
    /// Returns the storage error when the record cannot be read.
    fn read_record(&mut self) -> Result<CalibrationRecord, Self::Error>;
}

impl CalibrationStore for CalibrationRecord {
    type Error = Infallible;

    fn read_record(&mut self) -> Result<CalibrationRecord, Self::Error> {
        Ok(*self)
    }
}

/// Loads the calibration factor once at boot.
///
/// Storage errors and unprogrammed records both yield
/// [`CalibrationFactor::ABSENT`]; calibration faults are never surfaced.
pub fn load_factor<S>(store: &mut S) -> CalibrationFactor
where
    S: CalibrationStore,
{
    store
        .read_record()
        .map(|record| record.factor_or_absent())
        .unwrap_or(CalibrationFactor::ABSENT)
}
