//! Calibration record stored in the last flash page.
//!
//! The page is programmed once per chip from the image produced by the
//! `calibration-image` host tool. An erased page reads back as all `0xFF`,
//! which the core treats as "no calibration".

use core::convert::Infallible;
use core::ptr;

use switch_core::calibration::{CALIBRATION_RECORD_LEN, CalibrationRecord, CalibrationStore};

/// Start of the last 2 KiB page of the 512 KiB bank.
const CALIBRATION_RECORD_ADDR: *const [u8; CALIBRATION_RECORD_LEN] =
    0x0807_F800 as *const [u8; CALIBRATION_RECORD_LEN];

/// Memory-mapped read of the calibration page.
pub struct FlashCalibration {
    _private: (),
}

impl FlashCalibration {
    pub const fn new() -> Self {
        Self { _private: () }
    }
}

impl CalibrationStore for FlashCalibration {
    type Error = Infallible;

    fn read_record(&mut self) -> Result<CalibrationRecord, Self::Error> {
        // SAFETY: the address is inside on-chip flash, which is always mapped
        // and readable; the array type has alignment 1.
        let bytes = unsafe { ptr::read_volatile(CALIBRATION_RECORD_ADDR) };
        Ok(CalibrationRecord::from_bytes(bytes))
    }
}
