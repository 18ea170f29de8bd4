//! One-shot wake timer on the RTC wakeup unit.
//!
//! The RTC runs from the LSI oscillator. Dividing by 16 gives a 2 kHz wakeup
//! clock, so a reload of 16383 expires after 8.192 s. The interrupt handler
//! stops the timer and raises [`WAKE_FLAG`]; everything else happens in the
//! scheduler's context.

use core::fmt;

use embassy_stm32::Peri;
use embassy_stm32::pac;
use embassy_stm32::pac::rtc::vals::{Key, Wucksel};
use embassy_stm32::peripherals::RTC;
use embassy_stm32::rtc::{Rtc, RtcConfig};
use pac::interrupt;
use portable_atomic::{AtomicU32, Ordering};
use switch_core::scheduler::{WakeFlag, WakeTimer};

/// Raised by the RTC wakeup interrupt.
pub static WAKE_FLAG: WakeFlag = WakeFlag::new();

/// Count of wakeup interrupts serviced since boot.
static WAKEUP_IRQS: AtomicU32 = AtomicU32::new(0);

/// EXTI line the RTC wakeup event is routed to.
const RTC_WAKEUP_EXTI_LINE: usize = 19;
/// IMR register index for EXTI lines 0-31.
const IMR1_REG_IDX: usize = 0;

/// Wakeup clock ticks per period, minus one.
const WAKEUP_RELOAD: u16 = 16_383;

/// Failure to stop the wakeup timer.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum WakeTimerError {
    StillRunning,
}

impl fmt::Display for WakeTimerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WakeTimerError::StillRunning => f.write_str("wakeup timer still enabled after disarm"),
        }
    }
}

/// Returns the number of wakeup interrupts serviced since boot.
#[cfg(feature = "debug-mode")]
pub fn wakeup_irqs() -> u32 {
    WAKEUP_IRQS.load(Ordering::Relaxed)
}

/// RTC wakeup unit driving the sleep/wake loop.
pub struct RtcWakeTimer {
    _rtc: Rtc,
}

impl RtcWakeTimer {
    /// Enables the RTC, routes its wakeup event to the NVIC, and selects the
    /// low-power mode entered on `suspend`.
    pub fn new(rtc: Peri<'static, RTC>) -> Self {
        let rtc = Rtc::new(rtc, RtcConfig::default());

        pac::EXTI
            .imr(IMR1_REG_IDX)
            .modify(|w| w.set_line(RTC_WAKEUP_EXTI_LINE, true));

        // SAFETY: the handler only touches the RTC registers and WAKE_FLAG.
        unsafe {
            cortex_m::peripheral::NVIC::unmask(interrupt::RTC_TAMP);
        }

        configure_sleep_depth();

        Self { _rtc: rtc }
    }
}

impl WakeTimer for RtcWakeTimer {
    type Error = WakeTimerError;

    fn arm(&mut self) {
        with_unlocked(|| {
            pac::RTC.cr().modify(|w| w.set_wute(false));
            while !pac::RTC.icsr().read().wutwf() {}
            pac::RTC.wutr().write(|w| w.set_wut(WAKEUP_RELOAD));
            pac::RTC.cr().modify(|w| {
                w.set_wucksel(Wucksel::DIV16);
                w.set_wutie(true);
                w.set_wute(true);
            });
        });
        pac::RTC.scr().write(|w| w.set_cwutf(true));
    }

    fn suspend(&mut self) {
        cortex_m::asm::dsb();
        cortex_m::asm::wfi();
    }

    fn disarm(&mut self) -> Result<(), Self::Error> {
        stop_wakeup();
        if pac::RTC.cr().read().wute() {
            Err(WakeTimerError::StillRunning)
        } else {
            Ok(())
        }
    }
}

#[interrupt]
fn RTC_TAMP() {
    stop_wakeup();
    WAKEUP_IRQS.fetch_add(1, Ordering::Relaxed);
    WAKE_FLAG.signal();
}

fn stop_wakeup() {
    with_unlocked(|| {
        pac::RTC.cr().modify(|w| {
            w.set_wutie(false);
            w.set_wute(false);
        });
    });
    pac::RTC.scr().write(|w| w.set_cwutf(true));
}

fn with_unlocked<R>(f: impl FnOnce() -> R) -> R {
    pac::RTC.wpr().write(|w| w.set_key(Key::DEACTIVATE1));
    pac::RTC.wpr().write(|w| w.set_key(Key::DEACTIVATE2));
    let result = f();
    pac::RTC.wpr().write(|w| w.set_key(Key::ACTIVATE));
    result
}

/// Stop mode in normal builds; plain sleep with `debug-mode` so the debugger
/// stays attached.
fn configure_sleep_depth() {
    // SAFETY: SCB is only touched here, before the wake loop starts.
    let mut core = unsafe { cortex_m::Peripherals::steal() };

    #[cfg(not(feature = "debug-mode"))]
    {
        pac::PWR
            .cr1()
            .modify(|w| w.set_lpms(pac::pwr::vals::Lpms::STOP1));
        core.SCB.set_sleepdeep();
    }

    #[cfg(feature = "debug-mode")]
    core.SCB.clear_sleepdeep();
}
