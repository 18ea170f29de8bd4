use cortex_m::interrupt;
use cortex_m::register::primask;
use cortex_m_rt::entry;
use critical_section::{self, RawRestoreState};
use defmt_rtt as _;
use embassy_stm32 as hal;
use embassy_stm32::rcc::{LsConfig, RtcClockSource};
use embassy_time::Delay;
use switch_core::calibration::{SleepClock, load_factor};
use switch_core::config::{Selectors, resolve_calibrated};
use switch_core::controller::Controller;
use switch_core::monitor::MonitorConfig;
use switch_core::scheduler::{WakeEvent, WakeScheduler};

use crate::hw::calibration::FlashCalibration;
use crate::hw::wake::{RtcWakeTimer, WAKE_FLAG};
use crate::hw::{Board, BoardResources};
use crate::telemetry::{self, TelemetryMirror};

#[cfg(feature = "clock-calibration")]
mod clock_calibration;

critical_section::set_impl!(InterruptCriticalSection);

struct InterruptCriticalSection;

unsafe impl critical_section::Impl for InterruptCriticalSection {
    unsafe fn acquire() -> RawRestoreState {
        let primask = primask::read();
        interrupt::disable();
        primask.is_active()
    }

    unsafe fn release(restore_state: RawRestoreState) {
        if restore_state {
            unsafe {
                interrupt::enable();
            }
        }
    }
}

fn rcc_config() -> hal::rcc::Config {
    let mut rcc = hal::rcc::Config::default();
    rcc.ls = LsConfig {
        rtc: RtcClockSource::LSI,
        lsi: true,
        lse: None,
    };
    #[cfg(not(feature = "debug-mode"))]
    {
        rcc.ahb_pre = hal::rcc::AHBPrescaler::DIV8;
    }
    rcc
}

#[entry]
fn main() -> ! {
    let mut config = hal::Config::default();
    config.rcc = rcc_config();
    let p = hal::init(config);

    #[cfg(feature = "clock-calibration")]
    clock_calibration::park(p.MCO, p.PA8);

    let mut board = Board::new(BoardResources {
        load: p.PA0,
        voltage_select: p.PA1,
        feature_select: p.PA4,
        sense_enable: p.PA5,
        sense_input: p.PA6,
        adc: p.ADC1,
    });

    let selectors = Selectors::read_or_fallback(
        &mut board.voltage_select,
        &mut board.feature_select,
        telemetry::log_selector_fallback,
    );
    let factor = load_factor(&mut FlashCalibration::new());
    let config = resolve_calibrated(selectors, &SleepClock::LSI_32K, factor);
    telemetry::log_boot(&config, factor);

    let mut controller: Controller<_, _, _> = Controller::boot(
        config,
        MonitorConfig::default(),
        board.load,
        board.sense,
        Delay,
    );
    let mut mirror = TelemetryMirror::new();
    mirror.flush(controller.telemetry());

    let mut scheduler = WakeScheduler::new(RtcWakeTimer::new(p.RTC), &WAKE_FLAG);
    scheduler.run(&mut |event: WakeEvent| {
        let report = controller.on_wake(event);
        mirror.flush(controller.telemetry());
        telemetry::trace_tick(&report);

        #[cfg(feature = "debug-mode")]
        defmt::debug!(
            "rtc wakeups={} spurious={}",
            crate::hw::wake::wakeup_irqs(),
            event.spurious_resumes
        );
    })
}
