#![allow(dead_code)]

use core::convert::Infallible;

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::{ErrorType, OutputPin};
use heapless::Vec as HeaplessVec;
use switch_core::config::Configuration;
use switch_core::controller::Controller;
use switch_core::monitor::{MonitorConfig, SupplySense};
use switch_core::scheduler::{WakeEvent, WakeFlag, WakeTimer};

/// Load pin that remembers its level.
#[derive(Debug, Default)]
pub struct MockLoad {
    pub high: bool,
    pub writes: u32,
}

impl ErrorType for MockLoad {
    type Error = Infallible;
}

impl OutputPin for MockLoad {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        self.high = false;
        self.writes += 1;
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        self.high = true;
        self.writes += 1;
        Ok(())
    }
}

/// Sense front end returning a settable constant reading.
#[derive(Debug)]
pub struct MockSense {
    pub raw: u16,
    pub powered: bool,
    pub bursts: u32,
}

impl MockSense {
    pub fn new(raw: u16) -> Self {
        Self {
            raw,
            powered: false,
            bursts: 0,
        }
    }
}

impl SupplySense for MockSense {
    type Error = Infallible;

    fn power_up(&mut self) {
        self.powered = true;
        self.bursts += 1;
    }

    fn read_raw(&mut self) -> Result<u16, Self::Error> {
        assert!(self.powered, "reading taken with divider disabled");
        Ok(self.raw)
    }

    fn power_down(&mut self) {
        self.powered = false;
    }
}

#[derive(Debug, Default)]
pub struct MockDelay {
    pub total_ms: u64,
}

impl DelayNs for MockDelay {
    fn delay_ns(&mut self, ns: u32) {
        self.total_ms += u64::from(ns / 1_000_000);
    }

    fn delay_ms(&mut self, ms: u32) {
        self.total_ms += u64::from(ms);
    }
}

pub type TestController = Controller<MockLoad, MockSense, MockDelay, 32>;

pub fn boot(config: Configuration, supply: u16) -> TestController {
    Controller::boot(
        config,
        MonitorConfig::default(),
        MockLoad::default(),
        MockSense::new(supply),
        MockDelay::default(),
    )
}

/// Advances the controller by `ticks` wakes, recording the load level after each.
pub fn run_ticks(controller: &mut TestController, ticks: u32) -> HeaplessVec<(u32, bool), 16> {
    let mut edges = HeaplessVec::new();
    let mut previous = controller.load_level().is_energized();
    for _ in 0..ticks {
        let report = controller.on_wake(WakeEvent::default());
        let energized = report.load.is_energized();
        if energized != previous {
            edges
                .push((report.tick.ticks(), energized))
                .expect("edge buffer full");
            previous = energized;
        }
    }
    edges
}

/// Wake timer that fires on the first suspension after each arm, optionally
/// preceded by a number of spurious resumptions.
pub struct MockTimer<'a> {
    pub flag: &'a WakeFlag,
    pub spurious_per_wake: u32,
    pub armed: bool,
    pub suspends: u32,
    remaining: u32,
}

impl<'a> MockTimer<'a> {
    pub fn new(flag: &'a WakeFlag, spurious_per_wake: u32) -> Self {
        Self {
            flag,
            spurious_per_wake,
            armed: false,
            suspends: 0,
            remaining: 0,
        }
    }
}

impl WakeTimer for MockTimer<'_> {
    type Error = Infallible;

    fn arm(&mut self) {
        assert!(!self.armed, "timer re-armed without disarm");
        self.armed = true;
        self.remaining = self.spurious_per_wake;
    }

    fn suspend(&mut self) {
        self.suspends += 1;
        if self.remaining > 0 {
            self.remaining -= 1;
        } else if self.armed {
            self.flag.signal();
        }
    }

    fn disarm(&mut self) -> Result<(), Self::Error> {
        self.armed = false;
        Ok(())
    }
}
