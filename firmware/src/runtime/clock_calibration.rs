//! Oscillator measurement build: drives LSI onto MCO and never returns.
//!
//! The frequency read off PA8 with a counter goes into the calibration table
//! consumed by the `calibration-image` tool.

use embassy_stm32::Peri;
use embassy_stm32::peripherals::{MCO, PA8};
use embassy_stm32::rcc::{Mco, McoPrescaler, McoSource};

pub fn park(mco: Peri<'static, MCO>, pin: Peri<'static, PA8>) -> ! {
    let _output = Mco::new(mco, pin, McoSource::LSI, McoPrescaler::DIV1);
    defmt::info!("clock calibration: LSI on PA8");

    loop {
        cortex_m::asm::wfi();
    }
}
