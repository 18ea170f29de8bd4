//! Board wiring for the STM32G0 load-switch controller.
//!
//! | Signal          | Pin  | Notes                                          |
//! |-----------------|------|------------------------------------------------|
//! | `LOAD_EN`       | PA0  | N-FET gate driver, high = load energized       |
//! | `SEL_12V`       | PA1  | pull-up; open selects 12 V, jumper selects 24 V |
//! | `SEL_PROTECT`   | PA4  | pull-up; jumper to ground enables duty cycling |
//! | `VSENSE_EN_N`   | PA5  | divider enable, active low                     |
//! | `VSENSE`        | PA6  | ADC1 input behind the divider                  |
//! | `MCO`           | PA8  | oscillator output in clock-calibration builds  |

pub mod calibration;
pub mod sense;
pub mod wake;

use embassy_stm32::Peri;
use embassy_stm32::adc::{Adc, AdcChannel};
use embassy_stm32::gpio::{Input, Level, Output, Pull, Speed};
use embassy_stm32::peripherals::{ADC1, PA0, PA1, PA4, PA5, PA6};

use self::sense::DividerSense;

/// Pins and peripherals the controller needs, split out of the HAL singletons.
pub struct BoardResources {
    pub load: Peri<'static, PA0>,
    pub voltage_select: Peri<'static, PA1>,
    pub feature_select: Peri<'static, PA4>,
    pub sense_enable: Peri<'static, PA5>,
    pub sense_input: Peri<'static, PA6>,
    pub adc: Peri<'static, ADC1>,
}

/// Configured board I/O.
pub struct Board {
    pub load: Output<'static>,
    pub voltage_select: Input<'static>,
    pub feature_select: Input<'static>,
    pub sense: DividerSense<'static>,
}

impl Board {
    /// Configures every line. The load starts off until the controller boots
    /// it, and the divider starts disabled.
    pub fn new(resources: BoardResources) -> Self {
        let load = Output::new(resources.load, Level::Low, Speed::Low);
        let voltage_select = Input::new(resources.voltage_select, Pull::Up);
        let feature_select = Input::new(resources.feature_select, Pull::Up);
        let sense_enable = Output::new(resources.sense_enable, Level::High, Speed::Low);
        let adc = Adc::new(resources.adc);
        let channel = resources.sense_input.degrade_adc();

        Self {
            load,
            voltage_select,
            feature_select,
            sense: DividerSense::new(adc, channel, sense_enable),
        }
    }
}
