//! Supply-voltage front end: switched resistor divider into ADC1.

use core::convert::Infallible;

use embassy_stm32::adc::{Adc, AnyAdcChannel, Resolution, SampleTime};
use embassy_stm32::gpio::Output;
use embassy_stm32::peripherals::ADC1;
use switch_core::monitor::SupplySense;

/// Divider sense with an active-low enable line.
///
/// Conversions run at 10-bit resolution so raw codes line up with the
/// undervoltage thresholds.
pub struct DividerSense<'d> {
    adc: Adc<'d, ADC1>,
    channel: AnyAdcChannel<ADC1>,
    enable_n: Output<'d>,
}

impl<'d> DividerSense<'d> {
    pub fn new(mut adc: Adc<'d, ADC1>, channel: AnyAdcChannel<ADC1>, enable_n: Output<'d>) -> Self {
        adc.set_resolution(Resolution::BITS10);
        adc.set_sample_time(SampleTime::CYCLES160_5);
        Self {
            adc,
            channel,
            enable_n,
        }
    }
}

impl SupplySense for DividerSense<'_> {
    type Error = Infallible;

    fn power_up(&mut self) {
        self.enable_n.set_low();
    }

    fn read_raw(&mut self) -> Result<u16, Self::Error> {
        Ok(self.adc.blocking_read(&mut self.channel))
    }

    fn power_down(&mut self) {
        self.enable_n.set_high();
    }
}
