//! Battery voltage from the BATSNS ADC channel.
//!
//! The conversion is a fixed linear scale, not a calibrated gauge. The boundaries live in
//! [`BatteryScale`] so boards can override them.

use embassy_sync::blocking_mutex::raw::RawMutex;

use crate::adc::{AdcChannel, Averaging};
use crate::interface::Interface;
use crate::platform::Platform;
use crate::timebase::Timebase;
use crate::{Error, Pcf50633};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BatteryScale {
    /// Voltage represented by a full scale ADC reading.
    pub adc_full_scale_mv: u32,
    /// Number of ADC codes in full scale.
    pub adc_codes: u32,
    /// Voltage reported as 0 %.
    pub empty_mv: u16,
    /// Voltage reported as 100 %.
    pub full_mv: u16,
}

impl BatteryScale {
    pub const fn new() -> Self {
        Self {
            adc_full_scale_mv: 6000,
            adc_codes: 1024,
            empty_mv: 2800,
            full_mv: 4200,
        }
    }

    pub const fn millivolts(&self, adc: u16) -> u16 {
        if self.adc_codes == 0 {
            return 0;
        }
        (adc as u32 * self.adc_full_scale_mv / self.adc_codes) as u16
    }

    /// Charge estimate in percent, clamped to 0..=100.
    pub fn percent(&self, millivolts: u16) -> u8 {
        let span = self.full_mv.saturating_sub(self.empty_mv) as u32;
        if span == 0 {
            return if millivolts >= self.full_mv { 100 } else { 0 };
        }
        let above = millivolts.saturating_sub(self.empty_mv) as u32;
        (above * 100 / span).min(100) as u8
    }
}

impl Default for BatteryScale {
    fn default() -> Self {
        Self::new()
    }
}

impl<M, I, T, P> Pcf50633<M, I, T, P>
where
    M: RawMutex,
    I: Interface,
    T: Timebase,
    P: Platform,
{
    /// Battery voltage in millivolts, 16 sample average.
    pub async fn battery_voltage(&self) -> Result<u16, Error<I::Error>> {
        let adc = self
            .adc_sync_read(AdcChannel::BatterySense, Averaging::Sixteen)
            .await?;
        let mv = self.config.battery_scale.millivolts(adc);
        debug!("battery {} mV (adc {})", mv, adc);
        Ok(mv)
    }

    pub async fn battery_percent(&self) -> Result<u8, Error<I::Error>> {
        let mv = self.battery_voltage().await?;
        Ok(self.config.battery_scale.percent(mv))
    }
}
