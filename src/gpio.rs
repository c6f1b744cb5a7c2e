use embassy_sync::blocking_mutex::raw::RawMutex;

use crate::interface::Interface;
use crate::platform::Platform;
use crate::regs;
use crate::timebase::Timebase;
use crate::{Error, Pcf50633};

/// General purpose outputs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum Gpio {
    Gpio1 = 0,
    Gpio2 = 1,
    Gpio3 = 2,
    Gpo = 3,
}

impl Gpio {
    const fn register(self) -> u8 {
        regs::GPIO1CFG + self as u8
    }
}

impl<M, I, T, P> Pcf50633<M, I, T, P>
where
    M: RawMutex,
    I: Interface,
    T: Timebase,
    P: Platform,
{
    /// Drives `gpio` high or low.
    pub async fn gpio_set(&self, gpio: Gpio, on: bool) -> Result<(), Error<I::Error>> {
        let value = if on { regs::GPIOXCFG_GPOSEL_1 } else { 0 };
        self.set_bits(gpio.register(), regs::GPIOXCFG_GPOSEL_MASK, value)
            .await
    }

    /// Whether `gpio` is driven high, either directly or as an inverted low.
    pub async fn gpio_get(&self, gpio: Gpio) -> Result<bool, Error<I::Error>> {
        let sel = self.reg_read(gpio.register()).await? & regs::GPIOXCFG_GPOSEL_MASK;
        Ok(sel == regs::GPIOXCFG_GPOSEL_1 || sel == regs::GPIOXCFG_INVERSE)
    }
}
