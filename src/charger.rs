//! USB charger state machine: charger classification, current limit tiers and charge enable.

use arbitrary_int::u2;
use bitbybit::bitfield;
use embassy_sync::blocking_mutex::raw::RawMutex;

use crate::adc::{AdcChannel, Averaging};
use crate::gpio::Gpio;
use crate::interface::Interface;
use crate::platform::{Feature, Platform, PmuEvent};
use crate::regs::{self, Mbcc1, Mbcc7};
use crate::timebase::Timebase;
use crate::{Error, Pcf50633};

/// ADCIN1 reading with a 1 A charger's identification resistor.
pub const ADC_NOM_CHG_DETECT_1A: u16 = 6;
/// ADCIN1 reading with nothing (or a plain USB host) attached.
pub const ADC_NOM_CHG_DETECT_NONE: u16 = 43;

const ONE_AMP_THRESHOLD: u16 = (ADC_NOM_CHG_DETECT_NONE + ADC_NOM_CHG_DETECT_1A) / 2;

/// Floor applied when a USB host is attached but no budget has been negotiated.
pub const USB_HOST_MIN_MA: u32 = 100;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ChargerType {
    None,
    /// USB host or other source limited to the negotiated budget.
    HostUsb,
    OneAmp,
}

impl ChargerType {
    pub const fn name(self) -> &'static str {
        match self {
            ChargerType::None => "none",
            ChargerType::HostUsb => "host/500mA usb",
            ChargerType::OneAmp => "charger 1A",
        }
    }
}

/// Classifies the charger from an ADCIN1 sample.
pub fn classify(sample: u16, usb_present: bool) -> ChargerType {
    if sample < ONE_AMP_THRESHOLD {
        ChargerType::OneAmp
    } else if usb_present {
        ChargerType::HostUsb
    } else {
        ChargerType::None
    }
}

/// USB current limit tiers supported by MBCC7.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum UsbCurrentLimit {
    Suspend,
    Ma100,
    Ma500,
    Ma1000,
}

impl UsbCurrentLimit {
    /// Highest tier not exceeding `ma`.
    pub const fn from_ma(ma: u32) -> Self {
        if ma >= 1000 {
            UsbCurrentLimit::Ma1000
        } else if ma >= 500 {
            UsbCurrentLimit::Ma500
        } else if ma >= 100 {
            UsbCurrentLimit::Ma100
        } else {
            UsbCurrentLimit::Suspend
        }
    }

    pub const fn ma(self) -> u32 {
        match self {
            UsbCurrentLimit::Suspend => 0,
            UsbCurrentLimit::Ma100 => 100,
            UsbCurrentLimit::Ma500 => 500,
            UsbCurrentLimit::Ma1000 => 1000,
        }
    }

    /// Enough current to charge the battery.
    pub const fn charging_capable(self) -> bool {
        matches!(self, UsbCurrentLimit::Ma500 | UsbCurrentLimit::Ma1000)
    }

    fn bits(self) -> u2 {
        u2::new(match self {
            UsbCurrentLimit::Ma100 => 0,
            UsbCurrentLimit::Ma500 => 1,
            UsbCurrentLimit::Ma1000 => 2,
            UsbCurrentLimit::Suspend => 3,
        })
    }

    fn from_bits(bits: u2) -> Self {
        match bits.value() {
            0 => UsbCurrentLimit::Ma100,
            1 => UsbCurrentLimit::Ma500,
            2 => UsbCurrentLimit::Ma1000,
            _ => UsbCurrentLimit::Suspend,
        }
    }
}

/// Charger state machine mode reported in MBCS2.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ChargerMode {
    Play,
    UsbPrecharge,
    UsbPrechargeWait,
    UsbFast,
    UsbFastWait,
    UsbSuspend,
    AdapterPrecharge,
    AdapterPrechargeWait,
    AdapterFast,
    AdapterFastWait,
    BatteryFull,
    Halt,
    Reserved(u8),
}

impl ChargerMode {
    pub fn from_mbcs2(mbcs2: u8) -> Self {
        match mbcs2 & 0x0F {
            0x0 => ChargerMode::Play,
            0x1 => ChargerMode::UsbPrecharge,
            0x2 => ChargerMode::UsbPrechargeWait,
            0x3 => ChargerMode::UsbFast,
            0x4 => ChargerMode::UsbFastWait,
            0x5 => ChargerMode::UsbSuspend,
            0x6 => ChargerMode::AdapterPrecharge,
            0x7 => ChargerMode::AdapterPrechargeWait,
            0x8 => ChargerMode::AdapterFast,
            0x9 => ChargerMode::AdapterFastWait,
            0xA => ChargerMode::BatteryFull,
            0xB => ChargerMode::Halt,
            other => ChargerMode::Reserved(other),
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            ChargerMode::Play => "play-only",
            ChargerMode::UsbPrecharge => "pre-charge (USB)",
            ChargerMode::UsbPrechargeWait => "pre-charge wait (USB)",
            ChargerMode::UsbFast => "fast-charge (USB)",
            ChargerMode::UsbFastWait => "fast-charge wait (USB)",
            ChargerMode::UsbSuspend => "suspend (USB)",
            ChargerMode::AdapterPrecharge => "pre-charge (adapter)",
            ChargerMode::AdapterPrechargeWait => "pre-charge wait (adapter)",
            ChargerMode::AdapterFast => "fast-charge (adapter)",
            ChargerMode::AdapterFastWait => "fast-charge wait (adapter)",
            ChargerMode::BatteryFull => "battery full",
            ChargerMode::Halt => "halt",
            ChargerMode::Reserved(_) => "reserved",
        }
    }
}

/// Accumulated charger and input state.
#[bitfield(u16, default = 0)]
#[derive(Debug, PartialEq, Eq)]
pub struct ChargerFlags {
    #[bit(0, rw)]
    pub charge_enabled: bool,
    /// Wall adapter present.
    #[bit(1, rw)]
    pub charger_present: bool,
    #[bit(2, rw)]
    pub usb_present: bool,
    #[bit(3, rw)]
    pub charge_error: bool,
    /// Thermal limit active.
    #[bit(4, rw)]
    pub charge_protected: bool,
    #[bit(5, rw)]
    pub charge_ready: bool,
    /// The RTC sink wants periodic tick events.
    #[bit(8, rw)]
    pub rtc_second: bool,
    #[bit(9, rw)]
    pub power_pressed: bool,
}

impl ChargerFlags {
    /// Names of the charger flags that are set.
    pub fn names(self) -> impl Iterator<Item = &'static str> {
        [
            (self.charge_enabled(), "enabled"),
            (self.charger_present(), "charger_present"),
            (self.usb_present(), "usb_present"),
            (self.charge_error(), "error"),
            (self.charge_protected(), "protection"),
            (self.charge_ready(), "ready"),
        ]
        .into_iter()
        .filter_map(|(set, name)| set.then_some(name))
    }
}

impl<M, I, T, P> Pcf50633<M, I, T, P>
where
    M: RawMutex,
    I: Interface,
    T: Timebase,
    P: Platform,
{
    pub fn flags(&self) -> ChargerFlags {
        self.with_state(|s| s.flags)
    }

    /// Classifies a charger identification sample and applies the matching policy.
    pub(crate) async fn configure_for_charger(&self, sample: u16) -> Result<(), Error<I::Error>> {
        let charger = classify(sample, self.flags().usb_present());
        info!("charger type {} (adc {})", charger.name(), sample);
        self.apply_charger_policy(charger).await
    }

    /// Sets the USB current limit for `charger` and opens the fast charge ceiling.
    pub async fn apply_charger_policy(&self, charger: ChargerType) -> Result<(), Error<I::Error>> {
        match charger {
            ChargerType::None => self.set_current_limit(0).await?,
            ChargerType::HostUsb => {
                let last = self.last_current_limit_ma();
                let ma = if last > USB_HOST_MIN_MA {
                    last
                } else {
                    USB_HOST_MIN_MA
                };
                self.set_current_limit(ma).await?
            }
            ChargerType::OneAmp => {
                self.set_current_limit(1000).await?;
                // GPO would fight the charger for the power pins.
                self.gpio_set(Gpio::Gpo, false).await?
            }
        }
        // The USB limit caps the current; the charge ceiling itself is left wide open.
        self.reg_write(regs::MBCC5, regs::MBCC5_FAST_CHARGE_MAX).await
    }

    /// Programs the highest USB current tier not exceeding `ma`, enables charging if the tier
    /// allows it and restarts charging from any stale battery-full state.
    pub async fn set_current_limit(&self, ma: u32) -> Result<(), Error<I::Error>> {
        let tier = UsbCurrentLimit::from_ma(ma);
        debug!("USB current limit {} mA, tier {} mA", ma, tier.ma());
        self.with_state(|s| s.last_current_limit_ma = ma);

        self.program_usb_tier(tier).await?;
        self.charge_enable(tier.charging_capable()).await?;

        self.clear_bits(regs::MBCC1, regs::MBCC1_AUTORES).await?;
        self.set_bits(regs::MBCC1, regs::MBCC1_RESUME, regs::MBCC1_RESUME)
            .await?;
        self.set_bits(regs::MBCC1, regs::MBCC1_AUTORES, regs::MBCC1_AUTORES)
            .await
    }

    /// Sets or clears the charge enable bit. Does nothing if the charger feature is disabled.
    pub async fn charge_enable(&self, on: bool) -> Result<(), Error<I::Error>> {
        if !self.config.features.charger {
            return Ok(());
        }
        let chgena = Mbcc1::new_with_raw_value(0)
            .with_charge_enable(on)
            .raw_value();
        self.set_bits(regs::MBCC1, regs::MBCC1_CHGENA, chgena).await?;

        let usb_present = self.with_state(|s| {
            s.flags = s.flags.with_charge_enabled(on);
            s.flags.usb_present()
        });
        if on {
            if usb_present && self.usb_current_limit().await?.charging_capable() {
                self.platform.notify(Feature::Charger, PmuEvent::ChargerActive);
            }
        } else {
            self.platform.notify(Feature::Charger, PmuEvent::ChargerIdle);
        }
        Ok(())
    }

    /// Writes the MBCC7 USB tier field without touching charge enable or bookkeeping.
    pub(crate) async fn program_usb_tier(&self, tier: UsbCurrentLimit) -> Result<(), Error<I::Error>> {
        let limit = Mbcc7::new_with_raw_value(0)
            .with_usb_limit(tier.bits())
            .raw_value();
        self.set_bits(regs::MBCC7, regs::MBCC7_USB_MASK, limit)
            .await
    }

    /// The USB current tier currently programmed.
    pub async fn usb_current_limit(&self) -> Result<UsbCurrentLimit, Error<I::Error>> {
        let mbcc7 = Mbcc7::new_with_raw_value(self.reg_read(regs::MBCC7).await?);
        Ok(UsbCurrentLimit::from_bits(mbcc7.usb_limit()))
    }

    pub async fn charger_mode(&self) -> Result<ChargerMode, Error<I::Error>> {
        Ok(ChargerMode::from_mbcs2(self.reg_read(regs::MBCS2).await?))
    }

    /// Classifies the attached charger now. Returns the type and the raw ADCIN1 sample.
    pub async fn charger_type(&self) -> Result<(ChargerType, u16), Error<I::Error>> {
        let sample = self
            .adc_sync_read(AdcChannel::Adcin1, Averaging::Sixteen)
            .await?;
        Ok((classify(sample, self.flags().usb_present()), sample))
    }
}
