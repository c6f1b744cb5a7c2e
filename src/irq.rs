//! Interrupt sources and the five-byte status/mask block.

use crate::regs;

/// Number of interrupt status (and mask) registers.
pub const IRQ_REGS: usize = 5;

/// One bit of the INT1..INT5 block, numbered by register and bit position.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum IrqSource {
    AdapterInserted = 0,
    AdapterRemoved = 1,
    UsbInserted = 2,
    UsbRemoved = 3,
    Alarm = 6,
    Second = 7,

    OnkeyRising = 8,
    OnkeyFalling = 9,
    Exton1Rising = 10,
    Exton1Falling = 11,
    Exton2Rising = 12,
    Exton2Falling = 13,
    Exton3Rising = 14,
    Exton3Falling = 15,

    BatteryFull = 16,
    ChargeHalt = 17,
    ThermalLimitOn = 18,
    ThermalLimitOff = 19,
    UsbLimitOn = 20,
    UsbLimitOff = 21,
    AdcReady = 22,
    Onkey1s = 23,

    LowSystem = 24,
    LowBattery = 25,
    HighTemperature = 26,
    AutoPowerFail = 27,
    Down1PowerFail = 28,
    Down2PowerFail = 29,
    LedPowerFail = 30,
    LedOvervoltage = 31,

    Ldo1PowerFail = 32,
    Ldo2PowerFail = 33,
    Ldo3PowerFail = 34,
    Ldo4PowerFail = 35,
    Ldo5PowerFail = 36,
    Ldo6PowerFail = 37,
    HcLdoPowerFail = 38,
    HcLdoOverload = 39,
}

impl IrqSource {
    /// Every source in register and bit order.
    pub const ALL: [IrqSource; 38] = [
        IrqSource::AdapterInserted,
        IrqSource::AdapterRemoved,
        IrqSource::UsbInserted,
        IrqSource::UsbRemoved,
        IrqSource::Alarm,
        IrqSource::Second,
        IrqSource::OnkeyRising,
        IrqSource::OnkeyFalling,
        IrqSource::Exton1Rising,
        IrqSource::Exton1Falling,
        IrqSource::Exton2Rising,
        IrqSource::Exton2Falling,
        IrqSource::Exton3Rising,
        IrqSource::Exton3Falling,
        IrqSource::BatteryFull,
        IrqSource::ChargeHalt,
        IrqSource::ThermalLimitOn,
        IrqSource::ThermalLimitOff,
        IrqSource::UsbLimitOn,
        IrqSource::UsbLimitOff,
        IrqSource::AdcReady,
        IrqSource::Onkey1s,
        IrqSource::LowSystem,
        IrqSource::LowBattery,
        IrqSource::HighTemperature,
        IrqSource::AutoPowerFail,
        IrqSource::Down1PowerFail,
        IrqSource::Down2PowerFail,
        IrqSource::LedPowerFail,
        IrqSource::LedOvervoltage,
        IrqSource::Ldo1PowerFail,
        IrqSource::Ldo2PowerFail,
        IrqSource::Ldo3PowerFail,
        IrqSource::Ldo4PowerFail,
        IrqSource::Ldo5PowerFail,
        IrqSource::Ldo6PowerFail,
        IrqSource::HcLdoPowerFail,
        IrqSource::HcLdoOverload,
    ];

    /// Offset of the owning register from INT1 (and from INT1M).
    pub const fn register(self) -> usize {
        self as usize / 8
    }

    pub const fn mask(self) -> u8 {
        1 << (self as u8 % 8)
    }

    /// Status register address holding this source.
    pub const fn status_register(self) -> u8 {
        regs::INT1 + self.register() as u8
    }

    /// Mask register address holding this source.
    pub const fn mask_register(self) -> u8 {
        regs::INT1M + self.register() as u8
    }

    /// Power rail and LED failures. These are reported, never remediated.
    pub const fn is_hardware_fault(self) -> bool {
        matches!(
            self,
            IrqSource::AutoPowerFail
                | IrqSource::Down1PowerFail
                | IrqSource::Down2PowerFail
                | IrqSource::LedPowerFail
                | IrqSource::LedOvervoltage
                | IrqSource::Ldo1PowerFail
                | IrqSource::Ldo2PowerFail
                | IrqSource::Ldo3PowerFail
                | IrqSource::Ldo4PowerFail
                | IrqSource::Ldo5PowerFail
                | IrqSource::Ldo6PowerFail
                | IrqSource::HcLdoPowerFail
                | IrqSource::HcLdoOverload
        )
    }

    pub const fn name(self) -> &'static str {
        match self {
            IrqSource::AdapterInserted => "ADPINS",
            IrqSource::AdapterRemoved => "ADPREM",
            IrqSource::UsbInserted => "USBINS",
            IrqSource::UsbRemoved => "USBREM",
            IrqSource::Alarm => "ALARM",
            IrqSource::Second => "SECOND",
            IrqSource::OnkeyRising => "ONKEYR",
            IrqSource::OnkeyFalling => "ONKEYF",
            IrqSource::Exton1Rising => "EXTON1R",
            IrqSource::Exton1Falling => "EXTON1F",
            IrqSource::Exton2Rising => "EXTON2R",
            IrqSource::Exton2Falling => "EXTON2F",
            IrqSource::Exton3Rising => "EXTON3R",
            IrqSource::Exton3Falling => "EXTON3F",
            IrqSource::BatteryFull => "BATFULL",
            IrqSource::ChargeHalt => "CHGHALT",
            IrqSource::ThermalLimitOn => "THLIMON",
            IrqSource::ThermalLimitOff => "THLIMOFF",
            IrqSource::UsbLimitOn => "USBLIMON",
            IrqSource::UsbLimitOff => "USBLIMOFF",
            IrqSource::AdcReady => "ADCRDY",
            IrqSource::Onkey1s => "ONKEY1S",
            IrqSource::LowSystem => "LOWSYS",
            IrqSource::LowBattery => "LOWBAT",
            IrqSource::HighTemperature => "HIGHTMP",
            IrqSource::AutoPowerFail => "AUTOPWRFAIL",
            IrqSource::Down1PowerFail => "DWN1PWRFAIL",
            IrqSource::Down2PowerFail => "DWN2PWRFAIL",
            IrqSource::LedPowerFail => "LEDPWRFAIL",
            IrqSource::LedOvervoltage => "LEDOVP",
            IrqSource::Ldo1PowerFail => "LDO1PWRFAIL",
            IrqSource::Ldo2PowerFail => "LDO2PWRFAIL",
            IrqSource::Ldo3PowerFail => "LDO3PWRFAIL",
            IrqSource::Ldo4PowerFail => "LDO4PWRFAIL",
            IrqSource::Ldo5PowerFail => "LDO5PWRFAIL",
            IrqSource::Ldo6PowerFail => "LDO6PWRFAIL",
            IrqSource::HcLdoPowerFail => "HCLDOPWRFAIL",
            IrqSource::HcLdoOverload => "HCLDOOVL",
        }
    }
}

/// A set of interrupt sources laid out exactly like INT1..INT5 (or INT1M..INT5M).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct IrqSet([u8; IRQ_REGS]);

impl IrqSet {
    pub const EMPTY: IrqSet = IrqSet([0; IRQ_REGS]);

    pub const fn from_bytes(bytes: [u8; IRQ_REGS]) -> Self {
        Self(bytes)
    }

    pub const fn to_bytes(self) -> [u8; IRQ_REGS] {
        self.0
    }

    pub const fn with(mut self, source: IrqSource) -> Self {
        self.0[source.register()] |= source.mask();
        self
    }

    pub const fn contains(&self, source: IrqSource) -> bool {
        self.0[source.register()] & source.mask() != 0
    }

    pub fn insert(&mut self, source: IrqSource) {
        self.0[source.register()] |= source.mask();
    }

    pub fn remove(&mut self, source: IrqSource) {
        self.0[source.register()] &= !source.mask();
    }

    pub fn is_empty(&self) -> bool {
        self.0.iter().all(|b| *b == 0)
    }

    /// Bitwise complement, used to turn a set of wake sources into mask register values.
    pub const fn complement(self) -> Self {
        let b = self.0;
        Self([!b[0], !b[1], !b[2], !b[3], !b[4]])
    }

    /// Sources present in the set, in register and bit order.
    pub fn iter(self) -> impl Iterator<Item = IrqSource> {
        IrqSource::ALL.into_iter().filter(move |s| self.contains(*s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_positions() {
        assert_eq!(IrqSource::Second.register(), 0);
        assert_eq!(IrqSource::Second.mask(), 0x80);
        assert_eq!(IrqSource::OnkeyFalling.status_register(), regs::INT2);
        assert_eq!(IrqSource::OnkeyFalling.mask(), 0x02);
        assert_eq!(IrqSource::AdcReady.status_register(), regs::INT3);
        assert_eq!(IrqSource::AdcReady.mask(), 0x40);
        assert_eq!(IrqSource::LowBattery.mask_register(), regs::INT4M);
        assert_eq!(IrqSource::HcLdoOverload.register(), 4);
        assert_eq!(IrqSource::HcLdoOverload.mask(), 0x80);
    }

    #[test]
    fn test_all_is_in_bit_order() {
        let positions: std::vec::Vec<u8> = IrqSource::ALL.iter().map(|s| *s as u8).collect();
        assert!(positions.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_set_iteration() {
        let set = IrqSet::from_bytes([0x0C, 0x00, 0x40, 0x02, 0x00]);
        let sources: std::vec::Vec<IrqSource> = set.iter().collect();
        assert_eq!(
            sources,
            [
                IrqSource::UsbInserted,
                IrqSource::UsbRemoved,
                IrqSource::AdcReady,
                IrqSource::LowBattery
            ]
        );
        let mut set = set;
        set.remove(IrqSource::UsbRemoved);
        assert!(!set.contains(IrqSource::UsbRemoved));
        assert_eq!(set.to_bytes()[0], 0x04);
    }

    #[test]
    fn test_complement_keeps_resumers_unmasked() {
        let resumers = IrqSet::EMPTY.with(IrqSource::OnkeyFalling).with(IrqSource::UsbInserted);
        let masks = resumers.complement().to_bytes();
        assert_eq!(masks, [0xFB, 0xFD, 0xFF, 0xFF, 0xFF]);
    }
}
