//! PCF50633 register map and bitfield views of the registers the event core touches.

use arbitrary_int::{u2, u4};
use bitbybit::bitfield;

pub const VERSION: u8 = 0x00;
pub const VARIANT: u8 = 0x01;

pub const INT1: u8 = 0x02;
pub const INT2: u8 = 0x03;
pub const INT3: u8 = 0x04;
pub const INT4: u8 = 0x05;
pub const INT5: u8 = 0x06;

pub const INT1M: u8 = 0x07;
pub const INT2M: u8 = 0x08;
pub const INT3M: u8 = 0x09;
pub const INT4M: u8 = 0x0A;
pub const INT5M: u8 = 0x0B;

pub const OOCSHDWN: u8 = 0x0C;
pub const OOCSTAT: u8 = 0x12;

pub const GPIOCTL: u8 = 0x13;
pub const GPIO1CFG: u8 = 0x14;
pub const GPIO2CFG: u8 = 0x15;
pub const GPIO3CFG: u8 = 0x16;
pub const GPOCFG: u8 = 0x17;

pub const MBCC1: u8 = 0x43;
pub const MBCC5: u8 = 0x47;
pub const MBCC7: u8 = 0x49;
pub const MBCS1: u8 = 0x4B;
pub const MBCS2: u8 = 0x4C;
pub const MBCS3: u8 = 0x4D;

pub const ADCC3: u8 = 0x52;
pub const ADCC2: u8 = 0x53;
pub const ADCC1: u8 = 0x54;
pub const ADCS1: u8 = 0x55;
pub const ADCS2: u8 = 0x56;
pub const ADCS3: u8 = 0x57;

/// Highest register address.
pub const LAST: u8 = 0xFF;

pub const OOCSHDWN_GOSTDBY: u8 = 0x01;
pub const OOCSHDWN_TOTRST: u8 = 0x04;

pub const MBCC1_CHGENA: u8 = 0x01;
pub const MBCC1_AUTORES: u8 = 0x04;
pub const MBCC1_RESUME: u8 = 0x08;

/// Fast charge current ceiling, full scale.
pub const MBCC5_FAST_CHARGE_MAX: u8 = 0xFF;

pub const MBCC7_USB_MASK: u8 = 0x03;

pub const ADCC2_RATIO_NONE: u8 = 0x00;
pub const ADCC3_ACCSW_EN: u8 = 0x01;
pub const ADCS3_ADCDAT1L_MASK: u8 = 0x03;

pub const GPIOXCFG_GPOSEL_MASK: u8 = 0x0F;
pub const GPIOXCFG_GPOSEL_1: u8 = 0x07;
pub const GPIOXCFG_INVERSE: u8 = 0x08;

/// ADC control register 1: conversion start, resolution, averaging and input mux.
#[bitfield(u8, default = 0)]
#[derive(Debug, PartialEq, Eq)]
pub struct Adcc1 {
    #[bit(0, rw)]
    pub start: bool,
    #[bit(1, rw)]
    pub resolution_10bit: bool,
    #[bits(2..=3, rw)]
    pub average: u2,
    #[bits(4..=7, rw)]
    pub mux: u4,
}

/// Main battery charger control 1.
#[bitfield(u8, default = 0)]
#[derive(Debug, PartialEq, Eq)]
pub struct Mbcc1 {
    #[bit(0, rw)]
    pub charge_enable: bool,
    #[bit(1, rw)]
    pub auto_stop: bool,
    #[bit(2, rw)]
    pub auto_resume: bool,
    #[bit(3, rw)]
    pub resume: bool,
    #[bit(4, rw)]
    pub restart: bool,
}

/// Main battery charger control 7.
#[bitfield(u8, default = 0)]
#[derive(Debug, PartialEq, Eq)]
pub struct Mbcc7 {
    /// USB current limit tier
    #[bits(0..=1, rw)]
    pub usb_limit: u2,
    #[bit(2, rw)]
    pub battery_temp_enable: bool,
    #[bits(6..=7, rw)]
    pub battery_system_max: u2,
}

/// Main battery charger status 1.
#[bitfield(u8, default = 0)]
#[derive(Debug, PartialEq, Eq)]
pub struct Mbcs1 {
    #[bit(0, rw)]
    pub usb_present: bool,
    #[bit(1, rw)]
    pub usb_ok: bool,
    #[bit(2, rw)]
    pub adapter_present: bool,
    #[bit(3, rw)]
    pub adapter_ok: bool,
    #[bit(6, rw)]
    pub precharge_watchdog_expired: bool,
    #[bit(7, rw)]
    pub watchdog_expired: bool,
}

impl Mbcs1 {
    /// USB is both present and within valid voltage range.
    pub fn usb_valid(&self) -> bool {
        self.usb_present() && self.usb_ok()
    }
}

/// Main battery charger status 3.
#[bitfield(u8, default = 0)]
#[derive(Debug, PartialEq, Eq)]
pub struct Mbcs3 {
    #[bit(0, rw)]
    pub usb_limit_play: bool,
    #[bit(1, rw)]
    pub usb_limit_charge: bool,
    #[bit(2, rw)]
    pub thermal_limit_play: bool,
    #[bit(3, rw)]
    pub thermal_limit_charge: bool,
    /// Battery voltage above the presence threshold
    #[bit(6, rw)]
    pub battery_present: bool,
}

/// On/off control shutdown register.
#[bitfield(u8, default = 0)]
#[derive(Debug, PartialEq, Eq)]
pub struct Oocshdwn {
    #[bit(0, rw)]
    pub go_standby: bool,
    #[bit(2, rw)]
    pub total_reset: bool,
    #[bit(3, rw)]
    pub cold_boot: bool,
}
