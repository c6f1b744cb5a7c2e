//! Static configuration handed to [`Pcf50633::new`](crate::Pcf50633::new).

use embassy_time::Duration;

use crate::battery::BatteryScale;
use crate::interface::RetryPolicy;
use crate::irq::{IrqSet, IrqSource};

/// Sub-functions that can be administratively switched off.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Features {
    /// Main battery charger control.
    pub charger: bool,
    /// Forward alarm and periodic tick interrupts to the RTC sink.
    pub rtc: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Config {
    pub features: Features,
    /// Sources left unmasked while suspended.
    pub resumers: IrqSet,
    /// Seconds of on-key hold before the supervisor is asked to shut down.
    pub onkey_seconds_sig_init: u8,
    /// Seconds of on-key hold before the PMU is forced into standby.
    pub onkey_seconds_shutdown: u8,
    /// A battery-full latch this soon after battery insertion is treated as spurious.
    pub battery_full_grace: Duration,
    /// Settling time after USB insertion before the charger is classified.
    pub usb_debounce: Duration,
    /// Requeue delay for the dispatcher after a failed status read or mid-resume.
    pub service_backoff: Duration,
    /// Requeue delay for the USB current limit worker.
    pub curlimit_backoff: Duration,
    pub no_battery_poll_interval: Duration,
    pub ready_poll_interval: Duration,
    pub retry: RetryPolicy,
    pub battery_scale: BatteryScale,
}

impl Config {
    pub const fn new() -> Self {
        Self {
            features: Features {
                charger: true,
                rtc: true,
            },
            resumers: IrqSet::EMPTY
                .with(IrqSource::UsbInserted)
                .with(IrqSource::UsbRemoved)
                .with(IrqSource::Alarm)
                .with(IrqSource::OnkeyFalling)
                .with(IrqSource::Onkey1s)
                .with(IrqSource::LowSystem)
                .with(IrqSource::LowBattery)
                .with(IrqSource::HighTemperature),
            onkey_seconds_sig_init: 4,
            onkey_seconds_shutdown: 8,
            battery_full_grace: Duration::from_secs(2),
            usb_debounce: Duration::from_millis(500),
            service_backoff: Duration::from_millis(10),
            curlimit_backoff: Duration::from_millis(1),
            no_battery_poll_interval: Duration::from_secs(1),
            ready_poll_interval: Duration::from_millis(5),
            retry: RetryPolicy::new(3, Duration::from_millis(1)),
            battery_scale: BatteryScale::new(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}
