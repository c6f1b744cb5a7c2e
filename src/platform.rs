//! Collaborators the event core reports to.

use crate::irq::IrqSource;

/// Feature an event notification belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Feature {
    /// Main battery charger.
    Charger,
    Rtc,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PmuEvent {
    /// Wall adapter inserted.
    Insert,
    Remove,
    UsbInsert,
    UsbRemove,
    ChargerActive,
    ChargerIdle,
    ChargerChange,
}

/// Keys and switches reported to the input sink.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Key {
    /// The on-key.
    Power,
    /// USB power present.
    Power2,
    /// Wall adapter present.
    Battery,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RtcEvent {
    Alarm,
    Second,
}

/// Signals for the platform power-state sink.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PowerEvent {
    StatusChange,
    LowBattery,
    /// Suspend immediately.
    CriticalSuspend,
}

/// Board glue: event notifier, input sink, RTC sink and power-state sink.
///
/// Methods are called from the deferred tasks with no lock held and must not block.
pub trait Platform {
    /// Charger and USB state changes, consumed by power-status and battery-icon logic.
    fn notify(&self, feature: Feature, event: PmuEvent);

    fn report_key(&self, key: Key, pressed: bool);

    /// Flush pending input reports. Called once at the end of every dispatcher pass.
    fn sync_input(&self) {}

    fn rtc_event(&self, _event: RtcEvent) {}

    fn power_event(&self, event: PowerEvent);

    /// Whether the system supervisor is up and able to handle a shutdown request. Until it is,
    /// low battery escalates straight to [`PowerEvent::CriticalSuspend`].
    fn supervisor_reachable(&self) -> bool {
        false
    }

    /// Ask the supervisor for an orderly power down.
    fn signal_supervisor(&self) {}

    /// A power rail or LED failure was latched. No remediation is attempted.
    fn hardware_fault(&self, _source: IrqSource) {}
}
