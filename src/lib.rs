//! PCF50633 power management unit event core
//!
//! This crate drives the parts of the PCF50633 that react to events:
//! - Interrupt dispatch over the INT1..INT5 status block
//! - ADC scheduling (one conversion in flight, strict FIFO completion)
//! - USB charger classification and current limit control
//! - Suspend/resume coordination of register access
//! - Deferred USB current limit updates and the no-battery poller
//!
//! One [`Pcf50633`] owns all state for one physical device. Its long running tasks are futures
//! ([`Pcf50633::run`] combines them), so it is usually placed in a `StaticCell` and shared by
//! reference.

#![cfg_attr(not(test), no_std)]

// This mod MUST go first, so that the others see its macros.
pub(crate) mod fmt;

pub mod adc;
pub mod battery;
pub mod charger;
pub mod config;
mod dispatcher;
pub mod gpio;
pub mod interface;
pub mod irq;
pub mod platform;
pub mod regs;
pub mod suspend;
mod tasks;
pub mod timebase;

#[cfg(test)]
mod mock;

use core::cell::RefCell;
use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::blocking_mutex::Mutex as BlockingMutex;
use embassy_sync::mutex::Mutex;
use embassy_sync::signal::Signal;
use embassy_time::Instant;

pub use adc::{AdcChannel, AdcFault, AdcResult, Averaging};
pub use charger::{ChargerFlags, ChargerMode, ChargerType, UsbCurrentLimit};
pub use config::{Config, Features};
pub use interface::{Interface, Pcf50633I2c, RetryPolicy};
pub use irq::{IrqSet, IrqSource};
pub use platform::{Feature, Key, Platform, PmuEvent, PowerEvent, RtcEvent};
pub use suspend::SuspendState;
pub use timebase::{EmbassyTimebase, Timebase};

use adc::{AdcFifo, AdcWaiter, ADC_FIFO_DEPTH};
use irq::IRQ_REGS;
use regs::Oocshdwn;
use suspend::SuspendCell;
use tasks::{CurlimitWork, NoBatteryWork, TaskGate};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error<E> {
    Interface(E),
    /// The transport returned fewer bytes than requested.
    ShortRead { expected: usize, actual: usize },
    /// Register access attempted while the bus is suspended.
    Suspended,
    /// Probe has not completed.
    AccessDenied,
    /// A suspend or resume is in progress.
    Busy,
    QueueFull,
    /// The ADC result could not be read.
    Conversion,
    Timeout,
}

/// Device context shared by the dispatcher, the deferred tasks and ADC callbacks.
#[derive(Debug)]
pub struct PmuState {
    pub(crate) flags: ChargerFlags,
    pub(crate) last_current_limit_ma: u32,
    pub(crate) coldplug_done: bool,
    /// Seconds the on-key has been held past the first second, `None` while released.
    pub(crate) onkey_seconds: Option<u8>,
    pub(crate) onkey_supervisor_signalled: bool,
    pub(crate) onkey_standby_issued: bool,
    pub(crate) suppress_onkey: bool,
    pub(crate) resume_reasons: IrqSet,
    pub(crate) last_battery_insertion: Option<Instant>,
}

impl PmuState {
    const fn new() -> Self {
        Self {
            flags: ChargerFlags::new_with_raw_value(0),
            last_current_limit_ma: 0,
            coldplug_done: false,
            onkey_seconds: None,
            onkey_supervisor_signalled: false,
            onkey_standby_issued: false,
            suppress_onkey: false,
            resume_reasons: IrqSet::EMPTY,
            last_battery_insertion: None,
        }
    }

    pub fn flags(&self) -> ChargerFlags {
        self.flags
    }

    pub fn last_current_limit_ma(&self) -> u32 {
        self.last_current_limit_ma
    }

    pub fn onkey_seconds(&self) -> Option<u8> {
        self.onkey_seconds
    }

    pub fn coldplug_done(&self) -> bool {
        self.coldplug_done
    }
}

/// Everything behind the bus lock.
pub(crate) struct Bus<I> {
    pub(crate) interface: I,
    pub(crate) adc: AdcFifo,
}

/// PCF50633 driver
pub struct Pcf50633<M: RawMutex, I, T, P> {
    bus: Mutex<M, Bus<I>>,
    state: BlockingMutex<M, RefCell<PmuState>>,
    suspend: SuspendCell,
    usb_removals: AtomicU32,
    probed: AtomicBool,
    irq_enabled: AtomicBool,
    service_gate: TaskGate<M>,
    service_work: Signal<M, ()>,
    curlimit: CurlimitWork<M>,
    no_battery: NoBatteryWork<M>,
    adc_waiters: [AdcWaiter<M>; ADC_FIFO_DEPTH],
    timebase: T,
    platform: P,
    config: Config,
}

impl<M, I, T, P> Pcf50633<M, I, T, P>
where
    M: RawMutex,
    I: Interface,
    T: Timebase,
    P: Platform,
{
    /// Creates the driver. Nothing touches the hardware until [`init`](Self::init).
    pub fn new(interface: I, timebase: T, platform: P, config: Config) -> Self {
        Self {
            bus: Mutex::new(Bus {
                interface,
                adc: AdcFifo::new(),
            }),
            state: BlockingMutex::new(RefCell::new(PmuState::new())),
            suspend: SuspendCell::new(),
            usb_removals: AtomicU32::new(0),
            probed: AtomicBool::new(false),
            irq_enabled: AtomicBool::new(false),
            service_gate: TaskGate::new(),
            service_work: Signal::new(),
            curlimit: CurlimitWork::new(),
            no_battery: NoBatteryWork::new(),
            adc_waiters: core::array::from_fn(|_| AdcWaiter::new()),
            timebase,
            platform,
            config,
        }
    }

    /// Unmasks every interrupt source and marks the device probed.
    ///
    /// The periodic tick stays unmasked so its first edge runs the cold-plug pass.
    pub async fn init(&self) -> Result<(), Error<I::Error>> {
        let mut id = [0; 2];
        self.read_register_block(regs::VERSION, &mut id).await?;
        info!("PCF50633 version {} variant {}", id[0], id[1]);

        self.write_register_block(regs::INT1M, &[0; IRQ_REGS]).await?;
        self.probed.store(true, Ordering::Release);
        self.set_irq_enabled(true);
        Ok(())
    }

    /// Interrupt top half: wakes the service task unless delivery is disabled.
    pub fn irq(&self) {
        if self.irq_enabled() {
            self.service_work.signal(());
        }
    }

    /// Unconditional hardware power off.
    pub async fn go_standby(&self) -> Result<(), Error<I::Error>> {
        warn!("entering standby");
        let bit = Oocshdwn::new_with_raw_value(0)
            .with_go_standby(true)
            .raw_value();
        self.set_bits(regs::OOCSHDWN, bit, bit).await
    }

    /// Subscribes the RTC sink to the periodic tick, or unsubscribes it. The tick stays
    /// unmasked while the on-key is held since the hold timer counts on it.
    pub async fn set_second_events(&self, enable: bool) -> Result<(), Error<I::Error>> {
        let onkey_held = self.with_state(|s| {
            s.flags = s.flags.with_rtc_second(enable);
            s.onkey_seconds.is_some()
        });
        let mask = IrqSource::Second.mask();
        let value = if enable || onkey_held { 0 } else { mask };
        self.set_bits(IrqSource::Second.mask_register(), mask, value)
            .await
    }

    /// Reads every register into `out`, leaving the read-to-clear interrupt status block alone.
    pub async fn dump_registers(&self, out: &mut [u8; 256]) -> Result<(), Error<I::Error>> {
        let mut bus = self.bus.lock().await;
        let int1 = regs::INT1 as usize;
        let int5 = regs::INT5 as usize;
        self.bus_read(&mut bus, 0, &mut out[..int1]).await?;
        out[int1..=int5].fill(0);
        self.bus_read(&mut bus, regs::INT1M, &mut out[int5 + 1..]).await
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn platform(&self) -> &P {
        &self.platform
    }

    pub fn is_probed(&self) -> bool {
        self.probed.load(Ordering::Acquire)
    }

    pub fn irq_enabled(&self) -> bool {
        self.irq_enabled.load(Ordering::Acquire)
    }

    fn set_irq_enabled(&self, enabled: bool) {
        self.irq_enabled.store(enabled, Ordering::Release);
    }

    /// Whether an interrupt is waiting for the service task.
    pub fn service_pending(&self) -> bool {
        self.service_work.signaled()
    }

    /// Number of USB removals seen since start.
    pub fn usb_removal_count(&self) -> u32 {
        self.usb_removals.load(Ordering::Acquire)
    }

    pub fn onkey_seconds(&self) -> Option<u8> {
        self.with_state(|s| s.onkey_seconds)
    }

    pub(crate) fn with_state<R>(&self, f: impl FnOnce(&mut PmuState) -> R) -> R {
        self.state.lock(|state| f(&mut *state.borrow_mut()))
    }

    fn check_bus_access(&self) -> Result<(), Error<I::Error>> {
        if self.suspend.get() == SuspendState::CompletedSuspend {
            error!("register access while suspended");
            return Err(Error::Suspended);
        }
        Ok(())
    }

    /// Block read with the configured retry policy. The caller holds the bus lock.
    pub(crate) async fn bus_read(
        &self,
        bus: &mut Bus<I>,
        reg: u8,
        data: &mut [u8],
    ) -> Result<(), Error<I::Error>> {
        self.check_bus_access()?;
        let mut failed = 0;
        loop {
            let err = match bus.interface.read(reg, data).await {
                Ok(n) if n == data.len() => return Ok(()),
                Ok(n) => Error::ShortRead {
                    expected: data.len(),
                    actual: n,
                },
                Err(e) => Error::Interface(e),
            };
            failed += 1;
            if !self.config.retry.should_retry(failed) {
                debug!("read of {} failed after {} tries", reg, failed);
                return Err(err);
            }
            trace!("read of {} failed, retrying", reg);
            self.timebase.delay(self.config.retry.backoff).await;
        }
    }

    /// Block write with the configured retry policy. The caller holds the bus lock.
    pub(crate) async fn bus_write(
        &self,
        bus: &mut Bus<I>,
        reg: u8,
        data: &[u8],
    ) -> Result<(), Error<I::Error>> {
        self.check_bus_access()?;
        let mut failed = 0;
        loop {
            let err = match bus.interface.write(reg, data).await {
                Ok(()) => return Ok(()),
                Err(e) => e,
            };
            failed += 1;
            if !self.config.retry.should_retry(failed) {
                debug!("write of {} failed after {} tries", reg, failed);
                return Err(Error::Interface(err));
            }
            trace!("write of {} failed, retrying", reg);
            self.timebase.delay(self.config.retry.backoff).await;
        }
    }

    pub async fn read_register_block(&self, reg: u8, data: &mut [u8]) -> Result<(), Error<I::Error>> {
        let mut bus = self.bus.lock().await;
        self.bus_read(&mut bus, reg, data).await
    }

    pub async fn write_register_block(&self, reg: u8, data: &[u8]) -> Result<(), Error<I::Error>> {
        let mut bus = self.bus.lock().await;
        self.bus_write(&mut bus, reg, data).await
    }

    pub async fn reg_read(&self, reg: u8) -> Result<u8, Error<I::Error>> {
        let mut value = [0];
        self.read_register_block(reg, &mut value).await?;
        Ok(value[0])
    }

    pub async fn reg_write(&self, reg: u8, value: u8) -> Result<(), Error<I::Error>> {
        self.write_register_block(reg, &[value]).await
    }

    /// Replaces the bits selected by `mask` with `value`, in one bus lock acquisition.
    ///
    /// The register is always written back, since some control bits act as commands.
    pub async fn set_bits(&self, reg: u8, mask: u8, value: u8) -> Result<(), Error<I::Error>> {
        let mut bus = self.bus.lock().await;
        let mut current = [0];
        self.bus_read(&mut bus, reg, &mut current).await?;
        let updated = (current[0] & !mask) | (value & mask);
        self.bus_write(&mut bus, reg, &[updated]).await
    }

    pub async fn clear_bits(&self, reg: u8, bits: u8) -> Result<(), Error<I::Error>> {
        self.set_bits(reg, bits, 0).await
    }
}
