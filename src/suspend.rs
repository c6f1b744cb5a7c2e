//! Suspend/resume coordination.
//!
//! Suspend path: `Running -> StartingSuspend -> CompletedSuspend`.
//! Resume path: `CompletedSuspend -> StartingResume -> CompletedResume`, and the dispatcher moves
//! `CompletedResume -> Running` on its first successful pass.
//!
//! Both transitions run with the bus lock held from the `Starting*` state until the
//! `Completed*` state, so no other register access can interleave with them.

use core::sync::atomic::{AtomicU8, Ordering};

use embassy_sync::blocking_mutex::raw::RawMutex;

use crate::interface::Interface;
use crate::irq::{IrqSet, IrqSource};
use crate::platform::Platform;
use crate::regs;
use crate::timebase::Timebase;
use crate::{Error, Pcf50633};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum SuspendState {
    Running = 0,
    StartingSuspend = 1,
    CompletedSuspend = 2,
    StartingResume = 3,
    CompletedResume = 4,
}

impl SuspendState {
    const fn from_u8(value: u8) -> Self {
        match value {
            1 => SuspendState::StartingSuspend,
            2 => SuspendState::CompletedSuspend,
            3 => SuspendState::StartingResume,
            4 => SuspendState::CompletedResume,
            _ => SuspendState::Running,
        }
    }

    /// Going into, or already in, suspend.
    pub const fn is_suspending(self) -> bool {
        matches!(
            self,
            SuspendState::StartingSuspend | SuspendState::CompletedSuspend
        )
    }

    /// Registers hold valid contents and deferred work may proceed.
    pub const fn is_serviceable(self) -> bool {
        matches!(self, SuspendState::Running | SuspendState::CompletedResume)
    }
}

/// Suspend state readable without the bus lock.
pub(crate) struct SuspendCell(AtomicU8);

impl SuspendCell {
    pub(crate) const fn new() -> Self {
        Self(AtomicU8::new(SuspendState::Running as u8))
    }

    pub(crate) fn get(&self) -> SuspendState {
        SuspendState::from_u8(self.0.load(Ordering::Acquire))
    }

    pub(crate) fn set(&self, state: SuspendState) {
        trace!("suspend state -> {:?}", state);
        self.0.store(state as u8, Ordering::Release);
    }
}

impl<M, I, T, P> Pcf50633<M, I, T, P>
where
    M: RawMutex,
    I: Interface,
    T: Timebase,
    P: Platform,
{
    /// Masks every interrupt except the configured resumers and stops interrupt delivery.
    ///
    /// Fails with [`Error::Busy`] unless the device is running.
    pub async fn suspend(&self) -> Result<(), Error<I::Error>> {
        if self.suspend.get() != SuspendState::Running {
            warn!("suspend requested in state {:?}", self.suspend.get());
            return Err(Error::Busy);
        }
        let mut bus = self.bus.lock().await;
        self.suspend.set(SuspendState::StartingSuspend);
        self.set_irq_enabled(false);

        let masks = self.config.resumers.complement().to_bytes();
        if self.bus_write(&mut bus, regs::INT1M, &masks).await.is_err() {
            error!("failed to program wake sources for suspend");
        }
        self.suspend.set(SuspendState::CompletedSuspend);
        info!("suspended");
        Ok(())
    }

    /// Restores interrupt masks, re-enables delivery and forces one dispatcher pass so edges
    /// latched while suspended are not lost.
    pub async fn resume(&self) -> Result<(), Error<I::Error>> {
        if self.suspend.get() != SuspendState::CompletedSuspend {
            warn!("resume requested in state {:?}", self.suspend.get());
            return Err(Error::Busy);
        }
        {
            let mut bus = self.bus.lock().await;
            self.suspend.set(SuspendState::StartingResume);
            // The periodic tick stays masked unless the RTC sink subscribed to it.
            let masks = if self.flags().rtc_second() {
                IrqSet::EMPTY
            } else {
                IrqSet::EMPTY.with(IrqSource::Second)
            }
            .to_bytes();
            if self.bus_write(&mut bus, regs::INT1M, &masks).await.is_err() {
                error!("failed to restore interrupt masks on resume");
            }
            self.suspend.set(SuspendState::CompletedResume);
        }
        self.set_irq_enabled(true);
        info!("resumed");
        self.service().await;
        Ok(())
    }

    /// Ok once probe has completed and no suspend or resume is in progress.
    pub fn ready(&self) -> Result<(), Error<I::Error>> {
        if !self.is_probed() {
            return Err(Error::AccessDenied);
        }
        if !self.suspend.get().is_serviceable() {
            return Err(Error::Busy);
        }
        Ok(())
    }

    /// Polls [`ready`](Self::ready) until it succeeds or `timeout` elapses.
    pub async fn wait_until_ready(&self, timeout: embassy_time::Duration) -> Result<(), Error<I::Error>> {
        let deadline = self.timebase.now() + timeout;
        loop {
            match self.ready() {
                Ok(()) => return Ok(()),
                Err(e) if self.timebase.now() >= deadline => {
                    warn!("gave up waiting for the PMU to become ready");
                    return Err(match e {
                        Error::AccessDenied => Error::AccessDenied,
                        _ => Error::Timeout,
                    });
                }
                Err(_) => self.timebase.delay(self.config.ready_poll_interval).await,
            }
        }
    }

    pub fn suspend_state(&self) -> SuspendState {
        self.suspend.get()
    }

    /// Interrupt status captured by the first dispatcher pass after the last resume.
    pub fn resume_reasons(&self) -> IrqSet {
        self.with_state(|s| s.resume_reasons)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{self, Access, Record};
    use crate::platform::{Key, PmuEvent};
    use embassy_futures::block_on;
    use embassy_time::Duration;

    #[test]
    fn test_state_classes() {
        assert!(SuspendState::Running.is_serviceable());
        assert!(SuspendState::CompletedResume.is_serviceable());
        assert!(!SuspendState::StartingResume.is_serviceable());
        assert!(SuspendState::StartingSuspend.is_suspending());
        assert!(SuspendState::CompletedSuspend.is_suspending());
        assert!(!SuspendState::CompletedResume.is_suspending());
    }

    #[test]
    fn test_suspend_programs_resumers() {
        let (pmu, hw, _clock) = mock::probed();
        block_on(pmu.suspend()).unwrap();

        assert_eq!(pmu.suspend_state(), SuspendState::CompletedSuspend);
        let expected = pmu.config().resumers.complement().to_bytes();
        assert_eq!(hw.borrow().regs_at(regs::INT1M, 5), expected);
        assert!(!pmu.irq_enabled());
        assert_eq!(pmu.ready(), Err(Error::Busy));
        // A second suspend is refused.
        assert_eq!(block_on(pmu.suspend()), Err(Error::Busy));
    }

    #[test]
    fn test_no_register_access_while_suspended() {
        let (pmu, hw, _clock) = mock::probed();
        block_on(pmu.suspend()).unwrap();
        hw.borrow_mut().latch(IrqSource::UsbInserted);
        hw.borrow_mut().log.clear();

        block_on(async {
            pmu.service().await;
            assert_eq!(pmu.reg_read(regs::MBCS1).await, Err(Error::Suspended));
            assert_eq!(
                pmu.set_bits(regs::MBCC1, regs::MBCC1_CHGENA, 0).await,
                Err(Error::Suspended)
            );
            pmu.no_battery_pass().await;
            pmu.usb_curlimit_work().await;
        });
        assert!(hw.borrow().log.is_empty());
    }

    #[test]
    fn test_resume_forces_one_pass() {
        let (pmu, hw, _clock) = mock::probed();
        block_on(pmu.suspend()).unwrap();
        hw.borrow_mut().log.clear();

        block_on(pmu.resume()).unwrap();

        assert_eq!(pmu.suspend_state(), SuspendState::Running);
        assert!(pmu.irq_enabled());
        let log = &hw.borrow().log;
        let status_reads = log
            .iter()
            .filter(|a| **a == Access::Read(regs::INT1, 5))
            .count();
        assert_eq!(status_reads, 1);
        assert_eq!(log[0], Access::Write(regs::INT1M, std::vec![0x80, 0, 0, 0, 0]));
        assert_eq!(pmu.resume_reasons(), IrqSet::EMPTY);
    }

    #[test]
    fn test_edge_during_suspend_is_serviced_on_resume() {
        let (pmu, hw, _clock) = mock::probed();
        block_on(pmu.suspend()).unwrap();
        hw.borrow_mut().latch(IrqSource::UsbInserted);
        // Interrupt delivery is off, so the edge goes nowhere until resume.
        pmu.irq();
        assert!(!pmu.service_pending());

        block_on(pmu.resume()).unwrap();
        let records = pmu.platform().take();
        assert!(records.contains(&Record::Key(Key::Power2, true)));
        assert!(records.contains(&Record::Notify(crate::platform::Feature::Charger, PmuEvent::UsbInsert)));
        assert!(pmu.resume_reasons().contains(IrqSource::UsbInserted));
        assert!(pmu.flags().usb_present());
    }

    #[test]
    fn test_wake_press_is_not_reported() {
        let (pmu, hw, _clock) = mock::probed();
        block_on(pmu.suspend()).unwrap();
        hw.borrow_mut().latch(IrqSource::OnkeyFalling);
        block_on(pmu.resume()).unwrap();

        hw.borrow_mut().latch(IrqSource::OnkeyRising);
        block_on(pmu.service());

        let records = pmu.platform().take();
        assert!(!records.iter().any(|r| matches!(r, Record::Key(Key::Power, _))));

        // The next press is a user action again.
        hw.borrow_mut().latch(IrqSource::OnkeyFalling);
        block_on(pmu.service());
        assert!(pmu.platform().take().contains(&Record::Key(Key::Power, true)));
    }

    #[test]
    fn test_wake_press_suppression_ends_with_other_wake() {
        let (pmu, hw, _clock) = mock::probed();
        block_on(pmu.suspend()).unwrap();
        hw.borrow_mut().latch(IrqSource::OnkeyFalling);
        block_on(pmu.resume()).unwrap();

        // Suspended again before the key came up, then woken by the alarm.
        block_on(pmu.suspend()).unwrap();
        hw.borrow_mut().latch(IrqSource::Alarm);
        block_on(pmu.resume()).unwrap();
        assert!(pmu.resume_reasons().contains(IrqSource::Alarm));
        pmu.platform().take();

        hw.borrow_mut().latch(IrqSource::OnkeyFalling);
        block_on(pmu.service());
        assert_eq!(pmu.platform().take(), [Record::Key(Key::Power, true)]);
    }

    #[test]
    fn test_ready_and_wait() {
        let (pmu, _hw, clock) = mock::new_device(mock::test_config());
        assert_eq!(pmu.ready(), Err(Error::AccessDenied));
        assert_eq!(
            block_on(pmu.wait_until_ready(Duration::from_millis(20))),
            Err(Error::AccessDenied)
        );
        block_on(pmu.init()).unwrap();
        assert_eq!(pmu.ready(), Ok(()));

        block_on(pmu.suspend()).unwrap();
        let start = clock.now_us();
        assert_eq!(
            block_on(pmu.wait_until_ready(Duration::from_millis(20))),
            Err(Error::Timeout)
        );
        assert!(clock.now_us() - start >= 20_000);
    }
}
