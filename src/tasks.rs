//! Deferred tasks: the dispatcher runner, the USB current limit worker and the no-battery
//! poller, plus the gate that keeps each from running concurrently with itself.

use core::cell::Cell;
use core::sync::atomic::{AtomicU32, Ordering};

use embassy_futures::select::{select4, Either4};
use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::blocking_mutex::Mutex as BlockingMutex;
use embassy_sync::signal::Signal;
use embassy_time::Duration;
use embedded_hal_async::digital::Wait;

use crate::interface::Interface;
use crate::platform::Platform;
use crate::regs::{self, Mbcs3};
use crate::timebase::Timebase;
use crate::Pcf50633;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TaskState {
    Idle,
    Running,
    /// Running, and asked to run again once the current instance finishes.
    RescheduleRequested,
}

/// Coalesces overlapping invocations of one task into a single running instance.
pub(crate) struct TaskGate<M: RawMutex> {
    state: BlockingMutex<M, Cell<TaskState>>,
}

impl<M: RawMutex> TaskGate<M> {
    pub(crate) const fn new() -> Self {
        Self {
            state: BlockingMutex::new(Cell::new(TaskState::Idle)),
        }
    }

    /// Claims the task. Returns `false` if an instance is already running, in which case that
    /// instance is told to go round once more.
    pub(crate) fn begin(&self) -> bool {
        self.state.lock(|state| match state.get() {
            TaskState::Idle => {
                state.set(TaskState::Running);
                true
            }
            TaskState::Running | TaskState::RescheduleRequested => {
                state.set(TaskState::RescheduleRequested);
                false
            }
        })
    }

    /// Releases the task. Returns `true` if another round was requested meanwhile; the caller
    /// keeps the claim and runs again.
    pub(crate) fn finish(&self) -> bool {
        self.state.lock(|state| match state.get() {
            TaskState::RescheduleRequested => {
                state.set(TaskState::Running);
                true
            }
            TaskState::Idle | TaskState::Running => {
                state.set(TaskState::Idle);
                false
            }
        })
    }

    #[cfg(test)]
    pub(crate) fn state(&self) -> TaskState {
        self.state.lock(|state| state.get())
    }
}

/// Result of one round of a deferred task.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Pass {
    Done,
    /// Nothing to do in the current state; do not requeue.
    Bail,
    /// Run again after the given delay.
    Retry(Duration),
}

pub(crate) struct CurlimitWork<M: RawMutex> {
    gate: TaskGate<M>,
    wake: Signal<M, ()>,
    pending_ma: AtomicU32,
    removal_snapshot: AtomicU32,
}

impl<M: RawMutex> CurlimitWork<M> {
    pub(crate) const fn new() -> Self {
        Self {
            gate: TaskGate::new(),
            wake: Signal::new(),
            pending_ma: AtomicU32::new(0),
            removal_snapshot: AtomicU32::new(0),
        }
    }
}

pub(crate) struct NoBatteryWork<M: RawMutex> {
    running: BlockingMutex<M, Cell<bool>>,
    wake: Signal<M, ()>,
    removal_snapshot: AtomicU32,
}

impl<M: RawMutex> NoBatteryWork<M> {
    pub(crate) const fn new() -> Self {
        Self {
            running: BlockingMutex::new(Cell::new(false)),
            wake: Signal::new(),
            removal_snapshot: AtomicU32::new(0),
        }
    }
}

impl<M, I, T, P> Pcf50633<M, I, T, P>
where
    M: RawMutex,
    I: Interface,
    T: Timebase,
    P: Platform,
{
    /// Runs a task body under `gate` until it neither retries nor gets rescheduled.
    async fn drive<F, Fut>(&self, gate: &TaskGate<M>, mut body: F)
    where
        F: FnMut() -> Fut,
        Fut: core::future::Future<Output = Pass>,
    {
        if !gate.begin() {
            trace!("task already running, coalesced");
            return;
        }
        loop {
            if let Pass::Retry(backoff) = body().await {
                if backoff > Duration::from_ticks(0) {
                    self.timebase.delay(backoff).await;
                }
                continue;
            }
            if !gate.finish() {
                break;
            }
        }
    }

    /// Runs the dispatcher once, or asks the running instance to go round again.
    pub async fn service(&self) {
        self.drive(&self.service_gate, move || self.service_pass())
            .await
    }

    /// Records a current budget granted by the USB host. The limit is applied later by
    /// [`usb_curlimit_task`](Self::usb_curlimit_task), and dropped if USB is unplugged first.
    pub fn notify_usb_current_limit_change(&self, ma: u32) {
        debug!("USB host granted {} mA", ma);
        self.curlimit
            .removal_snapshot
            .store(self.usb_removal_count(), Ordering::Release);
        self.curlimit.pending_ma.store(ma, Ordering::Release);
        self.curlimit.wake.signal(());
    }

    pub(crate) async fn usb_curlimit_work(&self) {
        self.drive(&self.curlimit.gate, move || self.usb_curlimit_pass())
            .await
    }

    async fn usb_curlimit_pass(&self) -> Pass {
        let state = self.suspend.get();
        if state.is_suspending() {
            debug!("USB current limit change dropped, suspending");
            return Pass::Bail;
        }
        if !self.is_probed() || !state.is_serviceable() {
            return Pass::Retry(self.config.curlimit_backoff);
        }
        if self.curlimit.removal_snapshot.load(Ordering::Acquire) != self.usb_removal_count() {
            debug!("USB removed before current limit could be applied");
            return Pass::Bail;
        }
        let ma = self.curlimit.pending_ma.load(Ordering::Acquire);
        if self.set_current_limit(ma).await.is_err() {
            warn!("failed to apply USB current limit of {} mA", ma);
        }
        Pass::Done
    }

    /// Starts the no-battery poller unless it is already running.
    pub(crate) fn start_no_battery_poller(&self) {
        let removals = self.usb_removal_count();
        let started = self.no_battery.running.lock(|running| {
            if running.get() {
                return false;
            }
            running.set(true);
            self.no_battery
                .removal_snapshot
                .store(removals, Ordering::Release);
            true
        });
        if started {
            debug!("starting no-battery poller");
            self.no_battery.wake.signal(());
        }
    }

    pub fn no_battery_poller_running(&self) -> bool {
        self.no_battery.running.lock(|running| running.get())
    }

    /// Polls battery presence until a battery shows up or USB goes away.
    pub(crate) async fn no_battery_poll(&self) {
        loop {
            self.timebase
                .delay(self.config.no_battery_poll_interval)
                .await;
            if self.no_battery_pass().await == Pass::Done {
                break;
            }
        }
        self.no_battery.running.lock(|running| running.set(false));
        debug!("no-battery poller stopped");
    }

    /// One poll. `Done` ends the poller.
    pub(crate) async fn no_battery_pass(&self) -> Pass {
        if self.suspend.get() == crate::SuspendState::Running {
            match self.reg_read(regs::MBCS3).await {
                Ok(mbcs3) if Mbcs3::new_with_raw_value(mbcs3).battery_present() => {
                    info!("battery inserted");
                    let now = self.timebase.now();
                    self.with_state(|s| s.last_battery_insertion = Some(now));
                    self.start_classification().await;
                    return Pass::Done;
                }
                Ok(_) => {}
                Err(_) => warn!("failed to read battery presence"),
            }
        }
        if self.no_battery.removal_snapshot.load(Ordering::Acquire) != self.usb_removal_count() {
            return Pass::Done;
        }
        Pass::Retry(self.config.no_battery_poll_interval)
    }

    /// Waits for interrupt edges and runs the dispatcher for each batch of them.
    pub async fn service_task(&self) -> ! {
        loop {
            self.service_work.wait().await;
            self.service().await;
        }
    }

    pub async fn usb_curlimit_task(&self) -> ! {
        loop {
            self.curlimit.wake.wait().await;
            self.usb_curlimit_work().await;
        }
    }

    pub async fn no_battery_task(&self) -> ! {
        loop {
            self.no_battery.wake.wait().await;
            self.no_battery_poll().await;
        }
    }

    /// Forwards falling edges of the active-low interrupt line to [`irq`](Self::irq).
    pub async fn irq_task<O: Wait>(&self, mut int_n: O) -> ! {
        loop {
            if int_n.wait_for_falling_edge().await.is_err() {
                error!("interrupt pin wait failed");
                self.timebase.delay(self.config.service_backoff).await;
                continue;
            }
            self.irq();
        }
    }

    /// All of the device's tasks.
    pub async fn run<O: Wait>(&self, int_n: O) -> ! {
        match select4(
            self.irq_task(int_n),
            self.service_task(),
            self.usb_curlimit_task(),
            self.no_battery_task(),
        )
        .await
        {
            Either4::First(never)
            | Either4::Second(never)
            | Either4::Third(never)
            | Either4::Fourth(never) => never,
        }
    }

    /// The USB current limit most recently requested, in mA.
    pub fn last_current_limit_ma(&self) -> u32 {
        self.with_state(|s| s.last_current_limit_ma)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{self, Record};
    use crate::platform::{Feature, PmuEvent};
    use crate::suspend::SuspendState;
    use crate::IrqSource;
    use embassy_futures::block_on;
    use embassy_sync::blocking_mutex::raw::NoopRawMutex;

    #[test]
    fn test_gate_coalesces() {
        let gate: TaskGate<NoopRawMutex> = TaskGate::new();
        assert!(gate.begin());
        assert_eq!(gate.state(), TaskState::Running);
        assert!(!gate.begin());
        assert!(!gate.begin());
        assert_eq!(gate.state(), TaskState::RescheduleRequested);
        // One extra round no matter how many requests piled up.
        assert!(gate.finish());
        assert_eq!(gate.state(), TaskState::Running);
        assert!(!gate.finish());
        assert_eq!(gate.state(), TaskState::Idle);
    }

    #[test]
    fn test_curlimit_applies_pending_limit() {
        let (pmu, hw, _clock) = mock::probed();
        mock::plug_usb(&pmu, &hw);
        pmu.notify_usb_current_limit_change(500);
        block_on(pmu.usb_curlimit_work());

        assert_eq!(hw.borrow().regs[regs::MBCC7 as usize] & regs::MBCC7_USB_MASK, 0x01);
        assert_eq!(pmu.last_current_limit_ma(), 500);
        assert!(pmu
            .platform()
            .take()
            .contains(&Record::Notify(Feature::Charger, PmuEvent::ChargerActive)));
    }

    #[test]
    fn test_curlimit_aborts_after_removal() {
        let (pmu, hw, _clock) = mock::probed();
        mock::plug_usb(&pmu, &hw);
        pmu.notify_usb_current_limit_change(1000);
        let before = pmu.usb_removal_count();

        hw.borrow_mut().regs[regs::MBCS1 as usize] = 0;
        hw.borrow_mut().latch(IrqSource::UsbRemoved);
        mock::drain(&pmu);
        assert_eq!(pmu.usb_removal_count(), before + 1);
        hw.borrow_mut().log.clear();

        block_on(pmu.usb_curlimit_work());
        assert!(hw.borrow().log.is_empty());
        assert_ne!(pmu.last_current_limit_ma(), 1000);
    }

    #[test]
    fn test_curlimit_waits_for_resume() {
        let (pmu, _hw, clock) = mock::new_device(mock::test_config());
        // Not probed yet: the worker keeps requeueing itself.
        pmu.notify_usb_current_limit_change(100);
        block_on(async {
            embassy_futures::select::select(pmu.usb_curlimit_work(), async {
                while clock.now_us() < 5_000 {
                    embassy_futures::yield_now().await;
                }
            })
            .await;
        });
        assert_eq!(pmu.curlimit.gate.state(), TaskState::Running);
        assert_eq!(pmu.last_current_limit_ma(), 0);
    }

    #[test]
    fn test_no_battery_poller_finds_battery() {
        let (pmu, hw, clock) = mock::probed();
        pmu.start_no_battery_poller();
        assert!(pmu.no_battery_poller_running());
        // Already running: not started twice.
        pmu.start_no_battery_poller();

        block_on(async {
            assert_eq!(pmu.no_battery_pass().await, Pass::Retry(Duration::from_secs(1)));
            hw.borrow_mut().regs[regs::MBCS3 as usize] = 0x40;
            pmu.no_battery_poll().await;
        });
        assert!(!pmu.no_battery_poller_running());
        assert_eq!(
            pmu.with_state(|s| s.last_battery_insertion),
            Some(embassy_time::Instant::from_micros(clock.now_us()))
        );
        // Classification was queued.
        assert_eq!(block_on(pmu.adc_pending()), 1);
    }

    #[test]
    fn test_no_battery_poller_stops_on_removal() {
        let (pmu, hw, _clock) = mock::probed();
        mock::plug_usb(&pmu, &hw);
        pmu.start_no_battery_poller();

        hw.borrow_mut().latch(IrqSource::UsbRemoved);
        mock::drain(&pmu);

        block_on(pmu.no_battery_poll());
        assert!(!pmu.no_battery_poller_running());
        assert_eq!(pmu.with_state(|s| s.last_battery_insertion), None);
    }

    #[test]
    fn test_no_battery_poller_skips_while_resuming() {
        let (pmu, hw, _clock) = mock::probed();
        pmu.start_no_battery_poller();
        pmu.suspend.set(SuspendState::CompletedResume);
        hw.borrow_mut().regs[regs::MBCS3 as usize] = 0x40;
        hw.borrow_mut().log.clear();

        let pass = block_on(pmu.no_battery_pass());
        assert!(matches!(pass, Pass::Retry(_)));
        assert!(hw.borrow().log.is_empty());
    }
}
