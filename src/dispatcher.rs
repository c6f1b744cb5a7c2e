//! Interrupt dispatcher: one pass reads and clears INT1..INT5 and reacts to every latched
//! source.

use core::sync::atomic::Ordering;

use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_time::Duration;

use crate::charger::UsbCurrentLimit;
use crate::interface::Interface;
use crate::irq::{IrqSet, IrqSource, IRQ_REGS};
use crate::platform::{Feature, Key, Platform, PmuEvent, PowerEvent, RtcEvent};
use crate::regs::{self, Mbcs1};
use crate::suspend::SuspendState;
use crate::tasks::Pass;
use crate::timebase::Timebase;
use crate::Pcf50633;

impl<M, I, T, P> Pcf50633<M, I, T, P>
where
    M: RawMutex,
    I: Interface,
    T: Timebase,
    P: Platform,
{
    pub(crate) async fn service_pass(&self) -> Pass {
        let state = self.suspend.get();
        if state.is_suspending() {
            debug!("interrupt while suspending, left for resume");
            self.platform.sync_input();
            return Pass::Bail;
        }
        if !state.is_serviceable() {
            debug!("resume still in progress, requeueing");
            return Pass::Retry(self.config.service_backoff);
        }

        let mut raw = [0; IRQ_REGS];
        if self.read_register_block(regs::INT1, &mut raw).await.is_err() {
            warn!("failed to read interrupt status, requeueing");
            let backoff = if self.suspend.get().is_suspending() {
                Duration::from_ticks(0)
            } else {
                self.config.service_backoff
            };
            return Pass::Retry(backoff);
        }
        let mut status = IrqSet::from_bytes(raw);
        trace!("interrupt status {:?}", raw);

        if self.suspend.get() != SuspendState::Running {
            let woken_by_key =
                status.contains(IrqSource::OnkeyFalling) || status.contains(IrqSource::OnkeyRising);
            self.with_state(|s| {
                s.resume_reasons = status;
                s.suppress_onkey = woken_by_key;
            });
            self.suspend.set(SuspendState::Running);
            info!("first interrupt pass after resume: {:?}", raw);
        }

        if !self.with_state(|s| s.coldplug_done) {
            self.coldplug(&mut status).await;
        }

        let mut onkey_handled = false;
        let mut low_power_handled = false;
        for source in status.iter() {
            match source {
                IrqSource::AdapterInserted => self.adapter_changed(true),
                IrqSource::AdapterRemoved => self.adapter_changed(false),
                IrqSource::UsbInserted => {
                    self.usb_inserted();
                    // Let the charger's identification resistor settle.
                    self.timebase.delay(self.config.usb_debounce).await;
                    self.start_classification().await;
                }
                IrqSource::UsbRemoved if status.contains(IrqSource::UsbInserted) => {
                    debug!("USB removal latched together with insertion, ignored");
                }
                IrqSource::UsbRemoved => self.usb_removed().await,
                IrqSource::Alarm => {
                    if self.config.features.rtc {
                        self.platform.rtc_event(RtcEvent::Alarm);
                    }
                }
                IrqSource::Second => self.second_tick().await,
                IrqSource::OnkeyRising | IrqSource::OnkeyFalling => {
                    if !onkey_handled {
                        onkey_handled = true;
                        self.onkey_edges(&status).await;
                    }
                }
                IrqSource::BatteryFull => self.battery_full().await,
                IrqSource::ChargeHalt | IrqSource::UsbLimitOn | IrqSource::UsbLimitOff => {
                    debug!("{}", source.name());
                    self.platform.notify(Feature::Charger, PmuEvent::ChargerChange);
                }
                IrqSource::ThermalLimitOn | IrqSource::ThermalLimitOff => {
                    let on = source == IrqSource::ThermalLimitOn;
                    info!("charger thermal limit {}", if on { "on" } else { "off" });
                    self.with_state(|s| s.flags = s.flags.with_charge_protected(on));
                    self.platform.notify(Feature::Charger, PmuEvent::ChargerChange);
                }
                IrqSource::AdcReady => self.adc_complete().await,
                IrqSource::Onkey1s => self.onkey_held().await,
                IrqSource::LowSystem | IrqSource::LowBattery => {
                    if !low_power_handled {
                        low_power_handled = true;
                        self.low_power().await;
                    }
                }
                IrqSource::HighTemperature => {
                    error!("PMU over temperature");
                    self.platform.power_event(PowerEvent::CriticalSuspend);
                }
                source if source.is_hardware_fault() => {
                    warn!("hardware fault: {}", source.name());
                    self.platform.hardware_fault(source);
                }
                source => trace!("{} ignored", source.name()),
            }
        }

        self.platform.sync_input();
        Pass::Done
    }

    /// First pass after start: stop the bootstrap tick, report power already present, and
    /// classify whatever charger is attached.
    async fn coldplug(&self, status: &mut IrqSet) {
        debug!("cold-plug");
        status.remove(IrqSource::Second);
        if !self.flags().rtc_second() {
            let tick = IrqSource::Second;
            if self
                .set_bits(tick.mask_register(), tick.mask(), tick.mask())
                .await
                .is_err()
            {
                warn!("failed to mask the periodic tick");
            }
        }
        match self.reg_read(regs::MBCS1).await {
            Ok(mbcs1) if Mbcs1::new_with_raw_value(mbcs1).usb_valid() => self.usb_inserted(),
            Ok(_) => {}
            Err(_) => warn!("failed to read charger status"),
        }
        self.start_classification().await;
        self.with_state(|s| s.coldplug_done = true);
    }

    fn adapter_changed(&self, inserted: bool) {
        info!("adapter {}", if inserted { "inserted" } else { "removed" });
        self.with_state(|s| s.flags = s.flags.with_charger_present(inserted));
        self.platform.report_key(Key::Battery, inserted);
        self.platform.power_event(PowerEvent::StatusChange);
        let event = if inserted {
            PmuEvent::Insert
        } else {
            PmuEvent::Remove
        };
        self.platform.notify(Feature::Charger, event);
    }

    fn usb_inserted(&self) {
        info!("USB inserted");
        self.platform.report_key(Key::Power2, true);
        self.platform.power_event(PowerEvent::StatusChange);
        self.with_state(|s| s.flags = s.flags.with_usb_present(true));
        self.platform.notify(Feature::Charger, PmuEvent::UsbInsert);
    }

    async fn usb_removed(&self) {
        let removals = self.usb_removals.fetch_add(1, Ordering::AcqRel) + 1;
        let was_present = self.with_state(|s| {
            let present = s.flags.usb_present();
            if present {
                s.flags = s.flags.with_usb_present(false);
                s.last_current_limit_ma = 0;
            }
            present
        });
        info!("USB removed ({} removals)", removals);
        if !was_present {
            return;
        }
        self.platform.report_key(Key::Power2, false);
        self.platform.power_event(PowerEvent::StatusChange);
        self.platform.notify(Feature::Charger, PmuEvent::UsbRemove);
        self.start_classification().await;
    }

    async fn second_tick(&self) {
        let sig_init = self.config.onkey_seconds_sig_init;
        let shutdown = self.config.onkey_seconds_shutdown;
        let (forward, signal, standby) = self.with_state(|s| {
            let mut signal = false;
            let mut standby = false;
            if s.flags.power_pressed() {
                if let Some(seconds) = s.onkey_seconds.as_mut() {
                    *seconds = seconds.saturating_add(1);
                    if *seconds >= sig_init && !s.onkey_supervisor_signalled {
                        s.onkey_supervisor_signalled = true;
                        signal = true;
                    }
                    if *seconds >= shutdown && !s.onkey_standby_issued {
                        s.onkey_standby_issued = true;
                        standby = true;
                    }
                }
            }
            (s.flags.rtc_second(), signal, standby)
        });
        if forward {
            self.platform.rtc_event(RtcEvent::Second);
        }
        if signal {
            if self.platform.supervisor_reachable() {
                info!("on-key held, requesting shutdown");
                self.platform.signal_supervisor();
            } else {
                warn!("on-key held but no supervisor to shut down");
            }
        }
        if standby && self.go_standby().await.is_err() {
            error!("failed to enter standby");
        }
    }

    /// Handles on-key edges. A press and release latched in the same pass are handled in that
    /// order.
    async fn onkey_edges(&self, status: &IrqSet) {
        if status.contains(IrqSource::OnkeyFalling) {
            let report = self.with_state(|s| {
                s.flags = s.flags.with_power_pressed(true);
                !s.suppress_onkey
            });
            debug!("on-key pressed");
            if report {
                self.platform.report_key(Key::Power, true);
            }
        }
        if status.contains(IrqSource::OnkeyRising) {
            let (report, rtc_second) = self.with_state(|s| {
                s.flags = s.flags.with_power_pressed(false);
                s.onkey_seconds = None;
                s.onkey_supervisor_signalled = false;
                s.onkey_standby_issued = false;
                let report = !s.suppress_onkey;
                s.suppress_onkey = false;
                (report, s.flags.rtc_second())
            });
            debug!("on-key released");
            if report {
                self.platform.report_key(Key::Power, false);
            }
            if !rtc_second {
                let tick = IrqSource::Second;
                if self
                    .set_bits(tick.mask_register(), tick.mask(), tick.mask())
                    .await
                    .is_err()
                {
                    warn!("failed to mask the periodic tick");
                }
            }
        }
    }

    async fn onkey_held(&self) {
        debug!("on-key held for one second");
        self.with_state(|s| {
            s.onkey_seconds = Some(0);
            s.onkey_supervisor_signalled = false;
            s.onkey_standby_issued = false;
        });
        // Keep the PMU's own 8 second power-off timer from firing.
        if self
            .set_bits(regs::OOCSHDWN, regs::OOCSHDWN_TOTRST, regs::OOCSHDWN_TOTRST)
            .await
            .is_err()
        {
            warn!("failed to reset the power-off timer");
        }
        if self
            .clear_bits(IrqSource::Second.mask_register(), IrqSource::Second.mask())
            .await
            .is_err()
        {
            warn!("failed to unmask the periodic tick");
        }
    }

    async fn battery_full(&self) {
        let now = self.timebase.now();
        let grace = self.config.battery_full_grace;
        let spurious = self.with_state(|s| {
            s.last_battery_insertion
                .is_some_and(|inserted| now.saturating_duration_since(inserted) < grace)
        });
        if !spurious {
            info!("battery full");
            self.platform.notify(Feature::Charger, PmuEvent::ChargerIdle);
            return;
        }
        info!("battery full right after insertion, clearing the latch");
        let cleared = async {
            let saved = self.usb_current_limit().await?;
            self.program_usb_tier(UsbCurrentLimit::Suspend).await?;
            self.program_usb_tier(saved).await
        };
        if cleared.await.is_err() {
            warn!("failed to clear spurious battery full");
        }
    }

    async fn low_power(&self) {
        let usb_valid = match self.reg_read(regs::MBCS1).await {
            Ok(mbcs1) => Mbcs1::new_with_raw_value(mbcs1).usb_valid(),
            Err(_) => {
                warn!("failed to read charger status");
                false
            }
        };
        if usb_valid {
            info!("low battery with USB power, waiting for a battery");
            self.platform.notify(Feature::Charger, PmuEvent::ChargerIdle);
            if self
                .set_bits(regs::MBCC1, regs::MBCC1_RESUME, regs::MBCC1_RESUME)
                .await
                .is_err()
            {
                warn!("failed to resume charging");
            }
            self.start_no_battery_poller();
        } else if self.platform.supervisor_reachable() {
            warn!("low battery, requesting shutdown");
            self.platform.power_event(PowerEvent::LowBattery);
            self.platform.signal_supervisor();
        } else {
            error!("low battery before the supervisor is up");
            self.platform.power_event(PowerEvent::CriticalSuspend);
        }
        if self
            .set_bits(regs::OOCSHDWN, regs::OOCSHDWN_TOTRST, regs::OOCSHDWN_TOTRST)
            .await
            .is_err()
        {
            warn!("failed to reset the power-off timer");
        }
    }
}
