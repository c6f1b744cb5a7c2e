//! Register-level PMU model and recording platform for unit tests.

use core::cell::{Cell, RefCell};
use std::rc::Rc;
use std::vec::Vec;

use embassy_futures::block_on;
use embassy_sync::blocking_mutex::raw::NoopRawMutex;
use embassy_time::{Duration, Instant};

use crate::adc::{AdcChannel, Averaging};
use crate::interface::{Interface, RetryPolicy};
use crate::irq::IrqSource;
use crate::platform::{Feature, Key, Platform, PmuEvent, PowerEvent, RtcEvent};
use crate::regs;
use crate::timebase::Timebase;
use crate::{Config, Pcf50633};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Access {
    Read(u8, usize),
    Write(u8, Vec<u8>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MockError;

pub struct Hardware {
    pub regs: [u8; 256],
    pub log: Vec<Access>,
    /// Transfers to fail outright, then short reads to return, counted down per attempt.
    pub fail_reads: usize,
    pub fail_writes: usize,
    pub short_reads: usize,
    /// Every ADCC1 value that started a conversion.
    pub conversions: Vec<u8>,
    adc_samples: [u16; 16],
}

impl Hardware {
    fn new() -> Self {
        let mut regs = [0; 256];
        regs[regs::VERSION as usize] = 0x47;
        regs[regs::VARIANT as usize] = 0x01;
        let mut adc_samples = [0; 16];
        // No identification resistor.
        adc_samples[AdcChannel::Adcin1 as usize] = 1023;
        Self {
            regs,
            log: Vec::new(),
            fail_reads: 0,
            fail_writes: 0,
            short_reads: 0,
            conversions: Vec::new(),
            adc_samples,
        }
    }

    pub fn set_adc_sample(&mut self, channel: AdcChannel, sample: u16) {
        self.adc_samples[channel as usize] = sample;
    }

    pub fn latch(&mut self, source: IrqSource) {
        self.regs[source.status_register() as usize] |= source.mask();
    }

    pub fn is_latched(&self, source: IrqSource) -> bool {
        self.regs[source.status_register() as usize] & source.mask() != 0
    }

    /// A conversion has been started and not yet acknowledged.
    pub fn adc_busy(&self) -> bool {
        self.is_latched(IrqSource::AdcReady)
    }

    pub fn regs_at(&self, reg: u8, len: usize) -> Vec<u8> {
        let start = reg as usize;
        self.regs[start..start + len].to_vec()
    }

    /// Values written to `reg`, including as part of a block write.
    pub fn writes_to(&self, reg: u8) -> impl Iterator<Item = u8> + '_ {
        self.log.iter().filter_map(move |access| match access {
            Access::Write(start, data)
                if reg >= *start && usize::from(reg - start) < data.len() =>
            {
                Some(data[usize::from(reg - start)])
            }
            _ => None,
        })
    }

    fn is_status(reg: usize) -> bool {
        (regs::INT1 as usize..=regs::INT5 as usize).contains(&reg)
    }

    fn write(&mut self, reg: u8, data: &[u8]) {
        let start = reg as usize;
        self.regs[start..start + data.len()].copy_from_slice(data);
        if reg == regs::ADCC1 && data[0] & 0x01 != 0 {
            let sample = self.adc_samples[(data[0] >> 4) as usize];
            self.regs[regs::ADCS1 as usize] = (sample >> 2) as u8;
            self.regs[regs::ADCS3 as usize] = (sample & 0x03) as u8;
            self.conversions.push(data[0]);
            self.latch(IrqSource::AdcReady);
        }
    }
}

#[derive(Clone)]
pub struct MockBus {
    hw: Rc<RefCell<Hardware>>,
}

impl MockBus {
    /// ADCC1 value that starts a 10-bit conversion on `channel`.
    pub fn conversion(channel: AdcChannel, averaging: Averaging) -> u8 {
        (channel as u8) << 4 | (averaging as u8) << 2 | 0x03
    }
}

impl Interface for MockBus {
    type Error = MockError;

    async fn write(&mut self, address: u8, data: &[u8]) -> Result<(), MockError> {
        let mut hw = self.hw.borrow_mut();
        hw.log.push(Access::Write(address, data.to_vec()));
        if hw.fail_writes > 0 {
            hw.fail_writes -= 1;
            return Err(MockError);
        }
        hw.write(address, data);
        Ok(())
    }

    async fn read(&mut self, address: u8, data: &mut [u8]) -> Result<usize, MockError> {
        let mut hw = self.hw.borrow_mut();
        hw.log.push(Access::Read(address, data.len()));
        if hw.fail_reads > 0 {
            hw.fail_reads -= 1;
            return Err(MockError);
        }
        let start = address as usize;
        if hw.short_reads > 0 {
            // An aborted transfer: nothing is cleared.
            hw.short_reads -= 1;
            let n = data.len().saturating_sub(1);
            data[..n].copy_from_slice(&hw.regs[start..start + n]);
            return Ok(n);
        }
        data.copy_from_slice(&hw.regs[start..start + data.len()]);
        for reg in start..start + data.len() {
            if Hardware::is_status(reg) {
                hw.regs[reg] = 0;
            }
        }
        Ok(data.len())
    }
}

/// Manual clock. Delays advance it and yield once.
#[derive(Clone, Default)]
pub struct MockClock {
    now_us: Rc<Cell<u64>>,
}

impl MockClock {
    pub fn now_us(&self) -> u64 {
        self.now_us.get()
    }

    pub fn advance(&self, duration: Duration) {
        self.now_us.set(self.now_us.get() + duration.as_micros());
    }
}

impl Timebase for MockClock {
    fn now(&self) -> Instant {
        Instant::from_micros(self.now_us.get())
    }

    async fn delay(&self, duration: Duration) {
        self.advance(duration);
        embassy_futures::yield_now().await;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Record {
    Notify(Feature, PmuEvent),
    Key(Key, bool),
    Rtc(RtcEvent),
    Power(PowerEvent),
    Supervisor,
    Fault(IrqSource),
}

#[derive(Default)]
pub struct MockPlatform {
    records: RefCell<Vec<Record>>,
    syncs: Cell<usize>,
    pub supervisor: Cell<bool>,
}

impl MockPlatform {
    /// Everything recorded since the last call.
    pub fn take(&self) -> Vec<Record> {
        core::mem::take(&mut *self.records.borrow_mut())
    }

    pub fn syncs(&self) -> usize {
        self.syncs.get()
    }

    fn record(&self, record: Record) {
        self.records.borrow_mut().push(record);
    }
}

impl Platform for MockPlatform {
    fn notify(&self, feature: Feature, event: PmuEvent) {
        self.record(Record::Notify(feature, event));
    }

    fn report_key(&self, key: Key, pressed: bool) {
        self.record(Record::Key(key, pressed));
    }

    fn sync_input(&self) {
        self.syncs.set(self.syncs.get() + 1);
    }

    fn rtc_event(&self, event: RtcEvent) {
        self.record(Record::Rtc(event));
    }

    fn power_event(&self, event: PowerEvent) {
        self.record(Record::Power(event));
    }

    fn supervisor_reachable(&self) -> bool {
        self.supervisor.get()
    }

    fn signal_supervisor(&self) {
        self.record(Record::Supervisor);
    }

    fn hardware_fault(&self, source: IrqSource) {
        self.record(Record::Fault(source));
    }
}

pub type TestPmu = Pcf50633<NoopRawMutex, MockBus, MockClock, MockPlatform>;
pub type HardwareRef = Rc<RefCell<Hardware>>;

/// Default configuration without bus retries.
pub fn test_config() -> Config {
    let mut config = Config::new();
    config.retry = RetryPolicy::none();
    config
}

pub fn new_device(config: Config) -> (TestPmu, HardwareRef, MockClock) {
    let hw = Rc::new(RefCell::new(Hardware::new()));
    let clock = MockClock::default();
    let pmu = Pcf50633::new(
        MockBus { hw: hw.clone() },
        clock.clone(),
        MockPlatform::default(),
        config,
    );
    (pmu, hw, clock)
}

/// A device past init and cold-plug, with nothing attached and all recordings cleared.
pub fn probed() -> (TestPmu, HardwareRef, MockClock) {
    let (pmu, hw, clock) = new_device(test_config());
    block_on(pmu.init()).unwrap();
    hw.borrow_mut().latch(IrqSource::Second);
    drain(&pmu);
    assert!(pmu.with_state(|s| s.coldplug_done));

    let mut hw_mut = hw.borrow_mut();
    hw_mut.log.clear();
    hw_mut.conversions.clear();
    drop(hw_mut);
    pmu.platform().take();
    pmu.platform().syncs.set(0);
    (pmu, hw, clock)
}

/// Services the device until the ADC FIFO is empty.
pub fn drain(pmu: &TestPmu) {
    block_on(async {
        for _ in 0..32 {
            pmu.service().await;
            if pmu.adc_pending().await == 0 {
                return;
            }
        }
        panic!("ADC queue did not drain");
    });
}

/// Plugs a USB host and lets classification settle.
pub fn plug_usb(pmu: &TestPmu, hw: &HardwareRef) {
    {
        let mut hw = hw.borrow_mut();
        hw.regs[regs::MBCS1 as usize] = 0x03;
        hw.latch(IrqSource::UsbInserted);
    }
    drain(pmu);
    assert!(pmu.flags().usb_present());
    pmu.platform().take();
    let mut hw = hw.borrow_mut();
    hw.log.clear();
    hw.conversions.clear();
}
