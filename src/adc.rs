//! ADC scheduler.
//!
//! The PMU has a single converter and no way to tag a conversion with the request that started
//! it, so requests queue in a FIFO and exactly one conversion is in flight whenever the FIFO is
//! non-empty. The head of the FIFO is programmed when it becomes the oldest entry; the result
//! is collected when the dispatcher sees ADCRDY.

use core::sync::atomic::{AtomicU8, Ordering};

use arbitrary_int::{u2, u4};
use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::signal::Signal;

use crate::interface::Interface;
use crate::platform::Platform;
use crate::regs::{self, Adcc1};
use crate::timebase::Timebase;
use crate::{Bus, Error, Pcf50633, PmuState};

/// FIFO slots. Must be a power of two; one slot is kept free to tell full from empty.
pub const ADC_FIFO_DEPTH: usize = 8;
const ADC_FIFO_MASK: usize = ADC_FIFO_DEPTH - 1;

const _: () = assert!(ADC_FIFO_DEPTH.is_power_of_two());

/// ADC input multiplexer selection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum AdcChannel {
    BatterySense = 0x0,
    BatterySenseSubtract = 0x1,
    Adcin2 = 0x2,
    Adcin2Subtract = 0x3,
    BatteryTemperature = 0x6,
    /// Charger identification resistor.
    Adcin1 = 0x7,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum Averaging {
    None = 0,
    Four = 1,
    Eight = 2,
    Sixteen = 3,
}

/// The conversion result could not be read back.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AdcFault;

pub type AdcResult = Result<u16, AdcFault>;

/// Completion callback for [`Pcf50633::adc_async_read`]. Runs with the device context locked,
/// so it must not block.
pub type AdcCallback = fn(&PmuState, usize, AdcResult);

/// What to do with a finished conversion.
#[derive(Clone, Copy, Debug)]
pub enum AdcCompletion {
    /// Wake the synchronous reader parked on waiter slot `n`.
    Waiter(usize),
    Callback { func: AdcCallback, param: usize },
    /// Feed the charger policy, unless USB was unplugged after the request was made.
    ChargerClassification { removal_count: u32 },
}

#[derive(Clone, Copy, Debug)]
pub struct AdcRequest {
    pub channel: AdcChannel,
    pub averaging: Averaging,
    pub completion: AdcCompletion,
}

impl AdcRequest {
    fn control(&self) -> Adcc1 {
        Adcc1::new_with_raw_value(0)
            .with_mux(u4::new(self.channel as u8))
            .with_average(u2::new(self.averaging as u8))
            .with_resolution_10bit(true)
            .with_start(true)
    }
}

/// The FIFO was full.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct QueueFull;

/// Ring of pending requests. `head` is the next free slot, `tail` the oldest pending entry.
#[derive(Debug)]
pub struct AdcFifo {
    slots: [Option<AdcRequest>; ADC_FIFO_DEPTH],
    head: usize,
    tail: usize,
}

impl AdcFifo {
    pub const fn new() -> Self {
        Self {
            slots: [None; ADC_FIFO_DEPTH],
            head: 0,
            tail: 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.head == self.tail
    }

    pub fn is_full(&self) -> bool {
        (self.head + 1) & ADC_FIFO_MASK == self.tail
    }

    pub fn len(&self) -> usize {
        self.head.wrapping_sub(self.tail) & ADC_FIFO_MASK
    }

    /// Queues `request`. Returns `true` if the FIFO was empty, i.e. nothing is converting yet.
    pub fn push(&mut self, request: AdcRequest) -> Result<bool, QueueFull> {
        if self.is_full() {
            return Err(QueueFull);
        }
        let was_empty = self.is_empty();
        self.slots[self.head] = Some(request);
        self.head = (self.head + 1) & ADC_FIFO_MASK;
        Ok(was_empty)
    }

    /// Oldest pending request, the one currently converting.
    pub fn oldest(&self) -> Option<&AdcRequest> {
        if self.is_empty() {
            return None;
        }
        self.slots[self.tail].as_ref()
    }

    pub fn pop(&mut self) -> Option<AdcRequest> {
        if self.is_empty() {
            return None;
        }
        let request = self.slots[self.tail].take();
        self.tail = (self.tail + 1) & ADC_FIFO_MASK;
        request
    }

    /// Drops the most recently pushed request.
    fn unpush(&mut self) -> Option<AdcRequest> {
        if self.is_empty() {
            return None;
        }
        self.head = self.head.wrapping_sub(1) & ADC_FIFO_MASK;
        self.slots[self.head].take()
    }
}

impl Default for AdcFifo {
    fn default() -> Self {
        Self::new()
    }
}

const WAITER_FREE: u8 = 0;
/// Claimed; the result has not been delivered yet.
const WAITER_PENDING: u8 = 1;
const WAITER_DELIVERED: u8 = 2;
/// The reader went away with its request still queued. Delivery frees the slot.
const WAITER_ABANDONED: u8 = 3;

/// Parking spot for one synchronous reader.
pub(crate) struct AdcWaiter<M: RawMutex> {
    state: AtomicU8,
    done: Signal<M, AdcResult>,
}

impl<M: RawMutex> AdcWaiter<M> {
    pub(crate) const fn new() -> Self {
        Self {
            state: AtomicU8::new(WAITER_FREE),
            done: Signal::new(),
        }
    }

    fn claim(&self) -> bool {
        self.state
            .compare_exchange(WAITER_FREE, WAITER_PENDING, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Hands `result` to the reader. Returns `false` if the reader is gone.
    fn deliver(&self, result: AdcResult) -> bool {
        match self.state.compare_exchange(
            WAITER_PENDING,
            WAITER_DELIVERED,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => {
                self.done.signal(result);
                true
            }
            Err(_) => {
                self.state.store(WAITER_FREE, Ordering::Release);
                false
            }
        }
    }
}

/// Releases a claimed waiter when the reader finishes or is dropped.
struct WaiterClaim<'a, M: RawMutex> {
    waiter: &'a AdcWaiter<M>,
    queued: bool,
}

impl<M: RawMutex> Drop for WaiterClaim<'_, M> {
    fn drop(&mut self) {
        let abandoned = self.queued
            && self
                .waiter
                .state
                .compare_exchange(
                    WAITER_PENDING,
                    WAITER_ABANDONED,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                )
                .is_ok();
        if !abandoned {
            self.waiter.state.store(WAITER_FREE, Ordering::Release);
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
    /// Queues a conversion whose result is passed to `callback` along with `param`.
    pub async fn adc_async_read(
        &self,
        channel: AdcChannel,
        averaging: Averaging,
        callback: AdcCallback,
        param: usize,
    ) -> Result<(), Error<I::Error>> {
        self.adc_enqueue(AdcRequest {
            channel,
            averaging,
            completion: AdcCompletion::Callback {
                func: callback,
                param,
            },
        })
        .await
    }

    /// Converts `channel` and waits for the raw 10-bit result.
    ///
    /// The request goes through the same FIFO as asynchronous ones; the caller is parked
    /// outside the bus lock until the dispatcher delivers the result.
    pub async fn adc_sync_read(
        &self,
        channel: AdcChannel,
        averaging: Averaging,
    ) -> Result<u16, Error<I::Error>> {
        let slot = self
            .adc_waiters
            .iter()
            .position(|w| w.claim())
            .ok_or(Error::QueueFull)?;
        let mut claim = WaiterClaim {
            waiter: &self.adc_waiters[slot],
            queued: false,
        };
        claim.waiter.done.reset();

        let request = AdcRequest {
            channel,
            averaging,
            completion: AdcCompletion::Waiter(slot),
        };
        {
            let mut bus = self.bus.lock().await;
            // The push happens before the first suspension point of the enqueue.
            claim.queued = true;
            if let Err(e) = self.adc_enqueue_locked(&mut bus, request).await {
                claim.queued = false;
                return Err(e);
            }
        }
        claim.waiter.done.wait().await.map_err(|AdcFault| Error::Conversion)
    }

    pub(crate) async fn adc_enqueue(&self, request: AdcRequest) -> Result<(), Error<I::Error>> {
        let mut bus = self.bus.lock().await;
        self.adc_enqueue_locked(&mut bus, request).await
    }

    async fn adc_enqueue_locked(
        &self,
        bus: &mut Bus<I>,
        request: AdcRequest,
    ) -> Result<(), Error<I::Error>> {
        let was_empty = bus.adc.push(request).map_err(|QueueFull| {
            error!("ADC queue full, dropping {:?} request", request.channel);
            Error::QueueFull
        })?;
        trace!("ADC {:?} queued, {} pending", request.channel, bus.adc.len());
        if was_empty {
            if let Err(e) = self.adc_start(bus, &request).await {
                bus.adc.unpush();
                return Err(e);
            }
        }
        Ok(())
    }

    async fn adc_start(&self, bus: &mut Bus<I>, request: &AdcRequest) -> Result<(), Error<I::Error>> {
        self.bus_write(bus, regs::ADCC2, &[regs::ADCC2_RATIO_NONE]).await?;
        self.bus_write(bus, regs::ADCC3, &[regs::ADCC3_ACCSW_EN]).await?;
        self.bus_write(bus, regs::ADCC1, &[request.control().raw_value()])
            .await
    }

    async fn adc_result(&self, bus: &mut Bus<I>) -> Result<u16, Error<I::Error>> {
        let mut high = [0];
        let mut low = [0];
        self.bus_read(bus, regs::ADCS1, &mut high).await?;
        self.bus_read(bus, regs::ADCS3, &mut low).await?;
        Ok(((high[0] as u16) << 2) | (low[0] & regs::ADCS3_ADCDAT1L_MASK) as u16)
    }

    /// Handles ADCRDY: collects the oldest request's result, starts the next conversion, then
    /// delivers the result.
    pub(crate) async fn adc_complete(&self) {
        let (request, result) = {
            let mut bus = self.bus.lock().await;
            let Some(request) = bus.adc.pop() else {
                warn!("ADC ready with nothing queued");
                return;
            };
            let result = self.adc_result(&mut bus).await.map_err(|_| {
                warn!("failed to read ADC result for {:?}", request.channel);
                AdcFault
            });
            if let Some(next) = bus.adc.oldest().copied() {
                if self.adc_start(&mut bus, &next).await.is_err() {
                    error!("failed to start queued ADC conversion on {:?}", next.channel);
                }
            }
            (request, result)
        };
        self.adc_deliver(request, result).await;
    }

    async fn adc_deliver(&self, request: AdcRequest, result: AdcResult) {
        match request.completion {
            AdcCompletion::Waiter(slot) => match self.adc_waiters.get(slot) {
                Some(waiter) => {
                    if !waiter.deliver(result) {
                        debug!("ADC reader {} gone, result dropped", slot);
                    }
                }
                None => error!("ADC result for unknown waiter {}", slot),
            },
            AdcCompletion::Callback { func, param } => {
                self.state.lock(|state| func(&*state.borrow(), param, result))
            }
            AdcCompletion::ChargerClassification { removal_count } => {
                if removal_count != self.usb_removal_count() {
                    debug!("USB removed since classification was requested, ignoring");
                    return;
                }
                match result {
                    Ok(sample) => {
                        if self.configure_for_charger(sample).await.is_err() {
                            warn!("failed to apply charger policy");
                        }
                    }
                    Err(AdcFault) => warn!("charger classification read failed"),
                }
            }
        }
    }

    /// Starts an asynchronous charger identification read.
    pub(crate) async fn start_classification(&self) {
        let request = AdcRequest {
            channel: AdcChannel::Adcin1,
            averaging: Averaging::Sixteen,
            completion: AdcCompletion::ChargerClassification {
                removal_count: self.usb_removal_count(),
            },
        };
        if self.adc_enqueue(request).await.is_err() {
            warn!("could not queue charger classification");
        }
    }

    /// Requests waiting in the ADC FIFO, including the one converting.
    pub async fn adc_pending(&self) -> usize {
        self.bus.lock().await.adc.len()
    }
}
