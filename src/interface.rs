//! Register transport.

use embassy_time::Duration;
use embedded_hal::i2c::Error as _;
use embedded_hal_async::i2c::{I2c, Operation};

/// Default 7-bit I2C address of the PCF50633.
pub const DEFAULT_ADDRESS: u8 = 0x73;

/// Byte-wide register access to the PMU.
///
/// Implementations perform one bus transaction per call. Faults are assumed to be transient;
/// retrying is the caller's business (see [`RetryPolicy`]).
#[allow(async_fn_in_trait)]
pub trait Interface {
    type Error;
    async fn write(&mut self, address: u8, data: &[u8]) -> Result<(), Self::Error>;
    /// Reads into `data` starting at `address`, returning how many bytes were transferred.
    async fn read(&mut self, address: u8, data: &mut [u8]) -> Result<usize, Self::Error>;
}

/// PCF50633 low level I2C driver
pub struct Pcf50633I2c<I> {
    i2c: I,
    address: u8,
}

impl<I> Pcf50633I2c<I> {
    pub fn new(i2c: I) -> Self {
        Self::new_with_address(i2c, DEFAULT_ADDRESS)
    }

    pub fn new_with_address(i2c: I, address: u8) -> Self {
        Self { i2c, address }
    }

    pub fn release(self) -> I {
        self.i2c
    }
}

impl<I: I2c> Interface for Pcf50633I2c<I> {
    type Error = I::Error;

    async fn write(&mut self, address: u8, data: &[u8]) -> Result<(), I::Error> {
        trace!("Pcf50633I2c::write(addr: {}, len: {})", address, data.len());
        self.i2c
            .transaction(
                self.address,
                &mut [Operation::Write(&[address]), Operation::Write(data)],
            )
            .await
            .inspect_err(|e| debug!("i2c write failed: {:?}", e.kind()))
    }

    async fn read(&mut self, address: u8, data: &mut [u8]) -> Result<usize, I::Error> {
        trace!("Pcf50633I2c::read(addr: {}, len: {})", address, data.len());
        if data.is_empty() {
            return Ok(0);
        }
        self.i2c
            .write_read(self.address, &[address], data)
            .await
            .inspect_err(|e| debug!("i2c read failed: {:?}", e.kind()))?;
        Ok(data.len())
    }
}

/// Bounded retry applied to every register transfer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RetryPolicy {
    /// Total number of tries, including the first one. Zero behaves like one.
    pub attempts: u8,
    /// Pause between tries.
    pub backoff: Duration,
}

impl RetryPolicy {
    pub const fn new(attempts: u8, backoff: Duration) -> Self {
        Self { attempts, backoff }
    }

    /// A policy that gives up after the first failure.
    pub const fn none() -> Self {
        Self::new(1, Duration::from_ticks(0))
    }

    /// Whether another try is allowed after `failed` tries have failed.
    pub const fn should_retry(&self, failed: u8) -> bool {
        failed < self.attempts
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_millis(1))
    }
}
