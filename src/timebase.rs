use embassy_time::{Duration, Instant, Timer};

/// Clock and sleep source for the deferred tasks.
#[allow(async_fn_in_trait)]
pub trait Timebase {
    fn now(&self) -> Instant;
    async fn delay(&self, duration: Duration);
}

/// [`Timebase`] backed by the embassy time driver.
#[derive(Clone, Copy, Debug, Default)]
pub struct EmbassyTimebase;

impl Timebase for EmbassyTimebase {
    fn now(&self) -> Instant {
        Instant::now()
    }

    async fn delay(&self, duration: Duration) {
        Timer::after(duration).await
    }
}
