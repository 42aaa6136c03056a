//! Timer trait so retry loops and TTLs can run against a virtual clock in tests.

use async_trait::async_trait;
use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};
use std::time::Duration;

#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
pub trait Timer: Send + Sync {
    /// Milliseconds since the Unix epoch.
    fn now_millis(&self) -> u64;

    async fn sleep(&self, duration: Duration);
}

/// Wall-clock time via `web_time`, for hosts that bring their own sleep.
pub fn system_now_millis() -> u64 {
    web_time::SystemTime::now()
        .duration_since(web_time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Virtual clock for testing.
///
/// `sleep` advances the clock instantly, records the requested duration and yields once
/// so concurrently polled futures get a turn.
pub struct ManualTimer {
    now: AtomicU64,
    sleeps: Mutex<Vec<Duration>>,
}

impl ManualTimer {
    pub fn new(start_millis: u64) -> Self {
        Self {
            now: AtomicU64::new(start_millis),
            sleeps: Mutex::new(Vec::new()),
        }
    }

    pub fn advance(&self, duration: Duration) {
        self.now
            .fetch_add(duration.as_millis() as u64, Ordering::SeqCst);
    }

    /// Every duration passed to `sleep`, in call order.
    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl Default for ManualTimer {
    fn default() -> Self {
        Self::new(1_700_000_000_000)
    }
}

#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
impl Timer for ManualTimer {
    fn now_millis(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }

    async fn sleep(&self, duration: Duration) {
        self.sleeps
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(duration);
        self.advance(duration);
        YieldNow(false).await;
    }
}

struct YieldNow(bool);

impl Future for YieldNow {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        if self.0 {
            return Poll::Ready(());
        }
        self.0 = true;
        cx.waker().wake_by_ref();
        Poll::Pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_manual_timer_records_and_advances() {
        let timer = ManualTimer::new(1_000);
        timer.sleep(Duration::from_millis(250)).await;
        timer.sleep(Duration::from_millis(500)).await;

        assert_eq!(timer.now_millis(), 1_750);
        assert_eq!(
            timer.sleeps(),
            vec![Duration::from_millis(250), Duration::from_millis(500)]
        );
    }

    #[test]
    fn test_system_clock_is_past_2020() {
        assert!(system_now_millis() > 1_577_836_800_000);
    }
}
