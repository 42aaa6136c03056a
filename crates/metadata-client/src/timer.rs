//! Wall-clock timer backed by tokio.

use async_trait::async_trait;
use metadata_core::timer::{Timer, system_now_millis};
use std::time::Duration;

#[derive(Debug, Clone, Copy, Default)]
pub struct TokioTimer;

#[async_trait]
impl Timer for TokioTimer {
    fn now_millis(&self) -> u64 {
        system_now_millis()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}
