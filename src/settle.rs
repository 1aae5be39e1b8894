//! Settle delays.
//!
//! Many effects on the system under test (a process starting, a message
//! arriving, a connection closing) are observable but asynchronous. The
//! harness waits a short fixed time after such actions before asserting.
//! That is a known source of flaky scenarios; [`poll_until`] is the bounded
//! alternative where a condition can be checked directly.

use std::time::Duration;

use tokio::time::{sleep, Instant};
use tracing::trace;

use crate::error::{HarnessError, Result};

/// The default settle delay: a quarter of a second.
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_millis(250);

/// Pauses for `delay` so the system under test can catch up.
pub async fn settle(delay: Duration) {
    if delay.is_zero() {
        return;
    }
    trace!("Settling for {:?}", delay);
    sleep(delay).await;
}

/// Re-checks `condition` every `interval` until it holds or `limit` passes.
pub async fn poll_until<F>(what: &str, limit: Duration, interval: Duration, mut condition: F) -> Result<()>
where
    F: FnMut() -> bool,
{
    let deadline = Instant::now() + limit;
    loop {
        if condition() {
            return Ok(());
        }
        if Instant::now() >= deadline {
            return Err(HarnessError::timeout(what, limit));
        }
        sleep(interval).await;
    }
}
