//! Waiting for the mesh to settle.
//!
//! Propagation gives no completion signal across pods, so observers poll.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;

use crate::error::{PodError, Result};

/// Evaluate `check` every `interval` until it returns `true` or `timeout`
/// elapses.  The check always runs at least once.
pub async fn poll_until<F, Fut>(timeout: Duration, interval: Duration, mut check: F) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = Instant::now() + timeout;
    loop {
        if check().await {
            return Ok(());
        }
        if Instant::now() >= deadline {
            return Err(PodError::Timeout(timeout));
        }
        tokio::time::sleep(interval).await;
    }
}
