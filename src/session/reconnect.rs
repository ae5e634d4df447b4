//! Delayed auto-connect with bounded retry

use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use super::SessionManager;
use crate::error::ConnectionError;

/// Backoff before retry number `attempt` (1-based): 250ms steps capped at 10s
pub fn retry_delay(attempt: u32) -> Duration {
    let delay_ms = std::cmp::min(10_000, 250 * u64::from(attempt));
    Duration::from_millis(delay_ms)
}

impl SessionManager {
    /// Wait `delay`, then connect, retrying up to `retries` more times.
    ///
    /// Gives up early if the session was connected or cleaned up from
    /// elsewhere in the meantime.
    pub async fn auto_connect(
        &self,
        delay: Duration,
        retries: u32,
    ) -> Result<bool, ConnectionError> {
        sleep(delay).await;

        let mut attempt = 0;
        loop {
            match self.connect().await {
                Ok(has_ports) => {
                    info!("Auto-connect succeeded (devices found: {})", has_ports);
                    return Ok(has_ports);
                }
                Err(e @ (ConnectionError::InProgress | ConnectionError::Aborted)) => {
                    debug!("Auto-connect stopped: {}", e);
                    return Err(e);
                }
                Err(e) if attempt >= retries => {
                    warn!("Auto-connect failed after {} attempts: {}", attempt + 1, e);
                    return Err(e);
                }
                Err(e) => {
                    attempt += 1;
                    let wait = retry_delay(attempt);
                    debug!(
                        "Auto-connect retry #{} in {}ms ({})",
                        attempt,
                        wait.as_millis(),
                        e
                    );
                    sleep(wait).await;
                }
            }
        }
    }
}
