//! Timed execution of storage calls
//!
//! Directories route every storage call through [`execute`] so each call is
//! logged with the client name, the action and its latency. Errors are logged
//! and returned unchanged.

use std::future::Future;
use std::time::Instant;

use tracing::{debug, error};

/// Run a storage call, logging its outcome and elapsed time
pub async fn execute<T, F>(client: &str, action: &'static str, operation: F) -> anyhow::Result<T>
where
    F: Future<Output = anyhow::Result<T>>,
{
    let started = Instant::now();
    match operation.await {
        Ok(value) => {
            debug!(
                client = %client,
                action,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Storage call completed"
            );
            Ok(value)
        }
        Err(e) => {
            error!(
                client = %client,
                action,
                error = %e,
                "Storage call failed"
            );
            Err(e)
        }
    }
}
