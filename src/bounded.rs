//! Deadline wrapper for collaborator calls.

use std::future::Future;
use std::time::Duration;

use anyhow::{anyhow, Result};

/// Runs `call`, turning an elapsed deadline into an ordinary error naming `what`.
pub async fn bounded<F, T>(limit: Duration, what: &str, call: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(anyhow!("{what} timed out after {}ms", limit.as_millis())),
    }
}
