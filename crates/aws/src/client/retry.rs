//! Bounded retry with exponential backoff for transient provider errors
//! (§4.1: "≤5 attempts, exponential backoff").

use aquarium_aws_core::{Error, Result};
use std::future::Future;
use std::time::Duration;

const MAX_ATTEMPTS: u32 = 5;
const BASE_DELAY: Duration = Duration::from_millis(200);

/// True for errors worth retrying: throttling, connection resets, 5xx-ish
/// transport failures. Anything else (access denied, not found, malformed
/// request) is semantic and must surface immediately.
pub fn is_transient(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    ["throttl", "timeout", "connection", "internal error", "service unavailable", "rate exceeded"]
        .iter()
        .any(|needle| lower.contains(needle))
}

pub async fn with_retry<T, F, Fut>(op_name: &str, mut f: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, String>>,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        match f().await {
            Ok(value) => return Ok(value),
            Err(message) if attempt < MAX_ATTEMPTS && is_transient(&message) => {
                let delay = BASE_DELAY * 2u32.pow(attempt - 1);
                tracing::warn!(op = op_name, attempt, %message, "transient cloud error, retrying");
                tokio::time::sleep(delay).await;
            }
            Err(message) if is_transient(&message) => {
                return Err(Error::Transient(format!(
                    "{op_name}: giving up after {MAX_ATTEMPTS} attempts: {message}"
                )));
            }
            Err(message) => return Err(Error::Provider(format!("{op_name}: {message}"))),
        }
    }
}
