//! Handler outcome reported back through the middleware chain.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Outcome of handling one message.
///
/// `retry = true` asks the transport to redeliver after `retry_delay_ms`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CommandHandlingResult {
    /// Whether the message should be redelivered.
    pub retry: bool,
    /// Redelivery delay in milliseconds, meaningful only when `retry` is set.
    pub retry_delay_ms: u64,
}

impl CommandHandlingResult {
    /// Successful handling.
    pub const fn ok() -> Self {
        Self {
            retry: false,
            retry_delay_ms: 0,
        }
    }

    /// Ask for redelivery after `retry_delay_ms`.
    pub const fn retry_after(retry_delay_ms: u64) -> Self {
        Self {
            retry: true,
            retry_delay_ms,
        }
    }

    /// Ask for redelivery after `delay`.
    pub fn retry_after_duration(delay: Duration) -> Self {
        Self::retry_after(u64::try_from(delay.as_millis()).unwrap_or(u64::MAX))
    }

    /// Converts to the `(retry_delay_ms, success)` pair passed to an acknowledge callback.
    pub fn to_ack(self) -> (u64, bool) {
        if self.retry {
            (self.retry_delay_ms, false)
        } else {
            (0, true)
        }
    }
}
