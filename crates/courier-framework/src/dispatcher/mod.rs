//! Command and event dispatchers.
//!
//! Dispatchers sit between the transport callback and the handlers. They
//! look handlers up by message type, run them through the interceptor chain
//! and translate the outcome into exactly one acknowledge call per message.

mod batch;
mod command;
mod event;

use std::sync::Arc;

use courier_core::Acknowledge;
use parking_lot::Mutex;

pub use command::CommandDispatcher;
pub use event::EventDispatcher;

/// Redelivery delay used when a handler fails without naming one.
pub const DEFAULT_FAILED_RETRY_DELAY_MS: u64 = 60_000;

/// Acknowledges one message once every handler observing it has reported.
///
/// Any failure nacks the message with the largest reported delay.
pub(crate) struct PendingAck {
    state: Mutex<PendingState>,
}

struct PendingState {
    ack: Option<Acknowledge>,
    remaining: usize,
    failure_delay: Option<u64>,
}

impl PendingAck {
    pub(crate) fn new(ack: Acknowledge, expected: usize) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(PendingState {
                ack: Some(ack),
                remaining: expected,
                failure_delay: None,
            }),
        })
    }

    /// Records one outcome; the last report fires the acknowledge.
    pub(crate) fn report(&self, retry_delay_ms: u64, success: bool) {
        let (ack, failure_delay) = {
            let mut state = self.state.lock();
            if !success {
                state.failure_delay = Some(
                    state
                        .failure_delay
                        .map_or(retry_delay_ms, |delay| delay.max(retry_delay_ms)),
                );
            }
            state.remaining = state.remaining.saturating_sub(1);
            if state.remaining > 0 {
                return;
            }
            (state.ack.take(), state.failure_delay)
        };

        if let Some(ack) = ack {
            match failure_delay {
                Some(delay) => ack.nack(delay),
                None => ack.ack(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recording() -> (Acknowledge, Arc<Mutex<Vec<(u64, bool)>>>) {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&calls);
        let ack = Acknowledge::new(move |delay, success| sink.lock().push((delay, success)));
        (ack, calls)
    }

    #[test]
    fn acknowledges_after_the_last_report() {
        let (ack, calls) = recording();
        let pending = PendingAck::new(ack, 2);

        pending.report(0, true);
        assert!(calls.lock().is_empty());

        pending.report(0, true);
        assert_eq!(*calls.lock(), vec![(0, true)]);
    }

    #[test]
    fn any_failure_nacks_with_the_largest_delay() {
        let (ack, calls) = recording();
        let pending = PendingAck::new(ack, 3);

        pending.report(100, false);
        pending.report(0, true);
        pending.report(500, false);

        assert_eq!(*calls.lock(), vec![(500, false)]);
    }
}
