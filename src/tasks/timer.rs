//! Expiry Timer Task
//!
//! One-shot timers implemented as tokio tasks sleeping until the deadline.

use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::AbortHandle;
use tracing::trace;

/// Cancellable handle of a scheduled timer.
///
/// Cancelling is best effort: a callback that already started still runs, so
/// callbacks compare their sequence number with the one the entry holds.
#[derive(Debug)]
pub struct TimerHandle {
    abort: AbortHandle,
    seq: u64,
}

impl TimerHandle {
    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn cancel(&self) {
        self.abort.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.abort.is_finished()
    }
}

/// Schedules timer callbacks on the cache's runtime.
#[derive(Debug, Clone)]
pub struct TimerService {
    handle: Handle,
}

impl TimerService {
    pub(crate) fn new(handle: Handle) -> Self {
        Self { handle }
    }

    /// Runs `callback` once after `delay`.
    pub fn schedule<F>(&self, delay: Duration, seq: u64, callback: F) -> TimerHandle
    where
        F: FnOnce() + Send + 'static,
    {
        let task = self.handle.spawn(async move {
            tokio::time::sleep(delay).await;
            trace!(seq, "Timer fired");
            callback();
        });
        TimerHandle {
            abort: task.abort_handle(),
            seq,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::Background;
    use std::sync::mpsc;

    #[test]
    fn test_timer_fires() {
        let background = Background::start("timer-fires", 0).unwrap();
        let (tx, rx) = mpsc::channel();
        let handle = background
            .timers()
            .schedule(Duration::from_millis(10), 7, move || {
                let _ = tx.send(7);
            });
        assert_eq!(handle.seq(), 7);
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), 7);
    }

    #[test]
    fn test_cancelled_timer_does_not_fire() {
        let background = Background::start("timer-cancel", 0).unwrap();
        let (tx, rx) = mpsc::channel::<()>();
        let handle = background
            .timers()
            .schedule(Duration::from_millis(100), 1, move || {
                let _ = tx.send(());
            });
        handle.cancel();
        assert!(rx.recv_timeout(Duration::from_millis(400)).is_err());
    }
}
