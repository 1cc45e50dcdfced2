//! Background Tasks Module
//!
//! Work the cache does off the caller's thread.
//!
//! # Tasks
//! - Expiry timers: one-shot callbacks at an entry's deadline
//! - Refresh pool: bounded workers reloading entries ahead of expiry
//!
//! Both run on a small tokio runtime owned by the cache. The runtime only
//! exists for caches that can expire entries or refresh them.

mod refresh;
mod timer;

pub use refresh::RefreshPool;
pub use timer::{TimerHandle, TimerService};

use parking_lot::Mutex;
use tokio::runtime::{Builder, Runtime};
use tracing::debug;

use crate::error::{CacheError, Result};

// == Background ==
/// Owns the runtime the timers and the refresh pool run on.
pub(crate) struct Background {
    runtime: Mutex<Option<Runtime>>,
    timers: TimerService,
    refresh: Option<RefreshPool>,
}

impl Background {
    /// Starts the runtime. `refresh_threads` of zero means no refresh pool.
    pub(crate) fn start(name: &str, refresh_threads: usize) -> Result<Self> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(1)
            .max_blocking_threads(refresh_threads.max(1))
            .thread_name(format!("cachemill-{}", name))
            .enable_time()
            .build()
            .map_err(|e| CacheError::Internal(format!("cannot start timer runtime: {}", e)))?;
        let handle = runtime.handle().clone();
        let refresh = (refresh_threads > 0).then(|| RefreshPool::new(handle.clone(), refresh_threads));
        debug!(cache = name, refresh_threads, "Background runtime started");
        Ok(Self {
            runtime: Mutex::new(Some(runtime)),
            timers: TimerService::new(handle),
            refresh,
        })
    }

    pub(crate) fn timers(&self) -> &TimerService {
        &self.timers
    }

    pub(crate) fn refresh_pool(&self) -> Option<&RefreshPool> {
        self.refresh.as_ref()
    }

    /// Stops the runtime without waiting for running tasks.
    ///
    /// Pending timers are dropped; refresh tasks already running finish on
    /// their own and find the cache closed.
    pub(crate) fn shutdown(&self) {
        if let Some(runtime) = self.runtime.lock().take() {
            runtime.shutdown_background();
        }
    }
}

impl Drop for Background {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::time::Duration;

    #[test]
    fn test_background_without_refresh_pool() {
        let background = Background::start("plain", 0).unwrap();
        assert!(background.refresh_pool().is_none());
        background.shutdown();
        // second shutdown is a no-op
        background.shutdown();
    }

    #[test]
    fn test_timers_stop_after_shutdown() {
        let background = Background::start("stop", 1).unwrap();
        let (tx, rx) = mpsc::channel();
        background
            .timers()
            .schedule(Duration::from_millis(200), 1, move || {
                let _ = tx.send(());
            });
        background.shutdown();
        assert!(rx.recv_timeout(Duration::from_millis(500)).is_err());
    }
}
