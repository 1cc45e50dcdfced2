//! Refresh Pool Task
//!
//! Bounded pool for background reloads. A submission is rejected instead of
//! queued when every worker is busy.

use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::sync::Semaphore;

#[derive(Debug, Clone)]
pub struct RefreshPool {
    handle: Handle,
    permits: Arc<Semaphore>,
    threads: usize,
}

impl RefreshPool {
    pub(crate) fn new(handle: Handle, threads: usize) -> Self {
        Self {
            handle,
            permits: Arc::new(Semaphore::new(threads)),
            threads,
        }
    }

    /// Runs `task` on a blocking worker. Returns false if the pool is full.
    pub fn submit<F>(&self, task: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        let permit = match Arc::clone(&self.permits).try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => return false,
        };
        self.handle.spawn_blocking(move || {
            let _permit = permit;
            task();
        });
        true
    }

    /// Number of refresh tasks currently running.
    pub fn active(&self) -> usize {
        self.threads - self.permits.available_permits()
    }

    pub fn threads(&self) -> usize {
        self.threads
    }
}

#[cfg(test)]
mod tests {
    use crate::tasks::Background;
    use std::sync::mpsc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_submit_runs_task() {
        let background = Background::start("refresh-run", 2).unwrap();
        let pool = background.refresh_pool().unwrap();
        let (tx, rx) = mpsc::channel();
        assert!(pool.submit(move || {
            let _ = tx.send("done");
        }));
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), "done");
    }

    #[test]
    fn test_saturated_pool_rejects() {
        let background = Background::start("refresh-full", 1).unwrap();
        let pool = background.refresh_pool().unwrap();
        let (gate_tx, gate_rx) = mpsc::channel::<()>();
        assert!(pool.submit(move || {
            let _ = gate_rx.recv();
        }));
        assert_eq!(pool.active(), 1);
        assert!(!pool.submit(|| {}));

        gate_tx.send(()).unwrap();
        let mut accepted = false;
        for _ in 0..200 {
            if pool.submit(|| {}) {
                accepted = true;
                break;
            }
            thread::sleep(Duration::from_millis(10));
        }
        assert!(accepted, "pool should accept again once the worker is free");
    }
}
