//! Expiry and Refresh Module
//!
//! Timer handling of the cache engine. Each entry with a finite lifetime
//! has one armed timer. When it fires the entry is either handed to the
//! refresh pool, with its value still served from the refresh table, or
//! expired.
//!
//! Cancellation is best effort, so every callback re-checks under the entry
//! lock that it is still the entry's current timer.

use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use tracing::{trace, warn};

use crate::cache::entry::{Entry, EntryData, EntryStatus};
use crate::cache::expiry::Expiry;
use crate::cache::policy::EvictionPolicy;
use crate::cache::store::{CacheCore, Update};
use crate::cache::time::Timestamp;
use crate::error::CacheError;

impl<K, V, P> CacheCore<K, V, P>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    P: EvictionPolicy,
{
    // == Start Timer ==
    /// Sets the entry's status for `expiry` and arms its timer.
    pub(crate) fn start_timer(
        &self,
        entry: &Arc<Entry<K, V>>,
        data: &mut EntryData<V>,
        expiry: Expiry,
        now: Timestamp,
    ) {
        match expiry {
            Expiry::Immediately => data.status = EntryStatus::NeedsFetch,
            Expiry::Eternal => data.status = EntryStatus::Eternal,
            Expiry::At(t) | Expiry::SharpAt(t) if t <= now => self.expire_locked(entry, data),
            Expiry::At(t) => {
                data.status = EntryStatus::Valid(t);
                self.schedule_timer(entry, data, t, now);
            }
            Expiry::SharpAt(t) => {
                data.status = EntryStatus::SharpPending(t);
                let gap = self.config.tunables.sharp_expiry_safety_gap.as_millis() as u64;
                let fire = t.saturating_sub(gap).max(now);
                self.schedule_timer(entry, data, fire, now);
            }
        }
    }

    fn schedule_timer(
        &self,
        entry: &Arc<Entry<K, V>>,
        data: &mut EntryData<V>,
        at: Timestamp,
        now: Timestamp,
    ) {
        let background = match &self.background {
            Some(background) => background,
            None => return,
        };
        data.cancel_timer();
        let seq = data.next_timer_seq();
        let core = self.weak.clone();
        let target = Arc::downgrade(entry);
        let delay = Duration::from_millis(at.saturating_sub(now));
        let handle = background.timers().schedule(delay, seq, move || {
            if let (Some(core), Some(entry)) = (core.upgrade(), target.upgrade()) {
                core.on_timer(&entry, seq);
            }
        });
        data.timer = Some(handle);
    }

    // == Timer Event ==
    pub(crate) fn on_timer(&self, entry: &Arc<Entry<K, V>>, seq: u64) {
        let mut data = entry.lock();
        if !data.owns_timer(seq) || self.is_closed() {
            return;
        }
        data.timer = None;
        self.structure.write().stats.timer_events += 1;
        let now = self.now();
        let status = data.status;
        trace!(cache = %self.name, status = ?status, now, "Timer event");
        match status {
            EntryStatus::SharpPending(t) if now < t => {
                // fired ahead of a sharp deadline: refresh ahead or wait for it
                if !self.try_refresh(entry, &mut data, t, true) {
                    self.schedule_timer(entry, &mut data, t, now);
                }
            }
            EntryStatus::Valid(t) if now < t => {
                self.schedule_timer(entry, &mut data, t, now);
            }
            EntryStatus::Valid(t) | EntryStatus::SharpPending(t) => {
                let sharp = matches!(status, EntryStatus::SharpPending(_));
                if !self.try_refresh(entry, &mut data, t, sharp) {
                    self.expire_locked(entry, &mut data);
                    drop(data);
                    entry.notify_waiters();
                }
            }
            _ => {}
        }
    }

    // == Refresh ==
    /// Moves the entry into the refresh table and submits a reload.
    ///
    /// Returns false if refresh is not configured, the entry is gone, or the
    /// pool rejected the task; the entry is then unchanged.
    fn try_refresh(
        &self,
        entry: &Arc<Entry<K, V>>,
        data: &mut EntryData<V>,
        deadline: Timestamp,
        sharp: bool,
    ) -> bool {
        let pool = match self.background.as_ref().and_then(|b| b.refresh_pool()) {
            Some(pool) => pool,
            None => return false,
        };
        if !self.structure.write().move_to_refresh(entry) {
            return false;
        }
        let previous = data.status;
        data.status = EntryStatus::RefreshInProgress { deadline, sharp };
        let core = self.weak.clone();
        let target = Arc::clone(entry);
        let submitted = pool.submit(move || {
            if let Some(core) = core.upgrade() {
                core.run_refresh(&target, previous);
            }
        });
        if submitted {
            return true;
        }
        data.status = previous;
        let mut s = self.structure.write();
        s.move_to_main(entry);
        s.stats.refresh_submit_failed += 1;
        false
    }

    /// Body of a refresh task, runs on the refresh pool.
    fn run_refresh(&self, entry: &Arc<Entry<K, V>>, previous: EntryStatus) {
        if !matches!(entry.lock().status, EntryStatus::RefreshInProgress { .. }) {
            return;
        }
        match self.load(entry, previous, Update::Refresh) {
            Ok(_) | Err(CacheError::Closed { .. }) => {}
            Err(err) => {
                warn!(cache = %self.name, error = %err, "Refresh failed, expiring entry");
                let mut data = entry.lock();
                self.structure.write().stats.internal_exceptions += 1;
                if !data.status.is_removed() && !data.status.is_fetch_in_progress() {
                    self.expire_locked(entry, &mut data);
                }
                drop(data);
                entry.notify_waiters();
            }
        }
    }

    // == Expire ==
    /// Expires the entry: kept without fresh data, or removed.
    pub(crate) fn expire_locked(&self, entry: &Arc<Entry<K, V>>, data: &mut EntryData<V>) {
        let mut s = self.structure.write();
        if self.config.keep_after_expire && s.is_live(entry) {
            s.move_to_main(entry);
            s.stats.expired_kept += 1;
            drop(s);
            data.cancel_timer();
            data.status = EntryStatus::Expired;
            return;
        }
        if s.unlink(entry).is_some() {
            s.stats.expired_removed += 1;
        }
        drop(s);
        data.set_removed();
    }
}
