//! Cancellable grace-window timers keyed by (lobby code, player name).

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::task::AbortHandle;

type Key = (String, String);

fn key(code: &str, name: &str) -> Key {
    (code.to_string(), name.to_lowercase())
}

#[derive(Default)]
pub struct GraceTimers {
    next_id: AtomicU64,
    pending: Arc<DashMap<Key, (u64, AbortHandle)>>,
}

impl GraceTimers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `task` after `delay` unless cancelled first. Scheduling again
    /// for the same player replaces the earlier timer.
    pub fn schedule<F>(&self, code: &str, name: &str, delay: Duration, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let timer_key = key(code, name);
        let pending = Arc::clone(&self.pending);
        let cleanup_key = timer_key.clone();

        // Holding the entry keeps the shard locked until the timer is
        // recorded, so a timer that fires at once cannot clean up early.
        let slot = self.pending.entry(timer_key);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            pending.remove_if(&cleanup_key, |_, (owner, _)| *owner == id);
            task.await;
        });
        let record = (id, handle.abort_handle());
        match slot {
            Entry::Occupied(mut slot) => {
                let (_, previous) = slot.insert(record);
                previous.abort();
            }
            Entry::Vacant(slot) => {
                slot.insert(record);
            }
        }
        tracing::debug!("grace timer {} scheduled for {} {} in {:?}", id, name, code, delay);
    }

    /// Returns true if a pending timer was cancelled.
    pub fn cancel(&self, code: &str, name: &str) -> bool {
        match self.pending.remove(&key(code, name)) {
            Some((_, (id, handle))) => {
                handle.abort();
                tracing::debug!("grace timer {} cancelled for {} {}", id, name, code);
                true
            }
            None => false,
        }
    }

    pub fn is_pending(&self, code: &str, name: &str) -> bool {
        self.pending.contains_key(&key(code, name))
    }

    pub fn cancel_all(&self) {
        self.pending.retain(|_, (_, handle)| {
            handle.abort();
            false
        });
    }
}
