//! # Work Queue
//!
//! Deduplicating, rate-limited delivery of reconciliation keys.
//!
//! The queue guarantees:
//! - no duplicate pending entries for the same key;
//! - at most one worker holds a given key in-flight at a time;
//! - a key re-added while in-flight is redelivered exactly once after the
//!   current attempt calls [`WorkQueue::done`];
//! - per-key retry bookkeeping with Fibonacci-backoff delayed requeues.
//!
//! Ordering across distinct keys is FIFO-ish but not guaranteed; callers
//! must re-derive truth from current state on every delivery rather than
//! relying on event order.

use std::collections::{HashMap, HashSet, VecDeque};
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::Notify;

use crate::backoff::FibonacciBackoff;

#[derive(Debug)]
struct State<K> {
    pending: VecDeque<K>,
    pending_set: HashSet<K>,
    in_flight: HashSet<K>,
    dirty: HashSet<K>,
    retries: HashMap<K, u32>,
    shutting_down: bool,
}

#[derive(Debug)]
struct Inner<K> {
    state: Mutex<State<K>>,
    notify: Notify,
    backoff: FibonacciBackoff,
}

/// Deduplicating, rate-limited work queue.
///
/// Cheap to clone; all clones share the same state. Enqueue operations are
/// safe under concurrent callers (watch callbacks race with workers).
#[derive(Debug)]
pub struct WorkQueue<K> {
    inner: Arc<Inner<K>>,
}

impl<K> Clone for WorkQueue<K> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K> WorkQueue<K>
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
{
    #[must_use]
    pub fn new(backoff: FibonacciBackoff) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State {
                    pending: VecDeque::new(),
                    pending_set: HashSet::new(),
                    in_flight: HashSet::new(),
                    dirty: HashSet::new(),
                    retries: HashMap::new(),
                    shutting_down: false,
                }),
                notify: Notify::new(),
                backoff,
            }),
        }
    }

    // A worker panicking while holding the lock must not brick the queue
    // for its peers, so poisoning is deliberately ignored.
    fn lock(&self) -> MutexGuard<'_, State<K>> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert `key` unless it is already pending or in-flight.
    ///
    /// Adding a key that is currently in-flight marks it dirty: it becomes
    /// pending again as soon as the processing worker calls [`Self::done`],
    /// and exactly once no matter how many adds raced with the attempt.
    /// Ignored after [`Self::shut_down`].
    pub fn add(&self, key: K) {
        let mut state = self.lock();
        if state.shutting_down {
            return;
        }
        if state.in_flight.contains(&key) {
            state.dirty.insert(key);
            return;
        }
        if state.pending_set.insert(key.clone()) {
            state.pending.push_back(key);
            drop(state);
            self.inner.notify.notify_one();
        }
    }

    /// Like [`Self::add`], but the key only becomes visible to consumers
    /// after a backoff delay derived from its retry count.
    ///
    /// Each call counts as one more failure for the key; the counter is
    /// cleared by [`Self::forget`].
    pub fn add_rate_limited(&self, key: K) {
        let delay = {
            let mut state = self.lock();
            if state.shutting_down {
                return;
            }
            let attempts = state.retries.entry(key.clone()).or_insert(0);
            let delay = self.inner.backoff.delay_for(*attempts);
            *attempts += 1;
            delay
        };
        let queue = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            queue.add(key);
        });
    }

    /// Block until a key is available, marking it in-flight.
    ///
    /// Returns `None` once the queue is shutting down and drained; all
    /// blocked callers are woken at that point.
    pub async fn get(&self) -> Option<K> {
        loop {
            let notified = self.inner.notify.notified();
            {
                let mut state = self.lock();
                if let Some(key) = state.pending.pop_front() {
                    state.pending_set.remove(&key);
                    state.in_flight.insert(key.clone());
                    let more = !state.pending.is_empty();
                    drop(state);
                    if more {
                        // Chain the wakeup so a second waiter sees the
                        // remaining work.
                        self.inner.notify.notify_one();
                    }
                    return Some(key);
                }
                if state.shutting_down {
                    return None;
                }
            }
            notified.await;
        }
    }

    /// Release the in-flight marker for `key`.
    ///
    /// If the key was marked dirty while being processed it becomes pending
    /// again immediately.
    pub fn done<Q>(&self, key: &Q)
    where
        K: std::borrow::Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let mut state = self.lock();
        state.in_flight.remove(key);
        if let Some(key) = state.dirty.take(key) {
            if !state.shutting_down && state.pending_set.insert(key.clone()) {
                state.pending.push_back(key);
                drop(state);
                self.inner.notify.notify_one();
            }
        }
    }

    /// Reset the retry counter for `key` without affecting queue membership.
    pub fn forget<Q>(&self, key: &Q)
    where
        K: std::borrow::Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.lock().retries.remove(key);
    }

    /// Number of rate-limited requeues recorded for `key` since it was last
    /// forgotten.
    #[must_use]
    pub fn num_requeues<Q>(&self, key: &Q) -> u32
    where
        K: std::borrow::Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.lock().retries.get(key).copied().unwrap_or(0)
    }

    /// Stop accepting new keys and wake every blocked [`Self::get`] caller.
    ///
    /// Already-pending keys are still delivered; once drained, `get`
    /// reports shutdown.
    pub fn shut_down(&self) {
        self.lock().shutting_down = true;
        self.inner.notify.notify_waiters();
    }

    /// Number of keys currently pending (excludes in-flight keys).
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().pending.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().pending.is_empty()
    }
}
