/*!
 * Bounded circular buffer between a transfer coordinator and its workers
 *
 * Producers block while the buffer is full and consumers block while it is
 * empty, so the memory held by a transfer is capped by the slot count no
 * matter how large the object is. Every wait is bounded by the configured
 * timeout.
 */

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum BufferError {
    /// No slot freed up (or no item arrived) within the timeout
    #[error("timed out after {0:?} waiting on the circular buffer")]
    Timeout(Duration),

    /// The buffer was closed or cancelled
    #[error("circular buffer closed")]
    Closed,
}

struct RingState<T> {
    items: VecDeque<T>,
    closed: bool,
}

/// Fixed-capacity multi-producer multi-consumer queue
pub struct CircularBuffer<T> {
    state: Mutex<RingState<T>>,
    not_empty: Condvar,
    not_full: Condvar,
    capacity: usize,
    timeout: Duration,
}

impl<T> CircularBuffer<T> {
    /// Create a buffer with `capacity` slots (at least one)
    pub fn new(capacity: usize, timeout: Duration) -> Self {
        let capacity = capacity.max(1);
        Self {
            state: Mutex::new(RingState {
                items: VecDeque::with_capacity(capacity),
                closed: false,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            capacity,
            timeout,
        }
    }

    fn lock(&self) -> MutexGuard<'_, RingState<T>> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append an item, blocking while all slots are taken
    pub fn push(&self, item: T) -> Result<(), BufferError> {
        let deadline = Instant::now() + self.timeout;
        let mut state = self.lock();
        loop {
            if state.closed {
                return Err(BufferError::Closed);
            }
            if state.items.len() < self.capacity {
                state.items.push_back(item);
                self.not_empty.notify_one();
                return Ok(());
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(BufferError::Timeout(self.timeout));
            }
            state = self
                .not_full
                .wait_timeout(state, deadline - now)
                .map(|(guard, _)| guard)
                .unwrap_or_else(|poisoned| poisoned.into_inner().0);
        }
    }

    /// Take the oldest item, blocking while the buffer is empty.
    ///
    /// Returns `Ok(None)` once the buffer is closed and drained.
    pub fn pop(&self) -> Result<Option<T>, BufferError> {
        let deadline = Instant::now() + self.timeout;
        let mut state = self.lock();
        loop {
            if let Some(item) = state.items.pop_front() {
                self.not_full.notify_one();
                return Ok(Some(item));
            }
            if state.closed {
                return Ok(None);
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(BufferError::Timeout(self.timeout));
            }
            state = self
                .not_empty
                .wait_timeout(state, deadline - now)
                .map(|(guard, _)| guard)
                .unwrap_or_else(|poisoned| poisoned.into_inner().0);
        }
    }

    /// Stop accepting items; consumers drain what is queued and then see `None`
    pub fn close(&self) {
        let mut state = self.lock();
        state.closed = true;
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    /// Close and discard queued items
    pub fn cancel(&self) {
        let drained: Vec<T> = {
            let mut state = self.lock();
            state.closed = true;
            state.items.drain(..).collect()
        };
        self.not_empty.notify_all();
        self.not_full.notify_all();
        drop(drained);
    }
}
