//! Single-assignment completion future
//!
//! A [`Completion`] is resolved at most once. Every clone observes the same
//! slot, so callers can wait on it from any thread, either by blocking
//! ([`Completion::wait`]) or by `.await`. Resolution never blocks the writer.

use parking_lot::{Condvar, Mutex};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};
use std::time::{Duration, Instant};

struct Slot<T> {
    value: Option<T>,
    wakers: Vec<Waker>,
}

struct Shared<T> {
    slot: Mutex<Slot<T>>,
    ready: Condvar,
}

/// A value that becomes available exactly once
pub struct Completion<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Completion<T> {
    /// Create an unresolved completion
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                slot: Mutex::new(Slot {
                    value: None,
                    wakers: Vec::new(),
                }),
                ready: Condvar::new(),
            }),
        }
    }

    /// Create a completion that is already resolved
    pub fn resolved(value: T) -> Self {
        let completion = Self::new();
        completion.complete(value);
        completion
    }

    /// Resolve with `value`.
    ///
    /// Returns `false` (and drops `value`) if the completion was already resolved.
    pub fn complete(&self, value: T) -> bool {
        let wakers = {
            let mut slot = self.shared.slot.lock();
            if slot.value.is_some() {
                return false;
            }
            slot.value = Some(value);
            std::mem::take(&mut slot.wakers)
        };
        self.shared.ready.notify_all();
        for waker in wakers {
            waker.wake();
        }
        true
    }

    /// Whether a value has been stored
    pub fn is_complete(&self) -> bool {
        self.shared.slot.lock().value.is_some()
    }

    /// Whether two handles refer to the same completion
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }
}

impl<T: Clone> Completion<T> {
    /// The resolved value, without blocking
    pub fn try_get(&self) -> Option<T> {
        self.shared.slot.lock().value.clone()
    }

    /// Block the calling thread until resolved
    pub fn wait(&self) -> T {
        let mut slot = self.shared.slot.lock();
        loop {
            if let Some(value) = slot.value.as_ref() {
                return value.clone();
            }
            self.shared.ready.wait(&mut slot);
        }
    }

    /// Block until resolved or until `timeout` elapses
    pub fn wait_timeout(&self, timeout: Duration) -> Option<T> {
        let deadline = Instant::now() + timeout;
        let mut slot = self.shared.slot.lock();
        loop {
            if let Some(value) = slot.value.as_ref() {
                return Some(value.clone());
            }
            if self.shared.ready.wait_until(&mut slot, deadline).timed_out() {
                return slot.value.clone();
            }
        }
    }
}

impl<T> Clone for Completion<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> Default for Completion<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for Completion<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Completion")
            .field("complete", &self.is_complete())
            .finish()
    }
}

impl<T: Clone> Future for Completion<T> {
    type Output = T;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<T> {
        let mut slot = self.shared.slot.lock();
        if let Some(value) = slot.value.as_ref() {
            return Poll::Ready(value.clone());
        }
        if !slot.wakers.iter().any(|w| w.will_wake(cx.waker())) {
            slot.wakers.push(cx.waker().clone());
        }
        Poll::Pending
    }
}
