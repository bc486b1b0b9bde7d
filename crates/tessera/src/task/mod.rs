//! Task handles and their completion futures
//!
//! A [`TaskHandle`] is created synchronously by every `run*` call and bound to
//! the host's unit of work exactly once. Two code paths may perform the bind:
//! the submitting call after the host returns, and the job itself when the
//! host passes its task in (or when the submission path has already published
//! it). Whichever happens first wins; the other is a no-op because both refer
//! to the same host task. A cancellation requested before the bind is kept
//! locally and forwarded by [`TaskHandle::bind`], so it is never lost.

mod completion;

pub use completion::Completion;

use crate::error::TaskFailure;
use crate::host::{ExecutionState, TaskRef};
use crate::world::Owner;
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use std::fmt;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tracing::{debug, error};

struct TaskInner<T> {
    owner: Owner,
    repeating: bool,
    backend: OnceCell<TaskRef>,
    /// Held across both sides of the bind/cancel handoff
    handoff: Mutex<()>,
    cancel_requested: AtomicBool,
    executing: AtomicBool,
    runs: AtomicU64,
    /// Written only by the executing thread; read by anyone
    result: Mutex<Option<T>>,
    completion: Completion<Result<(), TaskFailure>>,
}

/// One scheduled unit of work and its outcome
pub struct TaskHandle<T> {
    inner: Arc<TaskInner<T>>,
}

impl<T> TaskHandle<T> {
    pub(crate) fn new(owner: Owner, repeating: bool) -> Self {
        Self {
            inner: Arc::new(TaskInner {
                owner,
                repeating,
                backend: OnceCell::new(),
                handoff: Mutex::new(()),
                cancel_requested: AtomicBool::new(false),
                executing: AtomicBool::new(false),
                runs: AtomicU64::new(0),
                result: Mutex::new(None),
                completion: Completion::new(),
            }),
        }
    }

    /// Bind to the host task. Only the first call has any effect.
    pub(crate) fn bind(&self, task: &TaskRef) {
        let forward = {
            let _handoff = self.inner.handoff.lock();
            if self.inner.backend.set(Arc::clone(task)).is_err() {
                return;
            }
            self.inner.cancel_requested.load(Ordering::SeqCst)
        };
        debug!(task = task.id(), owner = %self.inner.owner, "task bound");
        if forward {
            task.cancel();
        }
    }

    /// Whether [`cancel`](Self::cancel) was called before the handle was bound
    pub(crate) fn is_cancelled_unbound(&self) -> bool {
        self.inner.backend.get().is_none() && self.inner.cancel_requested.load(Ordering::SeqCst)
    }

    /// Execute one run of `body` on the calling (host) thread.
    ///
    /// The result is stored before the run is counted and before the
    /// completion resolves, so anyone who observes either also observes the
    /// result. A periodic task's completion waits for its first successful
    /// run; a panicking one-shot resolves with the failure.
    pub(crate) fn run_body<F>(&self, body: &mut F)
    where
        F: FnMut(&TaskHandle<T>) -> T,
    {
        self.inner.executing.store(true, Ordering::SeqCst);
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| body(self)));
        self.inner.executing.store(false, Ordering::SeqCst);

        match outcome {
            Ok(value) => {
                {
                    let mut result = self.inner.result.lock();
                    *result = Some(value);
                    self.inner.runs.fetch_add(1, Ordering::SeqCst);
                }
                self.inner.completion.complete(Ok(()));
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                error!(
                    owner = %self.inner.owner,
                    task = ?self.task_id(),
                    "task body panicked: {}",
                    message
                );
                self.inner.runs.fetch_add(1, Ordering::SeqCst);
                if !self.inner.repeating {
                    self.inner
                        .completion
                        .complete(Err(TaskFailure::Panicked(message)));
                }
            }
        }
    }

    /// Owner the task was scheduled for
    pub fn owner(&self) -> &Owner {
        &self.inner.owner
    }

    /// Host identifier of the bound task
    pub fn task_id(&self) -> Option<u64> {
        self.inner.backend.get().map(|task| task.id())
    }

    /// Request cancellation. Idempotent; no effect on a finished task, and a
    /// run already in flight completes normally.
    pub fn cancel(&self) {
        let bound = {
            let _handoff = self.inner.handoff.lock();
            self.inner.cancel_requested.store(true, Ordering::SeqCst);
            self.inner.backend.get().cloned()
        };
        if let Some(task) = bound {
            task.cancel();
        }
    }

    /// Whether the task has been cancelled
    pub fn is_cancelled(&self) -> bool {
        match self.inner.backend.get() {
            Some(task) => task.is_cancelled(),
            None => self.inner.cancel_requested.load(Ordering::SeqCst),
        }
    }

    /// True while the body executes, including a run in flight after a
    /// cancellation was requested
    pub fn is_running(&self) -> bool {
        self.execution_state().is_running()
    }

    /// Full execution state, distinguishing running from cancelling
    pub fn execution_state(&self) -> ExecutionState {
        if let Some(task) = self.inner.backend.get() {
            return task.execution_state();
        }
        let cancelled = self.inner.cancel_requested.load(Ordering::SeqCst);
        match (self.inner.executing.load(Ordering::SeqCst), cancelled) {
            (true, true) => ExecutionState::CancelledRunning,
            (true, false) => ExecutionState::Running,
            (false, true) => ExecutionState::Cancelled,
            (false, false) => ExecutionState::Idle,
        }
    }

    /// Whether the task was scheduled at a fixed rate
    pub fn is_repeating_task(&self) -> bool {
        self.inner.repeating
    }

    /// Number of runs that have finished (successfully or not)
    pub fn run_count(&self) -> u64 {
        self.inner.runs.load(Ordering::SeqCst)
    }

    /// Whether the completion future has resolved
    pub fn is_done(&self) -> bool {
        self.inner.completion.is_complete()
    }

    /// Inspect the last result without cloning it
    pub fn with_result<R>(&self, f: impl FnOnce(Option<&T>) -> R) -> R {
        let result = self.inner.result.lock();
        f(result.as_ref())
    }

    /// The future resolved by the first successful run, or by a one-shot's
    /// failure. Every call returns a future over the same completion.
    pub fn as_future(&self) -> TaskFuture<T> {
        TaskFuture {
            handle: self.clone(),
            completion: self.inner.completion.clone(),
        }
    }
}

impl<T: Clone> TaskHandle<T> {
    /// The value written by the most recent run, if any. Never blocks on the
    /// task itself.
    pub fn result(&self) -> Option<T> {
        self.inner.result.lock().clone()
    }
}

impl<T> Clone for TaskHandle<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> fmt::Debug for TaskHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle")
            .field("owner", &self.inner.owner)
            .field("task", &self.task_id())
            .field("state", &self.execution_state())
            .field("repeating", &self.inner.repeating)
            .field("runs", &self.run_count())
            .finish()
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Resolves with the task's own handle after its first successful run
pub struct TaskFuture<T> {
    handle: TaskHandle<T>,
    completion: Completion<Result<(), TaskFailure>>,
}

impl<T> TaskFuture<T> {
    fn finish(&self, outcome: Result<(), TaskFailure>) -> Result<TaskHandle<T>, TaskFailure> {
        outcome.map(|()| self.handle.clone())
    }

    /// Block until the first run finishes
    pub fn wait(&self) -> Result<TaskHandle<T>, TaskFailure> {
        self.finish(self.completion.wait())
    }

    /// Block until the first run finishes or `timeout` elapses
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Result<TaskHandle<T>, TaskFailure>> {
        self.completion
            .wait_timeout(timeout)
            .map(|outcome| self.finish(outcome))
    }

    /// The outcome, without blocking
    pub fn try_get(&self) -> Option<Result<TaskHandle<T>, TaskFailure>> {
        self.completion.try_get().map(|outcome| self.finish(outcome))
    }

    /// Whether the first run has finished
    pub fn is_done(&self) -> bool {
        self.completion.is_complete()
    }

    /// Whether both futures observe the same completion
    pub fn ptr_eq(&self, other: &TaskFuture<T>) -> bool {
        self.completion.ptr_eq(&other.completion)
    }
}

impl<T> Future for TaskFuture<T> {
    type Output = Result<TaskHandle<T>, TaskFailure>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match Pin::new(&mut this.completion).poll(cx) {
            Poll::Ready(outcome) => Poll::Ready(this.finish(outcome)),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<T> fmt::Debug for TaskFuture<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskFuture")
            .field("done", &self.is_done())
            .finish()
    }
}
