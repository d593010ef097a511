// Copyright (c) The gallio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Cooperative thread aborts.
//!
//! A [`ThreadAbortScope`] runs code that another thread may abort. Aborts are delivered at
//! *abort points*: calls to [`checkpoint`] or [`sleep`] made by the running code. At an abort
//! point, the thread unwinds with a [`ThreadAbort`] payload tagged with the scope that issued it.
//! The scope catches its own payload and lets payloads from other scopes keep unwinding.
//!
//! Scopes nest: an abort issued by an outer scope unwinds through every inner scope on the same
//! thread.

use crate::{errors::AbortScopeError, helpers::lock};
use std::{
    any::Any,
    cell::RefCell,
    fmt,
    panic::{self, AssertUnwindSafe},
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering},
    },
    thread::{self, Thread},
    time::{Duration, Instant},
};
use thiserror::Error;

const QUIESCENT: u8 = 0;
const RUNNING: u8 = 1;
const ABORT_REQUESTED: u8 = 2;
const ABORTED: u8 = 3;

/// How long [`sleep`] waits between checks for aborts and interrupts.
const SLEEP_SLICE: Duration = Duration::from_millis(10);

static NEXT_TOKEN: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static ACTIVE_SCOPES: RefCell<Vec<Arc<ScopeInner>>> = const { RefCell::new(Vec::new()) };
    static INTERRUPT_FLAG: RefCell<Option<Arc<AtomicBool>>> = const { RefCell::new(None) };
}

/// The state of a [`ThreadAbortScope`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AbortScopeState {
    /// Not running any code, and not aborted.
    Quiescent,
    /// Running code on some thread.
    Running,
    /// An abort is being delivered.
    AbortRequested,
    /// Aborted. Any further attempt to run code is pre-empted.
    Aborted,
}

/// The unwind payload used to deliver an abort.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ThreadAbort {
    token: u64,
}

impl ThreadAbort {
    /// The token identifying the scope that issued this abort.
    pub fn token(&self) -> u64 {
        self.token
    }
}

impl fmt::Display for ThreadAbort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "thread aborted by scope {}", self.token)
    }
}

/// Returns true if a panic payload is a [`ThreadAbort`].
///
/// Code that catches panics must resume unwinding for these payloads.
pub fn is_thread_abort(payload: &(dyn Any + Send)) -> bool {
    payload.is::<ThreadAbort>()
}

/// The error returned from abort points when the current task has been interrupted.
#[derive(Clone, Copy, Debug, Eq, Error, PartialEq)]
#[error("the task was interrupted")]
pub struct Interrupted;

#[derive(Debug)]
struct ScopeInner {
    token: u64,
    state: AtomicU8,
    protected: AtomicBool,
    active_thread: Mutex<Option<Thread>>,
}

impl ScopeInner {
    fn is_aborting(&self) -> bool {
        matches!(self.state.load(Ordering::SeqCst), ABORT_REQUESTED | ABORTED)
    }

    fn payload(&self) -> ThreadAbort {
        ThreadAbort { token: self.token }
    }

    fn unwind(&self) -> ! {
        panic::resume_unwind(Box::new(self.payload()))
    }
}

/// Runs code that may be aborted from another thread.
///
/// Cloning a scope produces another handle to the same scope.
#[derive(Clone, Debug)]
pub struct ThreadAbortScope {
    inner: Arc<ScopeInner>,
}

impl Default for ThreadAbortScope {
    fn default() -> Self {
        Self::new()
    }
}

impl ThreadAbortScope {
    /// Creates a new scope in the quiescent state.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(ScopeInner {
                token: NEXT_TOKEN.fetch_add(1, Ordering::Relaxed),
                state: AtomicU8::new(QUIESCENT),
                protected: AtomicBool::new(false),
                active_thread: Mutex::new(None),
            }),
        }
    }

    /// The token carried by aborts issued by this scope.
    pub fn token(&self) -> u64 {
        self.inner.token
    }

    /// The current state.
    pub fn state(&self) -> AbortScopeState {
        match self.inner.state.load(Ordering::SeqCst) {
            QUIESCENT => AbortScopeState::Quiescent,
            RUNNING => AbortScopeState::Running,
            ABORT_REQUESTED => AbortScopeState::AbortRequested,
            _ => AbortScopeState::Aborted,
        }
    }

    /// Runs `action`, returning the abort if [`abort`](Self::abort) was called before or during it.
    ///
    /// If the scope was already aborted, `action` doesn't run. Panics, including aborts issued by
    /// other scopes, are propagated.
    ///
    /// Returns an error if the scope is already running an action, on this thread or any other.
    pub fn run<F: FnOnce()>(&self, action: F) -> Result<Option<ThreadAbort>, AbortScopeError> {
        let inner = &self.inner;
        {
            let mut active = lock(&inner.active_thread);
            if active.is_some() {
                return Err(AbortScopeError::AlreadyRunning);
            }
            match inner
                .state
                .compare_exchange(QUIESCENT, RUNNING, Ordering::SeqCst, Ordering::SeqCst)
            {
                Ok(_) => {}
                Err(ABORTED) => return Ok(Some(inner.payload())),
                Err(_) => return Err(AbortScopeError::AlreadyRunning),
            }
            *active = Some(thread::current());
        }

        ACTIVE_SCOPES.with_borrow_mut(|scopes| scopes.push(inner.clone()));
        let result = panic::catch_unwind(AssertUnwindSafe(action));
        ACTIVE_SCOPES.with_borrow_mut(|scopes| scopes.pop());

        let aborted = self.leave_running();
        *lock(&inner.active_thread) = None;

        match result {
            Ok(()) => Ok(aborted.then(|| inner.payload())),
            Err(payload) => match payload.downcast_ref::<ThreadAbort>() {
                Some(abort) if abort.token == inner.token => Ok(Some(abort.clone())),
                _ => panic::resume_unwind(payload),
            },
        }
    }

    /// Moves from running back to quiescent, returning true if the scope was aborted instead.
    fn leave_running(&self) -> bool {
        let state = &self.inner.state;
        loop {
            match state.compare_exchange(RUNNING, QUIESCENT, Ordering::SeqCst, Ordering::SeqCst) {
                Ok(_) => return false,
                // The aborting thread is about to finish delivering.
                Err(ABORT_REQUESTED) => thread::yield_now(),
                Err(ABORTED) => return true,
                Err(_) => return false,
            }
        }
    }

    /// Aborts the scope.
    ///
    /// If the scope is running, the running code unwinds at its next abort point. If it's
    /// quiescent, the next call to [`run`](Self::run) is pre-empted. Does nothing if the scope
    /// is already aborted.
    pub fn abort(&self) {
        let inner = &self.inner;
        loop {
            match inner.state.load(Ordering::SeqCst) {
                QUIESCENT => {
                    if inner
                        .state
                        .compare_exchange(QUIESCENT, ABORTED, Ordering::SeqCst, Ordering::SeqCst)
                        .is_ok()
                    {
                        return;
                    }
                }
                RUNNING => {
                    if inner
                        .state
                        .compare_exchange(RUNNING, ABORT_REQUESTED, Ordering::SeqCst, Ordering::SeqCst)
                        .is_ok()
                    {
                        if let Some(thread) = lock(&inner.active_thread).as_ref() {
                            thread.unpark();
                        }
                        inner.state.store(ABORTED, Ordering::SeqCst);
                        return;
                    }
                }
                _ => return,
            }
        }
    }

    /// Runs `action` without being interrupted by aborts of this scope.
    ///
    /// If an abort arrives while `action` runs, it's delivered once `action` returns. If the
    /// scope is already aborting when `protect` is called from its running thread, the abort is
    /// delivered immediately instead.
    pub fn protect<R>(&self, action: impl FnOnce() -> R) -> R {
        let inner = &self.inner;
        let on_active_thread = lock(&inner.active_thread)
            .as_ref()
            .is_some_and(|t| t.id() == thread::current().id());
        if !on_active_thread {
            return action();
        }

        if inner
            .state
            .compare_exchange(RUNNING, QUIESCENT, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            if inner.is_aborting() {
                inner.unwind();
            }
            // Already inside an outer `protect`, which re-enters the running state itself.
            return action();
        }

        inner.protected.store(true, Ordering::SeqCst);
        let result = panic::catch_unwind(AssertUnwindSafe(action));
        inner.protected.store(false, Ordering::SeqCst);

        let reentered = inner
            .state
            .compare_exchange(QUIESCENT, RUNNING, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok();
        match result {
            Ok(value) if reentered => value,
            Ok(_) => inner.unwind(),
            Err(payload) => panic::resume_unwind(payload),
        }
    }
}

/// An abort point: unwinds if a scope running on this thread has been aborted, and returns
/// [`Interrupted`] if the current task has been interrupted.
pub fn checkpoint() -> Result<(), Interrupted> {
    // The outermost aborted scope wins, so inner scopes don't swallow its abort.
    let aborted = ACTIVE_SCOPES.with_borrow(|scopes| {
        scopes
            .iter()
            .find(|scope| scope.is_aborting() && !scope.protected.load(Ordering::SeqCst))
            .cloned()
    });
    if let Some(scope) = aborted {
        scope.unwind();
    }

    let interrupted = INTERRUPT_FLAG.with_borrow(|flag| {
        flag.as_ref()
            .is_some_and(|flag| flag.swap(false, Ordering::SeqCst))
    });
    if interrupted {
        Err(Interrupted)
    } else {
        Ok(())
    }
}

/// Sleeps for `duration`, waking up early to deliver aborts and interrupts.
pub fn sleep(duration: Duration) -> Result<(), Interrupted> {
    let deadline = Instant::now() + duration;
    loop {
        checkpoint()?;
        let now = Instant::now();
        if now >= deadline {
            return Ok(());
        }
        thread::park_timeout((deadline - now).min(SLEEP_SLICE));
    }
}

/// Installs the interrupt flag observed by abort points on the current thread.
pub(crate) fn set_interrupt_flag(flag: Arc<AtomicBool>) {
    INTERRUPT_FLAG.with_borrow_mut(|current| *current = Some(flag));
}
