// Copyright (c) The gallio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::{
    Interrupted, Task, TaskCore, TaskFailure, TaskValue, ThreadAbortScope,
    abort::set_interrupt_flag, is_thread_abort,
};
use crate::helpers::{lock, panic_message};
use std::{
    error::Error,
    fmt,
    panic::{self, AssertUnwindSafe},
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
    thread::{self, Thread},
};

type BoxError = Box<dyn Error + Send + Sync>;
type Action = Box<dyn FnOnce() -> Result<(), BoxError> + Send>;

/// A task that runs a closure on a dedicated thread.
///
/// The closure runs inside a [`ThreadAbortScope`]: aborting the task unwinds the closure at its
/// next abort point, and interrupting it makes the next abort point return [`Interrupted`].
pub struct ThreadTask {
    core: Arc<TaskCore>,
    action: Mutex<Option<Action>>,
    scope: ThreadAbortScope,
    interrupt: Arc<AtomicBool>,
    thread: Mutex<Option<Thread>>,
}

impl fmt::Debug for ThreadTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadTask")
            .field("core", &self.core)
            .field("scope", &self.scope)
            .finish_non_exhaustive()
    }
}

impl ThreadTask {
    /// Creates a pending task that runs `action` once started.
    pub fn new<F, E>(name: impl Into<String>, action: F) -> Self
    where
        F: FnOnce() -> Result<(), E> + Send + 'static,
        E: Into<BoxError>,
    {
        Self {
            core: Arc::new(TaskCore::new(name)),
            action: Mutex::new(Some(Box::new(move || action().map_err(Into::into)))),
            scope: ThreadAbortScope::new(),
            interrupt: Arc::new(AtomicBool::new(false)),
            thread: Mutex::new(None),
        }
    }
}

impl Task for ThreadTask {
    fn core(&self) -> &TaskCore {
        &self.core
    }

    fn start_impl(&self) -> Result<(), TaskFailure> {
        let Some(action) = lock(&self.action).take() else {
            return Ok(());
        };
        let core = self.core.clone();
        let scope = self.scope.clone();
        let interrupt = self.interrupt.clone();

        let handle = thread::Builder::new()
            .name(self.core.name().to_owned())
            .spawn(move || {
                set_interrupt_flag(interrupt);
                let result = run_in_scope(&scope, action);
                core.notify_terminated(result);
            })
            .map_err(|error| TaskFailure::Spawn(Arc::new(error)))?;
        *lock(&self.thread) = Some(handle.thread().clone());
        Ok(())
    }

    fn abort_impl(&self) {
        self.scope.abort();
    }

    fn interrupt_impl(&self) {
        self.interrupt.store(true, Ordering::SeqCst);
        if let Some(thread) = lock(&self.thread).as_ref() {
            thread.unpark();
        }
    }
}

fn run_in_scope(scope: &ThreadAbortScope, action: Action) -> Result<TaskValue, TaskFailure> {
    let mut returned = None;
    let run = panic::catch_unwind(AssertUnwindSafe(|| {
        scope.run(|| returned = Some(action()))
    }));

    match run {
        Ok(Ok(Some(_abort))) => Err(TaskFailure::Aborted),
        Ok(Ok(None)) => match returned {
            Some(Ok(())) => Ok(TaskValue::Unit),
            Some(Err(error)) if error.is::<Interrupted>() => Err(TaskFailure::Interrupted),
            Some(Err(error)) => Err(TaskFailure::Error(Arc::from(error))),
            None => Err(TaskFailure::Aborted),
        },
        Ok(Err(error)) => Err(TaskFailure::Error(Arc::new(error))),
        Err(payload) if is_thread_abort(&*payload) => Err(TaskFailure::ForeignAbort),
        Err(payload) => Err(TaskFailure::Panicked {
            message: panic_message(&*payload).into_owned(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::concurrency::{abort, checkpoint};
    use std::{io, sync::mpsc, time::Duration};

    #[test]
    fn runs_to_completion() {
        let (tx, rx) = mpsc::channel();
        let task = ThreadTask::new("worker", move || {
            tx.send(thread::current().name().map(str::to_owned))
                .map_err(|_| io::Error::other("receiver gone"))
        });
        assert!(matches!(task.run(None), Ok(TaskValue::Unit)));
        assert_eq!(rx.recv().unwrap().as_deref(), Some("worker"));
    }

    #[test]
    fn errors_and_panics() {
        let task = ThreadTask::new("failing", || Err(io::Error::other("disk full")));
        match task.run(None) {
            Err(TaskFailure::Error(error)) => assert_eq!(error.to_string(), "disk full"),
            other => panic!("unexpected result: {other:?}"),
        }

        let task = ThreadTask::new("panicking", || -> Result<(), io::Error> { panic!("boom") });
        match task.run(None) {
            Err(TaskFailure::Panicked { message }) => assert_eq!(message, "boom"),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn abort_unwinds_at_abort_point() {
        let (tx, rx) = mpsc::channel();
        let task = ThreadTask::new("looping", move || -> Result<(), Interrupted> {
            tx.send(()).ok();
            loop {
                abort::sleep(Duration::from_millis(5))?;
            }
        });
        task.start();
        rx.recv().unwrap();
        task.abort();
        assert!(task.join(Some(Duration::from_secs(10))));
        assert!(matches!(task.result(), Some(Err(TaskFailure::Aborted))));
        assert!(task.is_aborted());
    }

    #[test]
    fn interrupt_is_observed() {
        let (tx, rx) = mpsc::channel();
        let task = ThreadTask::new("sleeping", move || {
            tx.send(()).ok();
            abort::sleep(Duration::from_secs(60))?;
            checkpoint()
        });
        task.start();
        rx.recv().unwrap();
        task.interrupt();
        assert!(task.join(Some(Duration::from_secs(10))));
        assert!(matches!(task.result(), Some(Err(TaskFailure::Interrupted))));
        assert!(!task.is_aborted());
    }

    #[test]
    fn run_with_timeout_aborts() {
        let task = ThreadTask::new("slow", || abort::sleep(Duration::from_secs(60)));
        let result = task.run(Some(Duration::from_millis(50)));
        assert!(matches!(result, Err(TaskFailure::Aborted)), "{result:?}");
    }
}
