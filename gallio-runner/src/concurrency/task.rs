// Copyright (c) The gallio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::is_thread_abort;
use crate::helpers::{lock, panic_message};
use std::{
    error::Error,
    fmt,
    io,
    panic::{self, AssertUnwindSafe},
    sync::{
        Arc, Condvar, Mutex,
        atomic::{AtomicU64, Ordering},
    },
    time::{Duration, Instant},
};
use thiserror::Error;
use tracing::{debug, error};

static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

/// The result of a task, set exactly once when it terminates.
pub type TaskResult = Result<TaskValue, TaskFailure>;

/// The value produced by a task that completed normally.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum TaskValue {
    /// The task completed without producing a value.
    Unit,
    /// The task's process exited.
    Exited(ExitInfo),
}

/// How a process exited.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ExitInfo {
    /// The exit code, if the process exited normally.
    pub code: Option<i32>,
    /// The signal that terminated the process, on Unix.
    pub signal: Option<i32>,
}

impl ExitInfo {
    /// Returns true if the process exited with code 0.
    pub fn is_success(&self) -> bool {
        self.code == Some(0)
    }
}

impl fmt::Display for ExitInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.code, self.signal) {
            (Some(code), _) => write!(f, "exit code {code}"),
            (None, Some(signal)) => write!(f, "signal {signal}"),
            (None, None) => f.write_str("unknown exit status"),
        }
    }
}

/// Why a task didn't complete normally.
#[derive(Clone, Debug, Error)]
#[non_exhaustive]
pub enum TaskFailure {
    /// The task was aborted through [`Task::abort`].
    #[error("the task was aborted")]
    Aborted,

    /// The task's thread was unwound by an abort issued by some other scope.
    #[error("the task was aborted by an enclosing scope")]
    ForeignAbort,

    /// The task panicked.
    #[error("the task panicked: {message}")]
    Panicked {
        /// The panic message.
        message: String,
    },

    /// The task returned an error.
    #[error("the task failed")]
    Error(#[source] Arc<dyn Error + Send + Sync>),

    /// The task could not be started.
    #[error("the task could not be started")]
    Spawn(#[source] Arc<io::Error>),

    /// The task stopped after being interrupted.
    #[error("the task was interrupted")]
    Interrupted,
}

/// A process-wide unique identifier for a task.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct TaskId(u64);

impl TaskId {
    fn next() -> Self {
        Self(NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// The kinds of events a task raises.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum TaskEventKind {
    /// The task started.
    Started,
    /// The task was asked to abort.
    Aborted,
    /// The task terminated. The event carries the task's result.
    Terminated,
}

/// An event raised by a task.
#[derive(Clone, Debug)]
pub struct TaskEvent {
    /// The task that raised the event.
    pub task_id: TaskId,
    /// The task's name.
    pub name: String,
    /// What happened.
    pub kind: TaskEventKind,
    /// The task's result, for [`TaskEventKind::Terminated`].
    pub result: Option<TaskResult>,
}

/// A handler for task events.
pub type TaskEventHandler = Arc<dyn Fn(&TaskEvent) + Send + Sync>;

#[derive(Debug, Default)]
struct TaskState {
    started: bool,
    aborted: bool,
    // Started has been raised. Terminated is held back until then.
    started_fired: bool,
    result: Option<TaskResult>,
}

#[derive(Default)]
struct HandlerSlots {
    fired: Vec<TaskEvent>,
    handlers: Vec<(TaskEventKind, TaskEventHandler)>,
}

/// State shared by every [`Task`] implementation: identity, lifecycle and event handlers.
pub struct TaskCore {
    id: TaskId,
    name: String,
    // Serializes start and abort.
    sequence: Mutex<()>,
    state: Mutex<TaskState>,
    terminated: Condvar,
    handlers: Mutex<HandlerSlots>,
}

impl fmt::Debug for TaskCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskCore")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("state", &*lock(&self.state))
            .finish_non_exhaustive()
    }
}

impl TaskCore {
    /// Creates the core for a new, pending task.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: TaskId::next(),
            name: name.into(),
            sequence: Mutex::new(()),
            state: Mutex::new(TaskState::default()),
            terminated: Condvar::new(),
            handlers: Mutex::new(HandlerSlots::default()),
        }
    }

    /// The task's id.
    pub fn id(&self) -> TaskId {
        self.id
    }

    /// The task's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Adds a handler for `kind`. If the event has already been raised, the handler is invoked
    /// immediately.
    pub fn on(&self, kind: TaskEventKind, handler: TaskEventHandler) {
        let fired = {
            let mut slots = lock(&self.handlers);
            match slots.fired.iter().find(|event| event.kind == kind) {
                Some(event) => Some(event.clone()),
                None => {
                    slots.handlers.push((kind, handler.clone()));
                    None
                }
            }
        };
        if let Some(event) = fired {
            self.invoke(&handler, &event);
        }
    }

    fn event(&self, kind: TaskEventKind, result: Option<TaskResult>) -> TaskEvent {
        TaskEvent {
            task_id: self.id,
            name: self.name.clone(),
            kind,
            result,
        }
    }

    fn fire(&self, event: TaskEvent) {
        let handlers: Vec<_> = {
            let mut slots = lock(&self.handlers);
            slots.fired.push(event.clone());
            slots
                .handlers
                .iter()
                .filter(|(kind, _)| *kind == event.kind)
                .map(|(_, handler)| handler.clone())
                .collect()
        };
        for handler in &handlers {
            self.invoke(handler, &event);
        }
    }

    fn invoke(&self, handler: &TaskEventHandler, event: &TaskEvent) {
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| handler(event))) {
            if is_thread_abort(&*payload) {
                panic::resume_unwind(payload);
            }
            error!(
                task = %self.name,
                "{:?} handler panicked: {}",
                event.kind,
                panic_message(&*payload)
            );
        }
    }

    /// Records the task's result and wakes up joiners. Only the first call has any effect.
    ///
    /// Implementations call this once the task's work is over.
    pub fn notify_terminated(&self, result: TaskResult) {
        let fire = {
            let mut state = lock(&self.state);
            if state.result.is_some() {
                return;
            }
            state.result = Some(result.clone());
            self.terminated.notify_all();
            state.started_fired || !state.started
        };
        debug!(task = %self.name, id = %self.id, ?result, "task terminated");
        if fire {
            self.fire(self.event(TaskEventKind::Terminated, Some(result)));
        }
    }

    fn begin_start(&self) -> bool {
        let mut state = lock(&self.state);
        if state.started || state.result.is_some() {
            return false;
        }
        state.started = true;
        true
    }

    /// Raises Started, then Terminated if the task finished before Started was raised.
    fn finish_starting(&self) {
        self.fire(self.event(TaskEventKind::Started, None));
        let result = {
            let mut state = lock(&self.state);
            state.started_fired = true;
            state.result.clone()
        };
        if let Some(result) = result {
            self.fire(self.event(TaskEventKind::Terminated, Some(result)));
        }
    }

    fn wait_terminated(&self, timeout: Option<Duration>) -> bool {
        let state = lock(&self.state);
        match timeout {
            None => {
                let _state = self
                    .terminated
                    .wait_while(state, |state| state.result.is_none())
                    .unwrap_or_else(std::sync::PoisonError::into_inner);
                true
            }
            Some(timeout) => {
                let (state, _) = self
                    .terminated
                    .wait_timeout_while(state, timeout, |state| state.result.is_none())
                    .unwrap_or_else(std::sync::PoisonError::into_inner);
                state.result.is_some()
            }
        }
    }
}

/// A unit of supervised work: a thread, a process, or anything else that can be started,
/// interrupted, aborted and joined.
///
/// Implementations hold a [`TaskCore`] and provide the three hooks. The provided methods take
/// care of the lifecycle and events.
pub trait Task: Send + Sync {
    /// The shared task state.
    fn core(&self) -> &TaskCore;

    /// Starts the work. Called at most once.
    fn start_impl(&self) -> Result<(), TaskFailure>;

    /// Stops the work. The implementation must eventually call
    /// [`TaskCore::notify_terminated`].
    fn abort_impl(&self);

    /// Asks the work to stop at its next convenient point.
    fn interrupt_impl(&self) {}

    /// The task's id.
    fn id(&self) -> TaskId {
        self.core().id()
    }

    /// The task's name.
    fn name(&self) -> &str {
        self.core().name()
    }

    /// Starts the task. Does nothing unless the task is pending.
    ///
    /// If the task fails to start, it terminates with the failure as its result.
    fn start(&self) {
        let core = self.core();
        let started = {
            let _sequence = lock(&core.sequence);
            if !core.begin_start() {
                return;
            }
            debug!(task = %core.name, id = %core.id, "starting task");
            self.start_impl()
        };
        core.finish_starting();
        if let Err(failure) = started {
            core.notify_terminated(Err(failure));
        }
    }

    /// Asks the task to stop at its next abort point, without aborting it.
    fn interrupt(&self) {
        if self.is_running() {
            self.interrupt_impl();
        }
    }

    /// Aborts the task. Does nothing if the task has already been aborted or has terminated.
    ///
    /// A pending task terminates immediately with [`TaskFailure::Aborted`].
    fn abort(&self) {
        let core = self.core();
        let pending = {
            let _sequence = lock(&core.sequence);
            let pending = {
                let mut state = lock(&core.state);
                if state.aborted || state.result.is_some() {
                    return;
                }
                state.aborted = true;
                !state.started
            };
            if !pending {
                self.abort_impl();
            }
            pending
        };
        core.fire(core.event(TaskEventKind::Aborted, None));
        if pending {
            core.notify_terminated(Err(TaskFailure::Aborted));
        }
    }

    /// Waits for the task to terminate, for at most `timeout` (forever if `None`).
    ///
    /// Returns true if the task terminated.
    fn join(&self, timeout: Option<Duration>) -> bool {
        self.core().wait_terminated(timeout)
    }

    /// Starts the task and waits for it to terminate, aborting it if it takes longer than
    /// `timeout`. Returns the task's result.
    fn run(&self, timeout: Option<Duration>) -> TaskResult {
        self.start();
        if !self.join(timeout) {
            self.abort();
            self.join(None);
        }
        self.result().unwrap_or(Err(TaskFailure::Aborted))
    }

    /// Returns true if the task hasn't been started.
    fn is_pending(&self) -> bool {
        let state = lock(&self.core().state);
        !state.started && state.result.is_none()
    }

    /// Returns true if the task has been started and hasn't terminated.
    fn is_running(&self) -> bool {
        let state = lock(&self.core().state);
        state.started && state.result.is_none()
    }

    /// Returns true if the task has terminated.
    fn is_terminated(&self) -> bool {
        lock(&self.core().state).result.is_some()
    }

    /// Returns true if the task has been aborted.
    fn is_aborted(&self) -> bool {
        lock(&self.core().state).aborted
    }

    /// The task's result, once it has terminated.
    fn result(&self) -> Option<TaskResult> {
        lock(&self.core().state).result.clone()
    }

    /// Adds an event handler. See [`TaskCore::on`].
    fn on(&self, kind: TaskEventKind, handler: TaskEventHandler) {
        self.core().on(kind, handler);
    }
}

/// Measures how much of a timeout is left.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Budget {
    start: Instant,
    timeout: Option<Duration>,
}

impl Budget {
    pub(crate) fn new(timeout: Option<Duration>) -> Self {
        Self {
            start: Instant::now(),
            timeout,
        }
    }

    /// The time left, or `None` if the budget is spent. `Some(None)` means no limit.
    pub(crate) fn remaining(&self) -> Option<Option<Duration>> {
        crate::helpers::remaining(self.timeout, self.start.elapsed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    /// A task whose work is driven by the test.
    struct ManualTask {
        core: TaskCore,
        fail_start: bool,
        aborts: AtomicUsize,
    }

    impl ManualTask {
        fn new(fail_start: bool) -> Arc<Self> {
            Arc::new(Self {
                core: TaskCore::new("manual"),
                fail_start,
                aborts: AtomicUsize::new(0),
            })
        }
    }

    impl Task for ManualTask {
        fn core(&self) -> &TaskCore {
            &self.core
        }

        fn start_impl(&self) -> Result<(), TaskFailure> {
            if self.fail_start {
                Err(TaskFailure::Spawn(Arc::new(io::Error::other("no such file"))))
            } else {
                Ok(())
            }
        }

        fn abort_impl(&self) {
            self.aborts.fetch_add(1, Ordering::SeqCst);
            self.core.notify_terminated(Err(TaskFailure::Aborted));
        }
    }

    fn record(task: &dyn Task) -> Arc<Mutex<Vec<TaskEventKind>>> {
        let events = Arc::new(Mutex::new(Vec::new()));
        for kind in [
            TaskEventKind::Started,
            TaskEventKind::Aborted,
            TaskEventKind::Terminated,
        ] {
            let events = events.clone();
            task.on(kind, Arc::new(move |event: &TaskEvent| lock(&events).push(event.kind)));
        }
        events
    }

    #[test]
    fn lifecycle() {
        let task = ManualTask::new(false);
        let events = record(&*task);
        assert!(task.is_pending());

        task.start();
        assert!(task.is_running());
        assert!(!task.join(Some(Duration::from_millis(10))));

        task.core.notify_terminated(Ok(TaskValue::Unit));
        assert!(task.is_terminated());
        assert!(task.join(None));
        assert_eq!(task.result().unwrap().unwrap(), TaskValue::Unit);

        // Starting again and aborting after termination do nothing.
        task.start();
        task.abort();
        assert_eq!(task.aborts.load(Ordering::SeqCst), 0);
        assert_eq!(
            *lock(&events),
            [TaskEventKind::Started, TaskEventKind::Terminated]
        );
    }

    #[test]
    fn start_failure_terminates() {
        let task = ManualTask::new(true);
        let events = record(&*task);
        task.start();
        assert!(matches!(task.result(), Some(Err(TaskFailure::Spawn(_)))));
        assert_eq!(
            *lock(&events),
            [TaskEventKind::Started, TaskEventKind::Terminated]
        );
    }

    #[test]
    fn abort_pending_task() {
        let task = ManualTask::new(false);
        let events = record(&*task);
        task.abort();
        assert!(task.is_aborted());
        assert!(matches!(task.result(), Some(Err(TaskFailure::Aborted))));
        assert_eq!(task.aborts.load(Ordering::SeqCst), 0, "nothing to stop");

        task.start();
        assert!(!task.is_running());
        assert_eq!(
            *lock(&events),
            [TaskEventKind::Aborted, TaskEventKind::Terminated]
        );
    }

    #[test]
    fn abort_running_task_once() {
        let task = ManualTask::new(false);
        task.start();
        task.abort();
        task.abort();
        assert_eq!(task.aborts.load(Ordering::SeqCst), 1);
        assert!(task.is_aborted());
        assert!(task.is_terminated());
    }

    #[test]
    fn late_handlers_run_immediately() {
        let task = ManualTask::new(false);
        task.start();
        task.core.notify_terminated(Ok(TaskValue::Unit));

        let seen = Arc::new(AtomicUsize::new(0));
        let seen2 = seen.clone();
        task.on(
            TaskEventKind::Terminated,
            Arc::new(move |event: &TaskEvent| {
                assert!(event.result.is_some());
                seen2.fetch_add(1, Ordering::SeqCst);
            }),
        );
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn handler_panics_are_contained() {
        let task = ManualTask::new(false);
        task.on(TaskEventKind::Started, Arc::new(|_: &TaskEvent| panic!("bad handler")));
        let events = record(&*task);
        task.start();
        assert_eq!(*lock(&events), [TaskEventKind::Started]);
    }

    #[test]
    fn run_aborts_on_timeout() {
        let task = ManualTask::new(false);
        let result = task.run(Some(Duration::from_millis(20)));
        assert!(matches!(result, Err(TaskFailure::Aborted)));
        assert_eq!(task.aborts.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn exit_info_display() {
        let exited = ExitInfo {
            code: Some(3),
            signal: None,
        };
        assert_eq!(exited.to_string(), "exit code 3");
        assert!(!exited.is_success());
        let signaled = ExitInfo {
            code: None,
            signal: Some(9),
        };
        assert_eq!(signaled.to_string(), "signal 9");
    }
}
