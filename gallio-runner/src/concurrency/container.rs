// Copyright (c) The gallio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::{
    ProcessTask, ProcessTaskBuilder, Task, TaskEvent, TaskEventHandler, TaskEventKind, ThreadTask,
    task::Budget,
};
use crate::helpers::lock;
use std::{
    error::Error,
    fmt,
    sync::{Arc, Mutex, Weak},
    time::Duration,
};
use tracing::debug;

#[derive(Default)]
struct ContainerInner {
    tasks: Mutex<Vec<Arc<dyn Task>>>,
    handlers: Mutex<Vec<(TaskEventKind, TaskEventHandler)>>,
}

impl ContainerInner {
    fn forward(&self, event: &TaskEvent) {
        if event.kind == TaskEventKind::Terminated {
            lock(&self.tasks).retain(|task| task.id() != event.task_id);
        }
        let handlers: Vec<_> = lock(&self.handlers)
            .iter()
            .filter(|(kind, _)| *kind == event.kind)
            .map(|(_, handler)| handler.clone())
            .collect();
        for handler in handlers {
            handler(event);
        }
    }
}

/// Keeps track of a set of tasks so they can be interrupted, aborted or joined together.
///
/// Events raised by watched tasks are forwarded to handlers added with [`on`](Self::on).
/// Terminated tasks are forgotten.
///
/// Cloning a container produces another handle to the same set of tasks.
#[derive(Clone, Default)]
pub struct TaskContainer {
    inner: Arc<ContainerInner>,
}

impl fmt::Debug for TaskContainer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tasks = lock(&self.inner.tasks);
        f.debug_struct("TaskContainer")
            .field("tasks", &tasks.iter().map(|task| task.name()).collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl TaskContainer {
    /// Creates an empty container.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a handler for events raised by any watched task.
    pub fn on(&self, kind: TaskEventKind, handler: TaskEventHandler) {
        lock(&self.inner.handlers).push((kind, handler));
    }

    /// Starts tracking `task` until it terminates.
    pub fn watch(&self, task: Arc<dyn Task>) {
        lock(&self.inner.tasks).push(task.clone());
        for kind in [
            TaskEventKind::Started,
            TaskEventKind::Aborted,
            TaskEventKind::Terminated,
        ] {
            let container: Weak<ContainerInner> = Arc::downgrade(&self.inner);
            task.on(
                kind,
                Arc::new(move |event: &TaskEvent| {
                    if let Some(container) = container.upgrade() {
                        container.forward(event);
                    }
                }),
            );
        }
    }

    /// Creates a [`ThreadTask`] running `action`, watches it and starts it.
    pub fn start_thread_task<F, E>(&self, name: impl Into<String>, action: F) -> Arc<ThreadTask>
    where
        F: FnOnce() -> Result<(), E> + Send + 'static,
        E: Into<Box<dyn Error + Send + Sync>>,
    {
        let task = Arc::new(ThreadTask::new(name, action));
        self.watch(task.clone());
        task.start();
        task
    }

    /// Builds a [`ProcessTask`], watches it and starts it.
    pub fn start_process_task(&self, builder: ProcessTaskBuilder) -> Arc<ProcessTask> {
        let task = Arc::new(builder.build());
        self.watch(task.clone());
        task.start();
        task
    }

    /// The tasks that haven't terminated yet.
    pub fn active_tasks(&self) -> Vec<Arc<dyn Task>> {
        let mut tasks = lock(&self.inner.tasks);
        tasks.retain(|task| !task.is_terminated());
        tasks.clone()
    }

    /// Interrupts every active task.
    pub fn interrupt_all(&self) {
        for task in self.active_tasks() {
            task.interrupt();
        }
    }

    /// Aborts every active task.
    pub fn abort_all(&self) {
        let tasks = self.active_tasks();
        if !tasks.is_empty() {
            debug!("aborting {} active tasks", tasks.len());
        }
        for task in tasks {
            task.abort();
        }
    }

    /// Waits for every active task to terminate, including tasks started while waiting, for at
    /// most `timeout` in total (forever if `None`).
    ///
    /// Returns true if no task is active on return.
    pub fn join_all(&self, timeout: Option<Duration>) -> bool {
        let budget = Budget::new(timeout);
        loop {
            let active = self.active_tasks();
            if active.is_empty() {
                return true;
            }
            for task in &active {
                let Some(remaining) = budget.remaining() else {
                    return self.active_tasks().is_empty();
                };
                task.join(remaining);
            }
        }
    }
}
