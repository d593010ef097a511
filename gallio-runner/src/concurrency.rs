// Copyright (c) The gallio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Supervised work: threads and processes that can be started, interrupted, aborted and joined.
//!
//! The building blocks are:
//!
//! * [`ThreadAbortScope`], which delivers cooperative aborts to code running on a thread.
//! * The [`Task`] trait, with [`ThreadTask`] and [`ProcessTask`] implementations.
//! * [`TaskContainer`], which tracks groups of tasks.

pub mod abort;
mod container;
mod process_task;
mod task;
mod thread_task;

pub use abort::{
    AbortScopeState, Interrupted, ThreadAbort, ThreadAbortScope, checkpoint, is_thread_abort,
};
pub use container::*;
pub use process_task::*;
pub use task::{
    ExitInfo, Task, TaskCore, TaskEvent, TaskEventHandler, TaskEventKind, TaskFailure, TaskId,
    TaskResult, TaskValue,
};
pub use thread_task::*;
