// Copyright (c) The gallio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Assertion failures, and the context that decides what happens to them.
//!
//! An [`AssertionFailure`] is an immutable description of a failed assertion. Failures are
//! submitted to an [`AssertionContext`], whose current [`AssertionFailureBehavior`] decides
//! whether the failure is saved, logged, and whether the test stops.

mod context;
mod failure;
pub mod helper;

pub use context::*;
pub use failure::*;
