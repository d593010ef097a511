// Copyright (c) The gallio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

#![warn(missing_docs)]

//! Core functionality for `gallio`, a test automation platform.
//!
//! The basic flow of operations is:
//!
//! 1. Build a [`TestModel`](model::TestModel), either in code or by loading a
//!    [`TestProject`](project::TestProject) from TOML.
//! 2. Select tests with a [`FilterSet`](gallio_filtering::FilterSet), producing a
//!    [`TestPlan`](model::TestPlan). A plan can be printed with [`TestList`](list::TestList).
//! 3. Run the plan with a [`TestRunner`](runner::TestRunner). Test bodies record failures through
//!    an [`AssertionContext`](assertions::AssertionContext), start work through the
//!    [`concurrency`] module, and register cleanup with the [`sandbox`].
//! 4. Feed the runner's events to a [`TestReporter`](reporter::TestReporter) for display, and to a
//!    [`TestTreeModel`](tree::TestTreeModel) for a browsable view of results.

pub mod assertions;
pub mod concurrency;
pub mod config;
pub mod errors;
mod helpers;
pub mod list;
pub mod model;
pub mod project;
pub mod reporter;
pub mod runner;
pub mod sandbox;
pub mod signal;
pub mod test_log;
pub mod tree;
