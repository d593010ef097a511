// Copyright (c) The gallio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The test model: a tree of tests, the steps they produce when they run, and their outcomes.
//!
//! Tests live in a [`TestModel`] arena and refer to each other by [`TestIndex`]. Each test has a
//! [`TestId`] that is stable across rebuilds of the same tree.

mod annotation;
mod body;
mod metadata;
mod outcome;
mod plan;
mod step;
mod test;

pub use annotation::*;
pub use body::*;
pub use metadata::*;
pub use outcome::*;
pub use plan::*;
pub use step::*;
pub use test::*;
