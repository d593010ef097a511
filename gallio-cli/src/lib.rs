// Copyright (c) The gallio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The `gallio` command-line tool.
//!
//! `gallio` loads a test project (by default `gallio-project.toml` in the current directory),
//! selects tests with a filter expression and lists, runs, or shows them as a tree. Settings
//! come from profiles in `.config/gallio.toml` next to the project.

#![warn(missing_docs)]

mod dispatch;
mod errors;
mod output;

#[doc(hidden)]
pub use dispatch::*;
#[doc(hidden)]
pub use errors::*;
#[doc(hidden)]
pub use output::OutputWriter;
