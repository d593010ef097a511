// Copyright (c) The gallio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

#![warn(missing_docs)]

//! Machine-readable output for `gallio`.
//!
//! `gallio list --message-format json` and `gallio run --message-format json` produce the types
//! in this crate. [`ListCommand`] runs the former and parses its output.
//!
//! Exit codes are documented in [`GallioExitCode`].

mod errors;
mod exit_codes;
mod run_summary;
mod test_list;

pub use errors::*;
pub use exit_codes::*;
pub use run_summary::*;
pub use test_list::*;
