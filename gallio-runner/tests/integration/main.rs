// Copyright (c) The gallio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

mod basic;
mod fixtures;
#[cfg(unix)]
mod project;
