// Copyright (c) The gallio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration support for gallio.
//!
//! The config is read from `.config/gallio.toml`, layered over defaults embedded in the binary.
//! Most settings live in [profiles](GallioProfile), obtained through [`GallioConfig::profile`].

mod imp;

pub use imp::*;
