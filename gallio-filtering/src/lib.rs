// Copyright (c) The gallio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The filter expression language used by gallio to select tests.
//!
//! A filter expression tests properties of a test:
//!
//! ```text
//! Name: Add, Subtract and not Category: /slow/i
//! ```
//!
//! A [`FilterSet`] is a sequence of such expressions, each prefixed with `include` or `exclude`:
//!
//! ```text
//! include Kind: fixture exclude Owner: 'nobody'
//! ```

pub mod errors;
mod expression;
mod parsing;
#[cfg(any(test, feature = "internal-testing"))]
mod proptest_helpers;

pub use expression::{
    FilterExpr, FilterKey, FilterRule, FilterSet, FilterSetResult, RuleKind, TestQuery,
    ValueMatcher,
};
