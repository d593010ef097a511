// Copyright (c) The gallio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! General support code for gallio-runner.

use std::{
    any::Any,
    borrow::Cow,
    sync::{Mutex, MutexGuard, PoisonError},
    time::Duration,
};

/// Utilities for pluralizing various words based on count.
pub mod plural {
    /// Returns "test" if `count` is 1, otherwise "tests".
    pub fn tests_str(count: usize) -> &'static str {
        if count == 1 { "test" } else { "tests" }
    }

    /// Returns "task" if `count` is 1, otherwise "tasks".
    pub fn tasks_str(count: usize) -> &'static str {
        if count == 1 { "task" } else { "tasks" }
    }

    /// Returns "assertion" if `count` is 1, otherwise "assertions".
    pub fn assertions_str(count: u64) -> &'static str {
        if count == 1 {
            "assertion"
        } else {
            "assertions"
        }
    }
}

/// Locks a mutex, ignoring poisoning.
///
/// State protected by these mutexes is kept consistent across panics, so a poisoned lock is still
/// usable.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Extracts a message from a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> Cow<'_, str> {
    if let Some(s) = payload.downcast_ref::<&str>() {
        Cow::Borrowed(s)
    } else if let Some(s) = payload.downcast_ref::<String>() {
        Cow::Borrowed(s.as_str())
    } else {
        Cow::Borrowed("(non-string panic payload)")
    }
}

/// Truncates `s` to at most `max` characters, appending `...` if anything was cut.
pub(crate) fn truncate_chars(s: &str, max: usize) -> Cow<'_, str> {
    match s.char_indices().nth(max) {
        Some((end, _)) => Cow::Owned(format!("{}...", &s[..end])),
        None => Cow::Borrowed(s),
    }
}

/// Prefixes every non-empty line of `text` with `indent`.
pub(crate) fn indent(text: &str, indent: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for (i, line) in text.lines().enumerate() {
        if i > 0 {
            out.push('\n');
        }
        if !line.is_empty() {
            out.push_str(indent);
        }
        out.push_str(line);
    }
    out
}

/// Formats a duration as seconds with 3 decimal places, e.g. `1.234s`.
pub(crate) fn format_duration(duration: Duration) -> String {
    format!("{:.3}s", duration.as_secs_f64())
}

/// Returns the remaining part of `budget` after `elapsed`, or `None` if it's been used up.
pub(crate) fn remaining(budget: Option<Duration>, elapsed: Duration) -> Option<Option<Duration>> {
    match budget {
        None => Some(None),
        Some(budget) => budget.checked_sub(elapsed).map(Some),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("hello", 10, "hello" ; "short")]
    #[test_case("hello", 5, "hello" ; "exact")]
    #[test_case("hello world", 5, "hello..." ; "long")]
    #[test_case("héllo wörld", 7, "héllo w..." ; "multibyte")]
    fn truncate(input: &str, max: usize, expected: &str) {
        assert_eq!(truncate_chars(input, max), expected);
    }

    #[test]
    fn indent_lines() {
        assert_eq!(indent("a\n\nb", "  "), "  a\n\n  b");
    }

    #[test]
    fn remaining_budget() {
        let s = Duration::from_secs;
        assert_eq!(remaining(None, s(5)), Some(None));
        assert_eq!(remaining(Some(s(5)), s(2)), Some(Some(s(3))));
        assert_eq!(remaining(Some(s(5)), s(6)), None);
    }
}
