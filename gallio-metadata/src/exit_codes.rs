// Copyright (c) The gallio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

/// Documented exit codes for `gallio` failures.
///
/// `gallio` runs may fail for a variety of reasons. This structure documents the exit codes that
/// may occur in case of expected failures.
///
/// Unknown/unexpected failures will always result in exit code 1.
pub enum GallioExitCode {}

impl GallioExitCode {
    /// No errors occurred and gallio exited normally.
    pub const OK: i32 = 0;

    /// No tests were selected to run, but no other errors occurred.
    pub const NO_TESTS_RUN: i32 = 4;

    /// One or more tests failed.
    pub const TEST_RUN_FAILED: i32 = 100;

    /// Loading the test project produced an error.
    pub const PROJECT_LOAD_FAILED: i32 = 104;

    /// Building the test plan produced an error, for example a dependency cycle.
    pub const TEST_PLAN_FAILED: i32 = 105;

    /// Writing data to stdout or stderr produced an error.
    pub const WRITE_OUTPUT_ERROR: i32 = 110;

    /// A user issue happened while setting up a gallio invocation.
    pub const SETUP_ERROR: i32 = 96;

    /// A filter expression failed to parse.
    pub const INVALID_FILTER: i32 = 94;
}
