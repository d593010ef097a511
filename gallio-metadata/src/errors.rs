// Copyright (c) The gallio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use std::{error::Error, fmt, io};

/// An error from running `gallio` as a subprocess and reading its output.
#[derive(Debug)]
pub enum CommandError {
    /// The process couldn't be started, or its output wasn't UTF-8.
    Exec(io::Error),

    /// `gallio` exited unsuccessfully.
    CommandFailed {
        /// The exit code, if the process wasn't killed by a signal. See
        /// [`GallioExitCode`](crate::GallioExitCode) for the meaning of each code.
        exit_code: Option<i32>,

        /// What the process wrote to stderr.
        stderr: Vec<u8>,
    },

    /// The output wasn't the expected JSON.
    Json(serde_json::Error),
}

impl fmt::Display for CommandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exec(_) => f.write_str("failed to run `gallio`"),
            Self::CommandFailed { exit_code, stderr } => {
                f.write_str("`gallio` failed")?;
                if let Some(code) = exit_code {
                    write!(f, " with exit code {code}")?;
                }
                write!(f, ", stderr:\n{}\n", String::from_utf8_lossy(stderr))
            }
            Self::Json(_) => f.write_str("failed to parse `gallio` JSON output"),
        }
    }
}

impl Error for CommandError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Exec(error) => Some(error),
            Self::Json(error) => Some(error),
            Self::CommandFailed { .. } => None,
        }
    }
}
