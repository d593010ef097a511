// Copyright (c) The gallio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use camino::Utf8PathBuf;
use std::fmt;

/// The severity of an [`Annotation`].
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum AnnotationKind {
    /// Informational.
    Info,
    /// Something the user should probably look at.
    Warning,
    /// A problem that prevents some tests from running correctly.
    Error,
}

impl AnnotationKind {
    /// Returns the string form of the kind.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for AnnotationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A location in a source or project file.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct CodeLocation {
    /// The path to the file.
    pub path: Utf8PathBuf,

    /// The 1-based line number, if known.
    pub line: Option<u32>,
}

impl fmt::Display for CodeLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.line {
            Some(line) => write!(f, "{}:{line}", self.path),
            None => write!(f, "{}", self.path),
        }
    }
}

/// A message produced while building a test model, such as a test that couldn't be loaded.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Annotation {
    kind: AnnotationKind,
    location: Option<CodeLocation>,
    message: String,
    details: Option<String>,
}

impl Annotation {
    /// Creates a new annotation.
    pub fn new(kind: AnnotationKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            location: None,
            message: message.into(),
            details: None,
        }
    }

    /// Attaches a location to this annotation.
    pub fn with_location(mut self, location: CodeLocation) -> Self {
        self.location = Some(location);
        self
    }

    /// Attaches details to this annotation.
    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    /// The kind of annotation.
    pub fn kind(&self) -> AnnotationKind {
        self.kind
    }

    /// The location the annotation refers to.
    pub fn location(&self) -> Option<&CodeLocation> {
        self.location.as_ref()
    }

    /// The message.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Additional details.
    pub fn details(&self) -> Option<&str> {
        self.details.as_deref()
    }
}

impl fmt::Display for Annotation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: ", self.kind)?;
        if let Some(location) = &self.location {
            write!(f, "{location}: ")?;
        }
        f.write_str(&self.message)?;
        if let Some(details) = &self.details {
            write!(f, "\n{details}")?;
        }
        Ok(())
    }
}
