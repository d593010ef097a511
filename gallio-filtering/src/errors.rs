// Copyright (c) The gallio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Errors produced while parsing filter expressions.

use miette::{Diagnostic, SourceSpan};
use thiserror::Error;

/// A set of errors that occurred while parsing a filter expression or filter set.
#[derive(Clone, Debug, Error)]
#[error("failed to parse filter `{input}`")]
#[non_exhaustive]
pub struct FilterParseErrors {
    /// The input string.
    pub input: String,

    /// The parse errors returned.
    pub errors: Vec<ParseSingleError>,
}

impl FilterParseErrors {
    pub(crate) fn new(input: impl Into<String>, errors: Vec<ParseSingleError>) -> Self {
        Self {
            input: input.into(),
            errors,
        }
    }
}

/// An individual error that occurred while parsing a filter expression.
#[derive(Clone, Debug, Error, Diagnostic, PartialEq, Eq)]
#[non_exhaustive]
pub enum ParseSingleError {
    /// A quoted word or a regex was not terminated.
    #[error("missing end delimiter")]
    MissingEndDelimiter {
        /// The span of the unterminated word.
        #[label("missing closing `{delimiter}`")]
        span: SourceSpan,

        /// The delimiter that was expected.
        delimiter: char,
    },

    /// A backslash was followed by a character that cannot be escaped.
    #[error("cannot escape character {ch:?}")]
    CannotEscape {
        /// The span of the escaped character.
        #[label("only `\"`, `'`, `/`, `,` and `\\` can be escaped")]
        span: SourceSpan,

        /// The character after the backslash.
        ch: char,
    },

    /// A backslash was the last character of the input.
    #[error("missing escaped character")]
    MissingEscapedCharacter(#[label("expected a character after `\\`")] SourceSpan),

    /// A regex failed to compile.
    #[error("invalid regex")]
    InvalidRegex {
        /// The span of the regex error.
        #[label("{}", message)]
        span: SourceSpan,

        /// The message produced by the regex parser.
        message: String,
    },

    /// An invalid regex was encountered but we couldn't determine a better error message.
    #[error("invalid regex")]
    InvalidRegexWithoutMessage(#[label("invalid regex")] SourceSpan),

    /// A key was not followed by a colon.
    #[error("expected colon")]
    ExpectedColon(#[label("missing `:` after key")] SourceSpan),

    /// A colon or comma was not followed by a value.
    #[error("expected value")]
    ExpectedValue(#[label("missing value")] SourceSpan),

    /// An opening parenthesis was not closed.
    #[error("expected close parenthesis")]
    ExpectedCloseParenthesis(#[label("missing `)`")] SourceSpan),

    /// A filter expression was expected.
    #[error("expected filter expression")]
    ExpectedExpr(#[label("missing expression")] SourceSpan),

    /// Two rules of a filter set were not separated by `include` or `exclude`.
    #[error("filter rules must be separated by `include` or `exclude`")]
    RulesNotSeparated(#[label("expected `include` or `exclude` here")] SourceSpan),

    /// Input was left over after a complete expression.
    #[error("expected end of expression")]
    ExpectedEndOfExpression(#[label("unparsed input")] SourceSpan),

    /// The input to a single filter expression was empty.
    #[error("filter expression is empty")]
    EmptyExpression(#[label("expected an expression")] SourceSpan),
}

impl ParseSingleError {
    pub(crate) fn invalid_regex(input: &str, start: usize, end: usize) -> Self {
        // Use regex-syntax to parse the input so that we get better error messages.
        match regex_syntax::Parser::new().parse(input) {
            Ok(_) => {
                // It is weird that a regex failed to parse with regex but succeeded with
                // regex-syntax, but we can't do better.
                Self::InvalidRegexWithoutMessage((start, end - start).into())
            }
            Err(err) => {
                let (message, span) = match &err {
                    regex_syntax::Error::Parse(err) => (format!("{}", err.kind()), err.span()),
                    regex_syntax::Error::Translate(err) => (format!("{}", err.kind()), err.span()),
                    _ => return Self::InvalidRegexWithoutMessage((start, end - start).into()),
                };

                // This doesn't account for "\/", but it's close enough.
                let err_start = start + span.start.offset;
                let err_end = start + span.end.offset;

                Self::InvalidRegex {
                    span: (err_start, err_end - err_start).into(),
                    message,
                }
            }
        }
    }
}

#[derive(Debug)]
pub(crate) struct State<'a> {
    errors: &'a mut Vec<ParseSingleError>,
}

impl<'a> State<'a> {
    pub fn new(errors: &'a mut Vec<ParseSingleError>) -> Self {
        Self { errors }
    }

    pub fn report_error(&mut self, error: ParseSingleError) {
        self.errors.push(error);
    }
}
