// Copyright (c) The gallio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Words: bare, quoted, and regex-delimited.

use super::{Error, PResult, Span};
use crate::{errors::ParseSingleError, expression::ValueMatcher};
use std::fmt;
use winnow::{
    ModalParser, Parser,
    combinator::opt,
    error::ErrMode,
    stream::{Location, Stream},
    token::{any, one_of, take_till, take_while},
};

/// Characters that can follow a backslash.
const ESCAPABLE: [char; 5] = ['"', '\'', '/', ',', '\\'];

/// Characters that form tokens of their own.
const PUNCTUATION: [char; 5] = [':', '(', ')', ',', '*'];

/// Characters that start delimited words.
const DELIMITERS: [char; 3] = ['"', '\'', '/'];

const RESERVED: [&str; 5] = ["and", "or", "not", "include", "exclude"];

/// Returns true if `c` can appear inside a bare word.
pub(crate) fn is_word_char(c: char) -> bool {
    !c.is_whitespace() && !PUNCTUATION.contains(&c) && c != '\\'
}

/// Returns true if `c` can start a bare word.
fn is_word_start_char(c: char) -> bool {
    is_word_char(c) && !DELIMITERS.contains(&c)
}

fn is_reserved(word: &str) -> bool {
    RESERVED.iter().any(|reserved| word.eq_ignore_ascii_case(reserved))
}

/// Parses the character after a backslash. Returns None (and reports an error) if it can't be
/// escaped.
fn parse_escaped(input: &mut Span<'_>) -> PResult<Option<char>> {
    let pos = input.current_token_start();
    let next: Option<char> = opt(any).parse_next(input)?;
    match next {
        Some(c) if ESCAPABLE.contains(&c) => Ok(Some(c)),
        Some(c) => {
            let err = ParseSingleError::CannotEscape {
                span: (pos, c.len_utf8()).into(),
                ch: c,
            };
            input.state.report_error(err);
            Ok(None)
        }
        None => {
            let err = ParseSingleError::MissingEscapedCharacter((pos, 0).into());
            input.state.report_error(err);
            Ok(None)
        }
    }
}

/// Parses a bare word. Backtracks if there's no word here; returns `Ok(None)` if the word
/// contained an invalid escape.
pub(crate) fn parse_bare_word(input: &mut Span<'_>) -> PResult<Option<String>> {
    let start = input.checkpoint();
    match opt(one_of(|c: char| is_word_start_char(c) || c == '\\')).parse_next(input)? {
        Some(_) => input.reset(&start),
        None => return Err(ErrMode::Backtrack(())),
    }

    let mut word = String::new();
    let mut valid = true;
    loop {
        let literal: &str = take_while(0.., is_word_char).parse_next(input)?;
        word.push_str(literal);

        let backslash: Option<char> = opt('\\').parse_next(input)?;
        if backslash.is_none() {
            break;
        }
        match parse_escaped(input)? {
            Some(c) => word.push(c),
            None => {
                valid = false;
                break;
            }
        }
    }

    if !valid {
        // Skip the rest of the word so parsing can resume after it.
        take_while(0.., |c: char| is_word_char(c) || c == '\\')
            .void()
            .parse_next(input)?;
        return Ok(None);
    }
    Ok(Some(word))
}

/// Parses the body of a delimited word after its opening delimiter, up to and including the
/// closing delimiter.
///
/// Within regexes, only `\/` is an escape: other backslash sequences are passed through to the
/// regex engine.
fn parse_delimited_body(
    input: &mut Span<'_>,
    delimiter: char,
    start: usize,
    is_regex: bool,
) -> PResult<Option<String>> {
    let mut word = String::new();
    let mut valid = true;
    loop {
        let literal: &str = take_till(0.., (delimiter, '\\')).parse_next(input)?;
        word.push_str(literal);

        let next: Option<char> = opt(any).parse_next(input)?;
        match next {
            Some(c) if c == delimiter => break,
            Some(_backslash) if is_regex => {
                let escaped: Option<char> = opt(any).parse_next(input)?;
                match escaped {
                    Some('/') => word.push('/'),
                    Some(c) => {
                        word.push('\\');
                        word.push(c);
                    }
                    None => {
                        let pos = input.current_token_start();
                        input
                            .state
                            .report_error(ParseSingleError::MissingEscapedCharacter(
                                (pos, 0).into(),
                            ));
                        return Ok(None);
                    }
                }
            }
            Some(_backslash) => match parse_escaped(input)? {
                Some(c) => word.push(c),
                None => valid = false,
            },
            None => {
                let end = input.current_token_start();
                input.state.report_error(ParseSingleError::MissingEndDelimiter {
                    span: (start, end - start).into(),
                    delimiter,
                });
                return Ok(None);
            }
        }
    }

    Ok(valid.then_some(word))
}

/// Parses a word delimited by `delimiter`, which is `"` or `'`.
pub(crate) fn parse_quoted_word<'a>(
    mut delimiter: char,
) -> impl ModalParser<Span<'a>, Option<String>, Error> {
    move |input: &mut Span<'a>| {
        let start = input.current_token_start();
        let _ = delimiter.parse_next(input)?;
        parse_delimited_body(input, delimiter, start, false)
    }
}

/// Parses `/regex/` with an optional trailing `i` for case-insensitive matching.
pub(crate) fn parse_regex(input: &mut Span<'_>) -> PResult<Option<ValueMatcher>> {
    let start = input.current_token_start();
    let _ = '/'.parse_next(input)?;
    let body_start = input.current_token_start();
    let Some(pattern) = parse_delimited_body(input, '/', start, true)? else {
        return Ok(None);
    };
    // The closing delimiter has been consumed.
    let body_end = input.current_token_start() - 1;
    let case_insensitive = opt('i').parse_next(input)?.is_some();

    match regex::RegexBuilder::new(&pattern)
        .case_insensitive(case_insensitive)
        .build()
    {
        Ok(regex) => Ok(Some(ValueMatcher::Regex {
            regex,
            case_insensitive,
        })),
        Err(_) => {
            let err = ParseSingleError::invalid_regex(&pattern, body_start, body_end);
            input.state.report_error(err);
            Ok(None)
        }
    }
}

/// Displays a word, quoting it if it can't be written bare.
pub(crate) struct DisplayWord<'a>(pub(crate) &'a str);

impl fmt::Display for DisplayWord<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let word = self.0;
        let bare = word.chars().next().is_some_and(is_word_start_char)
            && word.chars().all(is_word_char)
            && !is_reserved(word);
        if bare {
            return f.write_str(word);
        }

        f.write_str("\"")?;
        for c in word.chars() {
            if c == '"' || c == '\\' {
                write!(f, "\\{c}")?;
            } else {
                write!(f, "{c}")?;
            }
        }
        f.write_str("\"")
    }
}

/// Displays a regex pattern so that it parses back to the same pattern.
pub(crate) struct DisplayRegex<'a>(pub(crate) &'a str);

impl fmt::Display for DisplayRegex<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut escaped = false;
        for c in self.0.chars() {
            if escaped {
                escaped = false;
                write!(f, "{c}")?;
            } else if c == '\\' {
                escaped = true;
                write!(f, "{c}")?;
            } else if c == '/' {
                // '/' is the only additional escape.
                write!(f, "\\/")?;
            } else {
                write!(f, "{c}")?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("foo", "foo" ; "bare")]
    #[test_case("a b", "\"a b\"" ; "whitespace")]
    #[test_case("And", "\"And\"" ; "reserved")]
    #[test_case("say \"hi\"", r#""say \"hi\"""# ; "embedded quote")]
    #[test_case("", "\"\"" ; "empty")]
    #[test_case("a/b", "a/b" ; "slash inside")]
    #[test_case("/ab", "\"/ab\"" ; "leading slash")]
    fn display_word(input: &str, expected: &str) {
        assert_eq!(DisplayWord(input).to_string(), expected);
    }
}
