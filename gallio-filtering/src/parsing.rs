// Copyright (c) The gallio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Parsing for filter expressions and filter sets.
//!
//! The parsing strategy is based on the following blog post:
//! `<https://eyalkalderon.com/blog/nom-error-recovery/>`
//!
//! All high level parsing functions should:
//! - always return Ok(_)
//! - on error:
//!     - consume as much input as it makes sense so that we can try to resume parsing
//!     - return an error/none variant of the expected result type
//!     - push an error in the parsing state (in span.state)

use crate::{
    errors::{ParseSingleError, State},
    expression::{FilterExpr, FilterKey, FilterRule, RuleKind, ValueMatcher},
};
use miette::SourceSpan;
use winnow::{
    LocatingSlice, ModalParser, Parser,
    ascii::{Caseless, multispace0},
    combinator::{alt, eof, not, opt, preceded, repeat, terminated, trace},
    stream::{Location, SliceLen, Stream},
    token::{literal, one_of, rest},
};

mod word;
pub(crate) use word::{DisplayRegex, DisplayWord};

pub(crate) type Span<'a> = winnow::Stateful<LocatingSlice<&'a str>, State<'a>>;
type Error = ();
type PResult<T> = winnow::ModalResult<T, Error>;

pub(crate) fn new_span<'a>(input: &'a str, errors: &'a mut Vec<ParseSingleError>) -> Span<'a> {
    Span {
        input: LocatingSlice::new(input),
        state: State::new(errors),
    }
}

#[derive(Clone)]
pub(crate) enum ExprResult {
    Valid(FilterExpr),
    Error,
}

impl ExprResult {
    fn negate(self) -> Self {
        match self {
            Self::Valid(expr) => Self::Valid(expr.negate()),
            Self::Error => Self::Error,
        }
    }

    fn collect(results: Vec<Self>, make: fn(Vec<FilterExpr>) -> FilterExpr) -> Self {
        let mut exprs = Vec::with_capacity(results.len());
        for result in results {
            match result {
                Self::Valid(expr) => exprs.push(expr),
                Self::Error => return Self::Error,
            }
        }
        Self::Valid(make(exprs))
    }
}

enum SpanLength {
    Unknown,
    Exact(usize),
}

fn expect_inner<'a, F, T>(
    mut parser: F,
    make_err: fn(SourceSpan) -> ParseSingleError,
    limit: SpanLength,
) -> impl ModalParser<Span<'a>, Option<T>, Error>
where
    F: ModalParser<Span<'a>, T, Error>,
{
    move |input: &mut _| match parser.parse_next(input) {
        Ok(out) => Ok(Some(out)),
        Err(winnow::error::ErrMode::Backtrack(_)) | Err(winnow::error::ErrMode::Cut(_)) => {
            let fragment_start = input.current_token_start();
            let fragment_length = input.slice_len();
            let span = match limit {
                SpanLength::Unknown => (fragment_start, fragment_length).into(),
                SpanLength::Exact(x) => (fragment_start, x.min(fragment_length)).into(),
            };
            let err = make_err(span);
            input.state.report_error(err);
            Ok(None)
        }
        Err(err) => Err(err),
    }
}

fn expect<'a, F, T>(
    parser: F,
    make_err: fn(SourceSpan) -> ParseSingleError,
) -> impl ModalParser<Span<'a>, Option<T>, Error>
where
    F: ModalParser<Span<'a>, T, Error>,
{
    expect_inner(parser, make_err, SpanLength::Unknown)
}

fn expect_char<'a>(
    c: char,
    make_err: fn(SourceSpan) -> ParseSingleError,
) -> impl ModalParser<Span<'a>, Option<char>, Error> {
    expect_inner(ws(c), make_err, SpanLength::Exact(0))
}

fn ws<'a, T, P: ModalParser<Span<'a>, T, Error>>(
    mut inner: P,
) -> impl ModalParser<Span<'a>, T, Error> {
    move |input: &mut Span<'a>| {
        let start = input.checkpoint();
        skip_ws(input)?;
        match inner.parse_next(input) {
            Ok(res) => Ok(res),
            Err(winnow::error::ErrMode::Backtrack(err)) => {
                input.reset(&start);
                Err(winnow::error::ErrMode::Backtrack(err))
            }
            Err(winnow::error::ErrMode::Cut(err)) => {
                input.reset(&start);
                Err(winnow::error::ErrMode::Cut(err))
            }
            Err(err) => Err(err),
        }
    }
}

/// Matches a reserved word, case-insensitively, as long as it isn't the prefix of a longer word.
fn keyword<'a>(name: &'static str) -> impl ModalParser<Span<'a>, (), Error> {
    ws(terminated(
        literal(Caseless(name)),
        not(one_of(|c: char| word::is_word_char(c) || c == '\\')),
    )
    .void())
}

fn reserved_word<'a>() -> impl ModalParser<Span<'a>, (), Error> {
    alt((
        keyword("and"),
        keyword("or"),
        keyword("not"),
        keyword("include"),
        keyword("exclude"),
    ))
}

fn parse_rule_kind(input: &mut Span<'_>) -> PResult<RuleKind> {
    trace(
        "parse_rule_kind",
        alt((
            keyword("include").value(RuleKind::Include),
            keyword("exclude").value(RuleKind::Exclude),
        )),
    )
    .parse_next(input)
}

// Returns Backtrack if there's no key here, and Ok(None) if the key was malformed.
fn parse_key(input: &mut Span<'_>) -> PResult<Option<FilterKey>> {
    trace(
        "parse_key",
        ws(alt((
            word::parse_quoted_word('"'),
            word::parse_quoted_word('\''),
            word::parse_bare_word,
        ))),
    )
    .map(|key: Option<String>| key.map(|key| FilterKey::from_name(&key)))
    .parse_next(input)
}

fn parse_value(input: &mut Span<'_>) -> PResult<Option<ValueMatcher>> {
    trace(
        "parse_value",
        ws(alt((
            word::parse_regex,
            word::parse_quoted_word('"')
                .map(|word: Option<String>| word.map(ValueMatcher::Equal)),
            word::parse_quoted_word('\'')
                .map(|word: Option<String>| word.map(ValueMatcher::Equal)),
            preceded(not(reserved_word()), word::parse_bare_word)
                .map(|word: Option<String>| word.map(ValueMatcher::Equal)),
        ))),
    )
    .parse_next(input)
}

fn parse_property_expr(input: &mut Span<'_>) -> PResult<ExprResult> {
    trace("parse_property_expr", |input: &mut Span<'_>| {
        let key = parse_key.parse_next(input)?;
        let colon = expect_char(':', ParseSingleError::ExpectedColon).parse_next(input)?;
        if colon.is_none() {
            // Without a colon the rest of the property can't be parsed sensibly.
            return Ok(ExprResult::Error);
        }

        let first = expect(parse_value, ParseSingleError::ExpectedValue).parse_next(input)?;
        let rest: Vec<Option<Option<ValueMatcher>>> = repeat(
            0..,
            preceded(
                ws(','),
                expect(parse_value, ParseSingleError::ExpectedValue),
            ),
        )
        .parse_next(input)?;

        let mut values = Vec::with_capacity(rest.len() + 1);
        let mut valid = key.is_some();
        for value in std::iter::once(first).chain(rest) {
            match value.flatten() {
                Some(value) => values.push(value),
                None => valid = false,
            }
        }

        match key {
            Some(key) if valid => Ok(ExprResult::Valid(FilterExpr::Property { key, values })),
            _ => Ok(ExprResult::Error),
        }
    })
    .parse_next(input)
}

fn parse_any_expr(input: &mut Span<'_>) -> PResult<ExprResult> {
    trace("parse_any_expr", ws('*').value(ExprResult::Valid(FilterExpr::Any))).parse_next(input)
}

fn expect_expr<'a, P: ModalParser<Span<'a>, ExprResult, Error>>(
    inner: P,
) -> impl ModalParser<Span<'a>, ExprResult, Error> {
    expect(inner, ParseSingleError::ExpectedExpr).map(|res| res.unwrap_or(ExprResult::Error))
}

fn parse_parentheses_expr(input: &mut Span<'_>) -> PResult<ExprResult> {
    trace(
        "parse_parentheses_expr",
        (
            ws('('),
            expect_expr(parse_or_expr),
            expect_char(')', ParseSingleError::ExpectedCloseParenthesis),
        )
            .map(|(_, expr, close)| match close {
                Some(_) => expr,
                None => ExprResult::Error,
            }),
    )
    .parse_next(input)
}

fn parse_not_expr(input: &mut Span<'_>) -> PResult<ExprResult> {
    trace(
        "parse_not_expr",
        preceded(keyword("not"), expect_expr(parse_basic_expr)).map(ExprResult::negate),
    )
    .parse_next(input)
}

fn parse_basic_expr(input: &mut Span<'_>) -> PResult<ExprResult> {
    trace(
        "parse_basic_expr",
        ws(alt((
            parse_not_expr,
            parse_parentheses_expr,
            parse_any_expr,
            // Reserved words can't start a property.
            preceded(not(reserved_word()), parse_property_expr),
        ))),
    )
    .parse_next(input)
}

fn parse_and_expr(input: &mut Span<'_>) -> PResult<ExprResult> {
    trace("parse_and_expr", |input: &mut Span<'_>| {
        let first = expect_expr(parse_basic_expr).parse_next(input)?;
        let rest: Vec<ExprResult> =
            repeat(0.., preceded(keyword("and"), expect_expr(parse_basic_expr)))
                .parse_next(input)?;
        let mut results = vec![first];
        results.extend(rest);
        Ok(ExprResult::collect(results, FilterExpr::and))
    })
    .parse_next(input)
}

fn parse_or_expr(input: &mut Span<'_>) -> PResult<ExprResult> {
    trace("parse_or_expr", |input: &mut Span<'_>| {
        // "or" binds less tightly than "and", so parse and within or.
        let first = expect_expr(parse_and_expr).parse_next(input)?;
        let rest: Vec<ExprResult> =
            repeat(0.., preceded(keyword("or"), expect_expr(parse_and_expr)))
                .parse_next(input)?;
        let mut results = vec![first];
        results.extend(rest);
        Ok(ExprResult::collect(results, FilterExpr::or))
    })
    .parse_next(input)
}

fn skip_ws(input: &mut Span<'_>) -> PResult<()> {
    multispace0.void().parse_next(input)
}

fn skip_rest(input: &mut Span<'_>) -> PResult<()> {
    rest.void().parse_next(input)
}

/// Parses a single filter expression. An empty expression is an error.
pub(crate) fn parse_single(mut input: Span<'_>) -> Result<ExprResult, winnow::error::ErrMode<Error>> {
    let input = &mut input;
    skip_ws(input)?;
    if input.slice_len() == 0 {
        let start = input.current_token_start();
        input
            .state
            .report_error(ParseSingleError::EmptyExpression((start, 0).into()));
        return Ok(ExprResult::Error);
    }

    let expr = parse_or_expr.parse_next(input)?;
    let end = expect(ws(eof), ParseSingleError::ExpectedEndOfExpression).parse_next(input)?;
    if end.is_none() {
        skip_rest(input)?;
    }
    Ok(expr)
}

/// Parses a filter set: a sequence of rules, each optionally prefixed by `include` or `exclude`.
///
/// The first rule defaults to `include`. Later rules must carry a prefix.
pub(crate) fn parse_filter_set(
    mut input: Span<'_>,
) -> Result<Option<Vec<FilterRule>>, winnow::error::ErrMode<Error>> {
    let input = &mut input;
    let mut rules = Vec::new();
    let mut rule_count = 0;
    let mut valid = true;

    loop {
        skip_ws(input)?;
        if input.slice_len() == 0 {
            break;
        }

        let start = input.current_token_start();
        let kind = match opt(parse_rule_kind).parse_next(input)? {
            Some(kind) => kind,
            None if rule_count == 0 => RuleKind::Include,
            None => {
                input
                    .state
                    .report_error(ParseSingleError::RulesNotSeparated((start, 0).into()));
                valid = false;
                RuleKind::Include
            }
        };
        rule_count += 1;

        let expr = expect_expr(parse_or_expr).parse_next(input)?;
        match expr {
            ExprResult::Valid(expr) => rules.push(FilterRule { kind, expr }),
            ExprResult::Error => valid = false,
        }

        if input.current_token_start() == start {
            // No progress was made: an error has been reported, so give up on the rest.
            valid = false;
            skip_rest(input)?;
            break;
        }
    }

    Ok(valid.then_some(rules))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use test_case::test_case;

    #[track_caller]
    fn parse_ok(input: &str) -> FilterExpr {
        FilterExpr::parse(input).unwrap_or_else(|errors| {
            panic!("for input {input:?}, parsing failed: {:?}", errors.errors)
        })
    }

    #[track_caller]
    fn parse_err(input: &str) -> Vec<ParseSingleError> {
        match FilterExpr::parse(input) {
            Ok(expr) => panic!("for input {input:?}, expected error, got {expr:?}"),
            Err(errors) => errors.errors,
        }
    }

    fn equal(key: FilterKey, values: &[&str]) -> FilterExpr {
        FilterExpr::Property {
            key,
            values: values
                .iter()
                .map(|v| ValueMatcher::Equal((*v).to_owned()))
                .collect(),
        }
    }

    #[test]
    fn test_parse_property() {
        assert_eq!(parse_ok("Name: foo"), equal(FilterKey::Name, &["foo"]));
        assert_eq!(parse_ok("Name:foo"), equal(FilterKey::Name, &["foo"]));
        assert_eq!(
            parse_ok("  Name : foo , bar  "),
            equal(FilterKey::Name, &["foo", "bar"])
        );
        assert_eq!(
            parse_ok("Owner: \"some one\""),
            equal(FilterKey::Metadata("Owner".into()), &["some one"])
        );
        assert_eq!(
            parse_ok("FullName: 'a/b'"),
            equal(FilterKey::FullName, &["a/b"])
        );
    }

    #[test]
    fn test_parse_escapes() {
        assert_eq!(parse_ok(r"Name: a\,b"), equal(FilterKey::Name, &["a,b"]));
        assert_eq!(
            parse_ok(r#"Name: "say \"hi\"""#),
            equal(FilterKey::Name, &["say \"hi\""])
        );
        assert_eq!(parse_ok(r"Name: a\\b"), equal(FilterKey::Name, &[r"a\b"]));
    }

    #[test]
    fn test_parse_quoted_words() {
        assert_eq!(
            parse_ok(r#"Name: 'say "hi"', "it's""#),
            equal(FilterKey::Name, &["say \"hi\"", "it's"])
        );
        assert_eq!(
            parse_ok(r#"Name: "a, b" or Name: 'not x'"#),
            FilterExpr::Or(vec![
                equal(FilterKey::Name, &["a, b"]),
                equal(FilterKey::Name, &["not x"]),
            ])
        );
    }

    #[test]
    fn test_parse_regex() {
        let expr = parse_ok(r"Name: /fo+\/bar/i");
        let FilterExpr::Property { values, .. } = expr else {
            panic!("expected property, got {expr:?}");
        };
        match &values[0] {
            ValueMatcher::Regex {
                regex,
                case_insensitive,
            } => {
                assert!(*case_insensitive);
                assert!(regex.is_match("xFOO/BAR"));
            }
            other => panic!("expected regex, got {other:?}"),
        }

        // Regex escapes other than \/ are passed through to the regex engine.
        let expr = parse_ok(r"Name: /\d+/");
        let FilterExpr::Property { values, .. } = expr else {
            panic!("expected property");
        };
        assert!(values[0].is_match("abc123"));
        assert!(!values[0].is_match("abc"));
    }

    #[test]
    fn test_parse_precedence() {
        let a = || equal(FilterKey::Name, &["a"]);
        let b = || equal(FilterKey::Name, &["b"]);
        let c = || equal(FilterKey::Name, &["c"]);

        assert_eq!(
            parse_ok("Name: a or Name: b and Name: c"),
            FilterExpr::Or(vec![a(), FilterExpr::And(vec![b(), c()])])
        );
        assert_eq!(
            parse_ok("(Name: a or Name: b) and Name: c"),
            FilterExpr::And(vec![FilterExpr::Or(vec![a(), b()]), c()])
        );
        assert_eq!(
            parse_ok("not Name: a and Name: b"),
            FilterExpr::And(vec![a().negate(), b()])
        );
        assert_eq!(
            parse_ok("NOT not *"),
            FilterExpr::Any.negate().negate()
        );
        assert_eq!(
            parse_ok("Name: a AND Name: b"),
            FilterExpr::And(vec![a(), b()])
        );
    }

    #[test]
    fn test_keyword_prefix_is_a_word() {
        // "notable" starts with "not" but isn't the keyword.
        assert_eq!(
            parse_ok("notable: yes"),
            equal(FilterKey::Metadata("notable".into()), &["yes"])
        );
        assert_eq!(
            parse_ok("Name: android"),
            equal(FilterKey::Name, &["android"])
        );
    }

    #[test_case("", ParseSingleError::EmptyExpression((0, 0).into()) ; "empty")]
    #[test_case("   ", ParseSingleError::EmptyExpression((3, 0).into()) ; "whitespace only")]
    #[test_case("Name foo", ParseSingleError::ExpectedColon((4, 0).into()) ; "missing colon")]
    #[test_case("Name:", ParseSingleError::ExpectedValue((5, 0).into()) ; "missing value")]
    #[test_case("(Name: a", ParseSingleError::ExpectedCloseParenthesis((8, 0).into()) ; "missing close paren")]
    #[test_case("Name: \"abc", ParseSingleError::MissingEndDelimiter { span: (6, 4).into(), delimiter: '"' } ; "unterminated quote")]
    #[test_case(r"Name: a\q", ParseSingleError::CannotEscape { span: (8, 1).into(), ch: 'q' } ; "bad escape")]
    #[test_case("Name: a)", ParseSingleError::ExpectedEndOfExpression((7, 1).into()) ; "trailing input")]
    fn test_parse_errors(input: &str, expected: ParseSingleError) {
        let errors = parse_err(input);
        assert_eq!(errors.first(), Some(&expected), "all errors: {errors:?}");
    }

    #[test]
    fn test_invalid_regex() {
        let errors = parse_err("Name: /a(/");
        assert!(
            matches!(errors[0], ParseSingleError::InvalidRegex { .. }),
            "{errors:?}"
        );
    }

    #[test]
    fn test_missing_operand() {
        let errors = parse_err("Name: a and");
        assert!(
            matches!(errors[0], ParseSingleError::ExpectedExpr(_)),
            "{errors:?}"
        );
    }
}
