// Copyright (c) The gallio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::{
    errors::FilterParseErrors,
    parsing::{self, DisplayRegex, DisplayWord, ExprResult, new_span},
};
use smol_str::SmolStr;
use std::fmt;

/// The properties of a test that a filter can inspect.
pub trait TestQuery {
    /// The stable identifier of the test.
    fn id(&self) -> &str;

    /// The name of the test.
    fn name(&self) -> &str;

    /// The slash-separated full name of the test.
    fn full_name(&self) -> &str;

    /// The kind of the test, for example `group` or `test`.
    fn kind(&self) -> &str;

    /// All metadata values associated with `key`.
    fn metadata_values(&self, key: &str) -> Vec<&str>;
}

/// Matches a single string value.
#[derive(Clone, Debug)]
pub enum ValueMatcher {
    /// Exact equality.
    Equal(String),

    /// Unanchored regex search.
    Regex {
        /// The compiled regex.
        regex: regex::Regex,

        /// True if the regex was written with the `i` modifier.
        case_insensitive: bool,
    },
}

impl ValueMatcher {
    /// Returns true if `value` is matched.
    pub fn is_match(&self, value: &str) -> bool {
        match self {
            Self::Equal(expected) => expected == value,
            Self::Regex { regex, .. } => regex.is_match(value),
        }
    }
}

impl PartialEq for ValueMatcher {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Equal(s1), Self::Equal(s2)) => s1 == s2,
            (
                Self::Regex {
                    regex: r1,
                    case_insensitive: c1,
                },
                Self::Regex {
                    regex: r2,
                    case_insensitive: c2,
                },
            ) => r1.as_str() == r2.as_str() && c1 == c2,
            _ => false,
        }
    }
}

impl Eq for ValueMatcher {}

impl fmt::Display for ValueMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Equal(value) => write!(f, "{}", DisplayWord(value)),
            Self::Regex {
                regex,
                case_insensitive,
            } => {
                write!(f, "/{}/", DisplayRegex(regex.as_str()))?;
                if *case_insensitive {
                    f.write_str("i")?;
                }
                Ok(())
            }
        }
    }
}

/// The property of a test a filter key refers to.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum FilterKey {
    /// `Id`: the stable identifier.
    Id,

    /// `Name`: the test name.
    Name,

    /// `FullName`: the slash-separated full name.
    FullName,

    /// `Kind`: the test kind.
    Kind,

    /// Any other key: matches metadata values stored under that key.
    Metadata(SmolStr),
}

impl FilterKey {
    /// Maps a key as written in a filter expression to a `FilterKey`.
    pub fn from_name(name: &str) -> Self {
        match name {
            "Id" => Self::Id,
            "Name" => Self::Name,
            "FullName" => Self::FullName,
            "Kind" => Self::Kind,
            other => Self::Metadata(other.into()),
        }
    }

    /// Returns the key as written in a filter expression.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Id => "Id",
            Self::Name => "Name",
            Self::FullName => "FullName",
            Self::Kind => "Kind",
            Self::Metadata(key) => key,
        }
    }

    fn matches<Q: TestQuery + ?Sized>(&self, values: &[ValueMatcher], query: &Q) -> bool {
        let matches_any = |value: &str| values.iter().any(|matcher| matcher.is_match(value));
        match self {
            Self::Id => matches_any(query.id()),
            Self::Name => matches_any(query.name()),
            Self::FullName => matches_any(query.full_name()),
            Self::Kind => matches_any(query.kind()),
            Self::Metadata(key) => query
                .metadata_values(key)
                .into_iter()
                .any(matches_any),
        }
    }
}

impl fmt::Display for FilterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", DisplayWord(self.as_str()))
    }
}

/// A parsed filter expression.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FilterExpr {
    /// `*`: matches every test.
    Any,

    /// `not expr`.
    Not(Box<FilterExpr>),

    /// `a and b and ...`.
    And(Vec<FilterExpr>),

    /// `a or b or ...`.
    Or(Vec<FilterExpr>),

    /// `key: value, value, ...`: matches if any of the values matches the property.
    Property {
        /// The property being tested.
        key: FilterKey,

        /// The accepted values. At least one is present.
        values: Vec<ValueMatcher>,
    },
}

impl FilterExpr {
    /// Parses a single filter expression.
    ///
    /// Unlike [`FilterSet::parse`], an empty expression is an error.
    pub fn parse(input: &str) -> Result<Self, FilterParseErrors> {
        let mut errors = Vec::new();
        let res = {
            let span = new_span(input, &mut errors);
            parsing::parse_single(span)
        };
        match res {
            Ok(ExprResult::Valid(expr)) if errors.is_empty() => Ok(expr),
            Ok(_) | Err(_) => {
                if errors.is_empty() {
                    errors.push(crate::errors::ParseSingleError::ExpectedExpr(
                        (0, input.len()).into(),
                    ));
                }
                Err(FilterParseErrors::new(input, errors))
            }
        }
    }

    /// Returns true if the expression matches the given test.
    pub fn matches<Q: TestQuery + ?Sized>(&self, query: &Q) -> bool {
        match self {
            Self::Any => true,
            Self::Not(expr) => !expr.matches(query),
            Self::And(exprs) => exprs.iter().all(|expr| expr.matches(query)),
            Self::Or(exprs) => exprs.iter().any(|expr| expr.matches(query)),
            Self::Property { key, values } => key.matches(values, query),
        }
    }

    pub(crate) fn negate(self) -> Self {
        Self::Not(Box::new(self))
    }

    pub(crate) fn and(mut exprs: Vec<Self>) -> Self {
        match exprs.len() {
            1 => exprs.remove(0),
            _ => Self::And(exprs),
        }
    }

    pub(crate) fn or(mut exprs: Vec<Self>) -> Self {
        match exprs.len() {
            1 => exprs.remove(0),
            _ => Self::Or(exprs),
        }
    }

    fn fmt_operand(&self, f: &mut fmt::Formatter<'_>, parent_is_and: bool) -> fmt::Result {
        // "and" binds more tightly than "or", and "not" binds most tightly.
        let needs_parens = match self {
            Self::Or(_) => true,
            Self::And(_) => !parent_is_and,
            _ => false,
        };
        if needs_parens {
            write!(f, "({self})")
        } else {
            write!(f, "{self}")
        }
    }
}

impl fmt::Display for FilterExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Any => f.write_str("*"),
            Self::Not(expr) => {
                f.write_str("not ")?;
                expr.fmt_operand(f, false)
            }
            Self::And(exprs) => {
                for (i, expr) in exprs.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" and ")?;
                    }
                    expr.fmt_operand(f, true)?;
                }
                Ok(())
            }
            Self::Or(exprs) => {
                for (i, expr) in exprs.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" or ")?;
                    }
                    write!(f, "{expr}")?;
                }
                Ok(())
            }
            Self::Property { key, values } => {
                write!(f, "{key}: ")?;
                for (i, value) in values.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{value}")?;
                }
                Ok(())
            }
        }
    }
}

/// Whether a rule includes or excludes the tests it matches.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RuleKind {
    /// `include`.
    Include,

    /// `exclude`.
    Exclude,
}

impl fmt::Display for RuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Include => f.write_str("include"),
            Self::Exclude => f.write_str("exclude"),
        }
    }
}

/// One rule of a [`FilterSet`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FilterRule {
    /// Whether the rule includes or excludes.
    pub kind: RuleKind,

    /// The expression matched against tests.
    pub expr: FilterExpr,
}

/// The result of evaluating a [`FilterSet`] against a test.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FilterSetResult {
    /// Some inclusion rule matched and no exclusion rule did.
    Include,

    /// Some exclusion rule matched.
    Exclude,

    /// No rule matched.
    Unmatched,
}

/// An ordered list of inclusion and exclusion rules.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FilterSet {
    input: String,
    rules: Vec<FilterRule>,
}

impl FilterSet {
    /// A filter set with no rules, which matches every test.
    pub fn empty() -> Self {
        Self {
            input: String::new(),
            rules: Vec::new(),
        }
    }

    /// Parses a filter set.
    ///
    /// An input consisting only of whitespace produces an empty filter set.
    pub fn parse(input: &str) -> Result<Self, FilterParseErrors> {
        let mut errors = Vec::new();
        let res = {
            let span = new_span(input, &mut errors);
            parsing::parse_filter_set(span)
        };
        match res {
            Ok(Some(rules)) if errors.is_empty() => Ok(Self {
                input: input.to_owned(),
                rules,
            }),
            Ok(_) | Err(_) => {
                if errors.is_empty() {
                    errors.push(crate::errors::ParseSingleError::ExpectedExpr(
                        (0, input.len()).into(),
                    ));
                }
                Err(FilterParseErrors::new(input, errors))
            }
        }
    }

    /// Builds a filter set out of already-parsed rules.
    pub fn from_rules(rules: Vec<FilterRule>) -> Self {
        let input = rules
            .iter()
            .map(|rule| format!("{} {}", rule.kind, rule.expr))
            .collect::<Vec<_>>()
            .join(" ");
        Self { input, rules }
    }

    /// The input this set was parsed from.
    pub fn input(&self) -> &str {
        &self.input
    }

    /// The rules in this set, in order.
    pub fn rules(&self) -> &[FilterRule] {
        &self.rules
    }

    /// Returns true if the set has no rules.
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Returns true if the set has at least one inclusion rule.
    pub fn has_inclusion_rules(&self) -> bool {
        self.rules.iter().any(|rule| rule.kind == RuleKind::Include)
    }

    /// Evaluates the rules against a test. Exclusion takes priority over inclusion.
    pub fn evaluate<Q: TestQuery + ?Sized>(&self, query: &Q) -> FilterSetResult {
        let mut result = FilterSetResult::Unmatched;
        for rule in &self.rules {
            if rule.expr.matches(query) {
                match rule.kind {
                    RuleKind::Exclude => return FilterSetResult::Exclude,
                    RuleKind::Include => result = FilterSetResult::Include,
                }
            }
        }
        result
    }

    /// Returns true if the test is selected: it matches an inclusion rule (or there are no
    /// inclusion rules) and matches no exclusion rule.
    pub fn matches<Q: TestQuery + ?Sized>(&self, query: &Q) -> bool {
        match self.evaluate(query) {
            FilterSetResult::Include => true,
            FilterSetResult::Exclude => false,
            FilterSetResult::Unmatched => !self.has_inclusion_rules(),
        }
    }
}

impl fmt::Display for FilterSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, rule) in self.rules.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{} {}", rule.kind, rule.expr)?;
        }
        Ok(())
    }
}
