// Copyright (c) The gallio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::{FilterExpr, FilterKey, ValueMatcher};
use proptest::{collection::vec, prelude::*};

impl FilterExpr {
    /// Strategy for generating arbitrary filter expressions.
    pub fn strategy() -> impl Strategy<Value = Self> {
        let leaf = prop_oneof![
            1 => Just(FilterExpr::Any),
            4 => (key_strategy(), vec(value_strategy(), 1..3))
                .prop_map(|(key, values)| FilterExpr::Property { key, values }),
        ];

        leaf.prop_recursive(4, 24, 4, |inner| {
            prop_oneof![
                inner.clone().prop_map(|expr| FilterExpr::Not(Box::new(expr))),
                vec(inner.clone(), 2..4).prop_map(FilterExpr::And),
                vec(inner, 2..4).prop_map(FilterExpr::Or),
            ]
        })
    }

    /// Merges directly nested `and`s and `or`s, which print identically to their flat forms.
    pub fn flattened(self) -> Self {
        match self {
            Self::Not(expr) => Self::Not(Box::new(expr.flattened())),
            Self::And(exprs) => Self::And(
                exprs
                    .into_iter()
                    .map(Self::flattened)
                    .flat_map(|expr| match expr {
                        Self::And(inner) => inner,
                        other => vec![other],
                    })
                    .collect(),
            ),
            Self::Or(exprs) => Self::Or(
                exprs
                    .into_iter()
                    .map(Self::flattened)
                    .flat_map(|expr| match expr {
                        Self::Or(inner) => inner,
                        other => vec![other],
                    })
                    .collect(),
            ),
            other => other,
        }
    }
}

fn key_strategy() -> impl Strategy<Value = FilterKey> {
    prop_oneof![
        Just(FilterKey::Id),
        Just(FilterKey::Name),
        Just(FilterKey::FullName),
        Just(FilterKey::Kind),
        prop_oneof![Just("Category"), Just("Owner"), Just("Test Area")]
            .prop_map(|key| FilterKey::Metadata(key.into())),
    ]
}

fn value_strategy() -> impl Strategy<Value = ValueMatcher> {
    prop_oneof![
        4 => "[a-zA-Z0-9_.]{1,8}".prop_map(ValueMatcher::Equal),
        2 => "[a-z \"',/\\\\]{0,8}".prop_map(ValueMatcher::Equal),
        1 => "[a-z]{1,4}(\\.\\*)?"
            .prop_flat_map(|pattern| (Just(pattern), any::<bool>()))
            .prop_map(|(pattern, case_insensitive)| ValueMatcher::Regex {
                regex: regex::RegexBuilder::new(&pattern)
                    .case_insensitive(case_insensitive)
                    .build()
                    .expect("generated patterns are valid"),
                case_insensitive,
            }),
    ]
}
