// Copyright (c) The gallio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use std::collections::BTreeMap;

/// Well-known metadata keys.
pub mod keys {
    /// The category of a test.
    pub const CATEGORY: &str = "Category";

    /// A description of a test.
    pub const DESCRIPTION: &str = "Description";

    /// The reason a test is ignored. A test with this key is skipped with the `ignored` outcome.
    pub const IGNORE_REASON: &str = "IgnoreReason";

    /// The reason a test is pending. A test with this key is skipped with the `pending` outcome.
    pub const PENDING_REASON: &str = "PendingReason";

    /// The reason a test only runs when selected explicitly.
    pub const EXPLICIT_REASON: &str = "ExplicitReason";

    /// The owner of a test.
    pub const OWNER: &str = "Owner";
}

/// A multi-valued map of metadata keys to values.
///
/// Keys keep their insertion order. Values for a key keep the order they were added in.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MetadataMap {
    entries: IndexMap<SmolStr, Vec<String>>,
}

impl MetadataMap {
    /// Creates an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a value to the list of values for `key`.
    pub fn add(&mut self, key: impl Into<SmolStr>, value: impl Into<String>) {
        self.entries
            .entry(key.into())
            .or_default()
            .push(value.into());
    }

    /// Replaces all values for `key` with a single value.
    pub fn set_value(&mut self, key: impl Into<SmolStr>, value: impl Into<String>) {
        self.entries.insert(key.into(), vec![value.into()]);
    }

    /// Returns the first value for `key`, if any.
    pub fn get_value(&self, key: &str) -> Option<&str> {
        self.entries
            .get(key)
            .and_then(|values| values.first())
            .map(String::as_str)
    }

    /// Returns all values for `key`.
    pub fn get_all(&self, key: &str) -> &[String] {
        self.entries.get(key).map_or(&[], Vec::as_slice)
    }

    /// Returns true if there's at least one value for `key`.
    pub fn contains_key(&self, key: &str) -> bool {
        !self.get_all(key).is_empty()
    }

    /// Removes all values for `key`.
    pub fn remove(&mut self, key: &str) -> Vec<String> {
        self.entries.shift_remove(key).unwrap_or_default()
    }

    /// Adds every value in `other` to this map.
    pub fn merge(&mut self, other: &MetadataMap) {
        for (key, values) in &other.entries {
            self.entries
                .entry(key.clone())
                .or_default()
                .extend(values.iter().cloned());
        }
    }

    /// Returns true if the map is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates over keys and their values.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> + '_ {
        self.entries
            .iter()
            .map(|(key, values)| (key.as_str(), values.as_slice()))
    }

    /// Converts the map to the sorted form used in machine-readable output.
    pub fn to_summary(&self) -> BTreeMap<String, Vec<String>> {
        self.entries
            .iter()
            .map(|(key, values)| (key.to_string(), values.clone()))
            .collect()
    }
}

impl<K: Into<SmolStr>, V: Into<String>> FromIterator<(K, V)> for MetadataMap {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut map = Self::new();
        for (key, value) in iter {
            map.add(key, value);
        }
        map
    }
}
