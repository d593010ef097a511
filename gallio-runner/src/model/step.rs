// Copyright (c) The gallio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::{MetadataMap, Test, TestId, TestIndex};
use std::fmt;

/// The identifier of a [`TestStep`].
///
/// Step ids are random: two runs of the same test produce steps with different ids.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct StepId(u64);

impl StepId {
    fn random() -> Self {
        Self(rand::random())
    }
}

impl fmt::Display for StepId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// One execution of a [`Test`].
///
/// Every test that runs gets a primary step. A test may create further steps while it runs, for
/// example one per row of data it's parameterized over.
#[derive(Clone, Debug)]
pub struct TestStep {
    id: StepId,
    test: TestIndex,
    test_id: TestId,
    name: String,
    full_name: String,
    parent: Option<StepId>,
    is_primary: bool,
    is_dynamic: bool,
    is_test_case: bool,
    metadata: MetadataMap,
}

impl TestStep {
    /// Creates the primary step of `test`.
    pub fn primary(test: &Test, index: TestIndex, parent: Option<&TestStep>) -> Self {
        let name = test.name().to_owned();
        Self {
            id: StepId::random(),
            test: index,
            test_id: test.id().clone(),
            full_name: child_full_name(parent, &name),
            name,
            parent: parent.map(|p| p.id),
            is_primary: true,
            is_dynamic: false,
            is_test_case: test.is_test_case(),
            metadata: test.metadata().clone(),
        }
    }

    /// Creates a step nested inside `parent` that belongs to the same test.
    ///
    /// Dynamic steps are created while the test runs rather than from the test model.
    pub fn child(parent: &TestStep, name: impl Into<String>, is_dynamic: bool) -> Self {
        let name = name.into();
        Self {
            id: StepId::random(),
            test: parent.test,
            test_id: parent.test_id.clone(),
            full_name: child_full_name(Some(parent), &name),
            name,
            parent: Some(parent.id),
            is_primary: false,
            is_dynamic,
            is_test_case: false,
            metadata: MetadataMap::new(),
        }
    }

    /// Marks this step as a test case.
    pub fn with_test_case(mut self, is_test_case: bool) -> Self {
        self.is_test_case = is_test_case;
        self
    }

    /// The id of this step.
    pub fn id(&self) -> StepId {
        self.id
    }

    /// The test this step belongs to.
    pub fn test(&self) -> TestIndex {
        self.test
    }

    /// The id of the test this step belongs to.
    pub fn test_id(&self) -> &TestId {
        &self.test_id
    }

    /// The name of the step.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The slash-separated name of the step.
    pub fn full_name(&self) -> &str {
        &self.full_name
    }

    /// The id of the parent step, if any.
    pub fn parent(&self) -> Option<StepId> {
        self.parent
    }

    /// True if this is the primary step of its test.
    pub fn is_primary(&self) -> bool {
        self.is_primary
    }

    /// True if this step was created while its test was running.
    pub fn is_dynamic(&self) -> bool {
        self.is_dynamic
    }

    /// True if this step counts as a test case.
    pub fn is_test_case(&self) -> bool {
        self.is_test_case
    }

    /// The metadata of this step.
    pub fn metadata(&self) -> &MetadataMap {
        &self.metadata
    }

    /// Mutable access to the metadata.
    pub fn metadata_mut(&mut self) -> &mut MetadataMap {
        &mut self.metadata
    }
}

fn child_full_name(parent: Option<&TestStep>, name: &str) -> String {
    match parent {
        None => String::new(),
        Some(parent) if parent.parent.is_none() => name.to_owned(),
        Some(parent) => format!("{}/{name}", parent.full_name),
    }
}

impl fmt::Display for TestStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[Step] {}", self.full_name)
    }
}
