// Copyright (c) The gallio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::model::MetadataMap;
use gallio_filtering::TestQuery;
use gallio_metadata::{StepRunSummary, TestStatus};
use smol_str::SmolStr;
use std::fmt;

/// The identifier of a node within a [`TestTreeModel`](super::TestTreeModel).
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct NodeId(pub(super) usize);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// The check state of a node.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum CheckState {
    /// The node and all its descendants are checked.
    Checked,

    /// The node and all its descendants are unchecked.
    Unchecked,

    /// Some descendants are checked and others aren't.
    Indeterminate,
}

impl CheckState {
    /// The state after the user clicks the check box.
    pub fn toggled(self) -> Self {
        match self {
            Self::Unchecked => Self::Checked,
            Self::Checked | Self::Indeterminate => Self::Unchecked,
        }
    }
}

/// The node kind of grouping nodes created for the `namespace` metadata key.
pub const NAMESPACE_KIND: &str = "namespace";

/// A node in a test tree.
///
/// Most nodes stand for a test, in which case [`name`](Self::name) is the test id. Grouping nodes
/// are named after the value they group by.
#[derive(Clone, Debug)]
pub struct TestTreeNode {
    pub(super) id: NodeId,
    pub(super) name: String,
    pub(super) text: String,
    pub(super) kind: SmolStr,
    pub(super) full_name: String,
    pub(super) is_test: bool,
    pub(super) check_state: CheckState,
    pub(super) status: TestStatus,
    pub(super) step_runs: Vec<StepRunSummary>,
    pub(super) metadata: MetadataMap,
    pub(super) parent: Option<NodeId>,
    pub(super) children: Vec<NodeId>,
}

impl TestTreeNode {
    pub(super) fn new(
        id: NodeId,
        name: impl Into<String>,
        text: impl Into<String>,
        kind: impl Into<SmolStr>,
    ) -> Self {
        let text = text.into();
        Self {
            id,
            name: name.into(),
            full_name: text.clone(),
            text,
            kind: kind.into(),
            is_test: false,
            check_state: CheckState::Checked,
            status: TestStatus::Skipped,
            step_runs: Vec::new(),
            metadata: MetadataMap::new(),
            parent: None,
            children: Vec::new(),
        }
    }

    /// The id of this node.
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// The test id, or the grouping value for grouping nodes.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The text displayed for this node.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// The test kind, [`NAMESPACE_KIND`], or the metadata key for metadata grouping nodes.
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// The full name of the test, or the text for grouping nodes.
    pub fn full_name(&self) -> &str {
        &self.full_name
    }

    /// True if this node is a test case.
    pub fn is_test(&self) -> bool {
        self.is_test
    }

    /// The check state.
    pub fn check_state(&self) -> CheckState {
        self.check_state
    }

    /// The status: for test nodes, the status of the most relevant step run; for containers,
    /// the worst status among the children.
    pub fn status(&self) -> TestStatus {
        self.status
    }

    /// Step runs applied to this node since the last reset.
    pub fn step_runs(&self) -> &[StepRunSummary] {
        &self.step_runs
    }

    /// The parent node.
    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    /// Children in insertion order.
    pub fn children(&self) -> &[NodeId] {
        &self.children
    }
}

impl TestQuery for TestTreeNode {
    fn id(&self) -> &str {
        &self.name
    }

    fn name(&self) -> &str {
        &self.text
    }

    fn full_name(&self) -> &str {
        &self.full_name
    }

    fn kind(&self) -> &str {
        &self.kind
    }

    fn metadata_values(&self, key: &str) -> Vec<&str> {
        self.metadata
            .get_all(key)
            .iter()
            .map(String::as_str)
            .collect()
    }
}

/// The status shown for a container: failed beats inconclusive, which beats passed, which beats
/// skipped.
pub(super) fn combined_status(statuses: impl IntoIterator<Item = TestStatus>) -> TestStatus {
    let mut combined = TestStatus::Skipped;
    for status in statuses {
        match status {
            TestStatus::Failed => return TestStatus::Failed,
            TestStatus::Inconclusive => combined = TestStatus::Inconclusive,
            TestStatus::Passed if combined != TestStatus::Inconclusive => {
                combined = TestStatus::Passed;
            }
            TestStatus::Passed | TestStatus::Skipped => {}
        }
    }
    combined
}
