// Copyright (c) The gallio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::{
    CheckState, Listeners, NAMESPACE_KIND, NodeId, TestTreeNode, TreeEvent, TreeListener,
    TreeModel, TreePath, node::combined_status,
};
use crate::{
    model::{Test, TestIndex, TestModel, TestStep},
    runner::StepResult,
};
use gallio_filtering::FilterSet;
use gallio_metadata::TestStatus;
use smol_str::SmolStr;
use std::{cell::RefCell, convert::Infallible, str::FromStr};

/// The metadata key that places a test under a namespace node.
pub const NAMESPACE_METADATA_KEY: &str = "namespace";

/// How tests are arranged in a [`TestTreeModel`].
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub enum TreeGrouping {
    /// Follow the test model. Tests with `namespace` metadata are placed under a namespace node
    /// inside their parent.
    #[default]
    Namespace,

    /// Place each test case under a node for each value of a metadata key. Test cases without
    /// the key are placed directly under the root.
    Metadata(SmolStr),
}

impl FromStr for TreeGrouping {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "namespace" => Self::Namespace,
            key => Self::Metadata(key.into()),
        })
    }
}

/// Counts of test cases by status, for primary steps applied to a [`TestTreeModel`].
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct StatusCounts {
    /// Passed test cases.
    pub passed: usize,
    /// Failed test cases.
    pub failed: usize,
    /// Skipped test cases.
    pub skipped: usize,
    /// Inconclusive test cases.
    pub inconclusive: usize,
}

#[derive(Default)]
struct TreeState {
    nodes: Vec<TestTreeNode>,
    roots: Vec<NodeId>,
    counts: StatusCounts,
}

/// The base tree model, built from a [`TestModel`].
#[derive(Default)]
pub struct TestTreeModel {
    state: RefCell<TreeState>,
    listeners: Listeners,
}

impl TestTreeModel {
    /// Creates an empty tree.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a tree for `model`.
    pub fn from_model(model: &TestModel, grouping: &TreeGrouping) -> Self {
        let tree = Self::new();
        tree.build(model, grouping);
        tree
    }

    /// Replaces the contents of the tree with the tests in `model`.
    pub fn build(&self, model: &TestModel, grouping: &TreeGrouping) {
        {
            let mut state = self.state.borrow_mut();
            *state = TreeState::default();
            let root = state.add_test_node(None, &model[model.root()]);
            match grouping {
                TreeGrouping::Namespace => state.populate_namespace(model, model.root(), root),
                TreeGrouping::Metadata(key) => {
                    state.populate_metadata(model, key, model.root(), root)
                }
            }
        }
        self.listeners
            .notify(&TreeEvent::StructureChanged(TreePath::empty()));
    }

    /// The root node, if the tree has been built.
    pub fn root(&self) -> Option<NodeId> {
        self.state.borrow().roots.first().copied()
    }

    /// All nodes named `name`, in pre-order. Test nodes are named after the test id.
    pub fn find(&self, name: &str) -> Vec<NodeId> {
        self.state.borrow().find(name)
    }

    /// The path from the root to `id`.
    pub fn path(&self, id: NodeId) -> TreePath {
        self.state.borrow().path(id)
    }

    /// Records a finished step on every node for its test.
    ///
    /// A node takes the step's status if the step is primary or its status is more severe than
    /// the node's. Containers are updated to the combined status of their children. Primary steps
    /// of test cases are counted.
    pub fn apply_step_run(&self, step: &TestStep, result: &StepResult) {
        let changed = {
            let mut state = self.state.borrow_mut();
            let status = result.outcome.status();
            let ids = state.find(step.test_id().as_str());
            for &id in &ids {
                let node = &mut state.nodes[id.0];
                node.step_runs.push(result.to_summary(step));
                if status > node.status || step.is_primary() {
                    state.set_status(id, status);
                }
            }

            if step.is_primary() && step.is_test_case() {
                let counts = &mut state.counts;
                match status {
                    TestStatus::Passed => counts.passed += 1,
                    TestStatus::Failed => counts.failed += 1,
                    TestStatus::Skipped => counts.skipped += 1,
                    TestStatus::Inconclusive => counts.inconclusive += 1,
                }
            }
            ids.into_iter()
                .map(|id| state.parent_path(id))
                .collect::<Vec<_>>()
        };
        for path in changed {
            self.listeners.notify(&TreeEvent::NodesChanged(path));
        }
    }

    /// Clears step runs and counters, and sets every node back to skipped.
    pub fn reset_test_status(&self) {
        {
            let mut state = self.state.borrow_mut();
            state.counts = StatusCounts::default();
            for node in &mut state.nodes {
                node.status = TestStatus::Skipped;
                node.step_runs.clear();
            }
        }
        self.listeners
            .notify(&TreeEvent::NodesChanged(TreePath::empty()));
    }

    /// Counts of test cases by status since the last reset.
    pub fn counts(&self) -> StatusCounts {
        self.state.borrow().counts
    }

    /// The number of checked test nodes.
    pub fn test_count(&self) -> usize {
        self.state
            .borrow()
            .nodes
            .iter()
            .filter(|node| node.is_test && node.check_state == CheckState::Checked)
            .count()
    }

    /// Checks or unchecks a node along with all its descendants, then updates its ancestors.
    pub fn set_checked(&self, id: NodeId, checked: bool) {
        let state = if checked {
            CheckState::Checked
        } else {
            CheckState::Unchecked
        };
        let path = {
            let mut tree = self.state.borrow_mut();
            if id.0 >= tree.nodes.len() {
                return;
            }
            tree.set_check_state(id, state);
            tree.parent_path(id)
        };
        self.listeners.notify(&TreeEvent::NodesChanged(path));
    }

    /// Toggles the check state of a node: unchecked nodes become checked, others unchecked.
    pub fn toggle_check(&self, id: NodeId) {
        let Some(current) = self.node(id).map(|node| node.check_state) else {
            return;
        };
        self.set_checked(id, current.toggled() == CheckState::Checked);
    }

    /// Checks the nodes matched by `filter` and unchecks everything else.
    ///
    /// A matching container checks its whole subtree. An empty filter checks the whole tree.
    pub fn check_matching(&self, filter: &FilterSet) {
        {
            let mut state = self.state.borrow_mut();
            let Some(root) = state.roots.first().copied() else {
                return;
            };
            if filter.is_empty() {
                state.set_check_state(root, CheckState::Checked);
            } else {
                state.set_check_state(root, CheckState::Unchecked);
                let matching: Vec<_> = state
                    .pre_order(root)
                    .into_iter()
                    .filter(|id| filter.matches(&state.nodes[id.0]))
                    .collect();
                for id in matching {
                    state.set_check_state(id, CheckState::Checked);
                }
            }
        }
        self.listeners
            .notify(&TreeEvent::NodesChanged(TreePath::empty()));
    }
}

impl TreeModel for TestTreeModel {
    fn children(&self, path: &TreePath) -> Vec<NodeId> {
        let state = self.state.borrow();
        match path.last() {
            None => state.roots.clone(),
            Some(id) => state
                .nodes
                .get(id.0)
                .map(|node| node.children.clone())
                .unwrap_or_default(),
        }
    }

    fn is_leaf(&self, path: &TreePath) -> bool {
        let state = self.state.borrow();
        match path.last() {
            None => state.roots.is_empty(),
            Some(id) => state
                .nodes
                .get(id.0)
                .is_none_or(|node| node.children.is_empty()),
        }
    }

    fn node(&self, id: NodeId) -> Option<TestTreeNode> {
        self.state.borrow().nodes.get(id.0).cloned()
    }

    fn subscribe(&self, listener: TreeListener) {
        self.listeners.add(listener);
    }
}

impl TreeState {
    fn add_node(&mut self, parent: Option<NodeId>, mut node: TestTreeNode) -> NodeId {
        let id = NodeId(self.nodes.len());
        node.id = id;
        node.parent = parent;
        self.nodes.push(node);
        match parent {
            Some(parent) => self.nodes[parent.0].children.push(id),
            None => self.roots.push(id),
        }
        id
    }

    fn add_test_node(&mut self, parent: Option<NodeId>, test: &Test) -> NodeId {
        let mut node = TestTreeNode::new(NodeId(0), test.id().as_str(), test.name(), test.kind());
        node.full_name = test.full_name().to_owned();
        node.is_test = test.is_test_case();
        node.metadata = test.metadata().clone();
        self.add_node(parent, node)
    }

    /// Finds the child of `parent` named `name` with the given kind, or adds one.
    fn group_node(&mut self, parent: NodeId, name: &str, kind: &str) -> NodeId {
        let existing = self.nodes[parent.0]
            .children
            .iter()
            .copied()
            .find(|id| {
                let node = &self.nodes[id.0];
                node.name == name && node.kind == kind
            });
        existing.unwrap_or_else(|| {
            self.add_node(
                Some(parent),
                TestTreeNode::new(NodeId(0), name, name, kind),
            )
        })
    }

    fn populate_namespace(&mut self, model: &TestModel, test: TestIndex, parent: NodeId) {
        for &child in model[test].children() {
            let child_test = &model[child];
            let container = match child_test.metadata().get_value(NAMESPACE_METADATA_KEY) {
                Some(namespace) => self.group_node(parent, namespace, NAMESPACE_KIND),
                None => parent,
            };
            let node = self.add_test_node(Some(container), child_test);
            self.populate_namespace(model, child, node);
        }
    }

    fn populate_metadata(&mut self, model: &TestModel, key: &str, test: TestIndex, root: NodeId) {
        for &child in model[test].children() {
            let child_test = &model[child];
            if child_test.is_test_case() {
                let values = child_test.metadata().get_all(key);
                if values.is_empty() {
                    self.add_test_node(Some(root), child_test);
                }
                for value in values {
                    let group = self.group_node(root, value, key);
                    self.add_test_node(Some(group), child_test);
                }
            }
            self.populate_metadata(model, key, child, root);
        }
    }

    fn pre_order(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(next) = stack.pop() {
            out.push(next);
            stack.extend(self.nodes[next.0].children.iter().rev().copied());
        }
        out
    }

    fn find(&self, name: &str) -> Vec<NodeId> {
        self.roots
            .iter()
            .flat_map(|&root| self.pre_order(root))
            .filter(|id| self.nodes[id.0].name == name)
            .collect()
    }

    fn path(&self, id: NodeId) -> TreePath {
        let mut ids = vec![id];
        let mut current = id;
        while let Some(parent) = self.nodes[current.0].parent {
            ids.push(parent);
            current = parent;
        }
        ids.reverse();
        TreePath::new(ids)
    }

    fn parent_path(&self, id: NodeId) -> TreePath {
        match self.nodes[id.0].parent {
            Some(parent) => self.path(parent),
            None => TreePath::empty(),
        }
    }

    /// Sets a node's status and recomputes the status of its ancestors.
    fn set_status(&mut self, id: NodeId, status: TestStatus) {
        self.nodes[id.0].status = status;
        let mut current = id;
        while let Some(parent) = self.nodes[current.0].parent {
            let combined = combined_status(
                self.nodes[parent.0]
                    .children
                    .iter()
                    .map(|child| self.nodes[child.0].status),
            );
            self.nodes[parent.0].status = combined;
            current = parent;
        }
    }

    fn set_check_state(&mut self, id: NodeId, state: CheckState) {
        self.nodes[id.0].check_state = state;
        if state != CheckState::Indeterminate {
            for descendant in self.pre_order(id) {
                self.nodes[descendant.0].check_state = state;
            }
        }
        self.update_parent_check_states(id);
    }

    /// Walks up from `id`, making each ancestor agree with its children.
    ///
    /// Stops at the first ancestor whose state doesn't change: everything above it is already
    /// consistent.
    fn update_parent_check_states(&mut self, id: NodeId) {
        let mut current = id;
        let mut is_starting_point = true;
        while let Some(parent) = self.nodes[current.0].parent {
            let current_state = self.nodes[current.0].check_state;
            let state = if !is_starting_point && current_state == CheckState::Indeterminate {
                CheckState::Indeterminate
            } else {
                self.siblings_state(current)
            };
            if self.nodes[parent.0].check_state == state {
                return;
            }
            self.nodes[parent.0].check_state = state;
            current = parent;
            is_starting_point = false;
        }
    }

    /// The state of `id` if all its siblings share it, otherwise indeterminate.
    fn siblings_state(&self, id: NodeId) -> CheckState {
        let state = self.nodes[id.0].check_state;
        let Some(parent) = self.nodes[id.0].parent else {
            return state;
        };
        let agree = self.nodes[parent.0]
            .children
            .iter()
            .all(|sibling| self.nodes[sibling.0].check_state == state);
        if agree {
            state
        } else {
            CheckState::Indeterminate
        }
    }
}
