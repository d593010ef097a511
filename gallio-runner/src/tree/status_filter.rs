// Copyright (c) The gallio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::{Listeners, NodeId, TestTreeNode, TreeEvent, TreeListener, TreeModel, TreePath};
use gallio_metadata::TestStatus;
use std::{cell::RefCell, collections::BTreeSet, rc::Rc};

/// Hides the leaves of another tree model whose status is in a set.
///
/// Containers are never hidden, even when all their leaves are.
pub struct TestStatusFilteredTreeModel {
    inner: Rc<dyn TreeModel>,
    hidden: RefCell<BTreeSet<TestStatus>>,
    listeners: Listeners,
}

impl TestStatusFilteredTreeModel {
    /// Wraps `inner`, hiding nothing.
    pub fn new(inner: Rc<dyn TreeModel>) -> Self {
        Self::with_hidden(inner, [])
    }

    /// Wraps `inner`, hiding leaves with the given statuses.
    pub fn with_hidden(
        inner: Rc<dyn TreeModel>,
        hidden: impl IntoIterator<Item = TestStatus>,
    ) -> Self {
        let listeners = Listeners::default();
        inner.subscribe(listeners.forwarder());
        Self {
            inner,
            hidden: RefCell::new(hidden.into_iter().collect()),
            listeners,
        }
    }

    /// Returns true if leaves with `status` are hidden.
    pub fn is_hidden(&self, status: TestStatus) -> bool {
        self.hidden.borrow().contains(&status)
    }

    /// The hidden statuses.
    pub fn hidden(&self) -> BTreeSet<TestStatus> {
        self.hidden.borrow().clone()
    }

    /// Hides or shows leaves with `status`.
    pub fn set_hidden(&self, status: TestStatus, hidden: bool) {
        let changed = {
            let mut set = self.hidden.borrow_mut();
            if hidden {
                set.insert(status)
            } else {
                set.remove(&status)
            }
        };
        if changed {
            self.listeners
                .notify(&TreeEvent::StructureChanged(TreePath::empty()));
        }
    }

    /// Flips whether leaves with `status` are hidden. Returns true if they are now hidden.
    pub fn toggle(&self, status: TestStatus) -> bool {
        let hidden = !self.is_hidden(status);
        self.set_hidden(status, hidden);
        hidden
    }

    fn is_visible(&self, path: &TreePath, id: NodeId) -> bool {
        if !self.inner.is_leaf(&path.child(id)) {
            return true;
        }
        let hidden = self.hidden.borrow();
        self.inner
            .node(id)
            .is_none_or(|node| !hidden.contains(&node.status()))
    }
}

impl TreeModel for TestStatusFilteredTreeModel {
    fn children(&self, path: &TreePath) -> Vec<NodeId> {
        let children = self.inner.children(path);
        if self.hidden.borrow().is_empty() {
            return children;
        }
        children
            .into_iter()
            .filter(|&id| self.is_visible(path, id))
            .collect()
    }

    fn is_leaf(&self, path: &TreePath) -> bool {
        self.inner.is_leaf(path)
    }

    fn node(&self, id: NodeId) -> Option<TestTreeNode> {
        self.inner.node(id)
    }

    fn subscribe(&self, listener: TreeListener) {
        self.listeners.add(listener);
    }
}
