// Copyright (c) The gallio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::{Listeners, NodeId, TestTreeNode, TreeEvent, TreeListener, TreeModel, TreePath};
use gallio_filtering::FilterSet;
use std::{cell::RefCell, rc::Rc};

/// Decides whether a node matches.
pub type NodePredicate = Box<dyn Fn(&TestTreeNode) -> bool>;

/// Shows the nodes of another tree model that match a predicate.
///
/// A node is shown if it matches, if one of its ancestors matches, or if one of its descendants
/// matches.
pub struct FilteredTreeModel {
    inner: Rc<dyn TreeModel>,
    predicate: RefCell<NodePredicate>,
    listeners: Listeners,
}

impl FilteredTreeModel {
    /// Filters `inner` with `predicate`.
    pub fn new(
        inner: Rc<dyn TreeModel>,
        predicate: impl Fn(&TestTreeNode) -> bool + 'static,
    ) -> Self {
        let listeners = Listeners::default();
        inner.subscribe(listeners.forwarder());
        Self {
            inner,
            predicate: RefCell::new(Box::new(predicate)),
            listeners,
        }
    }

    /// Filters `inner` with a filter expression.
    pub fn from_filter_set(inner: Rc<dyn TreeModel>, filter: FilterSet) -> Self {
        Self::new(inner, move |node| filter.matches(node))
    }

    /// Replaces the predicate.
    pub fn set_predicate(&self, predicate: impl Fn(&TestTreeNode) -> bool + 'static) {
        *self.predicate.borrow_mut() = Box::new(predicate);
        self.listeners
            .notify(&TreeEvent::StructureChanged(TreePath::empty()));
    }

    fn matches(&self, id: NodeId) -> bool {
        let predicate = self.predicate.borrow();
        self.inner.node(id).is_some_and(|node| predicate(&node))
    }

    fn has_match_within(&self, path: &TreePath) -> bool {
        let Some(id) = path.last() else {
            return false;
        };
        self.matches(id)
            || self
                .inner
                .children(path)
                .into_iter()
                .any(|child| self.has_match_within(&path.child(child)))
    }
}

impl TreeModel for FilteredTreeModel {
    fn children(&self, path: &TreePath) -> Vec<NodeId> {
        let children = self.inner.children(path);
        if path.ids().iter().any(|&id| self.matches(id)) {
            return children;
        }
        children
            .into_iter()
            .filter(|&child| self.has_match_within(&path.child(child)))
            .collect()
    }

    fn is_leaf(&self, path: &TreePath) -> bool {
        self.children(path).is_empty()
    }

    fn node(&self, id: NodeId) -> Option<TestTreeNode> {
        self.inner.node(id)
    }

    fn subscribe(&self, listener: TreeListener) {
        self.listeners.add(listener);
    }
}
