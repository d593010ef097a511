// Copyright (c) The gallio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Tree views over a test model.
//!
//! [`TestTreeModel`] is the base model: one node per test (plus grouping nodes), with check
//! states, statuses and the step runs applied to it. Decorators wrap any [`TreeModel`] and change
//! what its children look like:
//!
//! * [`TestStatusFilteredTreeModel`] hides leaves whose status is in a set.
//! * [`SortedTreeModel`] orders children.
//! * [`FilteredTreeModel`] keeps nodes matching a predicate, along with their ancestors and
//!   descendants.
//!
//! Decorators compute children on demand and forward change notifications from the model they
//! wrap. Tree models are single-threaded and share state through `Rc`.

mod filtered;
mod node;
mod sorted;
mod status_filter;
mod test_tree;

pub use filtered::*;
pub use node::*;
pub use sorted::*;
pub use status_filter::*;
pub use test_tree::*;

use std::{cell::RefCell, fmt, rc::Rc};

/// The path from a root node down to a node. The empty path stands for the invisible parent of
/// the roots.
#[derive(Clone, Debug, Default, Eq, Hash, PartialEq)]
pub struct TreePath {
    ids: Vec<NodeId>,
}

impl TreePath {
    /// The empty path.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Creates a path from node ids, outermost first.
    pub fn new(ids: Vec<NodeId>) -> Self {
        Self { ids }
    }

    /// Returns true if this is the empty path.
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// The node this path leads to.
    pub fn last(&self) -> Option<NodeId> {
        self.ids.last().copied()
    }

    /// The node ids along this path, outermost first.
    pub fn ids(&self) -> &[NodeId] {
        &self.ids
    }

    /// The path to a child of the node this path leads to.
    pub fn child(&self, id: NodeId) -> Self {
        let mut ids = self.ids.clone();
        ids.push(id);
        Self { ids }
    }

    /// The number of nodes along this path.
    pub fn depth(&self) -> usize {
        self.ids.len()
    }
}

impl fmt::Display for TreePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, id) in self.ids.iter().enumerate() {
            if i > 0 {
                f.write_str("/")?;
            }
            write!(f, "{id}")?;
        }
        Ok(())
    }
}

/// A change to a tree model. The path is the parent of the nodes that changed.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum TreeEvent {
    /// Node contents (status, check state, step runs) changed.
    NodesChanged(TreePath),

    /// Nodes were inserted.
    NodesInserted(TreePath),

    /// Nodes were removed.
    NodesRemoved(TreePath),

    /// Anything under the path may have changed.
    StructureChanged(TreePath),
}

/// A callback invoked when a tree model changes.
pub type TreeListener = Rc<dyn Fn(&TreeEvent)>;

/// A tree of [`TestTreeNode`]s.
pub trait TreeModel {
    /// The ids of the children of the node at `path`, in display order. For the empty path,
    /// these are the roots.
    fn children(&self, path: &TreePath) -> Vec<NodeId>;

    /// Returns true if the node at `path` has no children.
    fn is_leaf(&self, path: &TreePath) -> bool;

    /// A snapshot of a node.
    fn node(&self, id: NodeId) -> Option<TestTreeNode>;

    /// Registers a listener for changes to this model.
    fn subscribe(&self, listener: TreeListener);

    /// The root nodes.
    fn roots(&self) -> Vec<NodeId> {
        self.children(&TreePath::empty())
    }

    /// Visits every visible node depth-first, parents before children.
    fn visit(&self, visitor: &mut dyn FnMut(&TreePath, &TestTreeNode)) {
        let mut stack: Vec<TreePath> = self
            .roots()
            .into_iter()
            .rev()
            .map(|id| TreePath::empty().child(id))
            .collect();
        while let Some(path) = stack.pop() {
            let Some(node) = path.last().and_then(|id| self.node(id)) else {
                continue;
            };
            visitor(&path, &node);
            stack.extend(
                self.children(&path)
                    .into_iter()
                    .rev()
                    .map(|id| path.child(id)),
            );
        }
    }
}

/// A list of listeners shared between a model and the closures that forward events to it.
#[derive(Clone, Default)]
pub(crate) struct Listeners {
    inner: Rc<RefCell<Vec<TreeListener>>>,
}

impl Listeners {
    pub(crate) fn add(&self, listener: TreeListener) {
        self.inner.borrow_mut().push(listener);
    }

    pub(crate) fn notify(&self, event: &TreeEvent) {
        // Listeners may subscribe further listeners.
        let listeners = self.inner.borrow().clone();
        for listener in listeners {
            listener(event);
        }
    }

    /// Returns a listener that re-raises events on `self`.
    pub(crate) fn forwarder(&self) -> TreeListener {
        let this = self.clone();
        Rc::new(move |event: &TreeEvent| this.notify(event))
    }
}
