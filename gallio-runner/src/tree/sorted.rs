// Copyright (c) The gallio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::{Listeners, NodeId, TestTreeNode, TreeEvent, TreeListener, TreeModel, TreePath};
use serde::Deserialize;
use std::{cell::RefCell, cmp::Ordering, fmt, rc::Rc};

/// The order in which [`SortedTreeModel`] lists children.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, Hash, PartialEq)]
pub enum SortOrder {
    /// By text, case-insensitively.
    #[default]
    #[serde(rename = "asc")]
    Ascending,

    /// By text, case-insensitively, reversed.
    #[serde(rename = "desc")]
    Descending,

    /// In model order.
    #[serde(rename = "none")]
    None,
}

impl SortOrder {
    /// The name of the order as written in configuration.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ascending => "asc",
            Self::Descending => "desc",
            Self::None => "none",
        }
    }
}

impl fmt::Display for SortOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Compares two nodes.
pub type NodeComparator = Box<dyn Fn(&TestTreeNode, &TestTreeNode) -> Ordering>;

enum Sorting {
    Order(SortOrder),
    Custom(NodeComparator),
}

/// Orders the children of another tree model.
///
/// Sorting is stable: nodes that compare equal keep the order of the inner model.
pub struct SortedTreeModel {
    inner: Rc<dyn TreeModel>,
    sorting: RefCell<Sorting>,
    listeners: Listeners,
}

impl SortedTreeModel {
    /// Sorts `inner` by node text.
    pub fn new(inner: Rc<dyn TreeModel>, order: SortOrder) -> Self {
        Self::with_sorting(inner, Sorting::Order(order))
    }

    /// Sorts `inner` with a custom comparator.
    pub fn with_comparator(
        inner: Rc<dyn TreeModel>,
        comparator: impl Fn(&TestTreeNode, &TestTreeNode) -> Ordering + 'static,
    ) -> Self {
        Self::with_sorting(inner, Sorting::Custom(Box::new(comparator)))
    }

    fn with_sorting(inner: Rc<dyn TreeModel>, sorting: Sorting) -> Self {
        let listeners = Listeners::default();
        inner.subscribe(listeners.forwarder());
        Self {
            inner,
            sorting: RefCell::new(sorting),
            listeners,
        }
    }

    /// Changes the sort order, replacing any custom comparator.
    pub fn set_sort_order(&self, order: SortOrder) {
        *self.sorting.borrow_mut() = Sorting::Order(order);
        self.listeners
            .notify(&TreeEvent::StructureChanged(TreePath::empty()));
    }

    /// The sort order, or `None` if a custom comparator is in use.
    pub fn sort_order(&self) -> Option<SortOrder> {
        match &*self.sorting.borrow() {
            Sorting::Order(order) => Some(*order),
            Sorting::Custom(_) => None,
        }
    }
}

impl TreeModel for SortedTreeModel {
    fn children(&self, path: &TreePath) -> Vec<NodeId> {
        let children = self.inner.children(path);
        let sorting = self.sorting.borrow();
        match &*sorting {
            Sorting::Order(SortOrder::None) => children,
            Sorting::Order(order) => {
                let mut keyed: Vec<_> = children
                    .into_iter()
                    .filter_map(|id| Some((self.inner.node(id)?.text().to_lowercase(), id)))
                    .collect();
                if *order == SortOrder::Descending {
                    keyed.sort_by(|a, b| b.0.cmp(&a.0));
                } else {
                    keyed.sort_by(|a, b| a.0.cmp(&b.0));
                }
                keyed.into_iter().map(|(_, id)| id).collect()
            }
            Sorting::Custom(comparator) => {
                let mut nodes: Vec<_> = children
                    .into_iter()
                    .filter_map(|id| self.inner.node(id))
                    .collect();
                nodes.sort_by(|a, b| comparator(a, b));
                nodes.into_iter().map(|node| node.id()).collect()
            }
        }
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
