// Copyright (c) The gallio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Selecting and ordering the tests to run.
//!
//! A plan is built in two passes over the test model:
//!
//! 1. **Selection.** A test matched by an inclusion rule schedules its whole subtree, minus any
//!    descendants matched by an exclusion rule. A container that isn't matched itself is kept only
//!    if some descendant is selected.
//! 2. **Ordering.** Within each container, children run in ascending `order`, then in model order,
//!    except that a child runs after every sibling containing a test it depends on. Dependencies
//!    on tests outside the plan are ignored.

use super::{TestIndex, TestModel};
use crate::errors::TestPlanError;
use gallio_filtering::{FilterSet, FilterSetResult};
use petgraph::{algo::tarjan_scc, graph::DiGraph};
use std::{
    cmp::Reverse,
    collections::{BinaryHeap, HashMap, HashSet},
};
use tracing::debug;

/// A test scheduled to run, along with its scheduled children.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PlanNode {
    /// The test.
    pub test: TestIndex,

    /// True if the test was selected by an inclusion rule rather than by being inside or above
    /// a selected test.
    pub explicit: bool,

    /// Children in execution order.
    pub children: Vec<PlanNode>,
}

impl PlanNode {
    /// Iterates over this node and its descendants in execution order.
    pub fn iter(&self) -> impl Iterator<Item = &PlanNode> + '_ {
        let mut stack = vec![self];
        std::iter::from_fn(move || {
            let next = stack.pop()?;
            stack.extend(next.children.iter().rev());
            Some(next)
        })
    }
}

/// The tests to run, in the order to run them.
#[derive(Clone, Debug, Default)]
pub struct TestPlan {
    root: Option<PlanNode>,
    scheduled: HashSet<TestIndex>,
    test_case_count: usize,
}

impl TestPlan {
    /// Builds a plan for the tests in `model` selected by `filter`.
    pub fn build(model: &TestModel, filter: &FilterSet) -> Result<Self, TestPlanError> {
        let mut root = select(model, filter, model.root(), false);
        if let Some(root) = &mut root {
            check_ancestor_dependencies(model, root)?;
            order(model, root)?;
        }

        let scheduled: HashSet<_> = root
            .iter()
            .flat_map(|root| root.iter())
            .map(|node| node.test)
            .collect();
        let test_case_count = scheduled
            .iter()
            .filter(|&&index| model[index].is_test_case())
            .count();
        debug!(
            scheduled = scheduled.len(),
            test_case_count, "built test plan for filter `{filter}`"
        );

        Ok(Self {
            root,
            scheduled,
            test_case_count,
        })
    }

    /// The root of the plan, or `None` if nothing was selected.
    pub fn root(&self) -> Option<&PlanNode> {
        self.root.as_ref()
    }

    /// Iterates over scheduled tests in execution order.
    pub fn iter(&self) -> impl Iterator<Item = &PlanNode> + '_ {
        self.root.iter().flat_map(|root| root.iter())
    }

    /// Returns true if `test` is scheduled.
    pub fn contains(&self, test: TestIndex) -> bool {
        self.scheduled.contains(&test)
    }

    /// The number of scheduled test cases.
    pub fn test_case_count(&self) -> usize {
        self.test_case_count
    }
}

fn select(
    model: &TestModel,
    filter: &FilterSet,
    index: TestIndex,
    inherited: bool,
) -> Option<PlanNode> {
    let result = filter.evaluate(&model[index]);
    let included = match result {
        FilterSetResult::Exclude => return None,
        FilterSetResult::Include => true,
        FilterSetResult::Unmatched => inherited || !filter.has_inclusion_rules(),
    };

    let children: Vec<_> = model[index]
        .children()
        .iter()
        .filter_map(|&child| select(model, filter, child, included))
        .collect();

    (included || !children.is_empty()).then(|| PlanNode {
        test: index,
        explicit: result == FilterSetResult::Include,
        children,
    })
}

fn check_ancestor_dependencies(model: &TestModel, root: &PlanNode) -> Result<(), TestPlanError> {
    for node in root.iter() {
        let test = &model[node.test];
        for &dep in test.dependencies() {
            if model.ancestors(node.test).any(|ancestor| ancestor == dep) {
                return Err(TestPlanError::DependsOnAncestor {
                    test: test.full_name().to_owned(),
                    dependency: model[dep].full_name().to_owned(),
                });
            }
        }
    }
    Ok(())
}

fn order(model: &TestModel, node: &mut PlanNode) -> Result<(), TestPlanError> {
    for child in &mut node.children {
        order(model, child)?;
    }
    if node.children.len() < 2 {
        return Ok(());
    }

    // Map every scheduled test below this node to the child subtree containing it.
    let mut owner = HashMap::new();
    for (position, child) in node.children.iter().enumerate() {
        for descendant in child.iter() {
            owner.insert(descendant.test, position);
        }
    }

    let mut graph = DiGraph::<usize, ()>::new();
    let graph_nodes: Vec<_> = (0..node.children.len())
        .map(|position| graph.add_node(position))
        .collect();
    for (position, child) in node.children.iter().enumerate() {
        for descendant in child.iter() {
            for dep in model[descendant.test].dependencies() {
                if let Some(&dep_position) = owner.get(dep)
                    && dep_position != position
                {
                    graph.update_edge(graph_nodes[dep_position], graph_nodes[position], ());
                }
            }
        }
    }

    if let Some(cycle) = tarjan_scc(&graph)
        .into_iter()
        .find(|component| component.len() > 1)
    {
        let mut tests: Vec<_> = cycle
            .into_iter()
            .map(|graph_node| {
                let position = graph[graph_node];
                model[node.children[position].test].full_name().to_owned()
            })
            .collect();
        tests.sort_unstable();
        return Err(TestPlanError::DependencyCycle { tests });
    }

    // Kahn's algorithm, breaking ties by (order, model position).
    let mut in_degree: Vec<usize> = graph_nodes
        .iter()
        .map(|&n| graph.neighbors_directed(n, petgraph::Direction::Incoming).count())
        .collect();
    let key = |position: usize| Reverse((model[node.children[position].test].order(), position));
    let mut ready: BinaryHeap<_> = (0..node.children.len())
        .filter(|&position| in_degree[position] == 0)
        .map(key)
        .collect();
    let mut sorted = Vec::with_capacity(node.children.len());
    while let Some(Reverse((_, position))) = ready.pop() {
        sorted.push(position);
        for next in graph.neighbors_directed(graph_nodes[position], petgraph::Direction::Outgoing) {
            let next = graph[next];
            in_degree[next] -= 1;
            if in_degree[next] == 0 {
                ready.push(key(next));
            }
        }
    }

    let mut children: Vec<_> = std::mem::take(&mut node.children)
        .into_iter()
        .map(Some)
        .collect();
    node.children = sorted
        .into_iter()
        .filter_map(|position| children[position].take())
        .collect();
    Ok(())
}
