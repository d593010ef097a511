// Copyright (c) The gallio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::{Annotation, MetadataMap, TestBody};
use crate::errors::TestModelError;
use gallio_filtering::TestQuery;
use gallio_metadata::TestSummary;
use smol_str::SmolStr;
use std::{
    collections::HashSet,
    fmt,
    ops::{Index, IndexMut},
    time::Duration,
};
use swrite::{SWrite, swrite};
use xxhash_rust::xxh3::xxh3_64;

/// The position of a test inside a [`TestModel`].
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct TestIndex(usize);

/// The stable identifier of a test.
///
/// Unless set explicitly, an id is a hash of the local ids of a test and all of its ancestors,
/// so it stays the same across rebuilds of the same tree.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct TestId(SmolStr);

impl TestId {
    /// Creates a test id from an explicit string.
    pub fn new(id: impl Into<SmolStr>) -> Self {
        Self(id.into())
    }

    /// Hashes a chain of local ids, starting with the test itself and ending at the root.
    fn from_local_ids<'a>(local_ids: impl IntoIterator<Item = &'a str>) -> Self {
        let mut bytes = Vec::new();
        for local_id in local_ids {
            bytes.extend_from_slice(local_id.as_bytes());
            bytes.push(0);
        }
        Self(smol_str::format_smolstr!("{:016x}", xxh3_64(&bytes)))
    }

    /// Returns the id as a string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A parameter of a data-driven test.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TestParameter {
    /// The name of the parameter.
    pub name: String,

    /// The index of the parameter within its test.
    pub index: usize,

    /// Metadata attached to the parameter.
    pub metadata: MetadataMap,
}

/// A test case or a container of tests.
///
/// Tests are created detached with [`Test::new`] and then added to a [`TestModel`], which owns
/// the tree structure.
#[derive(Clone, Debug)]
pub struct Test {
    name: String,
    local_id_hint: Option<String>,
    kind: SmolStr,
    is_test_case: bool,
    order: i32,
    explicit_id: Option<TestId>,
    metadata: MetadataMap,
    parameters: Vec<TestParameter>,
    timeout: Option<Duration>,
    body: Option<TestBody>,

    parent: Option<TestIndex>,
    children: Vec<TestIndex>,
    dependencies: Vec<TestIndex>,
    assigned_child_local_ids: HashSet<String>,

    // Derived from the position in the tree, recomputed whenever the parent changes.
    local_id: String,
    full_name: String,
    id: TestId,
}

impl Test {
    /// Creates a new detached test.
    pub fn new(name: impl Into<String>, kind: impl Into<SmolStr>) -> Self {
        let name = name.into();
        let id = TestId::from_local_ids([name.as_str()]);
        Self {
            local_id: name.clone(),
            full_name: name.clone(),
            name,
            local_id_hint: None,
            kind: kind.into(),
            is_test_case: false,
            order: 0,
            explicit_id: None,
            metadata: MetadataMap::new(),
            parameters: Vec::new(),
            timeout: None,
            body: None,
            parent: None,
            children: Vec::new(),
            dependencies: Vec::new(),
            assigned_child_local_ids: HashSet::new(),
            id,
        }
    }

    /// Creates a test case with a body.
    pub fn test_case(name: impl Into<String>, body: TestBody) -> Self {
        Self::new(name, kinds::TEST)
            .with_test_case(true)
            .with_body(body)
    }

    /// Sets the hint used to derive the local id, which otherwise defaults to the name.
    pub fn with_local_id_hint(mut self, hint: impl Into<String>) -> Self {
        self.local_id_hint = Some(hint.into());
        self.local_id = self.local_id_base().to_owned();
        if self.explicit_id.is_none() {
            self.id = TestId::from_local_ids([self.local_id.as_str()]);
        }
        self
    }

    /// Marks this test as a test case.
    pub fn with_test_case(mut self, is_test_case: bool) -> Self {
        self.is_test_case = is_test_case;
        self
    }

    /// Sets the body.
    pub fn with_body(mut self, body: TestBody) -> Self {
        self.body = Some(body);
        self
    }

    /// Adds a metadata value.
    pub fn with_metadata(mut self, key: impl Into<SmolStr>, value: impl Into<String>) -> Self {
        self.metadata.add(key, value);
        self
    }

    /// Sets the relative order of this test among its siblings.
    pub fn with_order(mut self, order: i32) -> Self {
        self.order = order;
        self
    }

    /// Overrides the id with an explicit value.
    pub fn with_explicit_id(mut self, id: TestId) -> Self {
        self.id = id.clone();
        self.explicit_id = Some(id);
        self
    }

    /// Sets a timeout for this test, overriding the configured one.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// The name of the test.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The kind of the test, for example `group` or `test`.
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// The stable id of the test.
    pub fn id(&self) -> &TestId {
        &self.id
    }

    /// The id of the test, unique among its siblings.
    pub fn local_id(&self) -> &str {
        &self.local_id
    }

    /// The slash-separated name of the test, excluding the root.
    pub fn full_name(&self) -> &str {
        &self.full_name
    }

    /// True if this is a test case rather than a container.
    pub fn is_test_case(&self) -> bool {
        self.is_test_case
    }

    /// Sets whether this is a test case.
    pub fn set_test_case(&mut self, is_test_case: bool) {
        self.is_test_case = is_test_case;
    }

    /// The relative order of this test among its siblings.
    pub fn order(&self) -> i32 {
        self.order
    }

    /// Sets the relative order of this test among its siblings.
    pub fn set_order(&mut self, order: i32) {
        self.order = order;
    }

    /// The metadata of this test.
    pub fn metadata(&self) -> &MetadataMap {
        &self.metadata
    }

    /// Mutable access to the metadata.
    pub fn metadata_mut(&mut self) -> &mut MetadataMap {
        &mut self.metadata
    }

    /// The parameters of this test.
    pub fn parameters(&self) -> &[TestParameter] {
        &self.parameters
    }

    /// Adds a parameter, returning its index.
    pub fn add_parameter(&mut self, name: impl Into<String>, metadata: MetadataMap) -> usize {
        let index = self.parameters.len();
        self.parameters.push(TestParameter {
            name: name.into(),
            index,
            metadata,
        });
        index
    }

    /// The timeout override for this test.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// The body of this test.
    pub fn body(&self) -> Option<&TestBody> {
        self.body.as_ref()
    }

    /// The parent of this test.
    pub fn parent(&self) -> Option<TestIndex> {
        self.parent
    }

    /// The children of this test, in the order they were added.
    pub fn children(&self) -> &[TestIndex] {
        &self.children
    }

    /// The tests this test depends on.
    pub fn dependencies(&self) -> &[TestIndex] {
        &self.dependencies
    }

    fn local_id_base(&self) -> &str {
        self.local_id_hint.as_deref().unwrap_or(&self.name)
    }

    /// Returns a local id for a child based on `hint`, unique among the ids this test has handed
    /// out so far.
    fn unique_local_id_for_child(&mut self, hint: &str) -> String {
        let mut candidate = hint.to_owned();
        let mut suffix = 2;
        while self.assigned_child_local_ids.contains(&candidate) {
            candidate.clear();
            swrite!(candidate, "{hint}{suffix}");
            suffix += 1;
        }
        self.assigned_child_local_ids.insert(candidate.clone());
        candidate
    }
}

impl TestQuery for Test {
    fn id(&self) -> &str {
        self.id.as_str()
    }

    fn name(&self) -> &str {
        &self.name
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

/// Well-known test kinds.
pub mod kinds {
    /// The root of a test model.
    pub const ROOT: &str = "root";
    /// A group of tests, for example one loaded from a project file.
    pub const GROUP: &str = "group";
    /// A test fixture.
    pub const FIXTURE: &str = "fixture";
    /// A test case.
    pub const TEST: &str = "test";
}

/// A tree of tests along with annotations produced while building it.
#[derive(Clone, Debug)]
pub struct TestModel {
    tests: Vec<Test>,
    root: TestIndex,
    annotations: Vec<Annotation>,
}

impl Default for TestModel {
    fn default() -> Self {
        Self::new()
    }
}

impl TestModel {
    /// The name of the root test.
    pub const ROOT_NAME: &'static str = "Root";

    /// Creates a model containing just the root test.
    pub fn new() -> Self {
        let mut root = Test::new(Self::ROOT_NAME, kinds::ROOT);
        root.full_name = String::new();
        Self {
            tests: vec![root],
            root: TestIndex(0),
            annotations: Vec::new(),
        }
    }

    /// The root test.
    pub fn root(&self) -> TestIndex {
        self.root
    }

    /// Returns the test at `index`.
    pub fn get(&self, index: TestIndex) -> Option<&Test> {
        self.tests.get(index.0)
    }

    /// Adds a detached test to the model.
    pub fn insert(&mut self, test: Test) -> TestIndex {
        let index = TestIndex(self.tests.len());
        self.tests.push(test);
        index
    }

    /// Adds a test to the model as the last child of `parent`.
    pub fn add_test(&mut self, parent: TestIndex, test: Test) -> Result<TestIndex, TestModelError> {
        let index = self.insert(test);
        if let Err(error) = self.add_child(parent, index) {
            self.tests.pop();
            return Err(error);
        }
        Ok(index)
    }

    /// Makes `child` the last child of `parent`.
    ///
    /// Fails if `child` already has a parent, or if `child` is `parent` or one of its ancestors.
    pub fn add_child(&mut self, parent: TestIndex, child: TestIndex) -> Result<(), TestModelError> {
        if self[child].parent.is_some() {
            return Err(TestModelError::AlreadyHasParent {
                child: self[child].full_name.clone(),
            });
        }
        if self.ancestors(parent).any(|ancestor| ancestor == child) {
            return Err(TestModelError::WouldCreateCycle {
                parent: self[parent].full_name.clone(),
                child: self[child].full_name.clone(),
            });
        }

        let hint = self[child].local_id_base().to_owned();
        let local_id = self[parent].unique_local_id_for_child(&hint);
        let child_test = &mut self[child];
        child_test.local_id = local_id;
        child_test.parent = Some(parent);
        self[parent].children.push(child);
        self.refresh_identity(child);
        Ok(())
    }

    /// Detaches `child` from `parent`.
    ///
    /// The local id `child` had is not handed out again by `parent`.
    pub fn remove_child(
        &mut self,
        parent: TestIndex,
        child: TestIndex,
    ) -> Result<(), TestModelError> {
        if self[child].parent != Some(parent) {
            return Err(TestModelError::NotAChild {
                parent: self[parent].full_name.clone(),
                child: self[child].full_name.clone(),
            });
        }

        self[parent].children.retain(|&c| c != child);
        let child_test = &mut self[child];
        child_test.parent = None;
        child_test.local_id = child_test.local_id_base().to_owned();
        self.refresh_identity(child);
        Ok(())
    }

    /// Records that `test` depends on `dependency`. Adding an existing dependency does nothing.
    pub fn add_dependency(&mut self, test: TestIndex, dependency: TestIndex) {
        let deps = &mut self[test].dependencies;
        if !deps.contains(&dependency) {
            deps.push(dependency);
        }
    }

    /// Recomputes the full names and ids of `index` and its descendants.
    fn refresh_identity(&mut self, index: TestIndex) {
        let mut stack = vec![index];
        while let Some(current) = stack.pop() {
            let full_name = self.compute_full_name(current);
            let id = self.compute_id(current);
            let test = &mut self[current];
            test.full_name = full_name;
            if test.explicit_id.is_none() {
                test.id = id;
            }
            stack.extend(test.children.iter().copied());
        }
    }

    fn compute_full_name(&self, index: TestIndex) -> String {
        let test = &self[index];
        match test.parent {
            None if index == self.root => String::new(),
            None => test.name.clone(),
            Some(parent) if parent == self.root => test.name.clone(),
            Some(parent) => format!("{}/{}", self[parent].full_name, test.name),
        }
    }

    fn compute_id(&self, index: TestIndex) -> TestId {
        TestId::from_local_ids(
            self.ancestors(index)
                .map(|ancestor| self[ancestor].local_id.as_str()),
        )
    }

    /// Iterates over the ancestors of `index`, starting with `index` itself.
    pub fn ancestors(&self, index: TestIndex) -> impl Iterator<Item = TestIndex> + '_ {
        std::iter::successors(Some(index), move |&current| self[current].parent)
    }

    /// Returns `index` and all its descendants in pre-order.
    pub fn pre_order(&self, index: TestIndex) -> Vec<TestIndex> {
        let mut out = Vec::new();
        let mut stack = vec![index];
        while let Some(current) = stack.pop() {
            out.push(current);
            stack.extend(self[current].children.iter().rev().copied());
        }
        out
    }

    /// Finds the attached test with the given id.
    pub fn find_by_id(&self, id: &TestId) -> Option<TestIndex> {
        self.pre_order(self.root)
            .into_iter()
            .find(|&index| &self[index].id == id)
    }

    /// Finds the attached test with the given full name.
    pub fn find_by_full_name(&self, full_name: &str) -> Option<TestIndex> {
        self.pre_order(self.root)
            .into_iter()
            .find(|&index| index != self.root && self[index].full_name == full_name)
    }

    /// Returns the number of test cases attached to the tree.
    pub fn test_case_count(&self) -> usize {
        self.pre_order(self.root)
            .into_iter()
            .filter(|&index| self[index].is_test_case)
            .count()
    }

    /// Annotations produced while building the model.
    pub fn annotations(&self) -> &[Annotation] {
        &self.annotations
    }

    /// Adds an annotation.
    pub fn add_annotation(&mut self, annotation: Annotation) {
        self.annotations.push(annotation);
    }

    /// Converts the subtree at `index` to its machine-readable summary.
    pub fn to_summary(&self, index: TestIndex) -> TestSummary {
        let test = &self[index];
        let mut summary = TestSummary::new(
            test.id.as_str(),
            &test.name,
            &test.full_name,
            test.kind.clone(),
            test.is_test_case,
        );
        summary.dependencies = test
            .dependencies
            .iter()
            .map(|&dep| self[dep].full_name.clone())
            .collect();
        summary.metadata = test.metadata.to_summary();
        summary.children = test
            .children
            .iter()
            .map(|&child| self.to_summary(child))
            .collect();
        summary
    }
}

impl Index<TestIndex> for TestModel {
    type Output = Test;

    fn index(&self, index: TestIndex) -> &Test {
        &self.tests[index.0]
    }
}

impl IndexMut<TestIndex> for TestModel {
    fn index_mut(&mut self, index: TestIndex) -> &mut Test {
        &mut self.tests[index.0]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;
    use test_strategy::proptest;

    fn group(name: &str) -> Test {
        Test::new(name, kinds::GROUP)
    }

    fn build(names: &[(&str, Vec<&str>)]) -> TestModel {
        let mut model = TestModel::new();
        for (group_name, children) in names {
            let g = model.add_test(model.root(), group(group_name)).unwrap();
            for child in children {
                model
                    .add_test(g, Test::new(*child, kinds::TEST).with_test_case(true))
                    .unwrap();
            }
        }
        model
    }

    #[test]
    fn full_names() {
        let model = build(&[("Arithmetic", vec!["Add", "Divide"])]);
        let names: Vec<_> = model
            .pre_order(model.root())
            .into_iter()
            .map(|index| model[index].full_name().to_owned())
            .collect();
        assert_eq!(names, ["", "Arithmetic", "Arithmetic/Add", "Arithmetic/Divide"]);
        assert_eq!(model.test_case_count(), 2);
    }

    #[test]
    fn local_ids_are_unique_among_siblings() {
        let model = build(&[("G", vec!["Same", "Same", "Same", "Other"])]);
        let g = model.find_by_full_name("G").unwrap();
        let local_ids: Vec<_> = model[g]
            .children()
            .iter()
            .map(|&c| model[c].local_id().to_owned())
            .collect();
        assert_eq!(local_ids, ["Same", "Same2", "Same3", "Other"]);

        let ids: HashSet<_> = model[g].children().iter().map(|&c| model[c].id()).collect();
        assert_eq!(ids.len(), 4, "ids are distinct");
    }

    #[test]
    fn local_id_hint_overrides_name() {
        let mut model = TestModel::new();
        let index = model
            .add_test(model.root(), group("Pretty Name").with_local_id_hint("hint"))
            .unwrap();
        assert_eq!(model[index].local_id(), "hint");
        assert_eq!(model[index].full_name(), "Pretty Name");
    }

    #[test]
    fn explicit_id_is_kept() {
        let mut model = TestModel::new();
        let index = model
            .add_test(
                model.root(),
                group("A").with_explicit_id(TestId::new("custom")),
            )
            .unwrap();
        assert_eq!(model[index].id().as_str(), "custom");
        assert_eq!(model.find_by_id(&TestId::new("custom")), Some(index));
    }

    #[test]
    fn add_test_failure_leaves_model_unchanged() {
        let mut model = build(&[("A", vec!["x"]), ("B", vec![])]);
        let b = model.find_by_full_name("B").unwrap();
        let x = model.find_by_full_name("A/x").unwrap();
        let test_count = model.tests.len();

        let attached = model[x].clone();
        assert_eq!(
            model.add_test(b, attached),
            Err(TestModelError::AlreadyHasParent {
                child: "A/x".to_owned()
            })
        );
        assert_eq!(model.tests.len(), test_count);
        assert!(model[b].children.is_empty());

        let y = model.add_test(b, Test::new("y", kinds::TEST)).unwrap();
        assert_eq!(y, TestIndex(test_count));
        assert_eq!(model[y].full_name, "B/y");
    }

    #[test]
    fn add_child_errors() {
        let mut model = build(&[("A", vec!["x"]), ("B", vec![])]);
        let a = model.find_by_full_name("A").unwrap();
        let b = model.find_by_full_name("B").unwrap();
        let x = model.find_by_full_name("A/x").unwrap();

        assert_eq!(
            model.add_child(b, x),
            Err(TestModelError::AlreadyHasParent {
                child: "A/x".to_owned()
            })
        );
        assert_eq!(
            model.remove_child(b, x),
            Err(TestModelError::NotAChild {
                parent: "B".to_owned(),
                child: "A/x".to_owned()
            })
        );

        model.remove_child(model.root(), a).unwrap();
        assert_eq!(
            model.add_child(x, a),
            Err(TestModelError::WouldCreateCycle {
                parent: "A/x".to_owned(),
                child: "A".to_owned()
            })
        );
    }

    #[test]
    fn reparenting_changes_ids_of_subtree() {
        let mut model = build(&[("A", vec!["x"]), ("B", vec![])]);
        let a = model.find_by_full_name("A").unwrap();
        let b = model.find_by_full_name("B").unwrap();
        let x = model.find_by_full_name("A/x").unwrap();
        let old_a = model[a].id().clone();
        let old_x = model[x].id().clone();

        model.remove_child(model.root(), a).unwrap();
        model.add_child(b, a).unwrap();

        assert_eq!(model[x].full_name(), "B/A/x");
        assert_ne!(model[a].id(), &old_a);
        assert_ne!(model[x].id(), &old_x);
    }

    #[test]
    fn dependencies_are_deduplicated() {
        let mut model = build(&[("A", vec!["x", "y"])]);
        let x = model.find_by_full_name("A/x").unwrap();
        let y = model.find_by_full_name("A/y").unwrap();
        model.add_dependency(y, x);
        model.add_dependency(y, x);
        assert_eq!(model[y].dependencies(), [x]);
        assert_eq!(model.to_summary(y).dependencies, ["A/x"]);
    }

    #[proptest(cases = 64)]
    fn ids_are_stable_across_rebuilds(
        #[strategy(proptest::collection::vec("[a-c]{1,2}", 1..6))] names: Vec<String>,
    ) {
        let build_ids = || {
            let mut model = TestModel::new();
            let parent = model.add_test(model.root(), group("Parent")).unwrap();
            for name in &names {
                model.add_test(parent, Test::new(name.as_str(), kinds::TEST)).unwrap();
            }
            model
                .pre_order(model.root())
                .into_iter()
                .map(|index| model[index].id().clone())
                .collect::<Vec<_>>()
        };

        let first = build_ids();
        prop_assert_eq!(&first, &build_ids());
        let unique: HashSet<_> = first.iter().collect();
        prop_assert_eq!(unique.len(), first.len());
    }
}
