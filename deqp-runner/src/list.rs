// Copyright (c) The deqp-runner Contributors
// SPDX-License-Identifier: Apache-2.0

//! Test identities, run configurations and the instance universe of a run.
//!
//! The main structure in this module is [`TestInstanceMap`], which maps every [`TestId`] to the
//! [`RunConfig`]s it must be executed with. It is built once, from a case list file, and is not
//! modified after filtering.

mod catalog;
mod run_config;
mod test_id;

pub use catalog::*;
pub use run_config::*;
pub use test_id::*;

use indexmap::{IndexMap, IndexSet};

/// The full set of test instances for a run: every test, with the configurations it runs under.
///
/// Iteration order is the order in which tests were listed in the case list.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct TestInstanceMap {
    instances: IndexMap<TestId, IndexSet<RunConfig>>,
}

impl TestInstanceMap {
    /// Creates a new, empty instance map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a test with the given configurations.
    ///
    /// If the test is already present, its configurations are replaced but its position is kept.
    pub fn insert(&mut self, test: TestId, configs: impl IntoIterator<Item = RunConfig>) {
        self.instances.insert(test, configs.into_iter().collect());
    }

    /// Returns the configurations for the given test, or `None` if the test is unknown.
    pub fn configs(&self, test: &TestId) -> Option<&IndexSet<RunConfig>> {
        self.instances.get(test)
    }

    /// Returns true if the given instance exists.
    pub fn contains_instance(&self, test: &TestId, config: &RunConfig) -> bool {
        self.instances
            .get(test)
            .is_some_and(|configs| configs.contains(config))
    }

    /// Returns the position of a test in list order.
    pub fn index_of(&self, test: &TestId) -> Option<usize> {
        self.instances.get_index_of(test)
    }

    /// Returns the test at the given position in list order.
    pub fn get_index(&self, index: usize) -> Option<(&TestId, &IndexSet<RunConfig>)> {
        self.instances.get_index(index)
    }

    /// Iterates over tests in list order.
    pub fn tests(&self) -> impl ExactSizeIterator<Item = &TestId> + '_ {
        self.instances.keys()
    }

    /// Iterates over tests and their configurations in list order.
    pub fn iter(&self) -> impl ExactSizeIterator<Item = (&TestId, &IndexSet<RunConfig>)> + '_ {
        self.instances.iter()
    }

    /// Returns the number of tests.
    pub fn len(&self) -> usize {
        self.instances.len()
    }

    /// Returns true if there are no tests.
    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    /// Returns the total number of instances across all tests.
    pub fn instance_count(&self) -> usize {
        self.instances.values().map(|configs| configs.len()).sum()
    }

    /// Keeps only the tests for which `f` returns true, preserving order.
    pub fn retain(&mut self, mut f: impl FnMut(&TestId) -> bool) {
        self.instances.retain(|test, _| f(test));
    }
}

impl FromIterator<(TestId, RunConfig)> for TestInstanceMap {
    fn from_iter<T: IntoIterator<Item = (TestId, RunConfig)>>(iter: T) -> Self {
        let mut map = Self::new();
        for (test, config) in iter {
            map.instances.entry(test).or_default().insert(config);
        }
        map
    }
}
