// Copyright (c) The deqp-runner Contributors
// SPDX-License-Identifier: Apache-2.0

use crate::{
    list::{RunConfig, TestId},
    tracker::ResultTracker,
};
use std::collections::HashMap;
use tracing::debug;

/// Batch size limit for full runs.
pub const DEFAULT_BATCH_LIMIT: usize = 1000;

/// Batch size limit for incremental runs.
pub const DEFAULT_INCREMENTAL_BATCH_LIMIT: usize = 10000;

/// A group of tests that are run together in one instrumentation invocation.
///
/// Every test in a batch is pending at the batch's configuration when the batch is selected.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TestBatch {
    /// The configuration every test is run at.
    pub config: RunConfig,

    /// The tests, in list order. Never empty.
    pub tests: Vec<TestId>,
}

impl TestBatch {
    /// Returns the number of tests in the batch.
    pub fn len(&self) -> usize {
        self.tests.len()
    }

    /// Returns true if the batch holds no tests.
    pub fn is_empty(&self) -> bool {
        self.tests.is_empty()
    }
}

/// Counts how often each test has been involved in a failure that could be attributed to it.
///
/// Ratings live for the whole run. A test with a higher rating is run in smaller batches, and
/// only alongside tests with the same rating.
#[derive(Clone, Debug, Default)]
pub struct InstabilityTracker {
    ratings: HashMap<TestId, u32>,
}

impl InstabilityTracker {
    /// Creates a tracker where every test has a rating of 0.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the rating of a test.
    pub fn rating(&self, test: &TestId) -> u32 {
        self.ratings.get(test).copied().unwrap_or(0)
    }

    /// Increments the rating of a test.
    pub fn record(&mut self, test: &TestId) {
        let rating = self.ratings.entry(test.clone()).or_insert(0);
        *rating = rating.saturating_add(1);
    }

    /// Resets the rating of a test to 0.
    pub fn clear(&mut self, test: &TestId) {
        self.ratings.remove(test);
    }
}

/// Picks the next batch of compatible pending instances.
#[derive(Clone, Copy, Debug)]
pub struct BatchScheduler {
    base_limit: usize,
}

impl BatchScheduler {
    /// Creates a scheduler with the given batch size limit for tests with a rating of 0.
    pub fn new(base_limit: usize) -> Self {
        Self {
            base_limit: base_limit.max(1),
        }
    }

    /// Returns the batch size limit for tests with a rating of 0.
    pub fn base_limit(&self) -> usize {
        self.base_limit
    }

    /// Returns the batch size limit for a leading test with the given instability rating.
    ///
    /// The limit halves with every rating step and never drops below 1.
    pub fn cap(&self, rating: u32) -> usize {
        self.base_limit.checked_shr(rating).unwrap_or(0).max(1)
    }

    /// Selects the next batch from `pool`.
    ///
    /// The leading test is the first test in `pool` that is still remaining and pending at
    /// `required_config`, or at any configuration if none is required. The batch runs at `required_config`, or else at
    /// the leading test's first pending configuration. Other tests from `pool` that are pending at
    /// that configuration and have the leading test's rating are packed along until the cap for
    /// that rating is reached.
    pub fn select_batch<'a, I>(
        &self,
        pool: I,
        required_config: Option<&RunConfig>,
        tracker: &ResultTracker,
        instability: &InstabilityTracker,
    ) -> Option<TestBatch>
    where
        I: IntoIterator<Item = &'a TestId>,
        I::IntoIter: Clone,
    {
        let pool = pool.into_iter();

        // A remaining test with nothing pending can't lead a batch, so it is passed over.
        let (leader, config) = pool.clone().find_map(|test| {
            if !tracker.is_remaining(test) {
                return None;
            }
            let config = match required_config {
                Some(config) => tracker.is_pending(test, config).then_some(config),
                None => tracker
                    .instances()
                    .configs(test)?
                    .iter()
                    .find(|config| tracker.is_pending(test, config)),
            };
            config.map(|config| (test, config.clone()))
        })?;

        let rating = instability.rating(leader);
        let cap = self.cap(rating);
        let mut tests = vec![leader.clone()];
        for test in pool {
            if tests.len() >= cap {
                break;
            }
            if test == leader
                || !tracker.is_pending(test, &config)
                || instability.rating(test) != rating
            {
                continue;
            }
            tests.push(test.clone());
        }

        debug!(
            leader = %leader,
            config = %config,
            rating,
            size = tests.len(),
            "selected batch",
        );
        Some(TestBatch { config, tests })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::list::{ScreenRotation, TestInstanceMap};
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;
    use test_case::test_case;
    use test_strategy::proptest;

    fn config(name: &str) -> RunConfig {
        RunConfig::new(name, ScreenRotation::Unspecified, "window", false)
    }

    fn ids(paths: &[&str]) -> Vec<TestId> {
        paths.iter().map(|path| TestId::from_path(path)).collect()
    }

    fn tracker(paths: &[&str], configs: &[RunConfig]) -> ResultTracker {
        let mut instances = TestInstanceMap::new();
        for test in ids(paths) {
            instances.insert(test, configs.iter().cloned());
        }
        ResultTracker::new(instances, false)
    }

    #[test_case(1000, 0, 1000; "rating zero")]
    #[test_case(1000, 1, 500; "halved")]
    #[test_case(1000, 9, 1; "down to one")]
    #[test_case(1000, 12, 1; "saturates")]
    #[test_case(1000, 200, 1; "huge rating")]
    fn caps(base: usize, rating: u32, expected: usize) {
        assert_eq!(BatchScheduler::new(base).cap(rating), expected);
    }

    #[test]
    fn batches_are_packed_up_to_limit() {
        let tracker = tracker(&["a.t1", "a.t2", "a.t3", "b.t4", "b.t5"], &[config("x")]);
        let scheduler = BatchScheduler::new(2);
        let instability = InstabilityTracker::new();

        let batch = scheduler
            .select_batch(tracker.remaining(), None, &tracker, &instability)
            .expect("tests remain");
        assert_eq!(batch.config, config("x"));
        assert_eq!(batch.tests, ids(&["a.t1", "a.t2"]));
    }

    #[test]
    fn batches_group_by_rating() {
        let tracker = tracker(&["a.t1", "a.t2", "a.t3", "a.t4"], &[config("x")]);
        let scheduler = BatchScheduler::new(1000);
        let mut instability = InstabilityTracker::new();
        instability.record(&TestId::from_path("a.t2"));
        instability.record(&TestId::from_path("a.t3"));

        let batch = scheduler
            .select_batch(tracker.remaining(), None, &tracker, &instability)
            .expect("tests remain");
        assert_eq!(batch.tests, ids(&["a.t1", "a.t4"]));

        let pool = ids(&["a.t2", "a.t3"]);
        let batch = scheduler
            .select_batch(&pool, Some(&config("x")), &tracker, &instability)
            .expect("tests remain");
        assert_eq!(batch.tests, ids(&["a.t2", "a.t3"]));
    }

    #[test]
    fn leader_uses_first_pending_config() {
        let mut tracker = tracker(&["a.t1", "a.t2"], &[config("x"), config("y")]);
        let t1 = TestId::from_path("a.t1");
        tracker.register(&t1, [config("x"), config("y")]);
        tracker.set_current_config(config("x"));
        tracker.skip(&t1);

        let batch = BatchScheduler::new(10)
            .select_batch(tracker.remaining(), None, &tracker, &InstabilityTracker::new())
            .expect("tests remain");
        assert_eq!(batch.config, config("y"));
        assert_eq!(batch.tests, ids(&["a.t1", "a.t2"]));
    }

    #[test]
    fn required_config_filters_leader() {
        let mut tracker = tracker(&["a.t1", "a.t2"], &[config("x"), config("y")]);
        let t1 = TestId::from_path("a.t1");
        tracker.register(&t1, [config("x"), config("y")]);
        tracker.set_current_config(config("x"));
        tracker.skip(&t1);

        let pool = ids(&["a.t1", "a.t2"]);
        let batch = BatchScheduler::new(10)
            .select_batch(&pool, Some(&config("x")), &tracker, &InstabilityTracker::new())
            .expect("a.t2 is pending at x");
        assert_eq!(batch.tests, ids(&["a.t2"]));
    }

    #[test]
    fn leader_without_pending_config_is_passed_over() {
        let mut tracker = tracker(&["a.t1", "a.t2"], &[config("x")]);
        // Registering with no configurations leaves a.t1 remaining with nothing pending.
        tracker.register(&TestId::from_path("a.t1"), std::iter::empty::<RunConfig>());

        let batch = BatchScheduler::new(10)
            .select_batch(tracker.remaining(), None, &tracker, &InstabilityTracker::new())
            .expect("a.t2 is still pending");
        assert_eq!(batch.config, config("x"));
        assert_eq!(batch.tests, ids(&["a.t2"]));
    }

    #[test]
    fn empty_pool_selects_nothing() {
        let tracker = tracker(&["a.t1"], &[config("x")]);
        let pool: Vec<TestId> = Vec::new();
        assert_eq!(
            BatchScheduler::new(10).select_batch(
                &pool,
                None,
                &tracker,
                &InstabilityTracker::new()
            ),
            None
        );
    }

    #[test]
    fn ratings() {
        let mut instability = InstabilityTracker::new();
        let test = TestId::from_path("a.b");
        assert_eq!(instability.rating(&test), 0);
        instability.record(&test);
        instability.record(&test);
        assert_eq!(instability.rating(&test), 2);
        instability.clear(&test);
        assert_eq!(instability.rating(&test), 0);
    }

    #[proptest(cases = 64)]
    fn cap_is_monotonic(#[strategy(1usize..100_000)] base: usize, #[strategy(0u32..70)] rating: u32) {
        let scheduler = BatchScheduler::new(base);
        prop_assert!(scheduler.cap(rating) >= 1);
        prop_assert!(scheduler.cap(rating + 1) <= scheduler.cap(rating));
        prop_assert!(scheduler.cap(rating) <= base);
    }

    #[proptest(cases = 32)]
    fn batches_respect_cap(
        #[strategy(1usize..40)] count: usize,
        #[strategy(1usize..10)] limit: usize,
    ) {
        let paths: Vec<String> = (0..count).map(|i| format!("g.t{i}")).collect();
        let path_refs: Vec<&str> = paths.iter().map(String::as_str).collect();
        let tracker = tracker(&path_refs, &[config("x")]);
        let batch = BatchScheduler::new(limit)
            .select_batch(tracker.remaining(), None, &tracker, &InstabilityTracker::new())
            .expect("tests remain");
        prop_assert_eq!(batch.len(), count.min(limit));
    }
}
