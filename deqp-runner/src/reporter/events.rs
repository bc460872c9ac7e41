// Copyright (c) The deqp-runner Contributors
// SPDX-License-Identifier: Apache-2.0

//! Events emitted by the test runner.
//!
//! Every test is reported exactly once, as a contiguous sequence: [`TestEvent::TestStarted`],
//! zero or more [`TestEvent::TestLog`], an optional [`TestEvent::TestFailed`], and
//! [`TestEvent::TestFinished`].

use crate::list::TestId;
use std::time::{Duration, SystemTime};

/// A test event.
#[derive(Clone, Debug)]
pub enum TestEvent<'a> {
    /// The test run started.
    RunStarted {
        /// The number of tests in the run.
        test_count: usize,
    },

    /// A test started being reported.
    TestStarted {
        /// The test.
        test: &'a TestId,
    },

    /// A log captured while running a test.
    TestLog {
        /// The test.
        test: &'a TestId,

        /// The name of the log, of the form `class.leaf@<config id>`.
        name: &'a str,

        /// The contents of the log.
        contents: &'a str,
    },

    /// A test failed in at least one configuration.
    TestFailed {
        /// The test.
        test: &'a TestId,

        /// The failure message, with one section per failing configuration.
        message: &'a str,
    },

    /// A test finished being reported.
    TestFinished {
        /// The test.
        test: &'a TestId,

        /// The final status of the test.
        status: TestStatus,
    },

    /// The test run finished.
    RunFinished {
        /// The time at which the run was started.
        start_time: SystemTime,

        /// The amount of time it took for the tests to run.
        elapsed: Duration,

        /// Statistics for the run.
        run_stats: RunStats,
    },
}

/// The final status of a test.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TestStatus {
    /// Every configuration passed or was skipped.
    Pass,

    /// At least one configuration failed.
    Fail,
}

impl TestStatus {
    /// Returns true if the test passed.
    pub fn is_success(self) -> bool {
        self == Self::Pass
    }
}

/// Statistics for a test run.
#[derive(Copy, Clone, Default, Debug, Eq, PartialEq)]
pub struct RunStats {
    /// The total number of tests that were expected to be run at the beginning.
    ///
    /// If the run ended early, this will be more than `final_run_count`.
    pub initial_run_count: usize,

    /// The total number of tests that were reported.
    pub final_run_count: usize,

    /// The number of tests that passed.
    pub passed: usize,

    /// The number of tests that failed.
    pub failed: usize,
}

impl RunStats {
    /// Returns true if this run is considered a success.
    ///
    /// A run is a failure if it ended before every test was reported, or if any test failed.
    pub fn is_success(&self) -> bool {
        self.initial_run_count <= self.final_run_count && self.failed == 0
    }

    pub(crate) fn on_test_finished(&mut self, status: TestStatus) {
        self.final_run_count += 1;
        match status {
            TestStatus::Pass => self.passed += 1,
            TestStatus::Fail => self.failed += 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_stats_success() {
        let mut stats = RunStats {
            initial_run_count: 2,
            ..RunStats::default()
        };
        stats.on_test_finished(TestStatus::Pass);
        assert!(!stats.is_success(), "one test unreported");
        stats.on_test_finished(TestStatus::Pass);
        assert!(stats.is_success());

        stats.on_test_finished(TestStatus::Fail);
        assert!(!stats.is_success());
        assert_eq!(stats.passed, 2);
        assert_eq!(stats.failed, 1);
    }
}
