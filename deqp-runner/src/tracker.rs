// Copyright (c) The deqp-runner Contributors
// SPDX-License-Identifier: Apache-2.0

//! Per-test result tracking.
//!
//! A test moves through these states:
//!
//! ```text
//! unregistered -> registered -> open -> registered -> ... -> finalized
//! ```
//!
//! A test is registered with all of its configurations the first time it is part of a batch. When
//! a test case begins on the device, the batch's configuration is removed from the test's
//! remaining set and the test is open. Closing the test records its result for that configuration.
//! Once a test has no remaining configurations it is finalized: it is removed from every tracking
//! collection and queued exactly once as a [`FinalizedTest`].
//!
//! If the stream ends while a test is open, [`ResultTracker::end_of_stream`] returns the open
//! configuration to the test's remaining set so that it can be retried.

use crate::{
    list::{RunConfig, TestId, TestInstanceMap},
    status::StatusEvent,
};
use indexmap::{IndexMap, IndexSet};
use itertools::Itertools;
use std::collections::{BTreeSet, HashMap};
use tracing::warn;

/// Failure message for a test that ended without reporting a result.
pub const INCOMPLETE_LOG_MESSAGE: &str = "Crash: Incomplete test log";

/// Message recorded for an instance that was skipped without running.
pub const SKIPPED_INSTANCE_LOG_MESSAGE: &str = "Configuration skipped";

/// Failure message for a test that could never be started.
pub const NOT_EXECUTABLE_LOG_MESSAGE: &str = "Abort: Test cannot be executed";

/// A test whose every instance has been resolved.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FinalizedTest {
    /// The test.
    pub test: TestId,

    /// Captured logs, as `(name, contents)` pairs. Only populated if log capture is enabled.
    ///
    /// Names have the form `class.leaf@<config id>`.
    pub logs: Vec<(String, String)>,

    /// The aggregated failure message, if any instance failed.
    pub failure: Option<String>,
}

#[derive(Debug)]
struct PendingResult {
    all_passed: bool,
    logs: IndexMap<RunConfig, String>,
    messages: IndexMap<RunConfig, String>,
    remaining: IndexSet<RunConfig>,
}

impl PendingResult {
    fn new(configs: impl IntoIterator<Item = RunConfig>) -> Self {
        Self {
            all_passed: true,
            logs: IndexMap::new(),
            messages: IndexMap::new(),
            remaining: configs.into_iter().collect(),
        }
    }

    fn fail(&mut self, config: &RunConfig, message: String) {
        self.all_passed = false;
        self.messages.insert(config.clone(), message);
    }

    fn aggregated_failure(&self) -> Option<String> {
        if self.all_passed {
            return None;
        }
        let message = self
            .messages
            .iter()
            .map(|(config, message)| format!("=== with config {} ===\n{message}", config.id()))
            .join("\n");
        Some(message)
    }
}

/// Tracks pending instances, results and logs for every test in a run.
#[derive(Debug)]
pub struct ResultTracker {
    instances: TestInstanceMap,
    // Indexes into `instances` of the tests not yet finalized.
    remaining: BTreeSet<usize>,
    remaining_instances: usize,
    pending: HashMap<TestId, PendingResult>,
    current_config: Option<RunConfig>,
    current_test: Option<TestId>,
    got_result: bool,
    current_log: String,
    capture_logs: bool,
    finalized: Vec<FinalizedTest>,
}

impl ResultTracker {
    /// Creates a tracker for the given instance universe. Every test starts out remaining.
    pub fn new(instances: TestInstanceMap, capture_logs: bool) -> Self {
        let remaining = (0..instances.len()).collect();
        let remaining_instances = instances.instance_count();
        Self {
            instances,
            remaining,
            remaining_instances,
            pending: HashMap::new(),
            current_config: None,
            current_test: None,
            got_result: false,
            current_log: String::new(),
            capture_logs,
            finalized: Vec::new(),
        }
    }

    /// Returns the instance universe.
    pub fn instances(&self) -> &TestInstanceMap {
        &self.instances
    }

    /// Iterates over tests that have not been finalized, in list order.
    pub fn remaining(&self) -> impl Iterator<Item = &TestId> + Clone + '_ {
        self.remaining
            .iter()
            .filter_map(move |&index| self.instances.get_index(index).map(|(test, _)| test))
    }

    /// Returns the number of tests that have not been finalized.
    pub fn remaining_len(&self) -> usize {
        self.remaining.len()
    }

    /// Returns true if the test has not been finalized.
    pub fn is_remaining(&self, test: &TestId) -> bool {
        self.instances
            .index_of(test)
            .is_some_and(|index| self.remaining.contains(&index))
    }

    /// Returns the number of instances still waiting for a result, across all remaining tests.
    ///
    /// An open instance is not counted.
    pub fn remaining_instance_count(&self) -> usize {
        self.remaining_instances
    }

    /// Declares a test and its configurations.
    ///
    /// Does nothing if the test is already registered, or if it is not a remaining test.
    pub fn register(&mut self, test: &TestId, configs: impl IntoIterator<Item = RunConfig>) {
        if self.pending.contains_key(test) {
            return;
        }
        if !self.is_remaining(test) {
            warn!(test = %test, "ignoring registration of test that is not remaining");
            return;
        }
        let result = PendingResult::new(configs);
        let listed = self.instances.configs(test).map_or(0, IndexSet::len);
        self.remaining_instances =
            (self.remaining_instances + result.remaining.len()).saturating_sub(listed);
        self.pending.insert(test.clone(), result);
    }

    /// Returns true if the instance has not been executed yet.
    pub fn is_pending(&self, test: &TestId, config: &RunConfig) -> bool {
        match self.pending.get(test) {
            Some(result) => result.remaining.contains(config),
            None => self.is_remaining(test) && self.instances.contains_instance(test, config),
        }
    }

    /// Sets the configuration that subsequent events and synthetic results apply to.
    pub fn set_current_config(&mut self, config: RunConfig) {
        self.current_config = Some(config);
    }

    /// Returns the test that is currently open, if any.
    pub fn current_test(&self) -> Option<&TestId> {
        self.current_test.as_ref()
    }

    /// Marks the current configuration of a test as passed without running it.
    pub fn skip(&mut self, test: &TestId) {
        let Some(config) = self.current_config.clone() else {
            warn!(test = %test, "skip requested without a current config");
            return;
        };
        let Some(result) = self.pending.get_mut(test) else {
            warn!(test = %test, "skip requested for unregistered test");
            return;
        };
        result
            .messages
            .insert(config.clone(), SKIPPED_INSTANCE_LOG_MESSAGE.to_owned());
        if result.remaining.shift_remove(&config) {
            self.remaining_instances -= 1;
        }
        if result.remaining.is_empty() {
            self.finalize(test);
        }
    }

    /// Marks the current configuration of a test as failed without a device result.
    pub fn abort(&mut self, test: &TestId, message: impl Into<String>) {
        let Some(config) = self.current_config.clone() else {
            warn!(test = %test, "abort requested without a current config");
            return;
        };
        let Some(result) = self.pending.get_mut(test) else {
            warn!(test = %test, "abort requested for unregistered test");
            return;
        };
        result.fail(&config, message.into());
        if result.remaining.shift_remove(&config) {
            self.remaining_instances -= 1;
        }
        if result.remaining.is_empty() {
            self.finalize(test);
        }
        if self.current_test.as_ref() == Some(test) {
            self.current_test = None;
        }
    }

    /// Applies an event from the status stream.
    pub fn on_event(&mut self, event: StatusEvent) {
        match event {
            StatusEvent::BeginSession | StatusEvent::EndSession => {}
            StatusEvent::BeginTestCase { path } => self.begin_test_case(TestId::from_path(&path)),
            StatusEvent::EndTestCase => self.end_test_case(),
            StatusEvent::TestCaseResult { code, details } => {
                self.got_result = true;
                let (Some(test), Some(config)) = (&self.current_test, &self.current_config) else {
                    warn!(code = %code, "result received with no open test");
                    return;
                };
                let Some(result) = self.pending.get_mut(test) else {
                    warn!(test = %test, "unexpected result for unregistered test");
                    return;
                };
                if let Some(message) = code.failure_message(&details) {
                    result.fail(config, message);
                }
            }
            StatusEvent::TerminateTestCase { reason } => self.terminate_test_case(reason),
            StatusEvent::TestLogData { log } => self.current_log.push_str(&log),
        }
    }

    /// Signals the end of a batch's stream.
    ///
    /// A test that is still open is returned to the pending set so it can be retried.
    pub fn end_of_stream(&mut self) {
        if let Some(test) = self.current_test.take() {
            match (self.pending.get_mut(&test), &self.current_config) {
                (Some(result), Some(config)) => {
                    if result.remaining.insert(config.clone()) {
                        self.remaining_instances += 1;
                    }
                }
                _ => warn!(test = %test, "open test at end of stream is not tracked"),
            }
        }
    }

    /// Takes every test finalized since the last call.
    pub fn drain_finalized(&mut self) -> Vec<FinalizedTest> {
        std::mem::take(&mut self.finalized)
    }

    /// Fails and finalizes every remaining test, returning how many there were.
    ///
    /// Every configuration of such a test without a recorded failure is failed with `message`,
    /// since a passing instance can't be told apart from one whose result was lost.
    pub fn fail_remaining(&mut self, message: &str) -> usize {
        let tests: Vec<TestId> = self.remaining().cloned().collect();
        for test in &tests {
            let configs = self.instances.configs(test).cloned().unwrap_or_default();
            let result = self
                .pending
                .entry(test.clone())
                .or_insert_with(|| PendingResult::new(configs.iter().cloned()));
            self.remaining_instances = self
                .remaining_instances
                .saturating_sub(result.remaining.len());
            result.remaining.clear();
            result.all_passed = false;
            for config in configs {
                result
                    .messages
                    .entry(config)
                    .or_insert_with(|| message.to_owned());
            }
            self.finalize(test);
        }
        if self
            .current_test
            .as_ref()
            .is_some_and(|test| tests.contains(test))
        {
            self.current_test = None;
        }
        tests.len()
    }

    /// Removes every remaining test without recording a result, returning them in list order.
    pub fn take_remaining(&mut self) -> Vec<TestId> {
        let remaining = self.remaining().cloned().collect();
        self.remaining.clear();
        self.remaining_instances = 0;
        self.pending.clear();
        self.current_test = None;
        remaining
    }

    fn begin_test_case(&mut self, test: TestId) {
        // The end of the open test was lost, so close it with whatever it reported.
        if let Some(open) = &self.current_test {
            warn!(open = %open, test = %test, "test case began while another was open");
            self.end_test_case();
        }
        self.current_log.clear();
        self.got_result = false;
        match (self.pending.get_mut(&test), &self.current_config) {
            (Some(result), Some(config)) => {
                if result.remaining.shift_remove(config) {
                    self.remaining_instances -= 1;
                }
            }
            _ => warn!(test = %test, "unexpected start of test case"),
        }
        self.current_test = Some(test);
    }

    fn end_test_case(&mut self) {
        let Some(test) = self.current_test.take() else {
            warn!("end of test case received with no open test");
            return;
        };
        let (Some(result), Some(config)) = (self.pending.get_mut(&test), &self.current_config)
        else {
            warn!(test = %test, "unexpected end of test case");
            return;
        };

        if !self.got_result {
            result.fail(config, INCOMPLETE_LOG_MESSAGE.to_owned());
        }
        if self.capture_logs && !self.current_log.is_empty() {
            result
                .logs
                .insert(config.clone(), std::mem::take(&mut self.current_log));
        }
        if result.remaining.is_empty() {
            self.finalize(&test);
        }
    }

    fn terminate_test_case(&mut self, reason: String) {
        self.got_result = true;
        let Some(test) = self.current_test.take() else {
            warn!(reason, "termination received with no open test");
            return;
        };
        let (Some(result), Some(config)) = (self.pending.get_mut(&test), &self.current_config)
        else {
            warn!(test = %test, "unexpected termination of test case");
            return;
        };

        result.fail(config, format!("Terminated: {reason}"));
        if result.remaining.is_empty() {
            self.finalize(&test);
        }
    }

    fn finalize(&mut self, test: &TestId) {
        let Some(index) = self.instances.index_of(test) else {
            return;
        };
        if !self.remaining.remove(&index) {
            return;
        }
        let Some(result) = self.pending.remove(test) else {
            return;
        };

        let logs = if self.capture_logs {
            result
                .logs
                .iter()
                .map(|(config, log)| {
                    (
                        format!("{}@{}", test.path(), config.id()),
                        log.clone(),
                    )
                })
                .collect()
        } else {
            Vec::new()
        };

        self.finalized.push(FinalizedTest {
            test: test.clone(),
            logs,
            failure: result.aggregated_failure(),
        });
    }
}
