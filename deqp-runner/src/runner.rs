// Copyright (c) The deqp-runner Contributors
// SPDX-License-Identifier: Apache-2.0

//! The test runner.
//!
//! The main structure in this module is [`TestRunner`]. It repeatedly asks the
//! [`BatchScheduler`] for a batch of compatible pending instances and sends the batch to the
//! device as a single instrumentation run. When the device crashes or the link to it dies partway
//! through a batch, whatever didn't finish is split in half and run again, until every unstable
//! test has been isolated into a batch of its own.

mod angle;
mod imp;
mod scheduler;

pub use angle::*;
pub use imp::{CAPABILITY_QUERY_FAILED_MESSAGE, REQUIRED_CONFIG_NOT_SUPPORTED_MESSAGE};
pub use scheduler::*;

use crate::{
    capability::DeqpPackage,
    device::{Device, instrumentation::InstrumentationOptions},
    errors::{RunError, WriteEventError},
    list::TestInstanceMap,
    recovery::{
        DEFAULT_PROCESS_KILL_WAIT, DEFAULT_RETRY_COOLDOWN, Recovery, Sleeper, ThreadSleeper,
    },
    reporter::{RunStats, TestEvent},
    signal::CancelToken,
    tracker::ResultTracker,
};
use debug_ignore::DebugIgnore;
use imp::{CallbackContext, ExecutionEngine, RunSettings, RunState};
use std::{collections::HashSet, time::Duration};
use tracing::info;

/// Which tests of the list are actually executed.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub enum RunMode {
    /// Execute every test.
    #[default]
    Full,

    /// Execute only the tests whose dotted paths are in `include`. Every other test is passed
    /// without running it.
    Incremental {
        /// Dotted paths of the tests to execute.
        include: HashSet<String>,
    },
}

/// Test runner options.
#[derive(Debug)]
pub struct TestRunnerBuilder {
    package: Option<DeqpPackage>,
    case_list_file: Option<String>,
    batch_limit: usize,
    incremental_batch_limit: usize,
    mode: RunMode,
    collect_only: bool,
    angle: AngleBackend,
    options: InstrumentationOptions,
    retry_cooldown: Duration,
    process_kill_wait: Duration,
    sleeper: DebugIgnore<Box<dyn Sleeper>>,
}

impl Default for TestRunnerBuilder {
    fn default() -> Self {
        Self {
            package: None,
            case_list_file: None,
            batch_limit: DEFAULT_BATCH_LIMIT,
            incremental_batch_limit: DEFAULT_INCREMENTAL_BATCH_LIMIT,
            mode: RunMode::Full,
            collect_only: false,
            angle: AngleBackend::None,
            options: InstrumentationOptions::default(),
            retry_cooldown: DEFAULT_RETRY_COOLDOWN,
            process_kill_wait: DEFAULT_PROCESS_KILL_WAIT,
            sleeper: DebugIgnore(Box::new(ThreadSleeper)),
        }
    }
}

impl TestRunnerBuilder {
    /// Sets the dEQP package under test. Capability checks are skipped if this isn't set.
    pub fn set_package(&mut self, package: Option<DeqpPackage>) -> &mut Self {
        self.package = package;
        self
    }

    /// Sets the name of the case list file, which may encode the dEQP level it requires.
    pub fn set_case_list_file(&mut self, case_list_file: impl Into<String>) -> &mut Self {
        self.case_list_file = Some(case_list_file.into());
        self
    }

    /// Sets the batch size limit for full runs.
    pub fn set_batch_limit(&mut self, batch_limit: usize) -> &mut Self {
        self.batch_limit = batch_limit;
        self
    }

    /// Sets the batch size limit for incremental runs.
    pub fn set_incremental_batch_limit(&mut self, batch_limit: usize) -> &mut Self {
        self.incremental_batch_limit = batch_limit;
        self
    }

    /// Sets the run mode.
    pub fn set_mode(&mut self, mode: RunMode) -> &mut Self {
        self.mode = mode;
        self
    }

    /// If set, every test is passed without anything being run on the device.
    pub fn set_collect_only(&mut self, collect_only: bool) -> &mut Self {
        self.collect_only = collect_only;
        self
    }

    /// Sets the ANGLE backend.
    pub fn set_angle_backend(&mut self, angle: AngleBackend) -> &mut Self {
        self.angle = angle;
        self
    }

    /// Sets the ABI to run the on-device executable under.
    pub fn set_abi(&mut self, abi: Option<String>) -> &mut Self {
        self.options.abi = abi;
        self
    }

    /// Sets whether test logs are sent back from the device and reported.
    pub fn set_capture_logs(&mut self, capture_logs: bool) -> &mut Self {
        self.options.capture_logs = capture_logs;
        self
    }

    /// Sets whether the on-device watchdog is turned off.
    pub fn set_disable_watchdog(&mut self, disable_watchdog: bool) -> &mut Self {
        self.options.disable_watchdog = disable_watchdog;
        self
    }

    /// Sets the delay before retrying after the link to the device was killed.
    pub fn set_retry_cooldown(&mut self, retry_cooldown: Duration) -> &mut Self {
        self.retry_cooldown = retry_cooldown;
        self
    }

    /// Sets the delay between killing on-device processes and checking that they are gone.
    pub fn set_process_kill_wait(&mut self, process_kill_wait: Duration) -> &mut Self {
        self.process_kill_wait = process_kill_wait;
        self
    }

    /// Sets how the runner sleeps during recovery.
    pub fn set_sleeper(&mut self, sleeper: Box<dyn Sleeper>) -> &mut Self {
        self.sleeper = DebugIgnore(sleeper);
        self
    }

    /// Creates a new test runner for the given instances.
    pub fn build(self, instances: TestInstanceMap, cancel: CancelToken) -> TestRunner {
        let base_limit = match self.mode {
            RunMode::Full => self.batch_limit,
            RunMode::Incremental { .. } => self.incremental_batch_limit,
        };
        let settings = RunSettings {
            package: self.package,
            case_list_file: self.case_list_file,
            mode: self.mode,
            collect_only: self.collect_only,
            angle: self.angle,
            options: self.options,
            scheduler: BatchScheduler::new(base_limit),
        };
        let recovery = Recovery::new(self.retry_cooldown, self.process_kill_wait, self.sleeper.0);
        TestRunner {
            settings,
            instances,
            cancel,
            recovery,
        }
    }
}

/// Context for running tests.
///
/// Created using [`TestRunnerBuilder::build`].
#[derive(Debug)]
pub struct TestRunner {
    settings: RunSettings,
    instances: TestInstanceMap,
    cancel: CancelToken,
    recovery: Recovery,
}

impl TestRunner {
    /// Returns the number of tests that will be reported by a complete run.
    pub fn test_count(&self) -> usize {
        self.instances.len()
    }

    /// Executes the listed tests on `device`.
    ///
    /// The callback is called for every event. If it returns an error, the run stops and the
    /// error is returned as [`RunError::Reporter`].
    pub fn execute<F>(self, device: &mut dyn Device, callback: F) -> Result<RunStats, RunError>
    where
        F: FnMut(TestEvent<'_>) -> Result<(), WriteEventError>,
    {
        let Self {
            settings,
            instances,
            cancel,
            recovery,
        } = self;

        let mut ctx = CallbackContext::new(callback, instances.len());
        ctx.run_started().map_err(RunError::Reporter)?;

        let tracker = ResultTracker::new(instances, settings.options.capture_logs);
        let state = RunState::new(tracker, recovery);
        let result = ExecutionEngine::new(device, &settings, &cancel, state, &mut ctx).run();

        // The run is always reported as finished, even if it ended early.
        let finished = ctx.run_finished().map_err(RunError::Reporter);
        result?;
        let run_stats = finished?;
        info!(
            passed = run_stats.passed,
            failed = run_stats.failed,
            "run finished",
        );
        Ok(run_stats)
    }
}
