// Copyright (c) The deqp-runner Contributors
// SPDX-License-Identifier: Apache-2.0

use super::{AngleBackend, BatchScheduler, InstabilityTracker, RunMode, TestBatch};
use crate::{
    capability::{
        ConfigSupportCache, DeqpPackage, DeviceFeatures, is_gles_version_supported,
        required_deqp_level,
    },
    device::{
        Device,
        instrumentation::{CASE_LIST_PATH, InstrumentationOptions, LOG_PATH, test_case_trie},
    },
    errors::{CapabilityQueryError, RunError, TransportError, WriteEventError},
    list::{RunConfig, ScreenRotation, TestId},
    recovery::Recovery,
    reporter::{RunStats, TestEvent, TestStatus},
    signal::CancelToken,
    status::StatusStreamParser,
    stopwatch::StopwatchStart,
    tracker::{FinalizedTest, INCOMPLETE_LOG_MESSAGE, NOT_EXECUTABLE_LOG_MESSAGE, ResultTracker},
};
use tracing::{debug, error, info, warn};

/// Failure message for tests whose required configuration can't be created on the device.
pub const REQUIRED_CONFIG_NOT_SUPPORTED_MESSAGE: &str = "Required config not supported";

/// Failure message for tests whose configuration support could not be determined.
pub const CAPABILITY_QUERY_FAILED_MESSAGE: &str = "Capability query failed";

#[derive(Debug)]
pub(super) struct RunSettings {
    pub(super) package: Option<DeqpPackage>,
    pub(super) case_list_file: Option<String>,
    pub(super) mode: RunMode,
    pub(super) collect_only: bool,
    pub(super) angle: AngleBackend,
    pub(super) options: InstrumentationOptions,
    pub(super) scheduler: BatchScheduler,
}

/// Turns finalized tests into events and keeps run statistics.
pub(super) struct CallbackContext<F> {
    callback: F,
    stopwatch: StopwatchStart,
    run_stats: RunStats,
}

impl<F> CallbackContext<F>
where
    F: FnMut(TestEvent<'_>) -> Result<(), WriteEventError>,
{
    pub(super) fn new(callback: F, initial_run_count: usize) -> Self {
        Self {
            callback,
            stopwatch: StopwatchStart::now(),
            run_stats: RunStats {
                initial_run_count,
                ..RunStats::default()
            },
        }
    }

    pub(super) fn run_started(&mut self) -> Result<(), WriteEventError> {
        (self.callback)(TestEvent::RunStarted {
            test_count: self.run_stats.initial_run_count,
        })
    }

    fn test_finalized(&mut self, finalized: &FinalizedTest) -> Result<(), WriteEventError> {
        let test = &finalized.test;
        (self.callback)(TestEvent::TestStarted { test })?;
        for (name, contents) in &finalized.logs {
            (self.callback)(TestEvent::TestLog {
                test,
                name: name.as_str(),
                contents: contents.as_str(),
            })?;
        }
        let status = match &finalized.failure {
            Some(message) => {
                (self.callback)(TestEvent::TestFailed {
                    test,
                    message: message.as_str(),
                })?;
                TestStatus::Fail
            }
            None => TestStatus::Pass,
        };
        self.run_stats.on_test_finished(status);
        (self.callback)(TestEvent::TestFinished { test, status })
    }

    fn trivial_pass(&mut self, test: &TestId) -> Result<(), WriteEventError> {
        (self.callback)(TestEvent::TestStarted { test })?;
        self.run_stats.on_test_finished(TestStatus::Pass);
        (self.callback)(TestEvent::TestFinished {
            test,
            status: TestStatus::Pass,
        })
    }

    pub(super) fn run_finished(&mut self) -> Result<RunStats, WriteEventError> {
        let stopwatch_end = self.stopwatch.end();
        (self.callback)(TestEvent::RunFinished {
            start_time: stopwatch_end.start_time,
            elapsed: stopwatch_end.duration,
            run_stats: self.run_stats,
        })?;
        Ok(self.run_stats)
    }
}

/// Mutable state owned by a single run.
#[derive(Debug)]
pub(super) struct RunState {
    tracker: ResultTracker,
    instability: InstabilityTracker,
    support_cache: ConfigSupportCache,
    features: Option<DeviceFeatures>,
    recovery: Recovery,
}

impl RunState {
    pub(super) fn new(tracker: ResultTracker, recovery: Recovery) -> Self {
        Self {
            tracker,
            instability: InstabilityTracker::new(),
            support_cache: ConfigSupportCache::new(),
            features: None,
            recovery,
        }
    }
}

#[derive(Debug)]
struct StreamOutcome {
    error: Option<TransportError>,
    saw_exit_code: bool,
}

/// The top-level loop: selects batches, runs them on the device and splits them on failure.
pub(super) struct ExecutionEngine<'a, F> {
    device: &'a mut dyn Device,
    settings: &'a RunSettings,
    cancel: &'a CancelToken,
    state: RunState,
    ctx: &'a mut CallbackContext<F>,
}

impl<'a, F> ExecutionEngine<'a, F>
where
    F: FnMut(TestEvent<'_>) -> Result<(), WriteEventError>,
{
    pub(super) fn new(
        device: &'a mut dyn Device,
        settings: &'a RunSettings,
        cancel: &'a CancelToken,
        state: RunState,
        ctx: &'a mut CallbackContext<F>,
    ) -> Self {
        Self {
            device,
            settings,
            cancel,
            state,
            ctx,
        }
    }

    pub(super) fn run(mut self) -> Result<(), RunError> {
        if self.state.tracker.remaining_len() == 0 {
            debug!("no tests to run");
            return Ok(());
        }

        match self.preflight() {
            Ok(true) => {}
            Ok(false) => return self.trivial_pass(),
            Err(CapabilityQueryError::Transport(error)) => {
                return Err(RunError::DeviceUnavailable { error });
            }
            Err(error) => {
                error!(%error, "capability query failed, leaving remaining tests unexecuted");
                return Ok(());
            }
        }

        self.settings
            .angle
            .setup(&mut *self.device)
            .map_err(|error| RunError::DeviceUnavailable { error })?;
        let result = self.run_all();
        let teardown = self
            .settings
            .angle
            .teardown(&mut *self.device)
            .map_err(|error| RunError::DeviceUnavailable { error });
        result.and(teardown)
    }

    /// Returns false if every test should be passed without running anything.
    fn preflight(&mut self) -> Result<bool, CapabilityQueryError> {
        if self.settings.collect_only {
            info!("collecting tests only, passing every test without running it");
            return Ok(false);
        }
        let Some(package) = self.settings.package else {
            return Ok(true);
        };

        let api_supported = match package.gles_version() {
            Some(version) => is_gles_version_supported(&mut *self.device, version)?,
            None if package == DeqpPackage::Vk => self.features()?.supports_vulkan(),
            None => true,
        };
        if !api_supported {
            info!(%package, "device does not support the API under test");
            return Ok(false);
        }

        let Some(level) = self
            .settings
            .case_list_file
            .as_deref()
            .and_then(required_deqp_level)
        else {
            return Ok(true);
        };
        let claimed = self.features()?.claims_deqp_level(package, level)?;
        if !claimed {
            info!(%package, level, "device does not claim the dEQP level of the case list");
        }
        Ok(claimed)
    }

    fn trivial_pass(&mut self) -> Result<(), RunError> {
        let tests = self.state.tracker.take_remaining();
        debug!(count = tests.len(), "passing tests without running them");
        for test in &tests {
            self.ctx.trivial_pass(test).map_err(RunError::Reporter)?;
        }
        Ok(())
    }

    fn run_all(&mut self) -> Result<(), RunError> {
        while let Some(batch) = self.settings.scheduler.select_batch(
            self.state.tracker.remaining(),
            None,
            &self.state.tracker,
            &self.state.instability,
        ) {
            self.dispatch(batch)?;
        }

        let stranded = self.state.tracker.fail_remaining(INCOMPLETE_LOG_MESSAGE);
        if stranded > 0 {
            error!(count = stranded, "tests left with no pending instance, failing them");
            self.report_finalized()?;
        }
        Ok(())
    }

    /// Runs a batch on the device, or fakes its results if the device can't run it.
    fn dispatch(&mut self, mut batch: TestBatch) -> Result<(), RunError> {
        let settings = self.settings;
        let tracker = &mut self.state.tracker;
        tracker.set_current_config(batch.config.clone());
        for test in &batch.tests {
            let configs = tracker
                .instances()
                .configs(test)
                .cloned()
                .unwrap_or_default();
            tracker.register(test, configs);
        }

        if let RunMode::Incremental { include } = &settings.mode {
            let (run, skip): (Vec<_>, Vec<_>) = std::mem::take(&mut batch.tests)
                .into_iter()
                .partition(|test| include.contains(&test.path()));
            for test in &skip {
                debug!(test = %test, config = %batch.config, "not in incremental set, passing without running");
                self.state.tracker.skip(test);
            }
            self.report_finalized()?;
            if run.is_empty() {
                return Ok(());
            }
            batch.tests = run;
        }

        match self.check_support(&batch.config)? {
            Some(true) => self.execute(batch),
            Some(false) => {
                let required = batch.config.is_required();
                for test in &batch.tests {
                    if required {
                        debug!(test = %test, config = %batch.config, "failing test without running it");
                        self.state
                            .tracker
                            .abort(test, REQUIRED_CONFIG_NOT_SUPPORTED_MESSAGE);
                    } else {
                        debug!(test = %test, config = %batch.config, "passing test without running it");
                        self.state.tracker.skip(test);
                    }
                }
                self.report_finalized()
            }
            None => {
                for test in &batch.tests {
                    self.state
                        .tracker
                        .abort(test, CAPABILITY_QUERY_FAILED_MESSAGE);
                }
                self.report_finalized()
            }
        }
    }

    /// Returns whether the device supports `config`, or `None` if that couldn't be determined.
    fn check_support(&mut self, config: &RunConfig) -> Result<Option<bool>, RunError> {
        loop {
            match self.is_supported(config) {
                Ok(supported) => return Ok(Some(supported)),
                Err(CapabilityQueryError::Transport(error)) => {
                    self.state.recovery.recover(&mut *self.device, error)?;
                }
                Err(error) => {
                    error!(%error, config = %config, "capability query failed");
                    return Ok(None);
                }
            }
        }
    }

    fn is_supported(&mut self, config: &RunConfig) -> Result<bool, CapabilityQueryError> {
        let rotation = config.rotation();
        if rotation != ScreenRotation::Unspecified && !self.features()?.supports_rotation(rotation)
        {
            return Ok(false);
        }

        match self.settings.package.and_then(DeqpPackage::gles_version) {
            Some(version) => self.state.support_cache.is_render_config_supported(
                &mut *self.device,
                &self.settings.options,
                config,
                version,
            ),
            None => Ok(true),
        }
    }

    fn features(&mut self) -> Result<&DeviceFeatures, CapabilityQueryError> {
        let features = match self.state.features.take() {
            Some(features) => features,
            None => DeviceFeatures::query(&mut *self.device)?,
        };
        Ok(&*self.state.features.insert(features))
    }

    /// Runs a batch once, then splits whatever is still pending in half and runs each half.
    fn execute(&mut self, batch: TestBatch) -> Result<(), RunError> {
        self.attempt(&batch)?;

        let pending: Vec<TestId> = batch
            .tests
            .iter()
            .filter(|test| self.state.tracker.is_pending(test, &batch.config))
            .cloned()
            .collect();
        let (head, tail) = pending.split_at(pending.len() / 2);
        for half in [head, tail] {
            while let Some(sub_batch) = self.settings.scheduler.select_batch(
                half,
                Some(&batch.config),
                &self.state.tracker,
                &self.state.instability,
            ) {
                self.execute(sub_batch)?;
            }
        }

        let leftover: Vec<TestId> = batch
            .tests
            .iter()
            .filter(|test| self.state.tracker.is_pending(test, &batch.config))
            .cloned()
            .collect();
        if leftover.is_empty() {
            return Ok(());
        }
        error!(
            config = %batch.config,
            count = leftover.len(),
            "instances still pending after executing batch, failing them",
        );
        self.state.tracker.set_current_config(batch.config.clone());
        for test in &leftover {
            self.state.tracker.abort(test, NOT_EXECUTABLE_LOG_MESSAGE);
        }
        self.report_finalized()
    }

    /// Runs a batch on the device once.
    fn attempt(&mut self, batch: &TestBatch) -> Result<(), RunError> {
        debug_assert!(
            batch
                .tests
                .iter()
                .all(|test| self.state.tracker.is_pending(test, &batch.config)),
            "every test in an attempted batch is pending",
        );
        if self.cancel.is_cancelled() {
            return Err(RunError::Cancelled);
        }

        self.state.tracker.set_current_config(batch.config.clone());
        let remaining_before = self.state.tracker.remaining_instance_count();
        let StreamOutcome {
            error,
            saw_exit_code,
        } = self.run_instrumentation(batch);

        let progressed = self.state.tracker.current_test().is_some()
            || self.state.tracker.remaining_instance_count() < remaining_before;
        if progressed {
            self.state.recovery.on_progress();
        }

        let link_failure = error.is_some() || !saw_exit_code;
        let recovered = match error {
            Some(error) => self.state.recovery.recover(&mut *self.device, error),
            None if !saw_exit_code => {
                let error = TransportError::LinkKilled {
                    serial: self.device.serial().to_owned(),
                    reason: "instrumentation ended without an exit code".to_owned(),
                };
                self.state.recovery.recover_link_killed(&mut *self.device, error)
            }
            None => Ok(()),
        };
        if let Err(error) = recovered {
            self.state.tracker.end_of_stream();
            self.report_finalized()?;
            return Err(error);
        }

        self.update_instability(batch, link_failure);
        self.state.tracker.end_of_stream();
        self.report_finalized()
    }

    fn run_instrumentation(&mut self, batch: &TestBatch) -> StreamOutcome {
        let mut parser = StatusStreamParser::new();
        let result = self.stream_batch(batch, &mut parser);
        if let Some(event) = parser.finish().and_then(|record| record.to_event()) {
            self.state.tracker.on_event(event);
        }
        StreamOutcome {
            error: result.err(),
            saw_exit_code: parser.saw_exit_code(),
        }
    }

    fn stream_batch(
        &mut self,
        batch: &TestBatch,
        parser: &mut StatusStreamParser,
    ) -> Result<(), TransportError> {
        let device = &mut *self.device;
        device.shell(&format!("rm {CASE_LIST_PATH}"))?;
        device.shell(&format!("rm {LOG_PATH}"))?;
        let trie = test_case_trie(&batch.tests);
        device.push_string(&format!("{trie}\n"), CASE_LIST_PATH)?;

        let command = self.settings.options.execute_command(&batch.config);
        let tracker = &mut self.state.tracker;
        debug!(config = %batch.config, size = batch.tests.len(), "running batch");
        device.shell_streaming(&command, &mut |line: &str| {
            if let Some(event) = parser.push_line(line).and_then(|record| record.to_event()) {
                tracker.on_event(event);
            }
        })
    }

    /// Attributes the outcome of an attempt to the tests in the batch.
    fn update_instability(&mut self, batch: &TestBatch, link_failure: bool) {
        let RunState {
            tracker,
            instability,
            ..
        } = &mut self.state;
        let open = tracker.current_test().cloned();

        if let [test] = batch.tests.as_slice() {
            let executed = !tracker.is_pending(test, &batch.config) && open.is_none();
            if executed {
                instability.clear(test);
                return;
            }

            // A link failure may have an external cause, so the first one is not held against
            // the test.
            let first_link_failure = link_failure && instability.rating(test) == 0;
            instability.record(test);
            if first_link_failure {
                debug!(test = %test, "link failed on first observation, retrying");
                return;
            }
            let message = if open.is_some() {
                INCOMPLETE_LOG_MESSAGE
            } else {
                NOT_EXECUTABLE_LOG_MESSAGE
            };
            warn!(test = %test, config = %batch.config, message, "giving up on test");
            tracker.abort(test, message);
            return;
        }

        match &open {
            None => {
                for test in &batch.tests {
                    if tracker.is_pending(test, &batch.config) {
                        instability.record(test);
                    } else {
                        instability.clear(test);
                    }
                }
            }
            Some(open) => {
                instability.record(open);
                for test in &batch.tests {
                    // The open test is not pending, but it hasn't completed either.
                    if test != open && !tracker.is_pending(test, &batch.config) {
                        instability.clear(test);
                    }
                }
            }
        }
    }

    fn report_finalized(&mut self) -> Result<(), RunError> {
        for finalized in self.state.tracker.drain_finalized() {
            self.ctx
                .test_finalized(&finalized)
                .map_err(RunError::Reporter)?;
        }
        Ok(())
    }
}
