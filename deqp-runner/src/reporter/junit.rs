// Copyright (c) The deqp-runner Contributors
// SPDX-License-Identifier: Apache-2.0

//! Aggregate test results into a JUnit XML report.

use crate::{
    errors::WriteEventError,
    list::TestId,
    reporter::events::{TestEvent, TestStatus},
};
use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, FixedOffset, Utc};
use debug_ignore::DebugIgnore;
use indexmap::IndexMap;
use quick_junit::{NonSuccessKind, Report, TestCase, TestCaseStatus, TestSuite};
use std::{fs::File, time::SystemTime};
use swrite::{SWrite, swriteln};

/// Writes a JUnit XML report once the run is finished.
///
/// Tests are grouped into one suite per class path.
#[derive(Debug)]
pub struct JunitReporter {
    path: Utf8PathBuf,
    report_name: String,
    store_logs: bool,
    test_suites: DebugIgnore<IndexMap<String, TestSuite>>,
    current: Option<PendingCase>,
}

#[derive(Debug, Default)]
struct PendingCase {
    message: Option<String>,
    logs: String,
}

impl JunitReporter {
    /// Creates a new reporter that writes to `path`.
    pub fn new(path: impl Into<Utf8PathBuf>, report_name: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            report_name: report_name.into(),
            store_logs: true,
            test_suites: DebugIgnore(IndexMap::new()),
            current: None,
        }
    }

    /// Sets whether captured test logs are stored as the test case's system output.
    pub fn set_store_logs(&mut self, store_logs: bool) -> &mut Self {
        self.store_logs = store_logs;
        self
    }

    /// Returns the path the report is written to.
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    /// Records an event, writing out the report on [`TestEvent::RunFinished`].
    pub fn write_event(&mut self, event: &TestEvent<'_>) -> Result<(), WriteEventError> {
        match event {
            TestEvent::RunStarted { .. } => {}
            TestEvent::TestStarted { .. } => {
                self.current = Some(PendingCase::default());
            }
            TestEvent::TestLog { name, contents, .. } => {
                if self.store_logs {
                    let pending = self.current.get_or_insert_with(PendingCase::default);
                    swriteln!(pending.logs, "--- {name} ---");
                    pending.logs.push_str(contents);
                    if !contents.ends_with('\n') {
                        pending.logs.push('\n');
                    }
                }
            }
            TestEvent::TestFailed { message, .. } => {
                let pending = self.current.get_or_insert_with(PendingCase::default);
                pending.message = Some((*message).to_owned());
            }
            TestEvent::TestFinished { test, status } => {
                let pending = self.current.take().unwrap_or_default();
                self.add_test_case(test, *status, pending);
            }
            TestEvent::RunFinished {
                start_time,
                elapsed,
                ..
            } => {
                let mut report = Report::new(self.report_name.as_str());
                report
                    .set_timestamp(to_datetime(*start_time))
                    .set_time(*elapsed)
                    .add_test_suites(self.test_suites.drain(..).map(|(_, suite)| suite));
                self.write_report(&report)?;
            }
        }
        Ok(())
    }

    fn add_test_case(&mut self, test: &TestId, status: TestStatus, pending: PendingCase) {
        let testcase_status = match status {
            TestStatus::Pass => TestCaseStatus::success(),
            TestStatus::Fail => {
                let mut testcase_status = TestCaseStatus::non_success(NonSuccessKind::Failure);
                if let Some(message) = &pending.message {
                    // The first line that is not a config header summarizes the failure.
                    let summary = message
                        .lines()
                        .find(|line| !line.starts_with("==="))
                        .unwrap_or(message.as_str());
                    testcase_status
                        .set_message(summary)
                        .set_description(message.as_str());
                }
                testcase_status
            }
        };

        let mut testcase = TestCase::new(test.test_name(), testcase_status);
        testcase.set_classname(test.class_name());
        if !pending.logs.is_empty() {
            testcase.set_system_out(pending.logs);
        }

        self.test_suites
            .entry(test.class_name().to_owned())
            .or_insert_with(|| TestSuite::new(test.class_name()))
            .add_test_case(testcase);
    }

    fn write_report(&self, report: &Report) -> Result<(), WriteEventError> {
        if let Some(dir) = self.path.parent().filter(|dir| !dir.as_str().is_empty()) {
            std::fs::create_dir_all(dir).map_err(|error| WriteEventError::Fs {
                file: dir.to_path_buf(),
                error,
            })?;
        }

        let f = File::create(&self.path).map_err(|error| WriteEventError::Fs {
            file: self.path.clone(),
            error,
        })?;
        report
            .serialize(f)
            .map_err(|error| WriteEventError::Junit {
                file: self.path.clone(),
                error,
            })
    }
}

fn to_datetime(system_time: SystemTime) -> DateTime<FixedOffset> {
    DateTime::<Utc>::from(system_time).into()
}
