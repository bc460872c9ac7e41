// Copyright (c) The deqp-runner Contributors
// SPDX-License-Identifier: Apache-2.0

use crate::{
    errors::WriteEventError,
    list::TestId,
    reporter::events::{RunStats, TestEvent, TestStatus},
};
use owo_colors::{OwoColorize, Style};
use std::io::{self, Write};

/// Test reporter builder.
#[derive(Debug, Default)]
pub struct TestReporterBuilder {
    show_logs: bool,
    hide_passes: bool,
}

impl TestReporterBuilder {
    /// Sets whether captured test logs are printed.
    pub fn set_show_logs(&mut self, show_logs: bool) -> &mut Self {
        self.show_logs = show_logs;
        self
    }

    /// Sets whether lines for passing tests are omitted.
    pub fn set_hide_passes(&mut self, hide_passes: bool) -> &mut Self {
        self.hide_passes = hide_passes;
        self
    }

    /// Creates a new test reporter.
    pub fn build(&self) -> TestReporter {
        TestReporter {
            show_logs: self.show_logs,
            hide_passes: self.hide_passes,
            styles: Box::default(),
            pending_message: None,
            failed_tests: Vec::new(),
        }
    }
}

/// Functionality to report test results to a terminal.
#[derive(Debug)]
pub struct TestReporter {
    show_logs: bool,
    hide_passes: bool,
    styles: Box<Styles>,
    // The failure message of the test currently being reported.
    pending_message: Option<String>,
    failed_tests: Vec<TestId>,
}

impl TestReporter {
    /// Colorizes output.
    pub fn colorize(&mut self) {
        self.styles.colorize();
    }

    /// Writes an event to the given writer.
    pub fn report_event(
        &mut self,
        event: &TestEvent<'_>,
        mut writer: impl Write,
    ) -> Result<(), WriteEventError> {
        self.write_event(event, &mut writer)
            .map_err(WriteEventError::Io)
    }

    fn write_event(&mut self, event: &TestEvent<'_>, writer: &mut dyn Write) -> io::Result<()> {
        match event {
            TestEvent::RunStarted { test_count } => {
                write!(writer, "{:>12} ", "Starting".style(self.styles.pass))?;
                let tests_str = if *test_count == 1 { "test" } else { "tests" };
                writeln!(
                    writer,
                    "{} {tests_str}",
                    test_count.style(self.styles.count)
                )?;
            }
            TestEvent::TestStarted { .. } => {
                self.pending_message = None;
            }
            TestEvent::TestLog {
                test: _,
                name,
                contents,
            } => {
                if self.show_logs {
                    writeln!(
                        writer,
                        "{:>12} {}",
                        "LOG".style(self.styles.skip),
                        name.style(self.styles.test_name),
                    )?;
                    for line in contents.lines() {
                        writeln!(writer, "             {line}")?;
                    }
                }
            }
            TestEvent::TestFailed { message, .. } => {
                self.pending_message = Some((*message).to_owned());
            }
            TestEvent::TestFinished { test, status } => {
                match status {
                    TestStatus::Pass => {
                        if !self.hide_passes {
                            write!(writer, "{:>12} ", "PASS".style(self.styles.pass))?;
                            self.write_test_id(test, writer)?;
                            writeln!(writer)?;
                        }
                    }
                    TestStatus::Fail => {
                        write!(writer, "{:>12} ", "FAIL".style(self.styles.fail))?;
                        self.write_test_id(test, writer)?;
                        writeln!(writer)?;
                        if let Some(message) = self.pending_message.take() {
                            for line in message.lines() {
                                writeln!(
                                    writer,
                                    "             {}",
                                    line.style(self.styles.fail_output)
                                )?;
                            }
                        }
                        self.failed_tests.push((*test).clone());
                    }
                }
                self.pending_message = None;
            }
            TestEvent::RunFinished {
                start_time: _,
                elapsed,
                run_stats,
            } => {
                self.write_summary(elapsed.as_secs_f64(), run_stats, writer)?;
            }
        }
        Ok(())
    }

    fn write_summary(
        &self,
        elapsed_secs: f64,
        run_stats: &RunStats,
        writer: &mut dyn Write,
    ) -> io::Result<()> {
        writeln!(writer, "------------")?;
        let summary_style = if run_stats.is_success() {
            self.styles.pass
        } else {
            self.styles.fail
        };
        write!(writer, "{:>12} ", "Summary".style(summary_style))?;

        // Right-align to 8 characters, with 3 digits after the decimal point.
        write!(writer, "[{elapsed_secs:>8.3}s] ")?;

        write!(writer, "{}", run_stats.final_run_count.style(self.styles.count))?;
        if run_stats.final_run_count != run_stats.initial_run_count {
            write!(
                writer,
                "/{}",
                run_stats.initial_run_count.style(self.styles.count)
            )?;
        }
        write!(
            writer,
            " tests run: {} {}",
            run_stats.passed.style(self.styles.count),
            "passed".style(self.styles.pass),
        )?;
        if run_stats.failed > 0 {
            write!(
                writer,
                ", {} {}",
                run_stats.failed.style(self.styles.count),
                "failed".style(self.styles.fail),
            )?;
        }
        writeln!(writer)?;

        for test in &self.failed_tests {
            write!(writer, "{:>12} ", "FAIL".style(self.styles.fail))?;
            self.write_test_id(test, writer)?;
            writeln!(writer)?;
        }
        Ok(())
    }

    fn write_test_id(&self, test: &TestId, writer: &mut dyn Write) -> io::Result<()> {
        write!(
            writer,
            "{}.{}",
            test.class_name().style(self.styles.class_name),
            test.test_name().style(self.styles.test_name),
        )
    }
}

#[derive(Debug, Default)]
struct Styles {
    count: Style,
    pass: Style,
    fail: Style,
    skip: Style,
    fail_output: Style,
    class_name: Style,
    test_name: Style,
}

impl Styles {
    fn colorize(&mut self) {
        self.count = Style::new().bold();
        self.pass = Style::new().green().bold();
        self.fail = Style::new().red().bold();
        self.skip = Style::new().yellow().bold();
        self.fail_output = Style::new().magenta();
        self.class_name = Style::new().magenta().bold();
        self.test_name = Style::new().blue().bold();
    }
}
