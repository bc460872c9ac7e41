// Copyright (c) The deqp-runner Contributors
// SPDX-License-Identifier: Apache-2.0

use crate::output::StderrStyles;
use camino::Utf8PathBuf;
use deqp_runner::errors::*;
use owo_colors::OwoColorize;
use std::error::Error;
use thiserror::Error;

/// Documented exit codes for `deqp-run` failures.
///
/// Unknown or unexpected failures always result in exit code 1.
pub enum DeqpExitCode {}

impl DeqpExitCode {
    /// No errors occurred and every test passed.
    pub const OK: i32 = 0;

    /// One or more tests failed.
    pub const TEST_RUN_FAILED: i32 = 100;

    /// The device could not be brought back after the recovery ladder was exhausted.
    pub const DEVICE_UNAVAILABLE: i32 = 101;

    /// No tests were selected to run, but no other errors occurred.
    pub const NO_TESTS_RUN: i32 = 4;

    /// A user issue happened while setting up a run: bad config, filters or case lists.
    pub const SETUP_ERROR: i32 = 96;

    /// Writing results to the console or a report produced an error.
    pub const WRITE_OUTPUT_ERROR: i32 = 110;

    /// The run was interrupted.
    pub const INTERRUPTED: i32 = 130;
}

// The #[error()] strings are placeholders: errors are meant to be printed with
// display_to_stderr, which also prints the cause chain.

/// An expected error, caused by the environment rather than a bug in deqp-run.
#[derive(Debug, Error)]
#[doc(hidden)]
pub enum ExpectedError {
    #[error("could not determine current directory")]
    CurrentDirFailed {
        #[source]
        err: std::io::Error,
    },
    #[error("config parse error")]
    ConfigParseError {
        #[from]
        err: ConfigParseError,
    },
    #[error("profile not found")]
    ProfileNotFound {
        #[from]
        err: ProfileNotFound,
    },
    #[error("case list read error")]
    TestListReadError {
        #[from]
        err: TestListReadError,
    },
    #[error("filter file read error")]
    FilterReadError {
        #[from]
        err: FilterReadError,
    },
    #[error("filter build error")]
    TestFilterBuildError {
        #[from]
        err: TestFilterBuildError,
    },
    #[error("argument file read error")]
    ArgumentFileReadError {
        arg_name: &'static str,
        file_name: Utf8PathBuf,
        #[source]
        err: std::io::Error,
    },
    #[error("signal handler setup error")]
    SignalHandlerSetupError {
        #[from]
        err: SignalHandlerSetupError,
    },
    #[error("test run error")]
    RunError {
        #[from]
        err: RunError,
    },
    #[error("test run failed")]
    TestRunFailed,
}

impl ExpectedError {
    pub(crate) fn current_dir_failed(err: std::io::Error) -> Self {
        Self::CurrentDirFailed { err }
    }

    pub(crate) fn argument_file_read_error(
        arg_name: &'static str,
        file_name: impl Into<Utf8PathBuf>,
        err: std::io::Error,
    ) -> Self {
        Self::ArgumentFileReadError {
            arg_name,
            file_name: file_name.into(),
            err,
        }
    }

    pub(crate) fn test_run_failed() -> Self {
        Self::TestRunFailed
    }

    /// Returns the exit code for the process.
    pub fn process_exit_code(&self) -> i32 {
        match self {
            Self::CurrentDirFailed { .. }
            | Self::ConfigParseError { .. }
            | Self::ProfileNotFound { .. }
            | Self::TestListReadError { .. }
            | Self::FilterReadError { .. }
            | Self::TestFilterBuildError { .. }
            | Self::ArgumentFileReadError { .. }
            | Self::SignalHandlerSetupError { .. } => DeqpExitCode::SETUP_ERROR,
            Self::RunError { err } => match err {
                RunError::DeviceUnavailable { .. } => DeqpExitCode::DEVICE_UNAVAILABLE,
                RunError::Cancelled => DeqpExitCode::INTERRUPTED,
                RunError::Reporter(_) => DeqpExitCode::WRITE_OUTPUT_ERROR,
                _ => 1,
            },
            Self::TestRunFailed => DeqpExitCode::TEST_RUN_FAILED,
        }
    }

    /// Displays this error to stderr.
    pub fn display_to_stderr(&self, styles: &StderrStyles) {
        let mut next_error = match &self {
            Self::CurrentDirFailed { err } => {
                tracing::error!("could not determine current directory");
                Some(err as &dyn Error)
            }
            Self::ConfigParseError { err } => {
                tracing::error!(
                    "failed to parse config file {}",
                    err.config_file().style(styles.bold)
                );
                Some(err.kind() as &dyn Error)
            }
            Self::ProfileNotFound { err } => {
                tracing::error!("{err}");
                err.source()
            }
            Self::TestListReadError { err } => {
                tracing::error!("{err}");
                err.source()
            }
            Self::FilterReadError { err } => {
                tracing::error!("{err}");
                err.source()
            }
            Self::TestFilterBuildError { err } => {
                tracing::error!("{err}");
                err.source()
            }
            Self::ArgumentFileReadError {
                arg_name,
                file_name,
                err,
            } => {
                tracing::error!(
                    "failed to read `{}` file {}",
                    format!("--{arg_name}").style(styles.bold),
                    file_name.style(styles.bold)
                );
                Some(err as &dyn Error)
            }
            Self::SignalHandlerSetupError { err } => {
                tracing::error!("{err}");
                err.source()
            }
            Self::RunError { err } => match err {
                RunError::Cancelled => {
                    tracing::warn!("test run cancelled");
                    None
                }
                _ => {
                    tracing::error!("{err}");
                    err.source()
                }
            },
            Self::TestRunFailed => {
                tracing::error!("test run failed");
                None
            }
        };

        while let Some(err) = next_error {
            tracing::error!(target: "deqp_run::no_heading", "\nCaused by:\n  {}", err);
            next_error = err.source();
        }
    }
}
