// Copyright (c) The deqp-runner Contributors
// SPDX-License-Identifier: Apache-2.0

//! Errors produced by deqp-runner.

use crate::list::ScreenRotation;
use camino::Utf8PathBuf;
use config::ConfigError;
use std::{fmt, io};
use thiserror::Error;

/// An error that occurred while parsing the config.
#[derive(Debug, Error)]
#[error("failed to parse deqp-runner config at `{config_file}`")]
#[non_exhaustive]
pub struct ConfigParseError {
    config_file: Utf8PathBuf,
    #[source]
    kind: ConfigParseErrorKind,
}

impl ConfigParseError {
    pub(crate) fn new(config_file: impl Into<Utf8PathBuf>, kind: ConfigParseErrorKind) -> Self {
        Self {
            config_file: config_file.into(),
            kind,
        }
    }

    /// Returns the config file for this error.
    pub fn config_file(&self) -> &Utf8PathBuf {
        &self.config_file
    }

    /// Returns the kind of error.
    pub fn kind(&self) -> &ConfigParseErrorKind {
        &self.kind
    }
}

/// The kind of error that occurred while parsing a config.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigParseErrorKind {
    /// An error occurred while building the config.
    #[error(transparent)]
    BuildError(Box<ConfigError>),

    /// An error occurred while deserializing the config.
    #[error(transparent)]
    DeserializeError(Box<serde_path_to_error::Error<ConfigError>>),
}

/// An error which indicates that a profile was requested but not defined in the config.
#[derive(Clone, Debug, Error)]
#[error("profile `{profile}` not found (known profiles: {})", .all_profiles.join(", "))]
pub struct ProfileNotFound {
    profile: String,
    all_profiles: Vec<String>,
}

impl ProfileNotFound {
    pub(crate) fn new(
        profile: impl Into<String>,
        all_profiles: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        let mut all_profiles: Vec<_> = all_profiles.into_iter().map(|s| s.into()).collect();
        all_profiles.sort_unstable();
        Self {
            profile: profile.into(),
            all_profiles,
        }
    }
}

/// Error returned while parsing a [`ScreenRotation`] value from a string.
#[derive(Clone, Debug, Error)]
#[error(
    "unrecognized value for screen rotation: {input}\n(known values: {})",
    ScreenRotation::variants().join(", "),
)]
pub struct RotationParseError {
    input: String,
}

impl RotationParseError {
    pub(crate) fn new(input: impl Into<String>) -> Self {
        Self {
            input: input.into(),
        }
    }
}

/// Error returned while parsing an [`AngleBackend`](crate::runner::AngleBackend) value.
#[derive(Clone, Debug, Error)]
#[error(
    "unrecognized value for ANGLE backend: {input}\n(known values: {})",
    crate::runner::AngleBackend::variants().join(", "),
)]
pub struct AngleBackendParseError {
    input: String,
}

impl AngleBackendParseError {
    pub(crate) fn new(input: impl Into<String>) -> Self {
        Self {
            input: input.into(),
        }
    }
}

/// An error that occurred while reading a test case list.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TestListReadError {
    /// A case list file could not be read.
    #[error("error reading case list `{path}`")]
    Read {
        /// The file that could not be read.
        path: Utf8PathBuf,

        /// The underlying error.
        #[source]
        error: io::Error,
    },

    /// A case list includes itself, directly or indirectly.
    #[error("case list `{path}` includes itself")]
    IncludeCycle {
        /// The file that was included twice.
        path: Utf8PathBuf,
    },
}

/// An error that occurred while reading a filter file.
#[derive(Debug, Error)]
#[error("error reading filter file `{path}`")]
pub struct FilterReadError {
    path: Utf8PathBuf,
    #[source]
    error: io::Error,
}

impl FilterReadError {
    pub(crate) fn new(path: impl Into<Utf8PathBuf>, error: io::Error) -> Self {
        Self {
            path: path.into(),
            error,
        }
    }
}

/// An error that occurred while compiling a glob filter.
#[derive(Debug, Error)]
#[error("invalid filter pattern `{pattern}`")]
pub struct TestFilterBuildError {
    pattern: String,
    #[source]
    error: regex::Error,
}

impl TestFilterBuildError {
    pub(crate) fn new(pattern: impl Into<String>, error: regex::Error) -> Self {
        Self {
            pattern: pattern.into(),
            error,
        }
    }
}

/// A failure of the command channel to a device.
///
/// These are the only errors the recovery ladder reacts to.
#[derive(Debug, Error)]
pub enum TransportError {
    /// A connection to the device could not be opened.
    #[error("could not connect to device `{serial}`")]
    ConnectionRefused {
        /// The serial number of the device.
        serial: String,

        /// The underlying error.
        #[source]
        error: io::Error,
    },

    /// An open connection to the device died, or stopped responding.
    #[error("link to device `{serial}` was lost: {reason}")]
    LinkKilled {
        /// The serial number of the device.
        serial: String,

        /// A description of what happened.
        reason: String,
    },
}

impl TransportError {
    /// Returns the kind of failure this error represents.
    pub fn failure_kind(&self) -> TransportFailureKind {
        match self {
            Self::ConnectionRefused { .. } => TransportFailureKind::ConnectionRefused,
            Self::LinkKilled { .. } => TransportFailureKind::LinkKilled,
        }
    }
}

/// The two kinds of transport failure, without any payload.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TransportFailureKind {
    /// See [`TransportError::ConnectionRefused`].
    ConnectionRefused,

    /// See [`TransportError::LinkKilled`].
    LinkKilled,
}

impl fmt::Display for TransportFailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConnectionRefused => f.write_str("connection refused"),
            Self::LinkKilled => f.write_str("link killed"),
        }
    }
}

/// An error that occurred while querying device capabilities.
///
/// A capability query failure only aborts the query itself.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CapabilityQueryError {
    /// The query command could not be run.
    #[error("capability query could not be sent")]
    Transport(#[from] TransportError),

    /// The query finished without reporting an exit code.
    #[error("capability query did not report an exit code")]
    MissingExitCode,

    /// The query reported a non-zero exit code.
    #[error("capability query exited with code {code}")]
    ExitCode {
        /// The exit code.
        code: i32,
    },

    /// The `Supported` result was missing or not one of `Yes` and `No`.
    #[error("capability query returned unexpected `Supported` value: {}", .value.as_deref().unwrap_or("(missing)"))]
    InvalidSupported {
        /// The value that was returned, if any.
        value: Option<String>,
    },

    /// A line of `pm list features` output could not be parsed.
    #[error("unexpected feature line `{line}`")]
    InvalidFeatureLine {
        /// The offending token.
        line: String,
    },

    /// A feature version could not be decoded.
    #[error("feature `{name}` has invalid version `{value}`")]
    InvalidFeatureVersion {
        /// The feature name.
        name: String,

        /// The version text.
        value: String,
    },

    /// A feature that must carry a version did not.
    #[error("feature `{name}` has no version")]
    MissingFeatureVersion {
        /// The feature name.
        name: String,
    },

    /// A system property could not be parsed.
    #[error("system property `{name}` has invalid value `{value}`")]
    InvalidProperty {
        /// The property name.
        name: String,

        /// The property value.
        value: String,
    },
}

/// An error that occurred while writing an event to a reporter.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum WriteEventError {
    /// An error occurred while writing the event to the provided output.
    #[error("error writing to output")]
    Io(#[source] io::Error),

    /// An error occurred while operating on the file system.
    #[error("error operating on path {file}")]
    Fs {
        /// The file being operated on.
        file: Utf8PathBuf,

        /// The underlying IO error.
        #[source]
        error: io::Error,
    },

    /// An error occurred while producing JUnit XML.
    #[error("error writing JUnit output to {file}")]
    Junit {
        /// The output file.
        file: Utf8PathBuf,

        /// The underlying error.
        #[source]
        error: quick_junit::SerializeError,
    },
}

/// An error that occurred while setting up the Ctrl-C handler.
#[derive(Debug, Error)]
#[error("error setting up signal handler")]
pub struct SignalHandlerSetupError(#[source] ctrlc::Error);

impl SignalHandlerSetupError {
    pub(crate) fn new(error: ctrlc::Error) -> Self {
        Self(error)
    }
}

/// An error that ended a run early.
///
/// Tests that had not been finalized when this error was returned are not reported.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RunError {
    /// The recovery ladder was exhausted without the device coming back.
    #[error("device is unavailable after exhausting recovery")]
    DeviceUnavailable {
        /// The transport failure that could not be recovered from.
        #[source]
        error: TransportError,
    },

    /// The run was cancelled.
    #[error("test run cancelled")]
    Cancelled,

    /// A reporter failed to accept an event.
    #[error("error reporting test event")]
    Reporter(#[source] WriteEventError),
}
