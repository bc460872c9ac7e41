// Copyright (c) The deqp-runner Contributors
// SPDX-License-Identifier: Apache-2.0

//! Parsing of the instrumentation status stream.
//!
//! The on-device instrumentation writes a line-oriented stream of the form:
//!
//! ```text
//! INSTRUMENTATION_STATUS: dEQP-EventType=BeginTestCase
//! INSTRUMENTATION_STATUS: dEQP-BeginTestCase-TestCasePath=dEQP-GLES2.info.vendor
//! INSTRUMENTATION_STATUS_CODE: 0
//! ...
//! INSTRUMENTATION_CODE: -1
//! ```
//!
//! [`StatusStreamParser`] reassembles these lines into [`StatusRecord`]s, and
//! [`StatusRecord::to_event`] interprets a record as a [`StatusEvent`].

use indexmap::IndexMap;
use std::fmt;
use tracing::warn;

const STATUS_CODE_PREFIX: &str = "INSTRUMENTATION_STATUS_CODE: ";
const STATUS_PREFIX: &str = "INSTRUMENTATION_STATUS: ";
const FIELD_MARKER: &str = "dEQP-";
const EXIT_CODE_PREFIX: &str = "INSTRUMENTATION_CODE: ";

const EVENT_TYPE_KEY: &str = "dEQP-EventType";
const TEST_CASE_PATH_KEY: &str = "dEQP-BeginTestCase-TestCasePath";
const RESULT_CODE_KEY: &str = "dEQP-TestCaseResult-Code";
const RESULT_DETAILS_KEY: &str = "dEQP-TestCaseResult-Details";
const TERMINATE_REASON_KEY: &str = "dEQP-TerminateTestCase-Reason";
const LOG_DATA_KEY: &str = "dEQP-TestLogData-Log";

/// A single status record: the named fields seen between two status-code lines.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct StatusRecord {
    fields: IndexMap<String, String>,
}

impl StatusRecord {
    /// Returns the value of a field, if present.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }

    /// Returns true if the record has no fields.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Interprets this record as an event.
    ///
    /// Records without an event type, with an unknown event type, or missing a field the event
    /// requires, produce `None`.
    pub fn to_event(&self) -> Option<StatusEvent> {
        let event_type = self.get(EVENT_TYPE_KEY)?;
        let event = match event_type {
            "BeginSession" => StatusEvent::BeginSession,
            "EndSession" => StatusEvent::EndSession,
            "BeginTestCase" => {
                let Some(path) = self.get(TEST_CASE_PATH_KEY) else {
                    warn!("BeginTestCase record without a test case path");
                    return None;
                };
                StatusEvent::BeginTestCase {
                    path: path.to_owned(),
                }
            }
            "EndTestCase" => StatusEvent::EndTestCase,
            "TestCaseResult" => StatusEvent::TestCaseResult {
                code: TestCaseCode::parse(self.get(RESULT_CODE_KEY).unwrap_or_default()),
                details: self.get(RESULT_DETAILS_KEY).unwrap_or_default().to_owned(),
            },
            "TerminateTestCase" => StatusEvent::TerminateTestCase {
                reason: self.get(TERMINATE_REASON_KEY).unwrap_or_default().to_owned(),
            },
            "TestLogData" => StatusEvent::TestLogData {
                log: self.get(LOG_DATA_KEY).unwrap_or_default().to_owned(),
            },
            _ => return None,
        };
        Some(event)
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for StatusRecord {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self {
            fields: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

/// An event reported by the on-device test executable.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum StatusEvent {
    /// A test session started.
    BeginSession,

    /// A test session ended.
    EndSession,

    /// A test case started executing.
    BeginTestCase {
        /// The dotted path of the test.
        path: String,
    },

    /// The open test case finished executing.
    EndTestCase,

    /// The open test case reported a result.
    TestCaseResult {
        /// The result code.
        code: TestCaseCode,

        /// Free-form details.
        details: String,
    },

    /// The open test case was terminated early.
    TerminateTestCase {
        /// Why the test was terminated.
        reason: String,
    },

    /// A chunk of the open test case's log.
    TestLogData {
        /// The log chunk.
        log: String,
    },
}

/// A result code reported with [`StatusEvent::TestCaseResult`].
///
/// Variant names match the codes sent on the wire.
#[derive(Clone, Debug, Eq, PartialEq)]
#[allow(missing_docs)]
pub enum TestCaseCode {
    Pass,
    NotSupported,
    QualityWarning,
    CompatibilityWarning,
    Fail,
    ResourceError,
    InternalError,
    Crash,
    Timeout,

    /// Any code not listed above. Always a failure.
    Unknown(String),
}

impl TestCaseCode {
    /// Parses a result code.
    pub fn parse(code: &str) -> Self {
        match code {
            "Pass" => Self::Pass,
            "NotSupported" => Self::NotSupported,
            "QualityWarning" => Self::QualityWarning,
            "CompatibilityWarning" => Self::CompatibilityWarning,
            "Fail" => Self::Fail,
            "ResourceError" => Self::ResourceError,
            "InternalError" => Self::InternalError,
            "Crash" => Self::Crash,
            "Timeout" => Self::Timeout,
            other => Self::Unknown(other.to_owned()),
        }
    }

    /// Returns true if this code means the test instance failed.
    pub fn is_failure(&self) -> bool {
        !matches!(
            self,
            Self::Pass | Self::NotSupported | Self::QualityWarning | Self::CompatibilityWarning
        )
    }

    /// Returns the failure message for this code, or `None` if it isn't a failure.
    pub fn failure_message(&self, details: &str) -> Option<String> {
        match self {
            Self::Unknown(code) => Some(format!("Unknown result code: {code}: {details}")),
            code if code.is_failure() => Some(format!("{code}: {details}")),
            _ => None,
        }
    }

    /// Returns the code as it appears on the wire.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Pass => "Pass",
            Self::NotSupported => "NotSupported",
            Self::QualityWarning => "QualityWarning",
            Self::CompatibilityWarning => "CompatibilityWarning",
            Self::Fail => "Fail",
            Self::ResourceError => "ResourceError",
            Self::InternalError => "InternalError",
            Self::Crash => "Crash",
            Self::Timeout => "Timeout",
            Self::Unknown(code) => code,
        }
    }
}

impl fmt::Display for TestCaseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reassembles an instrumentation line stream into status records.
///
/// Feed lines with [`push_line`](Self::push_line), then call [`finish`](Self::finish) once the
/// stream ends to flush an unterminated record.
#[derive(Debug, Default)]
pub struct StatusStreamParser {
    fields: IndexMap<String, String>,
    open_field: Option<(String, String)>,
    exit_code: Option<i32>,
}

impl StatusStreamParser {
    /// Creates a new parser.
    pub fn new() -> Self {
        Self::default()
    }

    /// Processes one line of output, returning a record if the line completed one.
    pub fn push_line(&mut self, line: &str) -> Option<StatusRecord> {
        let line = line.strip_suffix('\r').unwrap_or(line);

        if line.starts_with(STATUS_CODE_PREFIX) {
            self.close_field();
            return Some(self.take_record());
        }

        if let Some(field) = line
            .strip_prefix(STATUS_PREFIX)
            .filter(|rest| rest.starts_with(FIELD_MARKER))
        {
            self.close_field();
            let (name, value) = field.split_once('=').unwrap_or((field, ""));
            self.open_field = Some((name.to_owned(), value.to_owned()));
        } else if let Some(code) = line.strip_prefix(EXIT_CODE_PREFIX) {
            match code.trim().parse::<i32>() {
                Ok(code) => self.exit_code = Some(code),
                Err(_) => warn!(line, "unexpected instrumentation code format"),
            }
        } else if let Some((_, value)) = &mut self.open_field {
            // Lines arrive with their terminators stripped. Restoring the newline keeps
            // multi-line values such as test logs byte-for-byte as the device wrote them.
            value.push('\n');
            value.push_str(line);
        }

        None
    }

    /// Flushes any unterminated record at the end of the stream.
    pub fn finish(&mut self) -> Option<StatusRecord> {
        self.close_field();
        let record = self.take_record();
        (!record.is_empty()).then_some(record)
    }

    /// Returns true if the stream contained an `INSTRUMENTATION_CODE` line.
    ///
    /// A stream without one was cut off before the instrumentation exited.
    pub fn saw_exit_code(&self) -> bool {
        self.exit_code.is_some()
    }

    /// Returns the exit code reported by the instrumentation, if any.
    pub fn exit_code(&self) -> Option<i32> {
        self.exit_code
    }

    fn close_field(&mut self) {
        if let Some((name, value)) = self.open_field.take() {
            self.fields.insert(name, value);
        }
    }

    fn take_record(&mut self) -> StatusRecord {
        StatusRecord {
            fields: std::mem::take(&mut self.fields),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;
    use pretty_assertions::assert_eq;
    use test_case::test_case;

    fn parse_all(stream: &str) -> (Vec<StatusRecord>, StatusStreamParser) {
        let mut parser = StatusStreamParser::new();
        let mut records: Vec<_> = stream
            .lines()
            .filter_map(|line| parser.push_line(line))
            .collect();
        records.extend(parser.finish());
        (records, parser)
    }

    #[test]
    fn records_and_exit_code() {
        let (records, parser) = parse_all(indoc! {"
            INSTRUMENTATION_STATUS: dEQP-EventType=BeginTestCase
            INSTRUMENTATION_STATUS: dEQP-BeginTestCase-TestCasePath=a.b.c
            INSTRUMENTATION_STATUS_CODE: 0
            INSTRUMENTATION_STATUS: dEQP-EventType=TestCaseResult
            INSTRUMENTATION_STATUS: dEQP-TestCaseResult-Code=Fail
            INSTRUMENTATION_STATUS: dEQP-TestCaseResult-Details=x
            INSTRUMENTATION_STATUS_CODE: 0
            INSTRUMENTATION_CODE: -1
        "});

        assert_eq!(
            records,
            vec![
                [
                    ("dEQP-EventType", "BeginTestCase"),
                    ("dEQP-BeginTestCase-TestCasePath", "a.b.c"),
                ]
                .into_iter()
                .collect::<StatusRecord>(),
                [
                    ("dEQP-EventType", "TestCaseResult"),
                    ("dEQP-TestCaseResult-Code", "Fail"),
                    ("dEQP-TestCaseResult-Details", "x"),
                ]
                .into_iter()
                .collect(),
            ]
        );
        assert_eq!(parser.exit_code(), Some(-1));
        assert_eq!(
            records[1].to_event(),
            Some(StatusEvent::TestCaseResult {
                code: TestCaseCode::Fail,
                details: "x".to_owned(),
            })
        );
    }

    #[test]
    fn continuation_lines_extend_open_field() {
        let (records, parser) = parse_all(indoc! {"
            INSTRUMENTATION_STATUS: dEQP-EventType=TestLogData
            INSTRUMENTATION_STATUS: dEQP-TestLogData-Log=<Result>
            <Text>hello</Text>
            </Result>
            INSTRUMENTATION_STATUS_CODE: 0
        "});

        assert_eq!(
            records[0].get("dEQP-TestLogData-Log"),
            Some("<Result>\n<Text>hello</Text>\n</Result>")
        );
        assert!(!parser.saw_exit_code(), "stream had no exit code");
    }

    #[test]
    fn truncated_stream_is_flushed() {
        let (records, parser) = parse_all(indoc! {"
            INSTRUMENTATION_STATUS: dEQP-EventType=BeginTestCase
            INSTRUMENTATION_STATUS: dEQP-BeginTestCase-TestCasePath=a.b.c
        "});

        assert_eq!(records.len(), 1);
        assert_eq!(
            records[0].to_event(),
            Some(StatusEvent::BeginTestCase {
                path: "a.b.c".to_owned()
            })
        );
        assert!(!parser.saw_exit_code());
    }

    #[test]
    fn stray_lines_are_ignored() {
        let (records, parser) = parse_all(indoc! {"
            random preamble
            INSTRUMENTATION_STATUS: id=DeqpInstrumentation
            INSTRUMENTATION_CODE: not-a-number
        "});
        assert!(records.is_empty());
        assert!(!parser.saw_exit_code());
    }

    #[test]
    fn crlf_line_endings() {
        let mut parser = StatusStreamParser::new();
        assert_eq!(
            parser.push_line("INSTRUMENTATION_STATUS: dEQP-EventType=EndTestCase\r"),
            None
        );
        let record = parser
            .push_line("INSTRUMENTATION_STATUS_CODE: 0\r")
            .expect("record completed");
        assert_eq!(record.to_event(), Some(StatusEvent::EndTestCase));
        parser.push_line("INSTRUMENTATION_CODE: 0\r");
        assert_eq!(parser.exit_code(), Some(0));
    }

    #[test_case("Pass", None; "pass")]
    #[test_case("NotSupported", None; "not supported")]
    #[test_case("QualityWarning", None; "quality warning")]
    #[test_case("CompatibilityWarning", None; "compatibility warning")]
    #[test_case("Fail", Some("Fail: d"); "fail")]
    #[test_case("ResourceError", Some("ResourceError: d"); "resource error")]
    #[test_case("InternalError", Some("InternalError: d"); "internal error")]
    #[test_case("Crash", Some("Crash: d"); "crash")]
    #[test_case("Timeout", Some("Timeout: d"); "timeout")]
    #[test_case("Bogus", Some("Unknown result code: Bogus: d"); "unknown")]
    fn result_code_messages(code: &str, expected: Option<&str>) {
        assert_eq!(
            TestCaseCode::parse(code).failure_message("d").as_deref(),
            expected
        );
    }
}
