// Copyright (c) The deqp-runner Contributors
// SPDX-License-Identifier: Apache-2.0

use deqp_runner::{
    device::Device,
    errors::{RunError, TransportError, WriteEventError},
    list::{RunConfig, TestId, TestInstanceMap},
    recovery::Sleeper,
    reporter::{RunStats, TestEvent, TestStatus},
    runner::TestRunnerBuilder,
    signal::CancelToken,
};
use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::Duration,
};

pub(crate) const CASE_LIST_PATH: &str = "/sdcard/dEQP-TestCaseList.txt";

/// How a scripted test behaves when the fake device runs it.
#[derive(Clone, Debug)]
pub(crate) enum Script {
    /// Report a result with the given code and details.
    Result {
        code: &'static str,
        details: &'static str,
    },

    /// Start the test, then drop the link. After `times` crashes the test passes.
    Crash { times: usize },

    /// Start the test and report nothing else, as if the rest of its records were lost.
    Truncated,
}

/// A device that runs case lists by following a script instead of executing anything.
#[derive(Debug, Default)]
pub(crate) struct FakeDevice {
    pub(crate) scripts: HashMap<String, Script>,
    pub(crate) gles_version: Option<u32>,
    pub(crate) features: Vec<String>,
    pub(crate) unsupported_gl_configs: Vec<String>,
    pub(crate) refuse_instrumentation: bool,
    pub(crate) cancel_after_batches: Option<(usize, CancelToken)>,

    /// The test paths of every instrumentation run, in order.
    pub(crate) batches: Vec<Vec<String>>,
    /// Every non-streaming shell command.
    pub(crate) commands: Vec<String>,
    pub(crate) recoveries: usize,
    pub(crate) reboots: usize,
    pub(crate) case_list: String,
}

impl FakeDevice {
    pub(crate) fn script(mut self, path: &str, script: Script) -> Self {
        self.scripts.insert(path.to_owned(), script);
        self
    }

    pub(crate) fn render_config_queries(&self) -> usize {
        self.commands
            .iter()
            .filter(|command| command.contains("renderConfigSupported"))
            .count()
    }

    fn lost(&self, reason: &str) -> TransportError {
        TransportError::LinkKilled {
            serial: self.serial().to_owned(),
            reason: reason.to_owned(),
        }
    }
}

impl Device for FakeDevice {
    fn serial(&self) -> &str {
        "fake-serial"
    }

    fn shell(&mut self, command: &str) -> Result<String, TransportError> {
        self.commands.push(command.to_owned());

        if command == "getprop ro.opengles.version" {
            return Ok(self
                .gles_version
                .map(|version| version.to_string())
                .unwrap_or_default());
        }
        if command == "pm list features" {
            return Ok(self
                .features
                .iter()
                .map(|feature| format!("feature:{feature}\n"))
                .collect());
        }
        if command.contains("renderConfigSupported") {
            let supported = !self
                .unsupported_gl_configs
                .iter()
                .any(|name| command.contains(&format!("--deqp-gl-config-name={name} ")));
            let answer = if supported { "Yes" } else { "No" };
            return Ok(format!(
                "INSTRUMENTATION_RESULT: Supported={answer}\nINSTRUMENTATION_CODE: 0\n"
            ));
        }
        // rm, ps, kill, settings and setprop all succeed silently.
        Ok(String::new())
    }

    fn shell_streaming(
        &mut self,
        command: &str,
        on_line: &mut dyn FnMut(&str),
    ) -> Result<(), TransportError> {
        assert!(
            command.contains(&format!("--deqp-caselist-file={CASE_LIST_PATH}")),
            "unexpected streaming command: {command}"
        );
        if self.refuse_instrumentation {
            return Err(TransportError::ConnectionRefused {
                serial: self.serial().to_owned(),
                error: std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused"),
            });
        }

        let paths = decode_trie(self.case_list.trim());
        self.batches.push(paths.clone());
        if let Some((after, token)) = &self.cancel_after_batches
            && self.batches.len() >= *after
        {
            token.cancel();
        }

        emit_record(on_line, &[("EventType", "BeginSession")]);
        for path in &paths {
            emit_record(
                on_line,
                &[
                    ("EventType", "BeginTestCase"),
                    ("BeginTestCase-TestCasePath", path.as_str()),
                ],
            );
            let (code, details) = match self.scripts.get_mut(path) {
                Some(Script::Crash { times }) if *times > 0 => {
                    *times -= 1;
                    return Err(self.lost("device crashed"));
                }
                Some(Script::Truncated) => continue,
                Some(Script::Result { code, details }) => (*code, *details),
                _ => ("Pass", "Pass"),
            };
            emit_record(
                on_line,
                &[
                    ("EventType", "TestCaseResult"),
                    ("TestCaseResult-Code", code),
                    ("TestCaseResult-Details", details),
                ],
            );
            let log = format!("<log of {path}>");
            emit_record(
                on_line,
                &[("EventType", "TestLogData"), ("TestLogData-Log", log.as_str())],
            );
            emit_record(on_line, &[("EventType", "EndTestCase")]);
        }
        emit_record(on_line, &[("EventType", "EndSession")]);
        on_line("INSTRUMENTATION_CODE: -1");
        Ok(())
    }

    fn push_string(&mut self, contents: &str, remote_path: &str) -> Result<(), TransportError> {
        assert_eq!(remote_path, CASE_LIST_PATH);
        self.case_list = contents.to_owned();
        Ok(())
    }

    fn recover(&mut self) -> Result<(), TransportError> {
        self.recoveries += 1;
        Ok(())
    }

    fn reboot(&mut self) -> Result<(), TransportError> {
        self.reboots += 1;
        Ok(())
    }
}

fn emit_record(on_line: &mut dyn FnMut(&str), fields: &[(&str, &str)]) {
    for (name, value) in fields {
        on_line(&format!("INSTRUMENTATION_STATUS: dEQP-{name}={value}"));
    }
    on_line("INSTRUMENTATION_STATUS_CODE: 1");
}

/// Expands a case list trie such as `{a{b{c,d}}}` back into dotted paths.
pub(crate) fn decode_trie(trie: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut pos = 0;
    decode_group(trie.as_bytes(), &mut pos, "", &mut out);
    assert_eq!(pos, trie.len(), "trailing data in trie: {trie}");
    out
}

fn decode_group(trie: &[u8], pos: &mut usize, prefix: &str, out: &mut Vec<String>) {
    assert_eq!(trie[*pos], b'{', "group starts with a brace");
    *pos += 1;
    loop {
        if trie[*pos] == b'}' {
            *pos += 1;
            return;
        }
        let start = *pos;
        while !matches!(trie[*pos], b',' | b'{' | b'}') {
            *pos += 1;
        }
        let name = std::str::from_utf8(&trie[start..*pos]).expect("trie is UTF-8");
        let path = if prefix.is_empty() {
            name.to_owned()
        } else {
            format!("{prefix}.{name}")
        };
        if trie[*pos] == b'{' {
            decode_group(trie, pos, &path, out);
        } else {
            out.push(path);
        }
        if trie[*pos] == b',' {
            *pos += 1;
        }
    }
}

/// Never actually sleeps, but remembers what it was asked to do.
#[derive(Clone, Debug, Default)]
pub(crate) struct RecordingSleeper {
    pub(crate) sleeps: Arc<Mutex<Vec<Duration>>>,
}

impl Sleeper for RecordingSleeper {
    fn sleep(&mut self, duration: Duration) {
        self.sleeps
            .lock()
            .expect("sleeper lock is not poisoned")
            .push(duration);
    }
}

/// A reported test, with every event for it folded together.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct Reported {
    pub(crate) path: String,
    pub(crate) status: TestStatus,
    pub(crate) message: Option<String>,
    pub(crate) logs: Vec<String>,
}

#[derive(Debug)]
pub(crate) struct RunOutcome {
    pub(crate) result: Result<RunStats, RunError>,
    pub(crate) reported: Vec<Reported>,
    pub(crate) finished_stats: Option<RunStats>,
}

impl RunOutcome {
    pub(crate) fn paths(&self) -> Vec<&str> {
        self.reported.iter().map(|r| r.path.as_str()).collect()
    }

    pub(crate) fn get(&self, path: &str) -> &Reported {
        self.reported
            .iter()
            .find(|r| r.path == path)
            .unwrap_or_else(|| panic!("{path} was not reported"))
    }
}

pub(crate) fn instances(paths: &[&str]) -> TestInstanceMap {
    instances_with(paths, &[RunConfig::default()])
}

pub(crate) fn instances_with(paths: &[&str], configs: &[RunConfig]) -> TestInstanceMap {
    let mut instances = TestInstanceMap::new();
    for path in paths {
        instances.insert(TestId::from_path(path), configs.iter().cloned());
    }
    instances
}

/// Runs `instances` on `device`, collecting every reported test.
pub(crate) fn run(
    builder: TestRunnerBuilder,
    instances: TestInstanceMap,
    cancel: CancelToken,
    device: &mut FakeDevice,
) -> RunOutcome {
    let runner = builder.build(instances, cancel);
    let mut reported: Vec<Reported> = Vec::new();
    let mut open: Option<Reported> = None;
    let mut finished_stats = None;

    let result = runner.execute(device, |event| {
        match event {
            TestEvent::RunStarted { .. } => {}
            TestEvent::TestStarted { test } => {
                assert!(open.is_none(), "test events are contiguous");
                open = Some(Reported {
                    path: test.path(),
                    status: TestStatus::Pass,
                    message: None,
                    logs: Vec::new(),
                });
            }
            TestEvent::TestLog { test, name, .. } => {
                let current = open.as_mut().expect("log within a test");
                assert_eq!(current.path, test.path());
                current.logs.push(name.to_owned());
            }
            TestEvent::TestFailed { test, message } => {
                let current = open.as_mut().expect("failure within a test");
                assert_eq!(current.path, test.path());
                current.message = Some(message.to_owned());
            }
            TestEvent::TestFinished { test, status } => {
                let mut current = open.take().expect("finish within a test");
                assert_eq!(current.path, test.path());
                current.status = status;
                reported.push(current);
            }
            TestEvent::RunFinished { run_stats, .. } => {
                finished_stats = Some(run_stats);
            }
        }
        Ok::<_, WriteEventError>(())
    });
    assert!(open.is_none(), "every started test finished");

    RunOutcome {
        result,
        reported,
        finished_stats,
    }
}

/// Returns a builder that never sleeps.
pub(crate) fn builder(sleeper: &RecordingSleeper) -> TestRunnerBuilder {
    let mut builder = TestRunnerBuilder::default();
    builder.set_sleeper(Box::new(sleeper.clone()));
    builder
}
