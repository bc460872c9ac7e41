// Copyright (c) The deqp-runner Contributors
// SPDX-License-Identifier: Apache-2.0

//! Command lines for the on-device dEQP instrumentation.

use crate::list::{RunConfig, TestId};
use indexmap::IndexMap;
use itertools::Itertools;
use swrite::{SWrite, swrite};

/// Directory on the device that holds the case list and the test log.
pub const APP_DIR: &str = "/sdcard/";

/// Where the case list for a batch is written on the device.
pub const CASE_LIST_PATH: &str = "/sdcard/dEQP-TestCaseList.txt";

/// Where the on-device executable writes its log.
pub const LOG_PATH: &str = "/sdcard/TestLog.qpa";

/// The Android package that contains the dEQP executable.
pub const DEQP_PACKAGE_NAME: &str = "com.drawelements.deqp";

const EXECUTION_INSTRUMENTATION: &str =
    "com.drawelements.deqp/com.drawelements.deqp.testercore.DeqpInstrumentation";
const QUERY_INSTRUMENTATION: &str = "com.drawelements.deqp/com.drawelements.deqp.platformutil.DeqpPlatformCapabilityQueryInstrumentation";

/// Serializes test paths as a nested-prefix trie, as understood by `--deqp-caselist-file`.
///
/// For example, `a.b.c`, `a.b.d` and `a.e` become `{a{e,b{c,d}}}`. At every level, leaves come
/// before groups, and groups keep the order in which they were first seen.
pub fn test_case_trie<'a>(tests: impl IntoIterator<Item = &'a TestId>) -> String {
    let paths: Vec<String> = tests.into_iter().map(TestId::path).collect();
    let mut out = String::new();
    write_trie(&mut out, paths.iter().map(String::as_str));
    out
}

fn write_trie<'a>(out: &mut String, paths: impl Iterator<Item = &'a str>) {
    let mut leaves = Vec::new();
    let mut groups: IndexMap<&str, Vec<&str>> = IndexMap::new();
    for path in paths {
        match path.split_once('.') {
            Some((head, rest)) => groups.entry(head).or_default().push(rest),
            None => leaves.push(path),
        }
    }

    out.push('{');
    let mut first = true;
    for leaf in leaves {
        if !first {
            out.push(',');
        }
        first = false;
        out.push_str(leaf);
    }
    for (head, children) in groups {
        if !first {
            out.push(',');
        }
        first = false;
        out.push_str(head);
        write_trie(out, children.into_iter());
    }
    out.push('}');
}

/// Returns the render-target arguments for a configuration.
///
/// Empty fields are left out.
pub fn render_config_args(config: &RunConfig) -> String {
    let rotation = config.rotation();
    [
        ("--deqp-gl-config-name=", config.gl_config()),
        ("--deqp-screen-rotation=", rotation.as_str()),
        ("--deqp-surface-type=", config.surface_type()),
    ]
    .into_iter()
    .filter(|(_, value)| !value.is_empty())
    .map(|(flag, value)| format!("{flag}{value}"))
    .join(" ")
}

/// Options that shape every instrumentation command sent to the device.
#[derive(Clone, Debug, Default)]
pub struct InstrumentationOptions {
    /// The ABI to run the executable under, if the device has more than one.
    pub abi: Option<String>,

    /// Whether the executable should send its test logs back over the status stream.
    pub capture_logs: bool,

    /// Whether to turn off the on-device watchdog.
    pub disable_watchdog: bool,
}

impl InstrumentationOptions {
    /// Returns the `am instrument` command that executes the case list at [`CASE_LIST_PATH`].
    pub fn execute_command(&self, config: &RunConfig) -> String {
        let mut cmdline = format!("--deqp-caselist-file={CASE_LIST_PATH}");
        let config_args = render_config_args(config);
        swrite!(cmdline, " {config_args}");
        if !self.capture_logs {
            cmdline.push_str(" --deqp-log-images=disable");
        }
        if !self.disable_watchdog {
            cmdline.push_str(" --deqp-watchdog=enable");
        }

        format!(
            "am instrument {}-w -e deqpLogFilename \"{LOG_PATH}\" -e deqpCmdLine \"{cmdline}\" \
             -e deqpLogData \"{}\" {EXECUTION_INSTRUMENTATION}",
            self.abi_flag(),
            self.capture_logs,
        )
    }

    /// Returns the `am instrument` command that asks whether a render configuration is supported.
    pub fn render_config_query_command(&self, query_args: &str) -> String {
        format!(
            "am instrument {}-w -e deqpQueryType renderConfigSupported -e deqpCmdLine \"{query_args}\" \
             {QUERY_INSTRUMENTATION}",
            self.abi_flag(),
        )
    }

    // Includes a trailing space when present.
    fn abi_flag(&self) -> String {
        match &self.abi {
            Some(abi) if !abi.is_empty() => format!("--abi {abi} "),
            _ => String::new(),
        }
    }
}
