// Copyright (c) The deqp-runner Contributors
// SPDX-License-Identifier: Apache-2.0

use crate::{
    ExpectedError,
    errors::DeqpExitCode,
    output::{OutputContext, OutputOpts},
};
use camino::{Utf8Path, Utf8PathBuf};
use clap::{Args, Parser};
use deqp_runner::{
    capability::DeqpPackage,
    config::{DeqpConfig, DeqpProfile},
    device::AdbDevice,
    errors::WriteEventError,
    list::{RunConfig, ScreenRotation, TestCatalog},
    reporter::{JunitReporter, TestReporterBuilder},
    runner::{AngleBackend, RunMode, TestRunnerBuilder},
    signal::SignalHandlerKind,
    test_filter::TestFilterBuilder,
};
use std::{
    collections::HashSet,
    io::{BufWriter, Write},
    num::NonZeroUsize,
};
use supports_color::Stream;
use tracing::{info, warn};

/// Runs dEQP conformance tests on an Android device.
///
/// Tests are sent to the device in batches. A batch that crashes the device or kills the link is
/// split until the offending test runs on its own, so that one unstable test costs one result.
#[derive(Debug, Parser)]
#[command(version, name = "deqp-run")]
pub struct DeqpRunApp {
    #[command(flatten)]
    output: OutputOpts,

    #[command(flatten)]
    config_opts: ConfigOpts,

    #[command(flatten)]
    list_opts: TestListOpts,

    #[command(flatten)]
    runner_opts: TestRunnerOpts,

    #[command(flatten)]
    reporter_opts: TestReporterOpts,
}

#[derive(Debug, Args)]
struct ConfigOpts {
    /// Config file [default: .config/deqp-runner.toml]
    #[arg(long, global = true, value_name = "PATH")]
    config_file: Option<Utf8PathBuf>,

    /// Config profile to use
    #[arg(long, short = 'P', env = "DEQP_PROFILE")]
    profile: Option<String>,
}

impl ConfigOpts {
    fn make_config(&self, workspace_root: &Utf8Path) -> Result<DeqpConfig, ExpectedError> {
        Ok(DeqpConfig::from_sources(
            workspace_root,
            self.config_file.as_deref(),
        )?)
    }
}

#[derive(Debug, Args)]
#[command(next_help_heading = "CASE LIST OPTIONS")]
struct TestListOpts {
    /// Case list file, with one test path per line
    #[arg(value_name = "CASE_LIST", help_heading = None)]
    case_list: Utf8PathBuf,

    /// Only run tests matching this path or glob (may be repeated)
    #[arg(long, value_name = "PATTERN")]
    include: Vec<String>,

    /// Skip tests matching this path or glob (may be repeated)
    #[arg(long, value_name = "PATTERN")]
    exclude: Vec<String>,

    /// Read include patterns from a file, one per line
    #[arg(long, value_name = "PATH")]
    include_file: Vec<Utf8PathBuf>,

    /// Read exclude patterns from a file, one per line
    #[arg(long, value_name = "PATH")]
    exclude_file: Vec<Utf8PathBuf>,

    /// GL render target config name passed to dEQP
    #[arg(long, value_name = "NAME", default_value = "")]
    gl_config: String,

    /// Screen rotation: unspecified, 0, 90, 180 or 270
    #[arg(long, value_name = "ROTATION", default_value_t)]
    rotation: ScreenRotation,

    /// Surface type passed to dEQP
    #[arg(long, value_name = "TYPE", default_value = "window")]
    surface_type: String,

    /// Fail tests whose render config the device doesn't support, instead of passing them
    #[arg(long)]
    config_required: bool,
}

impl TestListOpts {
    fn default_config(&self) -> RunConfig {
        RunConfig::new(
            self.gl_config.clone(),
            self.rotation,
            self.surface_type.clone(),
            self.config_required,
        )
    }

    fn compute(&self) -> Result<TestCatalog, ExpectedError> {
        let mut catalog = TestCatalog::load(&self.case_list, &self.default_config())?;

        let mut filter = TestFilterBuilder::new();
        for include in &self.include {
            filter.include(include.as_str());
        }
        for exclude in &self.exclude {
            filter.exclude(exclude.as_str());
        }
        for path in &self.include_file {
            filter.include_file(path)?;
        }
        for path in &self.exclude_file {
            filter.exclude_file(path)?;
        }
        catalog.apply_filter(&filter.build()?);

        Ok(catalog)
    }

    /// The case list's file name, which can carry a dEQP level requirement.
    fn case_list_file_name(&self) -> &str {
        self.case_list.file_name().unwrap_or(self.case_list.as_str())
    }
}

/// Test runner options.
#[derive(Debug, Args)]
#[command(next_help_heading = "RUNNER OPTIONS")]
struct TestRunnerOpts {
    /// Serial number of the device to run on
    #[arg(long, short = 's', env = "ANDROID_SERIAL")]
    serial: String,

    /// Path to the adb binary [default: adb on PATH]
    #[arg(long, value_name = "PATH")]
    adb: Option<String>,

    /// dEQP package, such as dEQP-GLES3 [default: inferred from the first test]
    #[arg(long, value_parser = parse_package, value_name = "PACKAGE")]
    package: Option<DeqpPackage>,

    /// Run dEQP on top of ANGLE: none, vulkan or opengles
    #[arg(long, value_name = "BACKEND", default_value_t)]
    angle: AngleBackend,

    /// ABI of the dEQP binary to run, such as arm64-v8a
    #[arg(long)]
    abi: Option<String>,

    /// Report every test as passed without running anything
    #[arg(long)]
    collect_only: bool,

    /// Only run the tests listed in this file; pass the rest without running them
    #[arg(long, value_name = "PATH")]
    incremental_include_file: Option<Utf8PathBuf>,

    /// Maximum number of tests per batch [default: from profile]
    #[arg(long, value_name = "N")]
    batch_limit: Option<NonZeroUsize>,

    /// Capture dEQP test logs [default: from profile]
    #[arg(long)]
    capture_logs: bool,

    /// Disable the dEQP watchdog [default: from profile]
    #[arg(long)]
    disable_watchdog: bool,
}

impl TestRunnerOpts {
    fn to_builder(
        &self,
        profile: &DeqpProfile<'_>,
        package: Option<DeqpPackage>,
        mode: RunMode,
    ) -> TestRunnerBuilder {
        let mut builder = TestRunnerBuilder::default();
        builder
            .set_package(package)
            .set_batch_limit(
                self.batch_limit
                    .map_or(profile.batch_limit(), NonZeroUsize::get),
            )
            .set_incremental_batch_limit(profile.incremental_batch_limit())
            .set_mode(mode)
            .set_collect_only(self.collect_only)
            .set_angle_backend(self.angle)
            .set_abi(self.abi.clone())
            .set_capture_logs(self.capture_logs || profile.capture_logs())
            .set_disable_watchdog(self.disable_watchdog || profile.disable_watchdog())
            .set_retry_cooldown(profile.retry_cooldown())
            .set_process_kill_wait(profile.process_kill_wait());
        builder
    }

    fn device(&self, profile: &DeqpProfile<'_>) -> AdbDevice {
        let device = AdbDevice::new(self.serial.clone(), profile.command_timeout());
        match &self.adb {
            Some(adb) => device.with_adb(adb.clone()),
            None => device,
        }
    }

    fn run_mode(&self) -> Result<RunMode, ExpectedError> {
        let Some(path) = &self.incremental_include_file else {
            return Ok(RunMode::Full);
        };
        let contents = std::fs::read_to_string(path).map_err(|err| {
            ExpectedError::argument_file_read_error("incremental-include-file", path, err)
        })?;
        Ok(RunMode::Incremental {
            include: parse_path_list(&contents),
        })
    }
}

#[derive(Debug, Default, Args)]
#[command(next_help_heading = "REPORTER OPTIONS")]
struct TestReporterOpts {
    /// Print captured test logs
    #[arg(long)]
    show_logs: bool,

    /// Only print failing tests
    #[arg(long)]
    hide_passes: bool,
}

impl TestReporterOpts {
    fn to_builder(&self) -> TestReporterBuilder {
        let mut builder = TestReporterBuilder::default();
        builder
            .set_show_logs(self.show_logs)
            .set_hide_passes(self.hide_passes);
        builder
    }
}

impl DeqpRunApp {
    /// Initializes logging and color output.
    pub fn init_output(&self) -> OutputContext {
        self.output.init()
    }

    /// Executes the app, returning the process exit code.
    pub fn exec(self, output: OutputContext) -> Result<i32, ExpectedError> {
        let workspace_root = current_dir()?;
        let config = self.config_opts.make_config(&workspace_root)?;
        let profile = config.profile(
            self.config_opts
                .profile
                .as_deref()
                .unwrap_or(DeqpConfig::DEFAULT_PROFILE),
        )?;

        let catalog = self.list_opts.compute()?;
        let instances = catalog.into_instances();
        if instances.is_empty() {
            warn!("no tests to run");
            return Ok(DeqpExitCode::NO_TESTS_RUN);
        }

        let package = self.runner_opts.package.or_else(|| {
            let first = instances.tests().next()?;
            DeqpPackage::from_test_path(first.class_name())
        });
        match package {
            Some(package) => info!("running {} tests from {package}", instances.len()),
            None => warn!("unknown dEQP package, skipping device capability checks"),
        }

        let mode = self.runner_opts.run_mode()?;
        let cancel = SignalHandlerKind::Standard.build()?;

        let mut runner_builder = self.runner_opts.to_builder(&profile, package, mode);
        runner_builder.set_case_list_file(self.list_opts.case_list_file_name());
        let runner = runner_builder.build(instances, cancel);
        let mut device = self.runner_opts.device(&profile);

        let mut reporter = self.reporter_opts.to_builder().build();
        if output.color.should_colorize(Stream::Stderr) {
            reporter.colorize();
        }
        let mut junit = profile.junit().map(|config| {
            let mut junit = JunitReporter::new(config.path(), config.report_name());
            junit.set_store_logs(config.store_logs());
            junit
        });

        let stderr = std::io::stderr();
        let mut writer = BufWriter::new(stderr);
        let run_stats = runner.execute(&mut device, |event| {
            reporter.report_event(&event, &mut writer)?;
            writer.flush().map_err(WriteEventError::Io)?;
            if let Some(junit) = &mut junit {
                junit.write_event(&event)?;
            }
            Ok(())
        })?;

        if let Some(junit) = &junit {
            info!("wrote JUnit report to {}", junit.path());
        }
        if !run_stats.is_success() {
            return Err(ExpectedError::test_run_failed());
        }
        Ok(DeqpExitCode::OK)
    }
}

fn current_dir() -> Result<Utf8PathBuf, ExpectedError> {
    std::env::current_dir()
        .and_then(|dir| Utf8PathBuf::try_from(dir).map_err(|err| err.into_io_error()))
        .map_err(ExpectedError::current_dir_failed)
}

fn parse_package(name: &str) -> Result<DeqpPackage, String> {
    DeqpPackage::from_name(name).ok_or_else(|| {
        let known: Vec<_> = DeqpPackage::ALL.iter().map(|p| p.name()).collect();
        format!(
            "unrecognized dEQP package: {name}\n(known values: {})",
            known.join(", ")
        )
    })
}

/// Parses a list of dotted test paths, ignoring blank lines and `#` comments.
fn parse_path_list(contents: &str) -> HashSet<String> {
    contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_owned)
        .collect()
}
