// Copyright (c) The deqp-runner Contributors
// SPDX-License-Identifier: Apache-2.0

//! Capability checks and the modes that pass tests without running them.

use crate::fixtures::*;
use deqp_runner::{
    capability::DeqpPackage,
    list::{RunConfig, ScreenRotation, TestId, TestInstanceMap},
    reporter::TestStatus,
    runner::{AngleBackend, REQUIRED_CONFIG_NOT_SUPPORTED_MESSAGE, RunMode},
    signal::CancelToken,
};
use maplit::hashset;
use pretty_assertions::assert_eq;

const GLES_3_0: u32 = 3 << 16;

#[test]
fn unsupported_configs_are_passed_or_failed() {
    let optional = "dEQP-GLES2.functional.config.optional";
    let required = "dEQP-GLES2.functional.config.required";
    let plain = "dEQP-GLES2.functional.config.plain";

    let mut instances = TestInstanceMap::new();
    instances.insert(
        TestId::from_path(optional),
        [RunConfig::new(
            "rgb565d0s0ms0",
            ScreenRotation::Unspecified,
            "window",
            false,
        )],
    );
    instances.insert(
        TestId::from_path(required),
        [RunConfig::new(
            "rgb565d0s0ms0",
            ScreenRotation::Unspecified,
            "window",
            true,
        )],
    );
    instances.insert(TestId::from_path(plain), [RunConfig::default()]);

    let mut device = FakeDevice {
        gles_version: Some(GLES_3_0),
        unsupported_gl_configs: vec!["rgb565d0s0ms0".to_owned()],
        ..FakeDevice::default()
    };
    let sleeper = RecordingSleeper::default();
    let mut builder = builder(&sleeper);
    builder.set_package(Some(DeqpPackage::Gles2));

    let outcome = run(builder, instances, CancelToken::new(), &mut device);

    let stats = outcome.result.as_ref().expect("run succeeds");
    assert_eq!((stats.passed, stats.failed), (2, 1));
    assert_eq!(outcome.paths(), vec![optional, required, plain]);
    assert_eq!(outcome.get(optional).status, TestStatus::Pass);

    let failed = outcome.get(required);
    assert_eq!(failed.status, TestStatus::Fail);
    assert!(
        failed
            .message
            .as_deref()
            .is_some_and(|message| message.contains(REQUIRED_CONFIG_NOT_SUPPORTED_MESSAGE)),
        "unexpected message: {:?}",
        failed.message
    );

    // Only the supported config ran, and the shared command line was queried once.
    assert_eq!(device.batches, vec![vec![plain.to_owned()]]);
    assert_eq!(device.render_config_queries(), 2);
}

#[test]
fn unsupported_rotation_is_skipped() {
    let landscape = "dEQP-GLES2.functional.rotation.landscape";
    let mut instances = TestInstanceMap::new();
    instances.insert(
        TestId::from_path(landscape),
        [RunConfig::new("", ScreenRotation::Landscape, "window", false)],
    );

    let mut device = FakeDevice {
        features: vec!["android.hardware.screen.portrait".to_owned()],
        ..FakeDevice::default()
    };
    let sleeper = RecordingSleeper::default();

    let outcome = run(builder(&sleeper), instances, CancelToken::new(), &mut device);

    outcome.result.as_ref().expect("run succeeds");
    assert_eq!(outcome.get(landscape).status, TestStatus::Pass);
    assert!(device.batches.is_empty());
}

#[test]
fn incremental_mode_runs_only_included_tests() {
    let all = [
        "dEQP-GLES2.functional.incremental.t0",
        "dEQP-GLES2.functional.incremental.t1",
        "dEQP-GLES2.functional.incremental.t2",
        "dEQP-GLES2.functional.incremental.t3",
    ];
    let include = hashset! {all[1].to_owned(), all[3].to_owned()};

    let mut device = FakeDevice::default();
    let sleeper = RecordingSleeper::default();
    let mut builder = builder(&sleeper);
    builder.set_mode(RunMode::Incremental { include });

    let outcome = run(builder, instances(&all), CancelToken::new(), &mut device);

    let stats = outcome.result.as_ref().expect("run succeeds");
    assert!(stats.is_success());
    assert_eq!(stats.final_run_count, 4);
    assert_eq!(
        device.batches,
        vec![vec![all[1].to_owned(), all[3].to_owned()]]
    );
    // Excluded tests are reported as soon as their batch is dispatched.
    assert_eq!(outcome.paths(), vec![all[0], all[2], all[1], all[3]]);
}

#[test]
fn unsupported_api_passes_everything() {
    let all = ["dEQP-GLES31.functional.a", "dEQP-GLES31.functional.b"];
    let mut device = FakeDevice {
        gles_version: Some(GLES_3_0),
        ..FakeDevice::default()
    };
    let sleeper = RecordingSleeper::default();
    let mut builder = builder(&sleeper);
    builder.set_package(Some(DeqpPackage::Gles31));

    let outcome = run(builder, instances(&all), CancelToken::new(), &mut device);

    let stats = outcome.result.as_ref().expect("run succeeds");
    assert!(stats.is_success());
    assert_eq!(outcome.paths(), all.to_vec());
    assert!(device.batches.is_empty());
    assert_eq!(device.commands, vec!["getprop ro.opengles.version"]);
}

#[test]
fn collect_only_runs_nothing() {
    let all = ["dEQP-EGL.info.version", "dEQP-EGL.info.vendor"];
    let mut device = FakeDevice::default();
    let sleeper = RecordingSleeper::default();
    let mut builder = builder(&sleeper);
    builder.set_collect_only(true);

    let outcome = run(builder, instances(&all), CancelToken::new(), &mut device);

    let stats = outcome.result.as_ref().expect("run succeeds");
    assert_eq!(stats.passed, 2);
    assert!(device.commands.is_empty());
    assert!(device.batches.is_empty());
}

#[test]
fn insufficient_deqp_level_passes_everything() {
    let all = ["dEQP-VK.api.smoke.create_sampler"];
    let mut device = FakeDevice {
        features: vec![
            "android.hardware.vulkan.level=1".to_owned(),
            // 2018-03-01
            "android.software.vulkan.deqp.level=132252417".to_owned(),
        ],
        ..FakeDevice::default()
    };
    let sleeper = RecordingSleeper::default();
    let mut builder = builder(&sleeper);
    builder
        .set_package(Some(DeqpPackage::Vk))
        .set_case_list_file("vk-master-2019-03-01.txt");

    let outcome = run(builder, instances(&all), CancelToken::new(), &mut device);

    let stats = outcome.result.as_ref().expect("run succeeds");
    assert_eq!(stats.passed, 1);
    assert!(device.batches.is_empty());
    assert_eq!(
        device.commands,
        vec!["pm list features"],
        "features are queried once"
    );
}

#[test]
fn sufficient_deqp_level_runs_tests() {
    let all = ["dEQP-VK.api.smoke.create_sampler"];
    let mut device = FakeDevice {
        features: vec![
            "android.hardware.vulkan.level=1".to_owned(),
            "android.software.vulkan.deqp.level=0x07E30301".to_owned(),
        ],
        ..FakeDevice::default()
    };
    let sleeper = RecordingSleeper::default();
    let mut builder = builder(&sleeper);
    builder
        .set_package(Some(DeqpPackage::Vk))
        .set_case_list_file("vk-master-2019-03-01.txt");

    let outcome = run(builder, instances(&all), CancelToken::new(), &mut device);

    outcome.result.as_ref().expect("run succeeds");
    assert_eq!(device.batches, vec![vec![all[0].to_owned()]]);
}

#[test]
fn capability_failure_during_preflight_ends_the_run() {
    let all = ["dEQP-VK.api.smoke.create_sampler"];
    let mut device = FakeDevice {
        features: vec![
            "android.hardware.vulkan.level=1".to_owned(),
            "android.software.vulkan.deqp.level".to_owned(),
        ],
        ..FakeDevice::default()
    };
    let sleeper = RecordingSleeper::default();
    let mut builder = builder(&sleeper);
    builder
        .set_package(Some(DeqpPackage::Vk))
        .set_case_list_file("vk-master-2019-03-01.txt");

    let outcome = run(builder, instances(&all), CancelToken::new(), &mut device);

    let stats = outcome.result.as_ref().expect("run ends without an error");
    assert!(outcome.reported.is_empty());
    assert_eq!((stats.initial_run_count, stats.final_run_count), (1, 0));
    assert!(!stats.is_success());
    assert!(device.batches.is_empty());
}

#[test]
fn angle_is_configured_around_the_run() {
    let all = ["dEQP-GLES2.info.vendor"];
    let mut device = FakeDevice::default();
    let sleeper = RecordingSleeper::default();
    let mut builder = builder(&sleeper);
    builder.set_angle_backend(AngleBackend::Vulkan);

    let outcome = run(builder, instances(&all), CancelToken::new(), &mut device);

    outcome.result.as_ref().expect("run succeeds");
    assert_eq!(device.batches.len(), 1);

    let position = |command: &str| {
        device
            .commands
            .iter()
            .position(|c| c == command)
            .unwrap_or_else(|| panic!("`{command}` was not run: {:?}", device.commands))
    };
    let setprop = position("setprop debug.angle.backend 2");
    let rm = position("rm /sdcard/dEQP-TestCaseList.txt");
    assert!(setprop < rm, "ANGLE is set up before the first batch");
    assert_eq!(
        &device.commands[device.commands.len() - 2..],
        &[
            "settings delete global angle_gl_driver_selection_pkgs",
            "settings delete global angle_gl_driver_selection_values",
        ],
        "ANGLE is torn down after the last batch"
    );
}
