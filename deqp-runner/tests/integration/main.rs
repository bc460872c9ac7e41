// Copyright (c) The deqp-runner Contributors
// SPDX-License-Identifier: Apache-2.0

//! Integration tests for the test runner.
//!
//! These drive a [`TestRunner`](deqp_runner::runner::TestRunner) against a scripted
//! [`FakeDevice`], which decodes the case list pushed to it and reports results over a
//! synthesized instrumentation status stream.

mod fixtures;
mod modes;

use deqp_runner::{errors::RunError, reporter::TestStatus, signal::CancelToken};
use fixtures::*;
use pretty_assertions::assert_eq;
use std::time::Duration;

fn path(leaf: &str) -> String {
    format!("dEQP-GLES2.functional.isolation.{leaf}")
}

fn paths(leaves: &[&str]) -> Vec<String> {
    leaves.iter().map(|leaf| path(leaf)).collect()
}

#[test]
fn crashing_test_is_isolated() {
    let all = paths(&["t0", "t1", "t2", "t3", "t4", "t5", "t6", "t7"]);
    let all_refs: Vec<&str> = all.iter().map(String::as_str).collect();
    let mut device =
        FakeDevice::default().script(&path("t5"), Script::Crash { times: usize::MAX });
    let sleeper = RecordingSleeper::default();

    let outcome = run(
        builder(&sleeper),
        instances(&all_refs),
        CancelToken::new(),
        &mut device,
    );

    let stats = outcome.result.as_ref().expect("run succeeds");
    assert_eq!(stats.passed, 7);
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.final_run_count, 8);
    assert!(!stats.is_success());
    assert_eq!(outcome.finished_stats.as_ref(), Some(stats));

    // The crash splits the unfinished tail in half: the crashing test runs alone and the two
    // tests after it run together.
    assert_eq!(
        device.batches,
        vec![all.clone(), paths(&["t5"]), paths(&["t6", "t7"])]
    );
    assert_eq!(
        outcome.paths(),
        all_refs,
        "tests are reported in execution order"
    );

    let crashed = outcome.get(&path("t5"));
    assert_eq!(crashed.status, TestStatus::Fail);
    let message = crashed.message.as_deref().expect("failure has a message");
    assert!(
        message.contains("Crash: Incomplete test log"),
        "unexpected message: {message}"
    );

    // Both crashes were handled by the first rung of the ladder, since the link was making
    // progress each time.
    assert_eq!(device.recoveries, 0);
    assert_eq!(device.reboots, 0);
    assert_eq!(
        *sleeper.sleeps.lock().expect("lock is not poisoned"),
        vec![
            Duration::from_secs(6),
            Duration::from_secs(1),
            Duration::from_secs(6),
            Duration::from_secs(1),
        ]
    );
}

#[test]
fn lost_end_of_test_case_still_reports_every_test() {
    let all = paths(&["t0", "t1", "t2", "t3"]);
    let all_refs: Vec<&str> = all.iter().map(String::as_str).collect();
    let mut device = FakeDevice::default().script(&path("t1"), Script::Truncated);
    let sleeper = RecordingSleeper::default();

    let outcome = run(
        builder(&sleeper),
        instances(&all_refs),
        CancelToken::new(),
        &mut device,
    );

    let stats = outcome.result.as_ref().expect("run succeeds");
    assert_eq!(stats.passed, 3);
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.final_run_count, 4);
    assert_eq!(outcome.finished_stats.as_ref(), Some(stats));
    assert_eq!(outcome.paths(), all_refs);
    assert_eq!(device.batches, vec![all.clone()], "nothing needs a retry");

    let truncated = outcome.get(&path("t1"));
    assert_eq!(truncated.status, TestStatus::Fail);
    assert!(
        truncated
            .message
            .as_deref()
            .is_some_and(|message| message.contains("Crash: Incomplete test log")),
        "unexpected message: {:?}",
        truncated.message
    );
}

#[test]
fn test_that_crashes_once_is_retried() {
    let test = path("flaky");
    let mut device = FakeDevice::default().script(&test, Script::Crash { times: 1 });
    let sleeper = RecordingSleeper::default();

    let outcome = run(
        builder(&sleeper),
        instances(&[test.as_str()]),
        CancelToken::new(),
        &mut device,
    );

    let stats = outcome.result.as_ref().expect("run succeeds");
    assert!(stats.is_success());
    assert_eq!(device.batches, vec![vec![test.clone()], vec![test.clone()]]);
    assert_eq!(outcome.get(&test).status, TestStatus::Pass);
}

#[test]
fn test_that_crashes_twice_alone_fails() {
    let test = path("broken");
    let mut device = FakeDevice::default().script(&test, Script::Crash { times: 2 });
    let sleeper = RecordingSleeper::default();

    let outcome = run(
        builder(&sleeper),
        instances(&[test.as_str()]),
        CancelToken::new(),
        &mut device,
    );

    let stats = outcome.result.as_ref().expect("run succeeds");
    assert_eq!(stats.failed, 1);
    assert_eq!(device.batches.len(), 2, "one retry after the first crash");
    let reported = outcome.get(&test);
    assert_eq!(reported.status, TestStatus::Fail);
    assert!(
        reported
            .message
            .as_deref()
            .is_some_and(|message| message.contains("Crash: Incomplete test log")),
        "unexpected message: {:?}",
        reported.message
    );
}

#[test]
fn result_codes_are_reported() {
    let pass = path("pass");
    let fail = path("fail");
    let not_supported = path("not_supported");
    let mut device = FakeDevice::default()
        .script(
            &fail,
            Script::Result {
                code: "Fail",
                details: "bad pixel",
            },
        )
        .script(
            &not_supported,
            Script::Result {
                code: "NotSupported",
                details: "no extension",
            },
        );
    let sleeper = RecordingSleeper::default();

    let outcome = run(
        builder(&sleeper),
        instances(&[pass.as_str(), fail.as_str(), not_supported.as_str()]),
        CancelToken::new(),
        &mut device,
    );

    let stats = outcome.result.as_ref().expect("run succeeds");
    assert_eq!((stats.passed, stats.failed), (2, 1));
    assert_eq!(device.batches.len(), 1, "a clean batch runs once");
    assert_eq!(outcome.get(&not_supported).status, TestStatus::Pass);
    let failed = outcome.get(&fail);
    assert_eq!(failed.status, TestStatus::Fail);
    assert!(
        failed
            .message
            .as_deref()
            .is_some_and(|message| message.contains("Fail: bad pixel")),
        "unexpected message: {:?}",
        failed.message
    );
    assert!(
        outcome.reported.iter().all(|reported| reported.logs.is_empty()),
        "logs are not captured by default"
    );
}

#[test]
fn captured_logs_are_reported() {
    let test = path("logged");
    let mut device = FakeDevice::default();
    let sleeper = RecordingSleeper::default();
    let mut builder = builder(&sleeper);
    builder.set_capture_logs(true);

    let outcome = run(
        builder,
        instances(&[test.as_str()]),
        CancelToken::new(),
        &mut device,
    );

    outcome.result.as_ref().expect("run succeeds");
    let logs = &outcome.get(&test).logs;
    assert_eq!(logs.len(), 1);
    assert!(
        logs[0].starts_with(&format!("{test}@")),
        "unexpected log name: {}",
        logs[0]
    );
}

#[test]
fn exhausted_recovery_ends_the_run() {
    let a = path("a");
    let b = path("b");
    let mut device = FakeDevice {
        refuse_instrumentation: true,
        ..FakeDevice::default()
    };
    let sleeper = RecordingSleeper::default();

    let outcome = run(
        builder(&sleeper),
        instances(&[a.as_str(), b.as_str()]),
        CancelToken::new(),
        &mut device,
    );

    assert!(
        matches!(outcome.result, Err(RunError::DeviceUnavailable { .. })),
        "unexpected result: {:?}",
        outcome.result
    );
    // Reconnect, then reboot, then give up.
    assert_eq!(device.recoveries, 1);
    assert_eq!(device.reboots, 1);
    assert!(device.batches.is_empty());

    // The first test ran alone without ever producing output, so it was given up on. The second
    // was never finalized.
    assert_eq!(outcome.paths(), vec![a.as_str()]);
    let reported = outcome.get(&a);
    assert_eq!(reported.status, TestStatus::Fail);
    assert!(
        reported
            .message
            .as_deref()
            .is_some_and(|message| message.contains("Abort: Test cannot be executed")),
        "unexpected message: {:?}",
        reported.message
    );

    let stats = outcome.finished_stats.expect("run finished is always reported");
    assert_eq!(stats.initial_run_count, 2);
    assert_eq!(stats.final_run_count, 1);
    assert!(!stats.is_success());
}

#[test]
fn cancellation_stops_before_the_next_batch() {
    let all = paths(&["t0", "t1", "t2", "t3"]);
    let all_refs: Vec<&str> = all.iter().map(String::as_str).collect();
    let cancel = CancelToken::new();
    let mut device = FakeDevice {
        cancel_after_batches: Some((1, cancel.clone())),
        ..FakeDevice::default()
    };
    let sleeper = RecordingSleeper::default();
    let mut builder = builder(&sleeper);
    builder.set_batch_limit(2);

    let outcome = run(builder, instances(&all_refs), cancel, &mut device);

    assert!(
        matches!(outcome.result, Err(RunError::Cancelled)),
        "unexpected result: {:?}",
        outcome.result
    );
    assert_eq!(device.batches, vec![paths(&["t0", "t1"])]);
    assert_eq!(outcome.paths(), all_refs[..2].to_vec());
    let stats = outcome.finished_stats.expect("run finished is always reported");
    assert_eq!((stats.initial_run_count, stats.final_run_count), (4, 2));
}

#[test]
fn empty_run_touches_nothing() {
    let mut device = FakeDevice::default();
    let sleeper = RecordingSleeper::default();

    let outcome = run(
        builder(&sleeper),
        instances(&[]),
        CancelToken::new(),
        &mut device,
    );

    let stats = outcome.result.as_ref().expect("run succeeds");
    assert!(stats.is_success());
    assert!(outcome.reported.is_empty());
    assert!(device.commands.is_empty());
}
