// Copyright (c) The deqp-runner Contributors
// SPDX-License-Identifier: Apache-2.0

#![warn(missing_docs)]

//! Core functionality for [deqp-run](https://crates.io/crates/deqp-run), a runner for the dEQP
//! conformance test suites on Android devices.
//!
//! Tests are sent to the device in batches. A batch that crashes the device or kills the link to
//! it is split until the unstable test runs alone, so one bad test costs one result instead of a
//! whole batch. For the basic flow of operations, see the documentation of
//! [`TestRunner`](runner::TestRunner).

pub mod capability;
pub mod config;
pub mod device;
pub mod errors;
pub mod list;
pub mod recovery;
pub mod reporter;
pub mod runner;
pub mod signal;
pub mod status;
mod stopwatch;
pub mod test_filter;
pub mod tracker;
