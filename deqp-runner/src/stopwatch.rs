// Copyright (c) The deqp-runner Contributors
// SPDX-License-Identifier: Apache-2.0

//! Run timing.
//!
//! A run is reported with its wall-clock start time and its duration. The start time comes from
//! the realtime clock and the duration from the monotonic clock.

use std::time::{Duration, Instant, SystemTime};

#[derive(Clone, Debug)]
pub(crate) struct StopwatchStart {
    start_time: SystemTime,
    instant: Instant,
}

impl StopwatchStart {
    pub(crate) fn now() -> Self {
        Self {
            start_time: SystemTime::now(),
            instant: Instant::now(),
        }
    }

    pub(crate) fn end(&self) -> StopwatchEnd {
        StopwatchEnd {
            start_time: self.start_time,
            duration: self.instant.elapsed(),
        }
    }
}

#[derive(Clone, Debug)]
pub(crate) struct StopwatchEnd {
    pub(crate) start_time: SystemTime,
    pub(crate) duration: Duration,
}
