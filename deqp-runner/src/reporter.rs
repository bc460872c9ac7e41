// Copyright (c) The deqp-runner Contributors
// SPDX-License-Identifier: Apache-2.0

//! Report test results as they are finalized.
//!
//! The runner emits [`TestEvent`]s. [`TestReporter`] prints them to a terminal, and
//! [`JunitReporter`] aggregates them into a JUnit XML file.

mod displayer;
mod events;
mod junit;

pub use displayer::*;
pub use events::*;
pub use junit::*;
