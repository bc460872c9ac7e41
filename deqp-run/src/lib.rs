// Copyright (c) The deqp-runner Contributors
// SPDX-License-Identifier: Apache-2.0

//! Runs dEQP conformance tests on an Android device over adb.
//!
//! The runner logic lives in [`deqp_runner`]; this crate is the command-line front end.

#![warn(missing_docs)]

mod dispatch;
mod errors;
mod output;

#[doc(hidden)]
pub use dispatch::*;
#[doc(hidden)]
pub use errors::*;
