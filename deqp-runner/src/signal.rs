// Copyright (c) The deqp-runner Contributors
// SPDX-License-Identifier: Apache-2.0

//! Support for cancelling a run with Ctrl-C.

use crate::errors::SignalHandlerSetupError;
use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};
use tracing::warn;

/// The kind of signal handling to set up for a test run.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum SignalHandlerKind {
    /// Cancel the run on interrupt and termination signals.
    Standard,

    /// A no-op signal handler. Useful for tests.
    Noop,
}

impl SignalHandlerKind {
    /// Sets up signal handling and returns the token it cancels.
    ///
    /// The standard handler can only be installed once per process.
    pub fn build(self) -> Result<CancelToken, SignalHandlerSetupError> {
        let token = CancelToken::new();
        if self == Self::Standard {
            let handler_token = token.clone();
            ctrlc::set_handler(move || {
                if handler_token.is_cancelled() {
                    warn!("interrupted twice, exiting immediately");
                    std::process::exit(130);
                }
                warn!("interrupt received, cancelling run after the current batch");
                handler_token.cancel();
            })
            .map_err(SignalHandlerSetupError::new)?;
        }
        Ok(token)
    }
}

/// A flag that is polled before every batch attempt. Once set, the run stops.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    /// Creates a token that is not cancelled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// Returns true if cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}
