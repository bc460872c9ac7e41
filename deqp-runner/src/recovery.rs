// Copyright (c) The deqp-runner Contributors
// SPDX-License-Identifier: Apache-2.0

//! Recovery of a failing device link.
//!
//! Each consecutive transport failure without intervening progress escalates one step up a
//! ladder:
//!
//! | state     | connection refused        | link killed                             |
//! |-----------|---------------------------|-----------------------------------------|
//! | `Wait`    | reconnect, go to `Reboot` | cool down, kill processes, go to `Recover` |
//! | `Recover` | reconnect, go to `Reboot` | reconnect, kill processes, go to `Reboot`  |
//! | `Reboot`  | reboot, go to `Fail`      | reboot, go to `Fail`                    |
//! | `Fail`    | give up                   | give up                                 |
//!
//! Any progress made by the run resets the ladder to `Wait`.

use crate::{
    device::{Device, instrumentation::DEQP_PACKAGE_NAME},
    errors::{RunError, TransportError, TransportFailureKind},
};
use std::{fmt, time::Duration};
use tracing::warn;

/// Default delay before retrying after the link was killed.
pub const DEFAULT_RETRY_COOLDOWN: Duration = Duration::from_secs(6);

/// Default delay between killing on-device processes and checking that they are gone.
pub const DEFAULT_PROCESS_KILL_WAIT: Duration = Duration::from_secs(1);

/// A position on the recovery ladder.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum RecoveryState {
    /// Healthy. The next link failure is handled by waiting.
    #[default]
    Wait,

    /// The next failure is handled by reconnecting to the device.
    Recover,

    /// The next failure is handled by rebooting the device.
    Reboot,

    /// The next failure is fatal.
    Fail,
}

/// A remedial action taken on the way up the ladder.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RecoveryAction {
    /// Sleep for the cooldown period, then kill leftover dEQP processes.
    CooldownAndKill,

    /// Reconnect to the device, then kill leftover dEQP processes.
    ReconnectAndKill,

    /// Reconnect to the device.
    Reconnect,

    /// Reboot the device.
    Reboot,

    /// Stop trying.
    GiveUp,
}

/// Returns the next state and the action to take for a failure observed in `state`.
pub fn transition(
    state: RecoveryState,
    failure: TransportFailureKind,
) -> (RecoveryState, RecoveryAction) {
    use RecoveryAction as A;
    use RecoveryState as S;
    use TransportFailureKind as F;

    match (failure, state) {
        (F::ConnectionRefused, S::Wait | S::Recover) => (S::Reboot, A::Reconnect),
        (F::LinkKilled, S::Wait) => (S::Recover, A::CooldownAndKill),
        (F::LinkKilled, S::Recover) => (S::Reboot, A::ReconnectAndKill),
        (_, S::Reboot) => (S::Fail, A::Reboot),
        (_, S::Fail) => (S::Fail, A::GiveUp),
    }
}

/// Something that can block the current thread.
pub trait Sleeper {
    /// Blocks for `duration`.
    fn sleep(&mut self, duration: Duration);
}

/// Sleeps using [`std::thread::sleep`].
#[derive(Clone, Copy, Debug, Default)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&mut self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// The recovery state machine for one device.
pub struct Recovery {
    state: RecoveryState,
    retry_cooldown: Duration,
    process_kill_wait: Duration,
    sleeper: Box<dyn Sleeper>,
}

impl fmt::Debug for Recovery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Recovery")
            .field("state", &self.state)
            .field("retry_cooldown", &self.retry_cooldown)
            .field("process_kill_wait", &self.process_kill_wait)
            .finish_non_exhaustive()
    }
}

impl Recovery {
    /// Creates a new state machine in the `Wait` state.
    pub fn new(
        retry_cooldown: Duration,
        process_kill_wait: Duration,
        sleeper: Box<dyn Sleeper>,
    ) -> Self {
        Self {
            state: RecoveryState::Wait,
            retry_cooldown,
            process_kill_wait,
            sleeper,
        }
    }

    /// Returns the current state.
    pub fn state(&self) -> RecoveryState {
        self.state
    }

    /// Informs the state machine that the run made progress since the last failure.
    pub fn on_progress(&mut self) {
        self.state = RecoveryState::Wait;
    }

    /// Recovers from a connection that could not be opened.
    ///
    /// Returns `Ok` if the caller should retry, or an error if the device is gone.
    pub fn recover_connection_refused(
        &mut self,
        device: &mut dyn Device,
        cause: TransportError,
    ) -> Result<(), RunError> {
        self.escalate(device, TransportFailureKind::ConnectionRefused, cause)
    }

    /// Recovers from a connection that died or an instrumentation that never finished.
    ///
    /// Returns `Ok` if the caller should retry, or an error if the device is gone.
    pub fn recover_link_killed(
        &mut self,
        device: &mut dyn Device,
        cause: TransportError,
    ) -> Result<(), RunError> {
        self.escalate(device, TransportFailureKind::LinkKilled, cause)
    }

    /// Recovers from the given transport error.
    pub fn recover(&mut self, device: &mut dyn Device, cause: TransportError) -> Result<(), RunError> {
        let kind = cause.failure_kind();
        self.escalate(device, kind, cause)
    }

    fn escalate(
        &mut self,
        device: &mut dyn Device,
        kind: TransportFailureKind,
        mut cause: TransportError,
    ) -> Result<(), RunError> {
        // Every iteration moves one step up the ladder, so this ends at `GiveUp`.
        loop {
            let (next, action) = transition(self.state, kind);
            self.state = next;
            match action {
                RecoveryAction::GiveUp => {
                    warn!(serial = device.serial(), "cannot recover device link");
                    return Err(RunError::DeviceUnavailable { error: cause });
                }
                action => {
                    warn!(
                        serial = device.serial(),
                        failure = %kind,
                        ?action,
                        "device link failed, attempting recovery",
                    );
                    match self.perform(device, action) {
                        Ok(()) => return Ok(()),
                        Err(StepError::Transport(error)) => {
                            warn!(error = %error, "recovery action failed");
                            cause = error;
                        }
                        Err(StepError::ProcessesSurvived(pids)) => {
                            warn!(?pids, "dEQP processes survived kill");
                        }
                    }
                }
            }
        }
    }

    fn perform(&mut self, device: &mut dyn Device, action: RecoveryAction) -> Result<(), StepError> {
        match action {
            RecoveryAction::CooldownAndKill => {
                self.sleeper.sleep(self.retry_cooldown);
                self.kill_deqp_processes(device)
            }
            RecoveryAction::ReconnectAndKill => {
                device.recover()?;
                self.kill_deqp_processes(device)
            }
            RecoveryAction::Reconnect => Ok(device.recover()?),
            RecoveryAction::Reboot => Ok(device.reboot()?),
            RecoveryAction::GiveUp => Ok(()),
        }
    }

    fn kill_deqp_processes(&mut self, device: &mut dyn Device) -> Result<(), StepError> {
        for pid in deqp_process_ids(device)? {
            device.shell(&format!("kill -9 {pid}"))?;
        }
        self.sleeper.sleep(self.process_kill_wait);

        let survivors = deqp_process_ids(device)?;
        if survivors.is_empty() {
            Ok(())
        } else {
            Err(StepError::ProcessesSurvived(survivors))
        }
    }
}

#[derive(Debug)]
enum StepError {
    Transport(TransportError),
    ProcessesSurvived(Vec<u32>),
}

impl From<TransportError> for StepError {
    fn from(error: TransportError) -> Self {
        Self::Transport(error)
    }
}

fn deqp_process_ids(device: &mut dyn Device) -> Result<Vec<u32>, TransportError> {
    let output = device.shell(&format!("ps | grep {DEQP_PACKAGE_NAME}"))?;
    Ok(parse_process_ids(&output))
}

/// Extracts process ids from `ps` output: the second whitespace-separated field of every line.
fn parse_process_ids(output: &str) -> Vec<u32> {
    output
        .lines()
        .filter_map(|line| line.split_whitespace().nth(1))
        .filter_map(|pid| pid.parse().ok())
        .collect()
}
