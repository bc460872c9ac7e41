// Copyright (c) The deqp-runner Contributors
// SPDX-License-Identifier: Apache-2.0

//! The command channel to a device under test.
//!
//! Everything the runner does on a device goes through the [`Device`] trait. [`AdbDevice`]
//! implements it on top of the `adb` command-line client.

mod adb;
pub mod instrumentation;

pub use adb::*;

use crate::errors::TransportError;

/// A device that accepts shell commands.
///
/// Implementations must report a command that could not be started as
/// [`TransportError::ConnectionRefused`], and a command whose connection died or stopped
/// responding as [`TransportError::LinkKilled`]. A command that ran and exited unsuccessfully is
/// not an error.
pub trait Device {
    /// Returns the serial number of the device.
    fn serial(&self) -> &str;

    /// Runs a shell command, returning its combined output.
    fn shell(&mut self, command: &str) -> Result<String, TransportError>;

    /// Runs a shell command, calling `on_line` for every line of output as it arrives.
    fn shell_streaming(
        &mut self,
        command: &str,
        on_line: &mut dyn FnMut(&str),
    ) -> Result<(), TransportError>;

    /// Writes `contents` to a file on the device.
    fn push_string(&mut self, contents: &str, remote_path: &str) -> Result<(), TransportError>;

    /// Returns the value of a system property, or `None` if it is unset.
    fn property(&mut self, name: &str) -> Result<Option<String>, TransportError> {
        let value = self.shell(&format!("getprop {name}"))?;
        let value = value.trim();
        Ok((!value.is_empty()).then(|| value.to_owned()))
    }

    /// Re-establishes the connection to the device.
    fn recover(&mut self) -> Result<(), TransportError>;

    /// Reboots the device and waits for it to come back.
    fn reboot(&mut self) -> Result<(), TransportError>;
}

impl<D: Device + ?Sized> Device for &mut D {
    fn serial(&self) -> &str {
        (**self).serial()
    }

    fn shell(&mut self, command: &str) -> Result<String, TransportError> {
        (**self).shell(command)
    }

    fn shell_streaming(
        &mut self,
        command: &str,
        on_line: &mut dyn FnMut(&str),
    ) -> Result<(), TransportError> {
        (**self).shell_streaming(command, on_line)
    }

    fn push_string(&mut self, contents: &str, remote_path: &str) -> Result<(), TransportError> {
        (**self).push_string(contents, remote_path)
    }

    fn property(&mut self, name: &str) -> Result<Option<String>, TransportError> {
        (**self).property(name)
    }

    fn recover(&mut self) -> Result<(), TransportError> {
        (**self).recover()
    }

    fn reboot(&mut self) -> Result<(), TransportError> {
        (**self).reboot()
    }
}
