// Copyright (c) The deqp-runner Contributors
// SPDX-License-Identifier: Apache-2.0

use super::Device;
use crate::errors::TransportError;
use crossbeam_channel::RecvTimeoutError;
use duct::{Expression, cmd};
use std::{
    io::{self, BufRead, BufReader},
    sync::Arc,
    thread,
    time::{Duration, Instant},
};
use tracing::{debug, warn};

const BOOT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// A device reached through the `adb` client.
#[derive(Clone, Debug)]
pub struct AdbDevice {
    adb: String,
    serial: String,
    command_timeout: Duration,
}

impl AdbDevice {
    /// Creates a new handle for the device with the given serial number.
    ///
    /// A command that produces no output for `command_timeout` is killed and reported as a dead
    /// link.
    pub fn new(serial: impl Into<String>, command_timeout: Duration) -> Self {
        Self {
            adb: "adb".to_owned(),
            serial: serial.into(),
            command_timeout,
        }
    }

    /// Uses a specific `adb` binary instead of the one on `PATH`.
    pub fn with_adb(mut self, adb: impl Into<String>) -> Self {
        self.adb = adb.into();
        self
    }

    fn adb_expression(&self, args: &[&str]) -> Expression {
        let all_args = ["-s", self.serial.as_str()]
            .into_iter()
            .chain(args.iter().copied());
        cmd(&self.adb, all_args).stderr_to_stdout().unchecked()
    }

    fn run(
        &self,
        expression: Expression,
        on_line: &mut dyn FnMut(&str),
    ) -> Result<(), TransportError> {
        let handle = expression
            .reader()
            .map_err(|error| TransportError::ConnectionRefused {
                serial: self.serial.clone(),
                error,
            })?;
        let handle = Arc::new(handle);

        let (sender, receiver) = crossbeam_channel::unbounded();
        let reader_handle = Arc::clone(&handle);
        let reader_thread = thread::Builder::new()
            .name(format!("adb-reader-{}", self.serial))
            .spawn(move || {
                let mut reader = BufReader::new(&*reader_handle);
                let mut buf = Vec::new();
                loop {
                    buf.clear();
                    match reader.read_until(b'\n', &mut buf) {
                        Ok(0) => break,
                        Ok(_) => {
                            let line = String::from_utf8_lossy(&buf);
                            let line = line.trim_end_matches(['\n', '\r']).to_owned();
                            if sender.send(ReaderMessage::Line(line)).is_err() {
                                return;
                            }
                        }
                        Err(error) => {
                            // Failure to send means the receiver was dropped.
                            let _ = sender.send(ReaderMessage::Error(error));
                            return;
                        }
                    }
                }
                let _ = sender.send(ReaderMessage::Eof);
            })
            .map_err(|error| TransportError::ConnectionRefused {
                serial: self.serial.clone(),
                error,
            })?;

        let mut adb_error = None;
        loop {
            match receiver.recv_timeout(self.command_timeout) {
                Ok(ReaderMessage::Line(line)) => {
                    if is_adb_error(&line) {
                        adb_error = Some(line.clone());
                    }
                    on_line(&line);
                }
                Ok(ReaderMessage::Error(error)) => {
                    let _ = handle.kill();
                    return Err(self.link_killed(format!("reading output failed: {error}")));
                }
                Ok(ReaderMessage::Eof) | Err(RecvTimeoutError::Disconnected) => break,
                Err(RecvTimeoutError::Timeout) => {
                    // The reader thread exits once the killed child's pipe closes.
                    let _ = handle.kill();
                    return Err(self.link_killed(format!(
                        "command produced no output for {}",
                        humantime::format_duration(self.command_timeout)
                    )));
                }
            }
        }
        let _ = reader_thread.join();

        let status = handle
            .try_wait()
            .map_err(|error| self.link_killed(format!("waiting for adb failed: {error}")))?
            .map(|output| output.status);
        match (status, adb_error) {
            (Some(status), Some(message)) if !status.success() => {
                Err(TransportError::ConnectionRefused {
                    serial: self.serial.clone(),
                    error: io::Error::other(message),
                })
            }
            _ => Ok(()),
        }
    }

    fn link_killed(&self, reason: String) -> TransportError {
        TransportError::LinkKilled {
            serial: self.serial.clone(),
            reason,
        }
    }

    fn wait_for_boot(&mut self) -> Result<(), TransportError> {
        let start = Instant::now();
        loop {
            if self.property("sys.boot_completed")?.as_deref() == Some("1") {
                return Ok(());
            }
            if start.elapsed() >= self.command_timeout {
                return Err(self.link_killed("device did not finish booting".to_owned()));
            }
            thread::sleep(BOOT_POLL_INTERVAL);
        }
    }
}

impl Device for AdbDevice {
    fn serial(&self) -> &str {
        &self.serial
    }

    fn shell(&mut self, command: &str) -> Result<String, TransportError> {
        let mut output = String::new();
        self.run(self.adb_expression(&["shell", command]), &mut |line| {
            output.push_str(line);
            output.push('\n');
        })?;
        Ok(output)
    }

    fn shell_streaming(
        &mut self,
        command: &str,
        on_line: &mut dyn FnMut(&str),
    ) -> Result<(), TransportError> {
        debug!(serial = %self.serial, command, "running streaming shell command");
        self.run(self.adb_expression(&["shell", command]), on_line)
    }

    fn push_string(&mut self, contents: &str, remote_path: &str) -> Result<(), TransportError> {
        let command = format!("cat > {remote_path}");
        let expression = self
            .adb_expression(&["shell", &command])
            .stdin_bytes(contents.as_bytes().to_vec());
        self.run(expression, &mut |line| {
            warn!(remote_path, line, "unexpected output while pushing file");
        })
    }

    fn recover(&mut self) -> Result<(), TransportError> {
        self.run(self.adb_expression(&["reconnect"]), &mut |_| {})?;
        self.run(self.adb_expression(&["wait-for-device"]), &mut |_| {})
    }

    fn reboot(&mut self) -> Result<(), TransportError> {
        self.run(self.adb_expression(&["reboot"]), &mut |_| {})?;
        self.run(self.adb_expression(&["wait-for-device"]), &mut |_| {})?;
        self.wait_for_boot()
    }
}

#[derive(Debug)]
enum ReaderMessage {
    Line(String),
    Error(io::Error),
    Eof,
}

/// Returns true for the messages the adb client prints when it can't reach a device.
fn is_adb_error(line: &str) -> bool {
    line.starts_with("error:") || line.starts_with("adb: error:")
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("error: device 'abc' not found", true; "device not found")]
    #[test_case("adb: error: failed to get feature set", true; "prefixed")]
    #[test_case("INSTRUMENTATION_CODE: -1", false; "instrumentation output")]
    fn adb_errors(line: &str, expected: bool) {
        assert_eq!(is_adb_error(line), expected);
    }

    #[test]
    fn missing_adb_binary_is_connection_refused() {
        let mut device = AdbDevice::new("serial", Duration::from_secs(5))
            .with_adb("/nonexistent/path/to/adb");
        let error = device.shell("true").expect_err("adb cannot be spawned");
        assert!(
            matches!(error, TransportError::ConnectionRefused { .. }),
            "unexpected error: {error:?}"
        );
    }
}
