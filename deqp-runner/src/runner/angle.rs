// Copyright (c) The deqp-runner Contributors
// SPDX-License-Identifier: Apache-2.0

use crate::{
    device::{Device, instrumentation::DEQP_PACKAGE_NAME},
    errors::{AngleBackendParseError, TransportError},
};
use serde::Deserialize;
use std::{fmt, str::FromStr};
use tracing::info;

const DELETE_PKGS: &str = "settings delete global angle_gl_driver_selection_pkgs";
const DELETE_VALUES: &str = "settings delete global angle_gl_driver_selection_values";

/// The ANGLE backend that dEQP is forced to run on.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, Hash, PartialEq)]
#[serde(try_from = "String")]
pub enum AngleBackend {
    /// Don't use ANGLE.
    #[default]
    None,

    /// ANGLE on top of Vulkan.
    Vulkan,

    /// ANGLE on top of the native OpenGL ES driver.
    OpenGles,
}

impl AngleBackend {
    /// Returns the string representation of this backend.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Vulkan => "vulkan",
            Self::OpenGles => "opengles",
        }
    }

    /// Returns the known string representations.
    pub fn variants() -> &'static [&'static str] {
        &["none", "vulkan", "opengles"]
    }

    /// Configures the device to run dEQP on this backend.
    ///
    /// Any previous ANGLE selection is cleared first.
    pub fn setup(self, device: &mut dyn Device) -> Result<(), TransportError> {
        device.shell(DELETE_PKGS)?;
        device.shell(DELETE_VALUES)?;

        let backend = match self {
            Self::None => return Ok(()),
            Self::Vulkan => 2,
            Self::OpenGles => 0,
        };
        info!(backend = self.as_str(), "configuring ANGLE");
        device.shell(&format!(
            "settings put global angle_gl_driver_selection_pkgs {DEQP_PACKAGE_NAME}"
        ))?;
        device.shell("settings put global angle_gl_driver_selection_values angle")?;
        device.shell(&format!("setprop debug.angle.backend {backend}"))?;
        Ok(())
    }

    /// Stops forcing dEQP to use ANGLE.
    pub fn teardown(self, device: &mut dyn Device) -> Result<(), TransportError> {
        device.shell(DELETE_PKGS)?;
        device.shell(DELETE_VALUES)?;
        Ok(())
    }
}

impl FromStr for AngleBackend {
    type Err = AngleBackendParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(Self::None),
            "vulkan" => Ok(Self::Vulkan),
            "opengles" => Ok(Self::OpenGles),
            other => Err(AngleBackendParseError::new(other)),
        }
    }
}

impl TryFrom<String> for AngleBackend {
    type Error = AngleBackendParseError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl fmt::Display for AngleBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
