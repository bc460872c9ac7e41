// Copyright (c) The deqp-runner Contributors
// SPDX-License-Identifier: Apache-2.0

use crate::errors::RotationParseError;
use serde::Deserialize;
use std::{fmt, str::FromStr};

/// Screen orientation requested for a batch.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, Hash, PartialEq)]
#[serde(try_from = "String")]
pub enum ScreenRotation {
    /// Leave the orientation up to the device.
    #[default]
    Unspecified,

    /// 0 degrees.
    Portrait,

    /// 90 degrees.
    Landscape,

    /// 180 degrees.
    ReversePortrait,

    /// 270 degrees.
    ReverseLandscape,
}

impl ScreenRotation {
    /// Returns the string representation understood by the on-device executable.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unspecified => "unspecified",
            Self::Portrait => "0",
            Self::Landscape => "90",
            Self::ReversePortrait => "180",
            Self::ReverseLandscape => "270",
        }
    }

    /// Returns all known values.
    pub fn variants() -> &'static [&'static str] {
        &["unspecified", "0", "90", "180", "270"]
    }

    /// Returns true for orientations that need the device to support portrait mode.
    pub fn is_portrait_class(self) -> bool {
        matches!(self, Self::Portrait | Self::ReversePortrait)
    }

    /// Returns true for orientations that need the device to support landscape mode.
    pub fn is_landscape_class(self) -> bool {
        matches!(self, Self::Landscape | Self::ReverseLandscape)
    }
}

impl FromStr for ScreenRotation {
    type Err = RotationParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let rotation = match s {
            "unspecified" => Self::Unspecified,
            "0" => Self::Portrait,
            "90" => Self::Landscape,
            "180" => Self::ReversePortrait,
            "270" => Self::ReverseLandscape,
            other => return Err(RotationParseError::new(other)),
        };
        Ok(rotation)
    }
}

impl TryFrom<String> for ScreenRotation {
    type Error = RotationParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl fmt::Display for ScreenRotation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The render target a batch of tests is executed with.
///
/// Two configurations are the same instance key if all of their fields are equal.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct RunConfig {
    gl_config: String,
    rotation: ScreenRotation,
    surface_type: String,
    required: bool,
}

impl RunConfig {
    /// Creates a new run configuration.
    pub fn new(
        gl_config: impl Into<String>,
        rotation: ScreenRotation,
        surface_type: impl Into<String>,
        required: bool,
    ) -> Self {
        Self {
            gl_config: gl_config.into(),
            rotation,
            surface_type: surface_type.into(),
            required,
        }
    }

    /// The GL render target config name. May be empty.
    pub fn gl_config(&self) -> &str {
        &self.gl_config
    }

    /// The screen rotation.
    pub fn rotation(&self) -> ScreenRotation {
        self.rotation
    }

    /// The surface type, for example `window`, `pbuffer` or `fbo`.
    pub fn surface_type(&self) -> &str {
        &self.surface_type
    }

    /// Whether tests must fail, rather than pass trivially, if the device can't provide this
    /// configuration.
    pub fn is_required(&self) -> bool {
        self.required
    }

    /// Returns a stable identifier for this configuration, used in failure messages and log names.
    pub fn id(&self) -> String {
        format!(
            "{{glformat={},rotation={},surfacetype={},required={}}}",
            self.gl_config, self.rotation, self.surface_type, self.required
        )
    }
}

impl Default for RunConfig {
    fn default() -> Self {
        Self::new("", ScreenRotation::Unspecified, "window", false)
    }
}

impl fmt::Display for RunConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id())
    }
}
