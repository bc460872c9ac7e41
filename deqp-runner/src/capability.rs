// Copyright (c) The deqp-runner Contributors
// SPDX-License-Identifier: Apache-2.0

//! Device capability queries.
//!
//! The runner asks the device three kinds of questions before sending tests to it: which
//! system features it has (`pm list features`), which OpenGL ES version it implements
//! (`ro.opengles.version`), and whether a particular render configuration can be created (a
//! query instrumentation). Render-configuration answers are memoized in a [`ConfigSupportCache`].

use crate::{
    device::{Device, instrumentation::InstrumentationOptions},
    errors::CapabilityQueryError,
    list::{RunConfig, ScreenRotation},
};
use indexmap::IndexMap;
use regex::Regex;
use std::{collections::HashMap, fmt, sync::LazyLock};
use swrite::{SWrite, swrite};
use tracing::{debug, error, warn};

/// Device feature required for portrait-class rotations.
pub const FEATURE_PORTRAIT: &str = "android.hardware.screen.portrait";

/// Device feature required for landscape-class rotations.
pub const FEATURE_LANDSCAPE: &str = "android.hardware.screen.landscape";

/// Prefix of the device feature that advertises Vulkan support.
pub const FEATURE_VULKAN_LEVEL: &str = "android.hardware.vulkan.level";

/// Device feature carrying the Vulkan dEQP level the device claims to pass.
pub const FEATURE_VULKAN_DEQP_LEVEL: &str = "android.software.vulkan.deqp.level";

/// Device feature carrying the OpenGL ES (and EGL) dEQP level the device claims to pass.
pub const FEATURE_OPENGLES_DEQP_LEVEL: &str = "android.software.opengles.deqp.level";

const GLES_VERSION_PROPERTY: &str = "ro.opengles.version";
const RESULT_PREFIX: &str = "INSTRUMENTATION_RESULT: ";
const CODE_PREFIX: &str = "INSTRUMENTATION_CODE: ";

/// The dEQP test package being run.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum DeqpPackage {
    /// `dEQP-EGL`.
    Egl,
    /// `dEQP-GLES2`.
    Gles2,
    /// `dEQP-GLES3`.
    Gles3,
    /// `dEQP-GLES31`.
    Gles31,
    /// `dEQP-VK`.
    Vk,
}

impl DeqpPackage {
    /// Every known package.
    pub const ALL: [Self; 5] = [Self::Egl, Self::Gles2, Self::Gles3, Self::Gles31, Self::Vk];

    /// Looks up a package by its name, for example `dEQP-GLES3`.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|package| package.name() == name)
    }

    /// Infers the package from the first component of a test path, such as
    /// `dEQP-VK.api.smoke.triangle`.
    pub fn from_test_path(path: &str) -> Option<Self> {
        Self::from_name(path.split('.').next()?)
    }

    /// Returns the name of the package.
    pub fn name(self) -> &'static str {
        match self {
            Self::Egl => "dEQP-EGL",
            Self::Gles2 => "dEQP-GLES2",
            Self::Gles3 => "dEQP-GLES3",
            Self::Gles31 => "dEQP-GLES31",
            Self::Vk => "dEQP-VK",
        }
    }

    /// Returns the (major, minor) OpenGL ES version exercised by a GLES package.
    pub fn gles_version(self) -> Option<(u32, u32)> {
        match self {
            Self::Gles2 => Some((2, 0)),
            Self::Gles3 => Some((3, 0)),
            Self::Gles31 => Some((3, 1)),
            Self::Egl | Self::Vk => None,
        }
    }

    /// Returns true for the OpenGL ES packages.
    pub fn is_gles(self) -> bool {
        self.gles_version().is_some()
    }

    /// Returns the feature that carries this package's claimed dEQP level.
    ///
    /// EGL shares the OpenGL ES feature.
    pub fn deqp_level_feature(self) -> &'static str {
        match self {
            Self::Vk => FEATURE_VULKAN_DEQP_LEVEL,
            Self::Egl | Self::Gles2 | Self::Gles3 | Self::Gles31 => FEATURE_OPENGLES_DEQP_LEVEL,
        }
    }
}

impl fmt::Display for DeqpPackage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Memoized answers to render-configuration queries, keyed by the query command line.
#[derive(Clone, Debug, Default)]
pub struct ConfigSupportCache {
    entries: HashMap<String, bool>,
}

impl ConfigSupportCache {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached answer for a query command line.
    pub fn get(&self, key: &str) -> Option<bool> {
        self.entries.get(key).copied()
    }

    /// Returns the number of cached answers.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if nothing has been cached yet.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns whether `config` can be rendered at the given OpenGL ES version, asking the device
    /// only if the answer isn't cached.
    ///
    /// Failed queries are not cached.
    pub fn is_render_config_supported(
        &mut self,
        device: &mut dyn Device,
        options: &InstrumentationOptions,
        config: &RunConfig,
        (major, minor): (u32, u32),
    ) -> Result<bool, CapabilityQueryError> {
        let key = render_config_query_args(config, major, minor);
        if let Some(supported) = self.get(&key) {
            return Ok(supported);
        }

        let supported = query_render_config(device, options, &key)?;
        debug!(query = %key, supported, "render config query");
        self.entries.insert(key, supported);
        Ok(supported)
    }
}

/// Returns the command line passed to the render-configuration query.
pub fn render_config_query_args(config: &RunConfig, major: u32, minor: u32) -> String {
    let mut args = crate::device::instrumentation::render_config_args(config);
    if !args.is_empty() {
        args.push(' ');
    }
    swrite!(
        args,
        "--deqp-gl-major-version={major} --deqp-gl-minor-version={minor}"
    );
    args
}

fn query_render_config(
    device: &mut dyn Device,
    options: &InstrumentationOptions,
    query_args: &str,
) -> Result<bool, CapabilityQueryError> {
    let command = options.render_config_query_command(query_args);
    let output = device.shell(&command)?;
    PlatformQueryResult::parse(&output).supported()
}

/// The parsed output of a platform query instrumentation.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct PlatformQueryResult {
    values: IndexMap<String, String>,
    exit_code: Option<i32>,
}

impl PlatformQueryResult {
    /// Parses `INSTRUMENTATION_RESULT: key=value` and `INSTRUMENTATION_CODE: n` lines.
    ///
    /// Other lines are ignored.
    pub fn parse(output: &str) -> Self {
        let mut result = Self::default();
        for line in output.lines() {
            let line = line.trim_end_matches('\r');
            if let Some(rest) = line.strip_prefix(RESULT_PREFIX) {
                match rest.split_once('=') {
                    Some((key, value)) => {
                        result.values.insert(key.to_owned(), value.to_owned());
                    }
                    None => warn!(line, "unexpected instrumentation result format"),
                }
            } else if let Some(code) = line.strip_prefix(CODE_PREFIX) {
                match code.trim().parse() {
                    Ok(code) => result.exit_code = Some(code),
                    Err(_) => warn!(line, "unexpected instrumentation code format"),
                }
            }
        }
        result
    }

    /// Returns a result value.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Returns the exit code, if one was reported.
    pub fn exit_code(&self) -> Option<i32> {
        self.exit_code
    }

    /// Interprets the result as the answer to a render-configuration query.
    pub fn supported(&self) -> Result<bool, CapabilityQueryError> {
        let result = match self.exit_code {
            None => Err(CapabilityQueryError::MissingExitCode),
            Some(0) => match self.get("Supported") {
                Some("Yes") => Ok(true),
                Some("No") => Ok(false),
                value => Err(CapabilityQueryError::InvalidSupported {
                    value: value.map(str::to_owned),
                }),
            },
            Some(code) => Err(CapabilityQueryError::ExitCode { code }),
        };
        if let Err(error) = &result {
            error!(%error, values = ?self.values, "capability query failed");
        }
        result
    }
}

/// The system features a device advertises, with their optional versions.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct DeviceFeatures {
    features: IndexMap<String, Option<i32>>,
}

impl DeviceFeatures {
    /// Runs `pm list features` on the device and parses the result.
    pub fn query(device: &mut dyn Device) -> Result<Self, CapabilityQueryError> {
        let output = device.shell("pm list features")?;
        Self::parse(&output)
    }

    /// Parses `pm list features` output: whitespace-separated `feature:<name>[=<version>]`
    /// tokens.
    pub fn parse(output: &str) -> Result<Self, CapabilityQueryError> {
        let mut features = IndexMap::new();
        for token in output.split_whitespace() {
            let mut parts = token.split([':', '=']);
            let (Some("feature"), Some(name)) = (parts.next(), parts.next()) else {
                return Err(CapabilityQueryError::InvalidFeatureLine {
                    line: token.to_owned(),
                });
            };
            let version = match parts.next() {
                Some(value) => Some(decode_integer(value).ok_or_else(|| {
                    CapabilityQueryError::InvalidFeatureVersion {
                        name: name.to_owned(),
                        value: value.to_owned(),
                    }
                })?),
                None => None,
            };
            features.insert(name.to_owned(), version);
        }
        Ok(Self { features })
    }

    /// Returns true if the device has the feature.
    pub fn contains(&self, name: &str) -> bool {
        self.features.contains_key(name)
    }

    /// Returns the first feature whose name starts with `prefix`, along with its version.
    pub fn find_prefix(&self, prefix: &str) -> Option<(&str, Option<i32>)> {
        self.features
            .iter()
            .find(|(name, _)| name.starts_with(prefix))
            .map(|(name, version)| (name.as_str(), *version))
    }

    /// Returns true if the device can be put in the given rotation.
    ///
    /// An unspecified rotation is always supported.
    pub fn supports_rotation(&self, rotation: ScreenRotation) -> bool {
        if rotation.is_portrait_class() && !self.contains(FEATURE_PORTRAIT) {
            return false;
        }
        if rotation.is_landscape_class() && !self.contains(FEATURE_LANDSCAPE) {
            return false;
        }
        true
    }

    /// Returns true if the device advertises Vulkan.
    pub fn supports_vulkan(&self) -> bool {
        self.find_prefix(FEATURE_VULKAN_LEVEL).is_some()
    }

    /// Returns whether the device claims a dEQP level of at least `minimum` for `package`.
    ///
    /// A device that doesn't advertise a level at all is assumed to qualify.
    pub fn claims_deqp_level(
        &self,
        package: DeqpPackage,
        minimum: i32,
    ) -> Result<bool, CapabilityQueryError> {
        let feature = package.deqp_level_feature();
        match self.find_prefix(feature) {
            Some((_, Some(level))) => {
                debug!(feature, level, minimum, "device claims dEQP level");
                Ok(level >= minimum)
            }
            Some((name, None)) => Err(CapabilityQueryError::MissingFeatureVersion {
                name: name.to_owned(),
            }),
            None => {
                debug!(feature, "no dEQP level claimed, running unconditionally");
                Ok(true)
            }
        }
    }
}

/// Returns true if the device implements at least the given OpenGL ES version.
pub fn is_gles_version_supported(
    device: &mut dyn Device,
    (major, minor): (u32, u32),
) -> Result<bool, CapabilityQueryError> {
    let Some(value) = device.property(GLES_VERSION_PROPERTY)? else {
        return Ok(false);
    };
    let version: u32 = value
        .parse()
        .map_err(|_| CapabilityQueryError::InvalidProperty {
            name: GLES_VERSION_PROPERTY.to_owned(),
            value: value.clone(),
        })?;
    let (device_major, device_minor) = (version >> 16, version & 0xffff);
    Ok(device_major > major || (device_major == major && device_minor >= minor))
}

static CASE_LIST_DATE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"-master-(\d{4})-(\d\d)-(\d\d)\.txt$").expect("case list date regex is valid")
});

/// Returns the dEQP level a case list file requires, derived from a `-master-YYYY-MM-DD.txt`
/// suffix in its name.
///
/// The level packs the date as `(year << 16) + (month << 8) + day`.
pub fn required_deqp_level(case_list_file: &str) -> Option<i32> {
    let captures = CASE_LIST_DATE.captures(case_list_file)?;
    let field = |index: usize| -> Option<i32> { captures.get(index)?.as_str().parse().ok() };
    let (year, month, day) = (field(1)?, field(2)?, field(3)?);
    Some((year << 16) + (month << 8) + day)
}

/// Decodes an integer the way feature versions are written: decimal, `0x`/`0X`/`#`-prefixed
/// hexadecimal or `0`-prefixed octal, with an optional sign.
pub fn decode_integer(value: &str) -> Option<i32> {
    let (negative, digits) = match value.as_bytes().first()? {
        b'-' => (true, &value[1..]),
        b'+' => (false, &value[1..]),
        _ => (false, value),
    };
    let (radix, digits) = if let Some(hex) = digits
        .strip_prefix("0x")
        .or_else(|| digits.strip_prefix("0X"))
        .or_else(|| digits.strip_prefix('#'))
    {
        (16, hex)
    } else if digits.len() > 1 && digits.starts_with('0') {
        (8, &digits[1..])
    } else {
        (10, digits)
    };
    // A second sign after the prefix is not allowed.
    if digits.is_empty() || digits.starts_with(['-', '+']) {
        return None;
    }
    let magnitude = i64::from_str_radix(digits, radix).ok()?;
    i32::try_from(if negative { -magnitude } else { magnitude }).ok()
}
