// Copyright (c) The deqp-runner Contributors
// SPDX-License-Identifier: Apache-2.0

//! Configuration for deqp-runner.
//!
//! The embedded [`DeqpConfig::DEFAULT_CONFIG`] is always read first. A repository config file,
//! if present, is layered on top of it, and every profile falls back to `[profile.default]` for
//! the keys it leaves unset.

use crate::errors::{ConfigParseError, ConfigParseErrorKind, ProfileNotFound};
use camino::{Utf8Path, Utf8PathBuf};
use config::{Config, ConfigBuilder, ConfigError, File, FileFormat, builder::DefaultState};
use indexmap::IndexMap;
use serde::Deserialize;
use std::{collections::BTreeSet, time::Duration};
use tracing::warn;

/// Overall configuration for deqp-runner.
#[derive(Clone, Debug)]
pub struct DeqpConfig {
    workspace_root: Utf8PathBuf,
    default_profile: DefaultProfileImpl,
    other_profiles: IndexMap<String, CustomProfileImpl>,
}

impl DeqpConfig {
    /// The default location of the config within the working directory.
    pub const CONFIG_PATH: &'static str = ".config/deqp-runner.toml";

    /// Contains the default config as a TOML file.
    ///
    /// Repository-specific configuration is layered on top of the default config.
    pub const DEFAULT_CONFIG: &'static str = include_str!("../default-config.toml");

    /// The name of the default profile.
    pub const DEFAULT_PROFILE: &'static str = "default";

    /// Reads the config from the given file, or if not specified from `.config/deqp-runner.toml`
    /// in the given directory.
    ///
    /// If the file isn't specified and the directory doesn't have `.config/deqp-runner.toml`, the
    /// default config is used. Unknown keys produce warnings.
    pub fn from_sources(
        workspace_root: impl Into<Utf8PathBuf>,
        config_file: Option<&Utf8Path>,
    ) -> Result<Self, ConfigParseError> {
        let workspace_root = workspace_root.into();
        let (config_file, builder) = Self::make_builder(&workspace_root, config_file);

        let (deserialized, ignored) = Self::build_and_deserialize_config(&builder)
            .map_err(|kind| ConfigParseError::new(&config_file, kind))?;
        for path in &ignored {
            warn!("ignoring unknown configuration key `{path}` in {config_file}");
        }

        Ok(Self::from_deserialized(workspace_root, deserialized))
    }

    /// Returns the default config.
    #[cfg(test)]
    pub(crate) fn default_config(workspace_root: impl Into<Utf8PathBuf>) -> Self {
        let builder = Self::make_default_config();
        let (deserialized, ignored) =
            Self::build_and_deserialize_config(&builder).expect("default config is always valid");
        assert!(
            ignored.is_empty(),
            "found unknown keys in default config: {ignored:?}"
        );
        Self::from_deserialized(workspace_root.into(), deserialized)
    }

    /// Returns the profile with the given name, or an error if it isn't defined.
    pub fn profile(&self, name: impl AsRef<str>) -> Result<DeqpProfile<'_>, ProfileNotFound> {
        let name = name.as_ref();
        let custom_profile = if name == Self::DEFAULT_PROFILE {
            None
        } else {
            let profile = self.other_profiles.get(name).ok_or_else(|| {
                ProfileNotFound::new(name, self.all_profiles().map(str::to_owned))
            })?;
            Some(profile)
        };
        Ok(DeqpProfile {
            name: name.to_owned(),
            workspace_root: &self.workspace_root,
            default_profile: &self.default_profile,
            custom_profile,
        })
    }

    fn all_profiles(&self) -> impl Iterator<Item = &str> + '_ {
        std::iter::once(Self::DEFAULT_PROFILE).chain(self.other_profiles.keys().map(String::as_str))
    }

    // ---
    // Helper methods
    // ---

    fn make_builder(
        workspace_root: &Utf8Path,
        config_file: Option<&Utf8Path>,
    ) -> (Utf8PathBuf, ConfigBuilder<DefaultState>) {
        let builder = Self::make_default_config();
        match config_file {
            // An explicitly specified file must exist.
            Some(file) => (
                file.to_owned(),
                builder.add_source(File::new(file.as_str(), FileFormat::Toml)),
            ),
            None => {
                let default_file = workspace_root.join(Self::CONFIG_PATH);
                let builder = builder.add_source(
                    File::new(default_file.as_str(), FileFormat::Toml).required(false),
                );
                (default_file, builder)
            }
        }
    }

    fn make_default_config() -> ConfigBuilder<DefaultState> {
        Config::builder().add_source(File::from_str(Self::DEFAULT_CONFIG, FileFormat::Toml))
    }

    /// Returns the deserialized config along with the paths of ignored keys.
    fn build_and_deserialize_config(
        builder: &ConfigBuilder<DefaultState>,
    ) -> Result<(DeqpConfigDeserialize, BTreeSet<String>), ConfigParseErrorKind> {
        let config = builder
            .build_cloned()
            .map_err(|error| ConfigParseErrorKind::BuildError(Box::new(error)))?;

        let mut ignored = BTreeSet::new();
        let mut cb = |path: serde_ignored::Path| {
            ignored.insert(path.to_string());
        };
        let ignored_de = serde_ignored::Deserializer::new(config, &mut cb);
        let config: DeqpConfigDeserialize =
            serde_path_to_error::deserialize(ignored_de).map_err(|error| {
                // serde_path_to_error reports the key already, so drop it from the config error.
                let path = error.path().clone();
                let error = match error.into_inner() {
                    ConfigError::At { error, .. } => *error,
                    other => other,
                };
                ConfigParseErrorKind::DeserializeError(Box::new(serde_path_to_error::Error::new(
                    path, error,
                )))
            })?;

        Ok((config, ignored))
    }

    fn from_deserialized(workspace_root: Utf8PathBuf, deserialized: DeqpConfigDeserialize) -> Self {
        let mut other_profiles = deserialized.profiles;
        let default_profile = DefaultProfileImpl::new(
            other_profiles
                .shift_remove(Self::DEFAULT_PROFILE)
                .expect("default profile is present in the embedded config"),
        );
        Self {
            workspace_root,
            default_profile,
            other_profiles,
        }
    }
}

/// A deqp-runner profile, with every key resolved against the default profile.
///
/// Returned by [`DeqpConfig::profile`].
#[derive(Clone, Debug)]
pub struct DeqpProfile<'cfg> {
    name: String,
    workspace_root: &'cfg Utf8Path,
    default_profile: &'cfg DefaultProfileImpl,
    custom_profile: Option<&'cfg CustomProfileImpl>,
}

impl<'cfg> DeqpProfile<'cfg> {
    /// Returns the name of the profile.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the batch size limit for full runs.
    pub fn batch_limit(&self) -> usize {
        self.custom_profile
            .and_then(|profile| profile.batch_limit)
            .unwrap_or(self.default_profile.batch_limit)
    }

    /// Returns the batch size limit for incremental runs.
    pub fn incremental_batch_limit(&self) -> usize {
        self.custom_profile
            .and_then(|profile| profile.incremental_batch_limit)
            .unwrap_or(self.default_profile.incremental_batch_limit)
    }

    /// Returns true if per-test logs should be captured.
    pub fn capture_logs(&self) -> bool {
        self.custom_profile
            .and_then(|profile| profile.capture_logs)
            .unwrap_or(self.default_profile.capture_logs)
    }

    /// Returns true if the on-device watchdog should be turned off.
    pub fn disable_watchdog(&self) -> bool {
        self.custom_profile
            .and_then(|profile| profile.disable_watchdog)
            .unwrap_or(self.default_profile.disable_watchdog)
    }

    /// Returns the delay before reconnecting after the link to the device was killed.
    pub fn retry_cooldown(&self) -> Duration {
        self.custom_profile
            .and_then(|profile| profile.retry_cooldown)
            .unwrap_or(self.default_profile.retry_cooldown)
    }

    /// Returns the delay between killing stray processes and checking for survivors.
    pub fn process_kill_wait(&self) -> Duration {
        self.custom_profile
            .and_then(|profile| profile.process_kill_wait)
            .unwrap_or(self.default_profile.process_kill_wait)
    }

    /// Returns how long a device command may go without output before it is killed.
    pub fn command_timeout(&self) -> Duration {
        self.custom_profile
            .and_then(|profile| profile.command_timeout)
            .unwrap_or(self.default_profile.command_timeout)
    }

    /// Returns the JUnit configuration for this profile, or `None` if no report is written.
    pub fn junit(&self) -> Option<JunitConfig<'cfg>> {
        let custom = self.custom_profile.map(|profile| &profile.junit);
        let path = custom
            .and_then(|junit| junit.path.as_deref())
            .or(self.default_profile.junit.path.as_deref())?;
        let report_name = custom
            .and_then(|junit| junit.report_name.as_deref())
            .unwrap_or(&self.default_profile.junit.report_name);
        let store_logs = custom
            .and_then(|junit| junit.store_logs)
            .unwrap_or(self.default_profile.junit.store_logs);
        Some(JunitConfig {
            path: self.workspace_root.join(path),
            report_name,
            store_logs,
        })
    }
}

/// JUnit configuration for a profile.
#[derive(Clone, Debug)]
pub struct JunitConfig<'cfg> {
    path: Utf8PathBuf,
    report_name: &'cfg str,
    store_logs: bool,
}

impl<'cfg> JunitConfig<'cfg> {
    /// Returns the absolute path to the report.
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    /// Returns the name of the report.
    pub fn report_name(&self) -> &'cfg str {
        self.report_name
    }

    /// Returns true if captured logs are attached to test cases.
    pub fn store_logs(&self) -> bool {
        self.store_logs
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct DeqpConfigDeserialize {
    #[serde(rename = "profile", default)]
    profiles: IndexMap<String, CustomProfileImpl>,
}

#[derive(Clone, Debug)]
struct DefaultProfileImpl {
    batch_limit: usize,
    incremental_batch_limit: usize,
    capture_logs: bool,
    disable_watchdog: bool,
    retry_cooldown: Duration,
    process_kill_wait: Duration,
    command_timeout: Duration,
    junit: DefaultJunitImpl,
}

impl DefaultProfileImpl {
    fn new(p: CustomProfileImpl) -> Self {
        Self {
            batch_limit: p
                .batch_limit
                .expect("batch-limit present in default profile"),
            incremental_batch_limit: p
                .incremental_batch_limit
                .expect("incremental-batch-limit present in default profile"),
            capture_logs: p
                .capture_logs
                .expect("capture-logs present in default profile"),
            disable_watchdog: p
                .disable_watchdog
                .expect("disable-watchdog present in default profile"),
            retry_cooldown: p
                .retry_cooldown
                .expect("retry-cooldown present in default profile"),
            process_kill_wait: p
                .process_kill_wait
                .expect("process-kill-wait present in default profile"),
            command_timeout: p
                .command_timeout
                .expect("command-timeout present in default profile"),
            junit: DefaultJunitImpl {
                path: p.junit.path,
                report_name: p
                    .junit
                    .report_name
                    .expect("junit.report-name present in default profile"),
                store_logs: p
                    .junit
                    .store_logs
                    .expect("junit.store-logs present in default profile"),
            },
        }
    }
}

#[derive(Clone, Debug)]
struct DefaultJunitImpl {
    path: Option<Utf8PathBuf>,
    report_name: String,
    store_logs: bool,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct CustomProfileImpl {
    #[serde(default, deserialize_with = "deserialize_batch_limit")]
    batch_limit: Option<usize>,
    #[serde(default, deserialize_with = "deserialize_batch_limit")]
    incremental_batch_limit: Option<usize>,
    #[serde(default)]
    capture_logs: Option<bool>,
    #[serde(default)]
    disable_watchdog: Option<bool>,
    #[serde(default, with = "humantime_serde::option")]
    retry_cooldown: Option<Duration>,
    #[serde(default, with = "humantime_serde::option")]
    process_kill_wait: Option<Duration>,
    #[serde(default, with = "humantime_serde::option")]
    command_timeout: Option<Duration>,
    #[serde(default)]
    junit: JunitImpl,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct JunitImpl {
    #[serde(default)]
    path: Option<Utf8PathBuf>,
    #[serde(default)]
    report_name: Option<String>,
    #[serde(default)]
    store_logs: Option<bool>,
}

fn deserialize_batch_limit<'de, D>(deserializer: D) -> Result<Option<usize>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let limit = Option::<usize>::deserialize(deserializer)?;
    if limit == Some(0) {
        return Err(serde::de::Error::custom("batch limit must be at least 1"));
    }
    Ok(limit)
}
