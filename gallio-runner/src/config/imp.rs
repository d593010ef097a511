// Copyright (c) The gallio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::{
    assertions::AssertionFailureBehavior,
    errors::{ConfigParseError, ProfileNotFound},
    tree::SortOrder,
};
use camino::{Utf8Path, Utf8PathBuf};
use config::{Config, ConfigBuilder, ConfigError, File, FileFormat, builder::DefaultState};
use gallio_metadata::TestStatus;
use serde::{Deserialize, Deserializer, de::Error as _};
use std::{
    collections::{BTreeSet, HashMap},
    time::Duration,
};
use tracing::warn;

/// Overall configuration for gallio.
///
/// Most settings are obtained through [profiles](GallioProfile).
#[derive(Clone, Debug)]
pub struct GallioConfig {
    workspace_root: Utf8PathBuf,
    inner: GallioConfigImpl,
}

impl GallioConfig {
    /// The default location of the config within the workspace: `.config/gallio.toml`.
    pub const CONFIG_PATH: &'static str = ".config/gallio.toml";

    /// Contains the default config as a TOML file.
    ///
    /// Repository-specific configuration is layered on top of the default config.
    pub const DEFAULT_CONFIG: &'static str = include_str!("../../default-config.toml");

    /// The name of the default profile.
    pub const DEFAULT_PROFILE: &'static str = "default";

    /// Reads the config from the given file, or if not specified from `.config/gallio.toml` in the
    /// workspace root.
    ///
    /// If no config file is specified and the workspace doesn't have `.config/gallio.toml`, uses
    /// the default config.
    pub fn from_sources(
        workspace_root: impl Into<Utf8PathBuf>,
        config_file: Option<&Utf8Path>,
    ) -> Result<Self, ConfigParseError> {
        Self::from_sources_impl(workspace_root, config_file, |config_file, unknown| {
            let mut unknown_str = String::new();
            if unknown.len() == 1 {
                // Print this on the same line.
                unknown_str.push(' ');
                unknown_str.extend(unknown.iter().map(String::as_str));
            } else {
                for ignored_key in unknown {
                    unknown_str.push_str("\n  - ");
                    unknown_str.push_str(ignored_key);
                }
            }
            warn!("ignoring unknown configuration keys in config file {config_file}:{unknown_str}");
        })
    }

    // A custom unknown_callback can be passed in while testing.
    fn from_sources_impl(
        workspace_root: impl Into<Utf8PathBuf>,
        config_file: Option<&Utf8Path>,
        mut unknown_callback: impl FnMut(&Utf8Path, &BTreeSet<String>),
    ) -> Result<Self, ConfigParseError> {
        let workspace_root = workspace_root.into();
        let (config_file, source) = match config_file {
            Some(file) => (file.to_owned(), File::new(file.as_str(), FileFormat::Toml)),
            None => {
                let config_file = workspace_root.join(Self::CONFIG_PATH);
                let source = File::new(config_file.as_str(), FileFormat::Toml).required(false);
                (config_file, source)
            }
        };

        let builder = Self::make_default_config().add_source(source);
        let (deserialized, unknown) = Self::build_and_deserialize_config(&builder)
            .map_err(|error| ConfigParseError::new(&config_file, error))?;
        if !unknown.is_empty() {
            unknown_callback(&config_file, &unknown);
        }

        let inner = deserialized
            .into_config_impl()
            .map_err(|error| ConfigParseError::new(&config_file, error))?;
        Ok(Self {
            workspace_root,
            inner,
        })
    }

    /// Returns the default config, ignoring any config files.
    pub fn default_config(workspace_root: impl Into<Utf8PathBuf>) -> Result<Self, ConfigParseError> {
        let (deserialized, _unknown) =
            Self::build_and_deserialize_config(&Self::make_default_config())
                .map_err(|error| ConfigParseError::new("<default config>", error))?;
        let inner = deserialized
            .into_config_impl()
            .map_err(|error| ConfigParseError::new("<default config>", error))?;
        Ok(Self {
            workspace_root: workspace_root.into(),
            inner,
        })
    }

    /// The workspace root the config was read for.
    pub fn workspace_root(&self) -> &Utf8Path {
        &self.workspace_root
    }

    /// The name of the profile used when none is specified.
    pub fn default_profile_name(&self) -> &str {
        &self.inner.default_profile_name
    }

    /// Returns the profile with the given name, or an error if it isn't defined.
    pub fn profile(&self, name: impl AsRef<str>) -> Result<GallioProfile<'_>, ProfileNotFound> {
        let name = name.as_ref();
        let custom_profile = match name {
            Self::DEFAULT_PROFILE => None,
            other => Some(
                self.inner
                    .other_profiles
                    .get(other)
                    .ok_or_else(|| ProfileNotFound::new(name, self.all_profiles()))?,
            ),
        };
        Ok(GallioProfile {
            name: name.to_owned(),
            default_profile: &self.inner.default_profile,
            custom_profile,
        })
    }

    /// The names of all known profiles.
    pub fn all_profiles(&self) -> impl Iterator<Item = &str> + '_ {
        self.inner
            .other_profiles
            .keys()
            .map(String::as_str)
            .chain(std::iter::once(Self::DEFAULT_PROFILE))
    }

    fn make_default_config() -> ConfigBuilder<DefaultState> {
        Config::builder().add_source(File::from_str(Self::DEFAULT_CONFIG, FileFormat::Toml))
    }

    /// Returns the deserialized config along with the keys that weren't recognized.
    fn build_and_deserialize_config(
        builder: &ConfigBuilder<DefaultState>,
    ) -> Result<(GallioConfigDeserialize, BTreeSet<String>), ConfigError> {
        let config = builder.build_cloned()?;

        let mut ignored = BTreeSet::new();
        let config: GallioConfigDeserialize =
            serde_ignored::deserialize(config, |path: serde_ignored::Path| {
                ignored.insert(path.to_string());
            })?;
        Ok((config, ignored))
    }
}

/// A configuration profile for gallio.
///
/// Returned by [`GallioConfig::profile`]. Settings not set in the profile fall back to the
/// default profile.
#[derive(Clone, Debug)]
pub struct GallioProfile<'cfg> {
    name: String,
    default_profile: &'cfg DefaultProfileImpl,
    custom_profile: Option<&'cfg CustomProfileImpl>,
}

impl GallioProfile<'_> {
    /// The name of the profile.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The per-test-case timeout, or `None` if test cases may run forever.
    pub fn test_timeout(&self) -> Option<Duration> {
        let timeout = self
            .custom_profile
            .and_then(|profile| profile.test_timeout)
            .unwrap_or(self.default_profile.test_timeout);
        (!timeout.is_zero()).then_some(timeout)
    }

    /// Whether to cancel the remaining tests after the first failure.
    pub fn fail_fast(&self) -> bool {
        self.custom_profile
            .and_then(|profile| profile.fail_fast)
            .unwrap_or(self.default_profile.fail_fast)
    }

    /// What happens when an assertion fails.
    pub fn assertion_failure_behavior(&self) -> AssertionFailureBehavior {
        self.custom_profile
            .and_then(|profile| profile.assertion_failure_behavior)
            .unwrap_or(self.default_profile.assertion_failure_behavior)
    }

    /// Whether process output is kept in the test log.
    pub fn capture_process_output(&self) -> bool {
        self.custom_profile
            .and_then(|profile| profile.capture_process_output)
            .unwrap_or(self.default_profile.capture_process_output)
    }

    /// How long to keep reading a process-backed test's output after the process exits.
    pub fn leak_timeout(&self) -> Duration {
        self.custom_profile
            .and_then(|profile| profile.leak_timeout)
            .unwrap_or(self.default_profile.leak_timeout)
    }

    /// How long to wait for leftover tasks after a test case finishes.
    pub fn reap(&self) -> ReapConfig {
        let custom = self.custom_profile.map(|profile| &profile.reap);
        ReapConfig {
            join_before_abort: custom
                .and_then(|reap| reap.join_before_abort)
                .unwrap_or(self.default_profile.reap.join_before_abort),
            join_after_abort: custom
                .and_then(|reap| reap.join_after_abort)
                .unwrap_or(self.default_profile.reap.join_after_abort),
        }
    }

    /// How `gallio tree` orders siblings.
    pub fn tree_sort(&self) -> SortOrder {
        self.custom_profile
            .and_then(|profile| profile.tree.sort)
            .unwrap_or(self.default_profile.tree.sort)
    }

    /// Statuses of leaf nodes hidden by `gallio tree`.
    pub fn tree_hide(&self) -> &BTreeSet<TestStatus> {
        self.custom_profile
            .and_then(|profile| profile.tree.hide.as_ref())
            .unwrap_or(&self.default_profile.tree.hide)
    }
}

/// Timeouts for reaping the tasks a test case leaves behind.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ReapConfig {
    /// How long to wait before aborting leftover tasks.
    pub join_before_abort: Duration,
    /// How long to wait for aborted tasks before giving up on them.
    pub join_after_abort: Duration,
}

impl Default for ReapConfig {
    fn default() -> Self {
        Self {
            join_before_abort: Duration::from_secs(3),
            join_after_abort: Duration::from_secs(2),
        }
    }
}

#[derive(Clone, Debug)]
struct GallioConfigImpl {
    default_profile_name: String,
    default_profile: DefaultProfileImpl,
    other_profiles: HashMap<String, CustomProfileImpl>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct GallioConfigDeserialize {
    default_profile: String,
    #[serde(rename = "profile")]
    profiles: HashMap<String, CustomProfileImpl>,
}

impl GallioConfigDeserialize {
    fn into_config_impl(mut self) -> Result<GallioConfigImpl, ConfigError> {
        let default = self
            .profiles
            .remove(GallioConfig::DEFAULT_PROFILE)
            .ok_or_else(|| ConfigError::NotFound("profile.default".to_owned()))?;
        let default_profile = DefaultProfileImpl::new(default)?;

        if self.default_profile != GallioConfig::DEFAULT_PROFILE
            && !self.profiles.contains_key(&self.default_profile)
        {
            return Err(ConfigError::Message(format!(
                "default-profile `{}` is not defined",
                self.default_profile
            )));
        }

        Ok(GallioConfigImpl {
            default_profile_name: self.default_profile,
            default_profile,
            other_profiles: self.profiles,
        })
    }
}

#[derive(Clone, Debug)]
struct DefaultProfileImpl {
    test_timeout: Duration,
    fail_fast: bool,
    assertion_failure_behavior: AssertionFailureBehavior,
    capture_process_output: bool,
    leak_timeout: Duration,
    reap: ReapConfig,
    tree: DefaultTreeImpl,
}

#[derive(Clone, Debug)]
struct DefaultTreeImpl {
    sort: SortOrder,
    hide: BTreeSet<TestStatus>,
}

impl DefaultProfileImpl {
    fn new(p: CustomProfileImpl) -> Result<Self, ConfigError> {
        fn required<T>(value: Option<T>, key: &str) -> Result<T, ConfigError> {
            value.ok_or_else(|| ConfigError::NotFound(format!("profile.default.{key}")))
        }

        Ok(Self {
            test_timeout: required(p.test_timeout, "test-timeout")?,
            fail_fast: required(p.fail_fast, "fail-fast")?,
            assertion_failure_behavior: required(
                p.assertion_failure_behavior,
                "assertion-failure-behavior",
            )?,
            capture_process_output: required(p.capture_process_output, "capture-process-output")?,
            leak_timeout: required(p.leak_timeout, "leak-timeout")?,
            reap: ReapConfig {
                join_before_abort: required(p.reap.join_before_abort, "reap.join-before-abort")?,
                join_after_abort: required(p.reap.join_after_abort, "reap.join-after-abort")?,
            },
            tree: DefaultTreeImpl {
                sort: required(p.tree.sort, "tree.sort")?,
                hide: required(p.tree.hide, "tree.hide")?,
            },
        })
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct CustomProfileImpl {
    #[serde(default, with = "humantime_serde::option")]
    test_timeout: Option<Duration>,
    #[serde(default)]
    fail_fast: Option<bool>,
    #[serde(default, deserialize_with = "deserialize_behavior")]
    assertion_failure_behavior: Option<AssertionFailureBehavior>,
    #[serde(default)]
    capture_process_output: Option<bool>,
    #[serde(default, with = "humantime_serde::option")]
    leak_timeout: Option<Duration>,
    #[serde(default)]
    reap: ReapImpl,
    #[serde(default)]
    tree: TreeImpl,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct ReapImpl {
    #[serde(default, with = "humantime_serde::option")]
    join_before_abort: Option<Duration>,
    #[serde(default, with = "humantime_serde::option")]
    join_after_abort: Option<Duration>,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct TreeImpl {
    #[serde(default)]
    sort: Option<SortOrder>,
    #[serde(default)]
    hide: Option<BTreeSet<TestStatus>>,
}

fn deserialize_behavior<'de, D>(deserializer: D) -> Result<Option<AssertionFailureBehavior>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<String>::deserialize(deserializer)?;
    value
        .map(|value| value.parse().map_err(D::Error::custom))
        .transpose()
}
