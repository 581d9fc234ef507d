/*
 * Copyright (C) 2026 Mark Wells Dev
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with this program.  If not, see <https://www.gnu.org/licenses/>.
 */

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Deserializer};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Section prefix of every NPL setting.
pub const SECTION: &str = "NPL";

/// Debounce interval the server is told to use when nothing is configured.
pub const DEFAULT_DEBOUNCE_MS: u64 = 300;

/// Directory (inside a workspace folder) holding folder-scoped settings.
pub const FOLDER_SETTINGS_DIR: &str = ".npl";

/// File name of a settings file.
pub const SETTINGS_FILE: &str = "settings.json";

/// A recognized NPL setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SettingKey {
    /// Main source root override.
    Sources,
    /// Additional test source root.
    TestSources,
    /// Contributed library identifiers.
    ContribLibraries,
    /// Frontend source root.
    FrontendSources,
    /// Server-side change debouncing interval.
    DebouncingTimeMs,
}

impl SettingKey {
    /// Every recognized setting.
    pub const ALL: [Self; 5] = [
        Self::Sources,
        Self::TestSources,
        Self::ContribLibraries,
        Self::FrontendSources,
        Self::DebouncingTimeMs,
    ];

    /// Key relative to the `NPL` section, dot separated.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Sources => "sources",
            Self::TestSources => "testSources",
            Self::ContribLibraries => "contribLibraries",
            Self::FrontendSources => "frontendSources",
            Self::DebouncingTimeMs => "server.debouncing.time.ms",
        }
    }

    /// Fully qualified key, e.g. `NPL.sources`.
    #[must_use]
    pub fn qualified(self) -> String {
        format!("{SECTION}.{}", self.as_str())
    }
}

impl fmt::Display for SettingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SettingKey {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let key = s.strip_prefix("NPL.").unwrap_or(s);
        Self::ALL
            .into_iter()
            .find(|k| k.as_str().eq_ignore_ascii_case(key))
            .ok_or_else(|| anyhow!("Unknown NPL setting '{s}'"))
    }
}

/// Snapshot of the NPL settings visible from one scope.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    /// Overrides the main source root.
    #[serde(default)]
    pub sources: Option<String>,

    /// Adds a test source root.
    #[serde(default, alias = "testsources")]
    pub test_sources: Option<String>,

    /// Library identifiers passed through to the server.
    #[serde(
        default,
        alias = "contriblibraries",
        deserialize_with = "deserialize_libraries"
    )]
    pub contrib_libraries: Option<Vec<String>>,

    /// Frontend source root.
    #[serde(default, alias = "frontendsources")]
    pub frontend_sources: Option<String>,

    /// Server tuning.
    #[serde(default)]
    pub server: ServerSettings,
}

/// `server.*` settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ServerSettings {
    /// `server.debouncing.*`
    #[serde(default)]
    pub debouncing: DebouncingSettings,
}

/// `server.debouncing.*` settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct DebouncingSettings {
    /// `server.debouncing.time.*`
    #[serde(default)]
    pub time: DebounceTime,
}

/// `server.debouncing.time.ms`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DebounceTime {
    /// Interval in milliseconds.
    #[serde(default = "default_debounce_ms")]
    pub ms: u64,
}

impl Default for DebounceTime {
    fn default() -> Self {
        Self {
            ms: DEFAULT_DEBOUNCE_MS,
        }
    }
}

const fn default_debounce_ms() -> u64 {
    DEFAULT_DEBOUNCE_MS
}

/// `contribLibraries` may be written as a single string as well as a list.
fn deserialize_libraries<'de, D>(deserializer: D) -> Result<Option<Vec<String>>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(
        match Option::<OneOrMany>::deserialize(deserializer)? {
            None => None,
            Some(OneOrMany::One(library)) => Some(vec![library]),
            Some(OneOrMany::Many(libraries)) => Some(libraries),
        },
    )
}

impl Settings {
    /// Effective debounce interval in milliseconds.
    #[must_use]
    pub const fn debounce_ms(&self) -> u64 {
        self.server.debouncing.time.ms
    }

    /// Current value of `key` as JSON, `Null` when unset.
    #[must_use]
    pub fn value(&self, key: SettingKey) -> serde_json::Value {
        match key {
            SettingKey::Sources => serde_json::json!(self.sources),
            SettingKey::TestSources => serde_json::json!(self.test_sources),
            SettingKey::ContribLibraries => serde_json::json!(self.contrib_libraries),
            SettingKey::FrontendSources => serde_json::json!(self.frontend_sources),
            SettingKey::DebouncingTimeMs => serde_json::json!(self.debounce_ms()),
        }
    }

    /// Keys whose values differ between `self` and `other`.
    #[must_use]
    pub fn changed_keys(&self, other: &Self) -> Vec<SettingKey> {
        SettingKey::ALL
            .into_iter()
            .filter(|key| self.value(*key) != other.value(*key))
            .collect()
    }

    /// Default location of the user-level settings file
    /// (`~/.config/npl/settings.json`).
    #[must_use]
    pub fn default_user_file() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("npl").join(SETTINGS_FILE))
    }

    /// Path of the settings file scoped to a workspace folder.
    #[must_use]
    pub fn folder_file(folder: &Path) -> PathBuf {
        folder.join(FOLDER_SETTINGS_DIR).join(SETTINGS_FILE)
    }

    /// Load settings for a scope.
    ///
    /// Later sources win: defaults, then the user file, then the folder file
    /// (when a folder scope is given), then `NPL_*` environment variables
    /// (`NPL_SOURCES`, `NPL_SERVER__DEBOUNCING__TIME__MS`, ...).
    ///
    /// # Errors
    ///
    /// Returns an error if a settings file is malformed or a value has the
    /// wrong type.
    pub fn load(user_file: Option<&Path>, folder: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();

        builder = builder.set_default(
            SettingKey::DebouncingTimeMs.as_str(),
            i64::try_from(DEFAULT_DEBOUNCE_MS)?,
        )?;

        if let Some(path) = user_file
            && path.exists()
        {
            builder = builder.add_source(config::File::from(path));
        }

        if let Some(folder) = folder {
            let path = Self::folder_file(folder);
            if path.exists() {
                builder = builder.add_source(config::File::from(path));
            }
        }

        builder = builder.add_source(
            config::Environment::with_prefix(SECTION)
                .prefix_separator("_")
                .separator("__"),
        );

        let config = builder
            .build()
            .context("Failed to build NPL settings")?;

        config
            .try_deserialize()
            .context("Failed to deserialize NPL settings")
    }
}

/// Persist `value` under `key` in the settings file of `folder`.
///
/// Other keys already present in the file are kept. Nested keys such as
/// `server.debouncing.time.ms` are written as nested objects.
///
/// # Errors
///
/// Returns an error if the existing file cannot be parsed or the new file
/// cannot be written.
pub fn write_setting(folder: &Path, key: SettingKey, value: serde_json::Value) -> Result<()> {
    let path = Settings::folder_file(folder);

    let mut document = if path.exists() {
        let raw = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        serde_json::from_str(&raw).with_context(|| format!("Failed to parse {}", path.display()))?
    } else {
        serde_json::Value::Object(serde_json::Map::new())
    };

    let segments: Vec<&str> = key.as_str().split('.').collect();
    let mut node = &mut document;
    for (i, segment) in segments.iter().enumerate() {
        let map = node
            .as_object_mut()
            .ok_or_else(|| anyhow!("Setting '{key}' conflicts with a non-object value"))?;
        if i + 1 == segments.len() {
            map.insert((*segment).to_string(), value);
            break;
        }
        node = map
            .entry((*segment).to_string())
            .or_insert_with(|| serde_json::Value::Object(serde_json::Map::new()));
    }

    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;
    }
    let body = serde_json::to_string_pretty(&document)?;
    std::fs::write(&path, body).with_context(|| format!("Failed to write {}", path.display()))?;

    Ok(())
}
