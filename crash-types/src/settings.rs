// SPDX-License-Identifier: GPL-3.0-only

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::TypesError;

/// Snapshot of the user's privacy settings relevant to the daemon
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PrivacySettings {
    pub notifications: bool,
    pub automatic_sending: bool,
    pub auto_delete_duplicates: bool,
    pub auto_delete_max_similar_cores: u32,
    pub lifelog: bool,
}

impl Default for PrivacySettings {
    fn default() -> Self {
        Self {
            notifications: true,
            automatic_sending: false,
            auto_delete_duplicates: true,
            auto_delete_max_similar_cores: 2,
            lifelog: false,
        }
    }
}

/// On-disk layout: the keys live in a `[privacy]` table
#[derive(Debug, Default, Serialize, Deserialize)]
struct SettingsFile {
    #[serde(default)]
    privacy: PrivacySettings,
}

impl PrivacySettings {
    pub fn from_toml_str(input: &str) -> Result<Self, TypesError> {
        let file: SettingsFile = toml::from_str(input)?;
        Ok(file.privacy)
    }

    pub fn to_toml_string(&self) -> Result<String, TypesError> {
        let file = SettingsFile { privacy: *self };
        Ok(toml::to_string(&file)?)
    }

    /// Monitoring is wanted when either notifications or automatic sending is on
    pub fn monitoring_wanted(&self) -> bool {
        self.notifications || self.automatic_sending
    }

    pub fn value(&self, key: SettingKey) -> SettingValue {
        match key {
            SettingKey::Notifications => SettingValue::Bool(self.notifications),
            SettingKey::AutomaticSending => SettingValue::Bool(self.automatic_sending),
            SettingKey::AutoDeleteDuplicates => SettingValue::Bool(self.auto_delete_duplicates),
            SettingKey::AutoDeleteMaxSimilarCores => {
                SettingValue::Int(self.auto_delete_max_similar_cores)
            }
            SettingKey::Lifelog => SettingValue::Bool(self.lifelog),
        }
    }

    /// Changes needed to go from `self` to `next`, in [`SettingKey::ALL`] order
    pub fn diff(&self, next: &PrivacySettings) -> Vec<SettingChange> {
        SettingKey::ALL
            .into_iter()
            .filter(|key| self.value(*key) != next.value(*key))
            .map(|key| SettingChange {
                key,
                value: next.value(key),
            })
            .collect()
    }
}

/// Keys the daemon observes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SettingKey {
    Notifications,
    AutomaticSending,
    AutoDeleteDuplicates,
    AutoDeleteMaxSimilarCores,
    Lifelog,
}

impl SettingKey {
    pub const ALL: [SettingKey; 5] = [
        SettingKey::Notifications,
        SettingKey::AutomaticSending,
        SettingKey::AutoDeleteDuplicates,
        SettingKey::AutoDeleteMaxSimilarCores,
        SettingKey::Lifelog,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SettingKey::Notifications => "privacy.notifications",
            SettingKey::AutomaticSending => "privacy.automatic_sending",
            SettingKey::AutoDeleteDuplicates => "privacy.auto_delete_duplicates",
            SettingKey::AutoDeleteMaxSimilarCores => "privacy.auto_delete_max_similar_cores",
            SettingKey::Lifelog => "privacy.lifelog",
        }
    }
}

impl fmt::Display for SettingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingValue {
    Bool(bool),
    Int(u32),
}

impl SettingValue {
    pub fn as_bool(&self) -> bool {
        match self {
            SettingValue::Bool(value) => *value,
            SettingValue::Int(value) => *value != 0,
        }
    }

    pub fn as_int(&self) -> u32 {
        match self {
            SettingValue::Bool(value) => u32::from(*value),
            SettingValue::Int(value) => *value,
        }
    }
}

impl fmt::Display for SettingValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SettingValue::Bool(value) => write!(f, "{value}"),
            SettingValue::Int(value) => write!(f, "{value}"),
        }
    }
}

/// A single observed settings change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SettingChange {
    pub key: SettingKey,
    pub value: SettingValue,
}

impl SettingChange {
    pub fn new(key: SettingKey, value: SettingValue) -> Self {
        Self { key, value }
    }
}
