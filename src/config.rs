//! Configuration types for openphone-archiver

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, time::Duration};

/// Activity API settings
///
/// Used as a nested sub-config within [`Config`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Base URL of the communication API (default: "https://communication.openphoneapi.com")
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Records requested per page (default: 200)
    #[serde(default = "default_page_size")]
    pub page_size: usize,

    /// Timeout for a single activity page request (default: 30 seconds)
    #[serde(default = "default_request_timeout", with = "duration_serde")]
    pub request_timeout: Duration,

    /// User agent sent with every request
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            page_size: default_page_size(),
            request_timeout: default_request_timeout(),
            user_agent: default_user_agent(),
        }
    }
}

/// Media download settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AssetConfig {
    /// Maximum media fetches in flight at once (default: 16)
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,

    /// Timeout for a single media fetch (default: 60 seconds)
    #[serde(default = "default_asset_timeout", with = "duration_serde")]
    pub timeout: Duration,
}

impl Default for AssetConfig {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            timeout: default_asset_timeout(),
        }
    }
}

/// Which dates get their own folder in the archive
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DateFolderPolicy {
    /// A date folder exists only when it holds media or call summaries (default)
    #[default]
    MediaOnly,
    /// Additionally write `<date>/conversation.txt` for every date with messages
    WithDailyTranscript,
}

/// File collision handling strategy for names inside one archive folder
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileCollisionAction {
    /// Append (1), (2), etc. to filename (default)
    #[default]
    Rename,
    /// Later entries replace earlier ones
    Overwrite,
    /// Keep the first entry, drop later ones
    Skip,
}

/// Archive layout and output settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ArchiveConfig {
    /// Directory the finished ZIP is saved into (default: "./archives")
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Date folder policy
    #[serde(default)]
    pub date_folders: DateFolderPolicy,

    /// What to do when two entries want the same filename
    #[serde(default)]
    pub file_collision: FileCollisionAction,

    /// Fixed UTC offset in minutes for date bucketing (None = system local time)
    #[serde(default)]
    pub utc_offset_minutes: Option<i32>,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            date_folders: DateFolderPolicy::default(),
            file_collision: FileCollisionAction::default(),
            utc_offset_minutes: None,
        }
    }
}

/// Main configuration for [`Archiver`](crate::Archiver)
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Activity API settings
    #[serde(default)]
    pub api: ApiConfig,

    /// Media download settings
    #[serde(default)]
    pub assets: AssetConfig,

    /// Archive layout and output
    #[serde(default)]
    pub archive: ArchiveConfig,
}

impl Config {
    /// Check settings that would otherwise fail deep inside a run
    pub fn validate(&self) -> Result<()> {
        url::Url::parse(&self.api.base_url).map_err(|e| Error::Config {
            message: format!("invalid base URL '{}': {}", self.api.base_url, e),
            key: Some("api.base_url".to_string()),
        })?;

        if self.assets.max_concurrent == 0 {
            return Err(Error::Config {
                message: "max_concurrent must be at least 1".to_string(),
                key: Some("assets.max_concurrent".to_string()),
            });
        }

        if let Some(minutes) = self.archive.utc_offset_minutes
            && minutes.abs() >= 24 * 60
        {
            return Err(Error::Config {
                message: format!("UTC offset {} minutes is out of range", minutes),
                key: Some("archive.utc_offset_minutes".to_string()),
            });
        }

        Ok(())
    }

    /// Effective page size (never zero)
    pub fn page_size(&self) -> usize {
        self.api.page_size.max(1)
    }
}

fn default_base_url() -> String {
    "https://communication.openphoneapi.com".to_string()
}

fn default_page_size() -> usize {
    200
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_user_agent() -> String {
    concat!("openphone-archiver/", env!("CARGO_PKG_VERSION")).to_string()
}

fn default_max_concurrent() -> usize {
    16
}

fn default_asset_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("./archives")
}

// Duration serialization helper
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
