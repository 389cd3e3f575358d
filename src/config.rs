//! Configuration loading and management

use anyhow::Result;
use chrono::NaiveTime;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::HarvestError;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub scraper: ScraperConfig,
    pub storage: StorageConfig,
    pub media: MediaConfig,
    pub terms: TermConfig,
    pub trends: TrendConfig,
    pub selection: SelectionConfig,
    pub llm: LlmConfig,
    pub schedule: ScheduleConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScraperConfig {
    pub board: String,
    pub api_base: String,
    pub media_base: String,
    pub max_threads_per_category: usize,
    pub thread_age_limit_hours: f64,
    pub request_timeout_seconds: u64,
    pub user_agents: Vec<String>,
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            board: "x".to_string(),
            api_base: "https://a.4cdn.org".to_string(),
            media_base: "https://i.4cdn.org".to_string(),
            max_threads_per_category: 25,
            thread_age_limit_hours: 72.0,
            request_timeout_seconds: 30,
            user_agents: vec![
                "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36".to_string(),
                "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/14.1.1 Safari/605.1.15".to_string(),
                "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:89.0) Gecko/20100101 Firefox/89.0".to_string(),
                "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/92.0.4515.107 Safari/537.36".to_string(),
            ],
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MediaConfig {
    /// Cap on files kept in the `misc` category
    pub max_misc_files: usize,
    pub max_file_age_hours: u64,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            max_misc_files: 100,
            max_file_age_hours: 72,
        }
    }
}

impl MediaConfig {
    pub fn max_file_age(&self) -> Duration {
        Duration::from_secs(self.max_file_age_hours * 3600)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TermConfig {
    pub tracked_term: String,
    pub max_posts: usize,
}

impl Default for TermConfig {
    fn default() -> Self {
        Self {
            tracked_term: "meds".to_string(),
            max_posts: 3,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TrendConfig {
    pub hours_to_keep: u32,
    pub max_per_hour: usize,
    pub min_interval_minutes: i64,
}

impl Default for TrendConfig {
    fn default() -> Self {
        Self {
            hours_to_keep: 48,
            max_per_hour: 3,
            min_interval_minutes: 60,
        }
    }
}

impl TrendConfig {
    /// Upper bound on stored trend points.
    pub fn max_stored(&self) -> usize {
        self.hours_to_keep as usize * self.max_per_hour
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SelectionConfig {
    /// Minimum replies for the top bucket
    pub top_min_replies: u32,
    pub medium_high_min_replies: u32,
    pub medium_min_replies: u32,
    pub top_quota: usize,
    pub medium_high_quota: usize,
    pub medium_quota: usize,
    pub low_quota: usize,
    pub total: usize,
}

impl Default for SelectionConfig {
    fn default() -> Self {
        Self {
            top_min_replies: 100,
            medium_high_min_replies: 50,
            medium_min_replies: 20,
            top_quota: 3,
            medium_high_quota: 3,
            medium_quota: 3,
            low_quota: 3,
            total: 12,
        }
    }
}

impl SelectionConfig {
    pub fn quota_sum(&self) -> usize {
        self.top_quota + self.medium_high_quota + self.medium_quota + self.low_quota
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub base_url: String,
    pub model: String,
    /// Name of the environment variable holding the API key
    pub api_key_env: String,
    pub timeout_seconds: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.deepseek.com/v1".to_string(),
            model: "deepseek-chat".to_string(),
            api_key_env: "DEEPSEEK_API_KEY".to_string(),
            timeout_seconds: 120,
        }
    }
}

impl LlmConfig {
    pub fn api_key(&self) -> Option<String> {
        std::env::var(&self.api_key_env)
            .ok()
            .filter(|key| !key.trim().is_empty())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    pub scrape_interval_minutes: u64,
    /// UTC wall-clock time of the daily analysis run, "HH:MM"
    pub analysis_time_utc: String,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            scrape_interval_minutes: 120,
            analysis_time_utc: "21:30".to_string(),
        }
    }
}

impl ScheduleConfig {
    pub fn analysis_time(&self) -> Result<NaiveTime, HarvestError> {
        NaiveTime::parse_from_str(&self.analysis_time_utc, "%H:%M").map_err(|e| {
            HarvestError::Config(format!(
                "invalid analysis_time_utc {:?}: {}",
                self.analysis_time_utc, e
            ))
        })
    }
}

impl Config {
    /// Load configuration from TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = Self::from_toml(&content)?;
        Ok(config)
    }

    /// Load from file when present, defaults otherwise. `DATA_DIR` overrides the data directory.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut config = if path.as_ref().exists() {
            Self::load(path)?
        } else {
            Self::default()
        };

        if let Ok(dir) = std::env::var("DATA_DIR") {
            if !dir.trim().is_empty() {
                config.storage.data_dir = PathBuf::from(dir);
            }
        }

        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), HarvestError> {
        for (name, value) in [
            ("scraper.api_base", &self.scraper.api_base),
            ("scraper.media_base", &self.scraper.media_base),
            ("llm.base_url", &self.llm.base_url),
        ] {
            url::Url::parse(value)
                .map_err(|e| HarvestError::Config(format!("{} is not a valid URL: {}", name, e)))?;
        }

        if self.scraper.board.trim().is_empty() {
            return Err(HarvestError::Config("scraper.board must not be empty".into()));
        }
        if self.scraper.user_agents.is_empty() {
            return Err(HarvestError::Config(
                "scraper.user_agents must list at least one identity".into(),
            ));
        }
        if self.scraper.max_threads_per_category == 0 {
            return Err(HarvestError::Config(
                "scraper.max_threads_per_category must be positive".into(),
            ));
        }
        if self.trends.max_per_hour == 0 || self.trends.hours_to_keep == 0 {
            return Err(HarvestError::Config(
                "trends.max_per_hour and trends.hours_to_keep must be positive".into(),
            ));
        }
        if self.trends.min_interval_minutes <= 0 {
            return Err(HarvestError::Config(
                "trends.min_interval_minutes must be positive".into(),
            ));
        }
        if self.selection.quota_sum() != self.selection.total {
            return Err(HarvestError::Config(format!(
                "selection quotas sum to {} but total is {}",
                self.selection.quota_sum(),
                self.selection.total
            )));
        }
        if !(self.selection.top_min_replies > self.selection.medium_high_min_replies
            && self.selection.medium_high_min_replies > self.selection.medium_min_replies)
        {
            return Err(HarvestError::Config(
                "selection thresholds must be strictly decreasing".into(),
            ));
        }
        if self.terms.tracked_term.trim().is_empty() {
            return Err(HarvestError::Config("terms.tracked_term must not be empty".into()));
        }
        self.schedule.analysis_time()?;

        Ok(())
    }
}
