use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    pub data_dir: PathBuf,
    pub feed: FeedConfig,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    /// Batching window used when an action does not carry its own.
    pub default_batch_minutes: u32,
    pub page_size: usize,
    pub follow_verb: String,
    pub unfollow_verb: String,
    pub share_verb: String,
    /// Verbs of the viewer's own actions that still show up in their feed.
    pub self_verbs: Vec<String>,
    /// Toggle-style verbs left out of incremental polls.
    pub incremental_excluded_verbs: Vec<String>,
    pub vendor_category: String,
    pub actionable: Vec<String>,
}

impl Config {
    pub fn load(path: &Path) -> Result<Config> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("unable to read config file {}", path.display()))?;
        toml::from_str(&text).context("unable to parse config file")
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("actfeed-data"),
            feed: FeedConfig::default(),
        }
    }
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            default_batch_minutes: 30,
            page_size: 20,
            follow_verb: "started following".to_string(),
            unfollow_verb: "stopped following".to_string(),
            share_verb: "shared".to_string(),
            self_verbs: ["posted a review", "posted a deal", "said", "shared"]
                .map(String::from)
                .to_vec(),
            incremental_excluded_verbs: [
                "liked",
                "unliked",
                "started following",
                "stopped following",
            ]
            .map(String::from)
            .to_vec(),
            vendor_category: "vendor".to_string(),
            actionable: ["user", "organization", "post", "action"]
                .map(String::from)
                .to_vec(),
        }
    }
}
