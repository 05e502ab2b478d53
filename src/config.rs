use crate::data::info_api_client::DEFAULT_BASE_URL;
use anyhow::{Context, Result};
use std::path::PathBuf;

fn default_max_concurrent_downloads() -> usize {
    4
}

fn default_max_retries() -> u32 {
    5
}

/// Process-wide settings of the binary, read from the environment (and `.env`).
#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    pub api_key: Option<String>,
    pub api_base_url: String,
    pub raw_dir: PathBuf,
    pub processed_dir: PathBuf,
    pub bind_addr: String,
    pub max_concurrent_downloads: usize,
    pub max_retries: u32,
}

impl Default for AppConfig {
    fn default() -> Self {
        AppConfig {
            api_key: None,
            api_base_url: DEFAULT_BASE_URL.to_string(),
            raw_dir: PathBuf::from("data/raw"),
            processed_dir: PathBuf::from("data/processed"),
            bind_addr: "0.0.0.0:3000".to_string(),
            max_concurrent_downloads: default_max_concurrent_downloads(),
            max_retries: default_max_retries(),
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = AppConfig::default();
        let max_concurrent_downloads = match lookup("DARWIN_MAX_CONCURRENT_DOWNLOADS") {
            Some(value) => value
                .parse::<usize>()
                .with_context(|| format!("DARWIN_MAX_CONCURRENT_DOWNLOADS is not a number: `{}`", value))?,
            None => defaults.max_concurrent_downloads,
        };
        let max_retries = match lookup("DARWIN_MAX_RETRIES") {
            Some(value) => value
                .parse::<u32>()
                .with_context(|| format!("DARWIN_MAX_RETRIES is not a number: `{}`", value))?,
            None => defaults.max_retries,
        };
        Ok(AppConfig {
            api_key: lookup("DARWINEX_API_KEY").filter(|k| !k.is_empty()),
            api_base_url: lookup("DARWINEX_API_BASE_URL").unwrap_or(defaults.api_base_url),
            raw_dir: lookup("DARWIN_RAW_DIR").map_or(defaults.raw_dir, PathBuf::from),
            processed_dir: lookup("DARWIN_PROCESSED_DIR").map_or(defaults.processed_dir, PathBuf::from),
            bind_addr: lookup("DARWIN_BIND_ADDR").unwrap_or(defaults.bind_addr),
            max_concurrent_downloads,
            max_retries,
        })
    }

    pub fn require_api_key(&self) -> Result<&str> {
        self.api_key
            .as_deref()
            .context("DARWINEX_API_KEY is not set")
    }
}
