//! Configuration loading and management

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::Url;

const DEFAULT_API_BASE_URL: &str = "http://localhost:8000";
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 900;

/// Client daemon configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Base URL of the processing service
    pub api_base_url: Url,

    /// Upper bound on one upload + processing round trip
    pub request_timeout: Duration,

    /// Path to the Unix domain socket for IPC
    pub socket_path: PathBuf,

    /// Directory for runtime data
    pub data_dir: PathBuf,

    /// Where track and bundle downloads are written
    pub download_dir: PathBuf,
}

impl Config {
    /// Load configuration from environment and defaults
    pub fn load() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from any variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let home = lookup("HOME").context("HOME is not set")?;
        let data_dir = PathBuf::from(&home)
            .join(".local")
            .join("share")
            .join("arya-client");

        let raw_url = lookup("ARYA_API_BASE_URL").unwrap_or_else(|| DEFAULT_API_BASE_URL.to_string());
        let api_base_url = Url::parse(&raw_url)
            .with_context(|| format!("invalid ARYA_API_BASE_URL: {}", raw_url))?;
        if api_base_url.cannot_be_a_base() {
            anyhow::bail!("ARYA_API_BASE_URL cannot be used as a base URL: {}", raw_url);
        }

        let request_timeout = match lookup("ARYA_REQUEST_TIMEOUT_SECS") {
            Some(raw) => {
                let secs: u64 = raw
                    .trim()
                    .parse()
                    .with_context(|| format!("invalid ARYA_REQUEST_TIMEOUT_SECS: {}", raw))?;
                if secs == 0 {
                    anyhow::bail!("ARYA_REQUEST_TIMEOUT_SECS must be positive");
                }
                Duration::from_secs(secs)
            }
            None => Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
        };

        let socket_path = lookup("ARYA_SOCKET_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("client.sock"));

        let download_dir = lookup("ARYA_DOWNLOAD_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("downloads"));

        Ok(Self {
            api_base_url,
            request_timeout,
            socket_path,
            data_dir,
            download_dir,
        })
    }

    /// Ensure data and download directories exist
    pub fn ensure_dirs(&self) -> Result<()> {
        std::fs::create_dir_all(&self.data_dir)
            .with_context(|| format!("failed to create {}", self.data_dir.display()))?;
        std::fs::create_dir_all(&self.download_dir)
            .with_context(|| format!("failed to create {}", self.download_dir.display()))?;
        Ok(())
    }
}
