//! Configuration types for the download manager

use std::path::PathBuf;
use std::time::Duration;

use crate::downloader::core::{DownloadError, Result};

/// Configuration for a download manager instance
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Directory holding the payloads and metadata records of this manager
    pub storage_dir: PathBuf,
    /// Size of the worker pool; runs beyond this wait for a free worker
    pub max_concurrent_downloads: usize,
    /// Maximum number of redirects followed before a download fails
    pub redirect_limit: usize,
    /// Timeout for establishing a connection
    pub connect_timeout: Duration,
    /// Timeout for a single read; bounds how long a pause or cancel can take to be observed
    pub read_timeout: Duration,
    pub user_agent: String,
    /// Minimum delay between two data-received notifications of one download
    pub progress_interval: Duration,
}

impl ManagerConfig {
    /// Create a configuration with default settings for the given storage directory
    pub fn new<P: Into<PathBuf>>(storage_dir: P) -> Self {
        Self {
            storage_dir: storage_dir.into(),
            ..Self::default()
        }
    }

    pub fn builder<P: Into<PathBuf>>(storage_dir: P) -> ManagerConfigBuilder {
        ManagerConfigBuilder::new(storage_dir)
    }

    /// Check that the configuration can drive a manager
    pub fn validate(&self) -> Result<()> {
        if self.storage_dir.as_os_str().is_empty() {
            return Err(DownloadError::Configuration {
                message: "storage directory must not be empty".to_string(),
                field: Some("storage_dir".to_string()),
            });
        }

        if self.max_concurrent_downloads == 0 {
            return Err(DownloadError::Configuration {
                message: "at least one concurrent download is required".to_string(),
                field: Some("max_concurrent_downloads".to_string()),
            });
        }

        if self.read_timeout.is_zero() || self.connect_timeout.is_zero() {
            return Err(DownloadError::Configuration {
                message: "timeouts must be greater than zero".to_string(),
                field: Some("read_timeout".to_string()),
            });
        }

        Ok(())
    }
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            storage_dir: PathBuf::from("downloads"),
            max_concurrent_downloads: 4,
            redirect_limit: 10,
            connect_timeout: Duration::from_secs(30),
            read_timeout: Duration::from_secs(60),
            user_agent: concat!("downloads/", env!("CARGO_PKG_VERSION")).to_string(),
            progress_interval: Duration::from_millis(100),
        }
    }
}

/// Builder for [`ManagerConfig`]
#[derive(Debug, Clone)]
pub struct ManagerConfigBuilder {
    config: ManagerConfig,
}

impl ManagerConfigBuilder {
    pub fn new<P: Into<PathBuf>>(storage_dir: P) -> Self {
        Self {
            config: ManagerConfig::new(storage_dir),
        }
    }

    pub fn with_max_concurrent_downloads(mut self, max: usize) -> Self {
        self.config.max_concurrent_downloads = max;
        self
    }

    pub fn with_redirect_limit(mut self, limit: usize) -> Self {
        self.config.redirect_limit = limit;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.config.read_timeout = timeout;
        self
    }

    pub fn with_user_agent<S: Into<String>>(mut self, user_agent: S) -> Self {
        self.config.user_agent = user_agent.into();
        self
    }

    pub fn with_progress_interval(mut self, interval: Duration) -> Self {
        self.config.progress_interval = interval;
        self
    }

    /// Validate and return the configuration
    pub fn build(self) -> Result<ManagerConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
