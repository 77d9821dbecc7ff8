//! CI client configuration

use std::time::Duration;

use crate::core::config::Settings;

/// Configuration for the GitLab client
#[derive(Debug, Clone)]
pub struct CiClientConfig {
    /// Base URL of the GitLab instance
    pub base_url: String,

    /// Timeout for trigger and job listing requests in seconds
    pub timeout_secs: u64,
}

impl Default for CiClientConfig {
    fn default() -> Self {
        Self {
            base_url: "https://gitlab.com".to_string(),
            timeout_secs: 30,
        }
    }
}

impl CiClientConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new()
            .with_base_url(settings.gitlab_url.clone())
            .with_timeout(settings.request_timeout_secs)
    }

    pub fn with_base_url(mut self, base_url: String) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    pub fn with_timeout(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }

    /// Timeout for trigger and job listing calls
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Half the request timeout, at least one second
    pub fn poll_timeout(&self) -> Duration {
        Duration::from_secs((self.timeout_secs / 2).max(1))
    }

    /// Twice the request timeout
    pub fn download_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.saturating_mul(2))
    }
}
