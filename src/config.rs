//! Registry connection and push tuning settings

use crate::error::{RegistryError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default per-request timeout for query operations (seconds)
pub const DEFAULT_QUERY_TIMEOUT: u64 = 10;
/// Default per-request timeout for push operations (seconds)
pub const DEFAULT_PUSH_TIMEOUT: u64 = 300;
pub const DEFAULT_CONCURRENT_UPLOADS: usize = 3;
pub const DEFAULT_CHUNK_SIZE: usize = 5 * 1024 * 1024;

/// Where the registry lives and how long to wait for it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Base URL with no trailing slash
    pub url: String,
    /// Per-request timeout in seconds
    pub timeout: u64,
    pub pool: PoolConfig,
}

/// HTTP connection pool settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    pub max_idle_per_host: usize,
    pub idle_timeout: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_idle_per_host: 10,
            idle_timeout: 90,
        }
    }
}

impl RegistryConfig {
    pub fn new(url: impl Into<String>) -> Self {
        let url = url.into();
        Self {
            url: url.trim_end_matches('/').to_string(),
            timeout: DEFAULT_QUERY_TIMEOUT,
            pool: PoolConfig::default(),
        }
    }

    pub fn with_timeout(mut self, timeout: u64) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_pool(mut self, pool: PoolConfig) -> Self {
        self.pool = pool;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !self.url.starts_with("http://") && !self.url.starts_with("https://") {
            return Err(RegistryError::Config(format!(
                "Registry URL must start with http:// or https://: {}",
                self.url
            )));
        }
        url::Url::parse(&self.url)
            .map_err(|e| RegistryError::Config(format!("Invalid registry URL {}: {}", self.url, e)))?;
        if self.timeout == 0 {
            return Err(RegistryError::Config(
                "Timeout must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Build the HTTP client every request of one session goes through
    pub fn build_http_client(&self) -> Result<reqwest::Client> {
        reqwest::Client::builder()
            .timeout(Duration::from_secs(self.timeout))
            .pool_max_idle_per_host(self.pool.max_idle_per_host)
            .pool_idle_timeout(Duration::from_secs(self.pool.idle_timeout))
            .user_agent(concat!("docker-tar-pusher/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| RegistryError::Config(format!("Failed to build HTTP client: {}", e)))
    }
}

/// Upload tuning for the push orchestrator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushConfig {
    /// Maximum blob uploads in flight at once
    pub concurrent_uploads: usize,
    /// Bytes per PATCH request
    pub chunk_size: usize,
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            concurrent_uploads: DEFAULT_CONCURRENT_UPLOADS,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

impl PushConfig {
    pub fn with_concurrency(mut self, concurrent_uploads: usize) -> Self {
        self.concurrent_uploads = concurrent_uploads;
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.concurrent_uploads == 0 {
            return Err(RegistryError::Config(
                "Concurrency must be greater than 0".to_string(),
            ));
        }
        if self.chunk_size == 0 {
            return Err(RegistryError::Config(
                "Chunk size must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}
