//! Engine configuration.

use std::time::Duration;

/// Where jobs and progress snapshots are kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Memory,
    Redis,
}

impl StoreBackend {
    fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "memory" | "in_memory" => Some(StoreBackend::Memory),
            "redis" => Some(StoreBackend::Redis),
            _ => None,
        }
    }
}

/// Workflow engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Upper bound for a single stage worker call
    pub stage_timeout: Duration,
    /// Store backend for jobs and progress
    pub store_backend: StoreBackend,
    /// Redis URL (used when `store_backend` is Redis)
    pub redis_url: String,
    /// Key prefix for Redis entries
    pub redis_prefix: String,
    /// How long progress snapshots live in Redis
    pub progress_ttl: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            stage_timeout: Duration::from_secs(300), // 5 minutes
            store_backend: StoreBackend::Memory,
            redis_url: "redis://localhost:6379".to_string(),
            redis_prefix: "avgen".to_string(),
            progress_ttl: Duration::from_secs(86400), // 24 hours
        }
    }
}

impl EngineConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            stage_timeout: Duration::from_secs(
                std::env::var("ENGINE_STAGE_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(300),
            ),
            store_backend: std::env::var("STORE_BACKEND")
                .ok()
                .and_then(|s| StoreBackend::parse(&s))
                .unwrap_or(StoreBackend::Memory),
            redis_url: std::env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://localhost:6379".to_string()),
            redis_prefix: std::env::var("REDIS_PREFIX").unwrap_or_else(|_| "avgen".to_string()),
            progress_ttl: Duration::from_secs(
                std::env::var("ENGINE_PROGRESS_TTL_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(86400),
            ),
        }
    }

    /// Override the stage timeout.
    pub fn with_stage_timeout(mut self, timeout: Duration) -> Self {
        self.stage_timeout = timeout;
        self
    }
}
