//! Configuration schema for Stratus
//!
//! Configuration is stored at `~/.config/stratus/config.toml`

use serde::{Deserialize, Serialize};

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General settings
    pub general: GeneralConfig,

    /// Reconciliation settings
    pub sync: SyncConfig,

    /// Task orchestrator settings
    pub tasks: TaskConfig,

    /// Cache manager settings
    pub cache: CacheConfig,
}

/// General application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Enable verbose logging
    pub verbose: bool,

    /// Log format: "text" or "json"
    pub log_format: String,

    /// Enable audit logging
    pub audit_log: bool,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            verbose: false,
            log_format: "text".to_string(),
            audit_log: true,
        }
    }
}

/// Reconciliation settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Skip update-in-place for records present on both sides
    /// (exclusive create-only passes)
    pub create_only: bool,

    /// Maximum suffix attempts when allocating a scope-unique name
    pub max_name_attempts: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            create_only: false,
            max_name_attempts: 100,
        }
    }
}

/// Task orchestrator settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskConfig {
    /// Number of worker tasks draining the queue
    pub workers: usize,
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self { workers: 4 }
    }
}

/// Cache manager settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Default capacity used by the built-in fixed predicate
    /// (0 = unlimited)
    pub default_capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_capacity: 0,
        }
    }
}
