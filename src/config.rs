//! Profile memory configuration management

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Main profile memory configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProfileMemoryConfig {
    /// Local cache tier configuration
    #[serde(default)]
    pub storage: StorageConfig,

    /// Primary memory backend configuration
    #[serde(default)]
    pub backend: BackendConfig,

    /// Conversation log configuration
    #[serde(default)]
    pub conversation: ConversationConfig,
}

impl ProfileMemoryConfig {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations that leave no usable storage tier
    pub fn validate(&self) -> Result<()> {
        if self.backend.enabled && self.backend.base_url.trim().is_empty() {
            return Err(Error::Config(
                "backend.enabled requires backend.base_url".to_string(),
            ));
        }
        if !self.backend.enabled && !self.storage.local_cache {
            return Err(Error::Config(
                "at least one of backend.enabled or storage.local_cache must be set".to_string(),
            ));
        }
        if self.backend.timeout_secs == 0 {
            return Err(Error::Config("backend.timeout_secs must be > 0".to_string()));
        }
        Ok(())
    }
}

/// Local cache tier configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Base directory holding `profiles/` and `conversations/`
    pub base_dir: PathBuf,

    /// Write-through local cache (also the fallback read path)
    pub local_cache: bool,
}

impl StorageConfig {
    /// Default base directory (~/.profile-memory/)
    pub fn default_dir() -> PathBuf {
        dirs_next::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".profile-memory")
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            base_dir: Self::default_dir(),
            local_cache: true,
        }
    }
}

/// Primary memory backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Use the remote memory service as the primary tier
    pub enabled: bool,

    /// Base URL of the memory service
    pub base_url: String,

    /// Environment variable holding the bearer token (unset = anonymous)
    pub api_key_env: Option<String>,

    /// Per-request timeout in seconds
    pub timeout_secs: u64,

    /// Free-text query used when searching for a user's profile document
    pub profile_query: String,

    /// Free-text query used when searching for a user's conversation log
    pub conversation_query: String,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            base_url: String::new(),
            api_key_env: Some("MEMORY_SERVICE_API_KEY".to_string()),
            timeout_secs: 30,
            profile_query: "user profile".to_string(),
            conversation_query: "user conversation history".to_string(),
        }
    }
}

/// Conversation log configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConversationConfig {
    /// Default number of messages returned by history reads
    pub default_limit: usize,
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self { default_limit: 100 }
    }
}
