use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub assistant: AssistantConfig,
    #[serde(default)]
    pub history: HistoryConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// "http" or "memory"
    pub kind: String,
    pub base_url: String,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub debounce_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AssistantConfig {
    pub max_message_len: usize,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    pub max_snapshots: Option<usize>,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            kind: "http".to_string(),
            base_url: "http://localhost:8000".to_string(),
            timeout_secs: 30,
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self { debounce_ms: 300 }
    }
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            max_message_len: 5000,
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            backend: BackendConfig::default(),
            sync: SyncConfig::default(),
            assistant: AssistantConfig::default(),
            history: HistoryConfig::default(),
        }
    }
}

impl ClientConfig {
    /// In-process configuration backed by the memory backend.
    pub fn in_memory() -> Self {
        let mut config = Self::default();
        config.backend.kind = "memory".to_string();
        config
    }

    pub fn load() -> Result<Self> {
        // Whole config as JSON in the environment
        if let Ok(config_str) = env::var("FLOWSHEET_CONFIG") {
            return Ok(serde_json::from_str(&config_str)?);
        }

        let config_paths = ["flowsheet.toml", "config/flowsheet.toml"];
        for path in &config_paths {
            if Path::new(path).exists() {
                return Self::from_file(path);
            }
        }

        let mut config = ClientConfig::default();

        if let Ok(url) = env::var("FLOWSHEET_BACKEND_URL") {
            config.backend.base_url = url;
        }

        if let Ok(kind) = env::var("FLOWSHEET_BACKEND") {
            config.backend.kind = kind;
        }

        if let Ok(debounce) = env::var("FLOWSHEET_SYNC_DEBOUNCE_MS") {
            config.sync.debounce_ms = debounce.parse()?;
        }

        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    pub fn validate(&self) -> Result<()> {
        match self.backend.kind.as_str() {
            "http" => {
                if self.backend.base_url.trim().is_empty() {
                    return Err(anyhow::anyhow!("Backend base_url is required when kind is http"));
                }
            }
            "memory" => {}
            other => return Err(anyhow::anyhow!("Unsupported backend kind: {}", other)),
        }

        if self.backend.timeout_secs == 0 {
            return Err(anyhow::anyhow!("Backend timeout cannot be 0"));
        }

        if self.assistant.max_message_len == 0 {
            return Err(anyhow::anyhow!("Assistant max_message_len cannot be 0"));
        }

        if self.history.max_snapshots == Some(0) {
            return Err(anyhow::anyhow!("History max_snapshots cannot be 0"));
        }

        Ok(())
    }
}
