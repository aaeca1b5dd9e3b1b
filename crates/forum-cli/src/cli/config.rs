use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use forum_core::config::CoreConfigFile;
use forum_core::CoreConfig;
use serde::{Deserialize, Serialize};

const APP_DIR: &str = "forum-cli";
const SESSION_FILE: &str = "session.json";

/// CLI configuration that can be loaded from a JSON file
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct CliConfig {
    /// Backend base URL, e.g. https://xyz.example.co
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backend_url: Option<String>,

    /// Public (anon) API key sent with every request
    #[serde(skip_serializing_if = "Option::is_none")]
    pub anon_key: Option<String>,

    /// Where the signed-in session is persisted between invocations
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_path: Option<PathBuf>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub load_timeout_secs: Option<u64>,
}

impl CliConfig {
    /// Load config from a JSON file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: CliConfig = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        Ok(config)
    }

    /// Defaults, then this file's values, then the environment.
    pub fn core_config(&self) -> CoreConfig {
        CoreConfig::default()
            .merge(CoreConfigFile {
                backend_url: self.backend_url.clone(),
                anon_key: self.anon_key.clone(),
                load_timeout_secs: self.load_timeout_secs,
                request_timeout_secs: None,
            })
            .with_env_overrides()
    }

    pub fn session_path(&self) -> PathBuf {
        self.session_path.clone().unwrap_or_else(default_session_path)
    }
}

pub fn default_session_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
        .join(SESSION_FILE)
}
