use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants::{
    DEFAULT_BACKEND_URL, LOADING_TIMEOUT_SECS, REQUEST_TIMEOUT_SECS, UPDATE_CHANNEL_CAPACITY,
};

pub const BACKEND_URL_ENV: &str = "FORUM_BACKEND_URL";
pub const ANON_KEY_ENV: &str = "FORUM_ANON_KEY";

#[derive(Debug, Clone)]
pub struct CoreConfig {
    pub backend_url: String,
    pub anon_key: String,
    pub load_timeout: Duration,
    pub request_timeout: Duration,
    pub update_capacity: usize,
}

/// On-disk form of [`CoreConfig`]. Every field is optional; missing ones keep their defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoreConfigFile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backend_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anon_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub load_timeout_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_timeout_secs: Option<u64>,
}

impl CoreConfig {
    pub fn new(backend_url: impl Into<String>, anon_key: impl Into<String>) -> Self {
        Self {
            backend_url: backend_url.into(),
            anon_key: anon_key.into(),
            ..Self::default()
        }
    }

    pub fn merge(mut self, file: CoreConfigFile) -> Self {
        if let Some(url) = file.backend_url {
            self.backend_url = url;
        }
        if let Some(key) = file.anon_key {
            self.anon_key = key;
        }
        if let Some(secs) = file.load_timeout_secs {
            self.load_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = file.request_timeout_secs {
            self.request_timeout = Duration::from_secs(secs);
        }
        self
    }

    /// Environment wins over file and defaults.
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides_from(|key| std::env::var(key).ok())
    }

    fn with_overrides_from(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(url) = lookup(BACKEND_URL_ENV).filter(|v| !v.is_empty()) {
            self.backend_url = url;
        }
        if let Some(key) = lookup(ANON_KEY_ENV).filter(|v| !v.is_empty()) {
            self.anon_key = key;
        }
        self
    }
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            backend_url: DEFAULT_BACKEND_URL.to_string(),
            anon_key: String::new(),
            load_timeout: Duration::from_secs(LOADING_TIMEOUT_SECS),
            request_timeout: Duration::from_secs(REQUEST_TIMEOUT_SECS),
            update_capacity: UPDATE_CHANNEL_CAPACITY,
        }
    }
}
