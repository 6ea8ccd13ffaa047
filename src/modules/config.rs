use std::fs;
use std::path::Path;

use serde::Deserialize;

/// Per-module runtime limits, loadable from a TOML file next to the module's
/// metadata. Missing file or fields fall back to defaults.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct ModuleConfig {
    #[serde(default)]
    pub allowed_hosts: Option<Vec<String>>,
    #[serde(default)]
    pub rate_limit_ms: Option<u64>,
    #[serde(default)]
    pub call_timeout_ms: Option<u64>,
}

pub(crate) const DEFAULT_CALL_TIMEOUT_MS: u64 = 30_000;
pub(crate) const DEFAULT_RATE_LIMIT_MS: u64 = 150;

impl ModuleConfig {
    pub fn load(path: &Path) -> Self {
        fs::read_to_string(path)
            .ok()
            .and_then(|s| toml::from_str(&s).ok())
            .unwrap_or_default()
    }

    pub fn call_timeout_ms(&self) -> u64 {
        self.call_timeout_ms.unwrap_or(DEFAULT_CALL_TIMEOUT_MS)
    }

    pub fn rate_limit_ms(&self) -> u64 {
        self.rate_limit_ms.unwrap_or(DEFAULT_RATE_LIMIT_MS)
    }
}
