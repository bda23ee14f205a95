//! Runtime configuration for member operations.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct MembersConfig {
    /// Garden cluster API server embedded into issued kubeconfigs.
    pub api_server_url: String,
    /// Base64 CA bundle of that API server.
    pub api_server_ca_data: Option<String>,
    /// Cluster name used for kubeconfig cluster and context names.
    pub cluster_name: String,
    pub token_expiration_seconds: i64,
    /// Empty means the API server's default audience.
    pub token_audiences: Vec<String>,
    pub max_roles: usize,
}

impl Default for MembersConfig {
    fn default() -> Self {
        Self {
            api_server_url: "https://127.0.0.1:6443".to_string(),
            api_server_ca_data: None,
            cluster_name: "garden".to_string(),
            token_expiration_seconds: 90 * 24 * 60 * 60,
            token_audiences: Vec::new(),
            max_roles: 10,
        }
    }
}

impl MembersConfig {
    /// Defaults overridden by `GARDEN_*` environment variables.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        cfg.apply_env(|k| std::env::var(k).ok());
        cfg
    }

    /// Load a YAML file, then let the environment override it.
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).with_context(|| format!("reading config {}", path.display()))?;
        let mut cfg: Self = serde_yaml::from_str(&raw).with_context(|| format!("parsing config {}", path.display()))?;
        cfg.apply_env(|k| std::env::var(k).ok());
        Ok(cfg)
    }

    fn apply_env<F: Fn(&str) -> Option<String>>(&mut self, get: F) {
        if let Some(v) = get("GARDEN_API_SERVER_URL") {
            self.api_server_url = v;
        }
        if let Some(v) = get("GARDEN_API_SERVER_CA_DATA") {
            self.api_server_ca_data = Some(v);
        }
        if let Some(v) = get("GARDEN_CLUSTER_NAME") {
            self.cluster_name = v;
        }
        if let Some(v) = get("GARDEN_TOKEN_EXPIRATION_SECONDS").and_then(|s| s.parse().ok()) {
            self.token_expiration_seconds = v;
        }
        if let Some(v) = get("GARDEN_TOKEN_AUDIENCES") {
            self.token_audiences = v.split(',').map(str::trim).filter(|s| !s.is_empty()).map(str::to_string).collect();
        }
        if let Some(v) = get("GARDEN_MAX_ROLES").and_then(|s| s.parse().ok()) {
            self.max_roles = v;
        }
    }
}
