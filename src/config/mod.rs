//! Configuration: API endpoint, identity provider and server settings

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

const DEFAULT_API_URL: &str = "http://localhost:7071/api";
const DEFAULT_TENANT: &str = "Classflow";
const DEFAULT_CLIENT_ID: &str = "51dea61c-db2d-492a-bcd6-17130e349dd1";
const DEFAULT_REDIRECT: &str = "http://localhost:5173";
const DEFAULT_BIND: &str = "127.0.0.1:7071";

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub api: ApiSettings,
    pub identity: IdentitySettings,
    pub server: ServerSettings,
}

/// Classroom data service endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiSettings {
    pub base_url: String,
    /// Wall-clock timeout for each outbound data request
    pub timeout_secs: u64,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_API_URL.to_string(),
            timeout_secs: 30,
        }
    }
}

/// Entra External ID (CIAM) application registration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentitySettings {
    pub tenant_name: String,
    pub client_id: String,
    pub redirect_uri: String,
    pub post_logout_redirect_uri: String,
}

impl Default for IdentitySettings {
    fn default() -> Self {
        Self {
            tenant_name: DEFAULT_TENANT.to_string(),
            client_id: DEFAULT_CLIENT_ID.to_string(),
            redirect_uri: DEFAULT_REDIRECT.to_string(),
            post_logout_redirect_uri: DEFAULT_REDIRECT.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub bind: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind: DEFAULT_BIND.to_string(),
        }
    }
}

impl Config {
    fn project_dirs() -> Result<ProjectDirs> {
        ProjectDirs::from("com", "classflow", "classflow")
            .context("Could not determine config directory")
    }

    /// Get config directory path
    fn config_dir() -> Result<PathBuf> {
        Ok(Self::project_dirs()?.config_dir().to_path_buf())
    }

    /// Directory holding the session file and account cache
    pub fn data_dir() -> Result<PathBuf> {
        Ok(Self::project_dirs()?.data_dir().to_path_buf())
    }

    /// Get config file path
    fn config_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    /// Load configuration from disk, then apply environment overrides
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;

        let mut config = if path.exists() {
            let content = fs::read_to_string(&path).context("Failed to read config file")?;
            toml::from_str(&content).context("Failed to parse config file")?
        } else {
            Self::default()
        };

        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Save configuration to disk
    pub fn save(&self) -> Result<()> {
        let dir = Self::config_dir()?;
        fs::create_dir_all(&dir).context("Failed to create config directory")?;

        let path = Self::config_path()?;
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(&path, content).context("Failed to write config file")?;
        Ok(())
    }

    /// Apply `CLASSFLOW_*` overrides from the given lookup (the process environment in practice).
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("CLASSFLOW_API_URL") {
            self.api.base_url = v;
        }
        if let Some(v) = get("CLASSFLOW_TENANT_NAME") {
            self.identity.tenant_name = v;
        }
        if let Some(v) = get("CLASSFLOW_CLIENT_ID") {
            self.identity.client_id = v;
        }
        if let Some(v) = get("CLASSFLOW_REDIRECT_URI") {
            self.identity.redirect_uri = v;
        }
        if let Some(v) = get("CLASSFLOW_POST_LOGOUT_REDIRECT_URI") {
            self.identity.post_logout_redirect_uri = v;
        }
        if let Some(v) = get("CLASSFLOW_BIND") {
            self.server.bind = v;
        }
    }
}
