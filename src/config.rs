use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{EwsError, Result};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub connection: ConnectionConfig,
    #[serde(default)]
    pub sweep: SweepConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ConnectionConfig {
    /// Explicit EWS endpoint. When unset, autodiscovery is used.
    #[serde(default)]
    pub endpoint_url: Option<String>,
    /// Follow autodiscover redirects (https targets only)
    #[serde(default)]
    pub allow_redirection: bool,
    /// Skip TLS certificate validation
    #[serde(default)]
    pub ignore_certificate: bool,
    /// Impersonate the target mailbox
    #[serde(default)]
    pub impersonate: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepConfig {
    #[serde(default = "default_page_size")]
    pub page_size: usize,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
        }
    }
}

fn default_page_size() -> usize {
    100
}

impl Config {
    pub async fn load(path: &Path) -> Result<Self> {
        // If file doesn't exist, return default config with warning
        if !path.exists() {
            tracing::debug!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| EwsError::Config(format!("Failed to read config file: {}", e)))?;

        let config: Self = toml::from_str(&content)
            .map_err(|e| EwsError::Config(format!("Failed to parse config file: {}", e)))?;

        config.validate()?;

        tracing::info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    pub async fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                EwsError::Config(format!("Failed to create config directory: {}", e))
            })?;
        }

        let content = toml::to_string_pretty(self)
            .map_err(|e| EwsError::Config(format!("Failed to serialize config: {}", e)))?;

        tokio::fs::write(path, content)
            .await
            .map_err(|e| EwsError::Config(format!("Failed to write config file: {}", e)))?;

        tracing::info!("Saved configuration to {:?}", path);
        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.sweep.page_size == 0 {
            return Err(EwsError::Config(
                "sweep.page_size must be at least 1".to_string(),
            ));
        }
        if self.sweep.page_size > 512 {
            return Err(EwsError::Config(
                "sweep.page_size cannot exceed 512 (EWS caps indexed page views)".to_string(),
            ));
        }

        if let Some(url) = &self.connection.endpoint_url {
            url::Url::parse(url).map_err(|e| {
                EwsError::Config(format!("connection.endpoint_url is not a valid URL: {}", e))
            })?;
        }

        Ok(())
    }

    /// Write an example configuration with defaults and comments
    pub async fn create_example(path: &Path) -> Result<()> {
        let example = r#"# ews-retention-sweep configuration

[connection]
# Explicit EWS endpoint. Leave unset to use autodiscovery.
# endpoint_url = "https://server/EWS/Exchange.asmx"

# Follow autodiscover redirects (https targets only).
allow_redirection = false

# Skip TLS certificate validation. Only for test labs.
ignore_certificate = false

# Impersonate the target mailbox. Requires ApplicationImpersonation.
impersonate = false

[sweep]
# Folders fetched per enumeration page (1-512).
page_size = 100
"#;

        tokio::fs::write(path, example)
            .await
            .map_err(|e| EwsError::Config(format!("Failed to write example config: {}", e)))?;

        Ok(())
    }
}
