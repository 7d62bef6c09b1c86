//! Runtime configuration for calbot.
//!
//! Loaded once at startup from a YAML file (explicit path, `.calbot.yml`,
//! `~/.config/calbot/calbot.yml`, or defaults), then overridden by
//! environment variables (a `.env` file is honored). The resulting struct is
//! passed explicitly into the components that need it.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{CalbotError, Result};

/// Default display/interpretation zone for calendar tools.
pub const DEFAULT_TIME_ZONE: &str = "Asia/Beirut";

/// Default Microsoft Graph API root.
pub const DEFAULT_GRAPH_ENDPOINT: &str = "https://graph.microsoft.com/v1.0";

/// Default identity provider host.
pub const DEFAULT_AUTHORITY_HOST: &str = "https://login.microsoftonline.com";

/// Default agents API version.
pub const DEFAULT_API_VERSION: &str = "v1";

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Identity provider credentials.
    pub auth: AuthConfig,

    /// Orchestrator (agents service) settings.
    pub agent: AgentConfig,

    /// Calendar backend settings.
    pub graph: GraphConfig,
}

/// Client-credentials identity.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub tenant_id: String,
    pub client_id: String,
    pub client_secret: String,
    pub authority_host: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            tenant_id: String::new(),
            client_id: String::new(),
            client_secret: String::new(),
            authority_host: DEFAULT_AUTHORITY_HOST.to_string(),
        }
    }
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("tenant_id", &self.tenant_id)
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("authority_host", &self.authority_host)
            .finish()
    }
}

/// Orchestrator settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Project endpoint hosting the agents API.
    pub project_endpoint: String,
    /// Model deployment used when creating agents.
    pub model_deployment: String,
    /// Existing agent to run conversations against.
    pub agent_id: Option<String>,
    /// Agents API version query parameter.
    pub api_version: String,
    /// Delay between run status polls.
    pub poll_interval_ms: u64,
    /// Poll budget before a run is abandoned.
    pub max_polls: u32,
    /// Per tool call timeout inside one batch.
    pub tool_timeout_ms: u64,
    /// HTTP timeout for orchestrator requests.
    pub request_timeout_ms: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            project_endpoint: String::new(),
            model_deployment: String::new(),
            agent_id: None,
            api_version: DEFAULT_API_VERSION.to_string(),
            poll_interval_ms: 1_000,
            max_polls: 600,
            tool_timeout_ms: 60_000,
            request_timeout_ms: 30_000,
        }
    }
}

impl AgentConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn tool_timeout(&self) -> Duration {
        Duration::from_millis(self.tool_timeout_ms)
    }
}

/// Calendar backend settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    pub endpoint: String,
    pub default_time_zone: String,
    pub timeout_ms: u64,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_GRAPH_ENDPOINT.to_string(),
            default_time_zone: DEFAULT_TIME_ZONE.to_string(),
            timeout_ms: 30_000,
        }
    }
}

impl Config {
    /// Load configuration with fallback chain, then apply `.env` and
    /// process environment overrides.
    ///
    /// Search order:
    /// 1. Explicit path if provided
    /// 2. .calbot.yml in current directory
    /// 3. ~/.config/calbot/calbot.yml
    /// 4. Defaults
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        let mut config = Self::load_file_chain(config_path)?;

        // A missing .env file is not an error.
        let _ = dotenvy::dotenv();
        config.apply_env(|key| std::env::var(key).ok());

        Ok(config)
    }

    fn load_file_chain(config_path: Option<&PathBuf>) -> Result<Self> {
        if let Some(path) = config_path {
            return Self::load_from_file(path);
        }

        let project_config = PathBuf::from(".calbot.yml");
        if project_config.exists() {
            match Self::load_from_file(&project_config) {
                Ok(config) => {
                    log::info!("Loaded config from .calbot.yml");
                    return Ok(config);
                }
                Err(e) => log::warn!("Failed to load .calbot.yml: {}", e),
            }
        }

        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("calbot").join("calbot.yml");
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => {
                        log::info!("Loaded config from {}", user_config.display());
                        return Ok(config);
                    }
                    Err(e) => log::warn!("Failed to load {}: {}", user_config.display(), e),
                }
            }
        }

        log::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    /// Parse a YAML config file.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            CalbotError::Configuration(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(content: &str) -> Result<Self> {
        serde_yaml::from_str(content)
            .map_err(|e| CalbotError::Configuration(format!("Failed to parse config: {}", e)))
    }

    /// Override values from an environment lookup. Empty values are ignored.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("TENANT_ID") {
            self.auth.tenant_id = v;
        }
        if let Some(v) = get("CLIENT_ID") {
            self.auth.client_id = v;
        }
        if let Some(v) = get("CLIENT_SECRET") {
            self.auth.client_secret = v;
        }
        if let Some(v) = get("AUTHORITY_HOST") {
            self.auth.authority_host = v;
        }
        if let Some(v) = get("PROJECT_ENDPOINT") {
            self.agent.project_endpoint = v;
        }
        if let Some(v) = get("MODEL_DEPLOYMENT_NAME") {
            self.agent.model_deployment = v;
        }
        if let Some(v) = get("AGENT_ID") {
            self.agent.agent_id = Some(v);
        }
        if let Some(v) = get("GRAPH_API_ENDPOINT") {
            self.graph.endpoint = v;
        }
        if let Some(v) = get("CALBOT_TIME_ZONE") {
            self.graph.default_time_zone = v;
        }
    }

    /// Check the credentials needed by the tool server.
    pub fn validate_credentials(&self) -> Result<()> {
        require("TENANT_ID", &self.auth.tenant_id)?;
        require("CLIENT_ID", &self.auth.client_id)?;
        require("CLIENT_SECRET", &self.auth.client_secret)?;
        if self.graph.default_time_zone.parse::<chrono_tz::Tz>().is_err() {
            return Err(CalbotError::Configuration(format!(
                "Unknown time zone: {}",
                self.graph.default_time_zone
            )));
        }
        Ok(())
    }

    /// Check everything needed to drive conversations.
    pub fn validate(&self) -> Result<()> {
        self.validate_credentials()?;
        require("PROJECT_ENDPOINT", &self.agent.project_endpoint)?;
        require("MODEL_DEPLOYMENT_NAME", &self.agent.model_deployment)?;
        if self.agent.max_polls == 0 {
            return Err(CalbotError::Configuration("agent.max_polls must be > 0".into()));
        }
        Ok(())
    }

    /// Agent id to run against, preferring an explicit override.
    pub fn resolve_agent_id(&self, explicit: Option<&str>) -> Result<String> {
        explicit
            .map(String::from)
            .or_else(|| self.agent.agent_id.clone())
            .ok_or_else(|| CalbotError::Configuration("AGENT_ID is not set".into()))
    }
}

fn require(key: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(CalbotError::Configuration(format!("{} is not set", key)));
    }
    Ok(())
}
