use anyhow::{Context, Result};
use dirs::config_dir;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure for issuebridge
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Config {
    /// SQLite database holding user settings
    #[serde(default = "default_database_path")]
    pub database_path: String,

    /// GitHub API settings
    #[serde(default)]
    pub github: GitHubConfig,

    /// Issue collection behavior
    #[serde(default)]
    pub fetch: FetchConfig,

    /// Credential encryption settings
    #[serde(default)]
    pub security: SecurityConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// GitHub API configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct GitHubConfig {
    /// REST API root
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,

    /// Items requested per page on every paginated call
    #[serde(default = "default_page_size")]
    pub page_size: u32,

    /// Upper bound on pages fetched by one pagination loop
    #[serde(default = "default_max_pages")]
    pub max_pages: u32,

    /// User-Agent header (GitHub rejects requests without one)
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Per-request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout: u64,
}

/// Issue collection configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct FetchConfig {
    /// Deadline for one whole fetch operation in seconds
    #[serde(default = "default_timeout")]
    pub timeout: u64,

    /// Repositories fetched at once during a fan-out (1 = one at a time)
    #[serde(default = "default_max_parallel")]
    pub max_parallel: usize,

    /// Warn when remaining API calls drop to this value
    #[serde(default = "default_rate_limit_warning_threshold")]
    pub rate_limit_warning_threshold: u32,
}

/// Credential encryption configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SecurityConfig {
    /// Environment variable holding the encryption secret
    #[serde(default = "default_encryption_key_env")]
    pub encryption_key_env: String,
}

/// Logging configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String, // "info"
}

// Default value functions
fn default_database_path() -> String {
    "${HOME}/.local/share/issuebridge/settings.db".to_string()
}
fn default_api_base_url() -> String {
    "https://api.github.com".to_string()
}
fn default_page_size() -> u32 {
    100
}
fn default_max_pages() -> u32 {
    255
}
fn default_user_agent() -> String {
    format!("issuebridge/{}", env!("CARGO_PKG_VERSION"))
}
fn default_request_timeout() -> u64 {
    30
}
fn default_timeout() -> u64 {
    30
}
fn default_max_parallel() -> usize {
    1
}
fn default_rate_limit_warning_threshold() -> u32 {
    10
}
fn default_encryption_key_env() -> String {
    "ISSUEBRIDGE_ENCRYPTION_KEY".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}

// Default implementations
impl Default for GitHubConfig {
    fn default() -> Self {
        Self {
            api_base_url: default_api_base_url(),
            page_size: default_page_size(),
            max_pages: default_max_pages(),
            user_agent: default_user_agent(),
            request_timeout: default_request_timeout(),
        }
    }
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout: default_timeout(),
            max_parallel: default_max_parallel(),
            rate_limit_warning_threshold: default_rate_limit_warning_threshold(),
        }
    }
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            encryption_key_env: default_encryption_key_env(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from the default location or create a default config
    pub fn load_or_default() -> Result<Self> {
        let config_path = Self::default_config_path()?;

        if config_path.exists() {
            Self::load(&config_path)
        } else {
            let mut config = Self::default();

            if let Some(parent) = config_path.parent() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
            }

            config.save(&config_path)?;
            config.expand_paths()?;

            tracing::info!("Created default configuration at: {:?}", config_path);
            Ok(config)
        }
    }

    /// Load configuration from a specific file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let mut config: Config = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;

        config.expand_paths()?;
        config.validate()?;

        Ok(config)
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_yaml::to_string(self).context("Failed to serialize configuration")?;

        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {:?}", path))?;

        Ok(())
    }

    /// Get the default configuration file path (XDG compliant)
    pub fn default_config_path() -> Result<PathBuf> {
        let config_dir = config_dir().context("Failed to get user config directory")?;

        Ok(config_dir.join("issuebridge").join("config.yml"))
    }

    /// Expand environment variables in configuration paths
    pub fn expand_paths(&mut self) -> Result<()> {
        self.database_path = shellexpand::full(&self.database_path)
            .context("Failed to expand database_path")?
            .into_owned();

        Ok(())
    }

    /// Reject values the collector cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.github.page_size == 0 || self.github.page_size > 100 {
            anyhow::bail!(
                "github.page_size must be between 1 and 100, got {}",
                self.github.page_size
            );
        }
        if self.github.max_pages == 0 {
            anyhow::bail!("github.max_pages must be at least 1");
        }
        if self.fetch.max_parallel == 0 {
            anyhow::bail!("fetch.max_parallel must be at least 1");
        }
        Ok(())
    }

    /// Deadline for one fetch operation
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch.timeout)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            github: GitHubConfig::default(),
            fetch: FetchConfig::default(),
            security: SecurityConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}
