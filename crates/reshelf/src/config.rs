//! Configuration management for reshelf.
//!
//! Configuration is loaded from multiple sources with precedence:
//! 1. Environment variables (RESHELF_*)
//! 2. Config file (`--config`, RESHELF_CONFIG, or the platform config dir)
//! 3. Default values

use std::num::NonZeroU32;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use reshelf_core::{RateGate, RetryPolicy, Role, Settings, TenantId};
use serde::{Deserialize, Serialize};

use crate::error::{ReshelfError, ReshelfResult};

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Storage service API settings
    #[serde(default)]
    pub api: ApiConfig,

    /// Workflow settings
    #[serde(default)]
    pub run: RunConfig,

    /// Retry settings for transient failures
    #[serde(default)]
    pub retry: RetryConfig,

    /// Test tenant settings
    #[serde(default)]
    pub fixtures: FixturesConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Base URL of the storage service API
    #[serde(default = "default_api_url")]
    pub url: String,

    /// Bearer token for the governing account
    pub access_token: Option<String>,

    /// Per-request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Name of the consolidation folder at each tenant root
    #[serde(default = "default_top_folder_name")]
    pub top_folder_name: String,

    /// Account that every tenant's content is shared with
    pub search_tenant: Option<String>,

    /// Role granted to the search tenant
    #[serde(default = "default_search_role")]
    pub search_role: String,

    /// Tenant ids to process, in order
    #[serde(default)]
    pub tenants: Vec<String>,

    /// Maximum remote calls per second across the whole process
    #[serde(default = "default_rate_limit")]
    pub rate_limit: u32,

    #[serde(default = "default_large_page")]
    pub root_page_size: usize,

    #[serde(default = "default_small_page")]
    pub verify_root_page_size: usize,

    #[serde(default = "default_large_page")]
    pub child_page_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts for retriable calls, including the first
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixturesConfig {
    /// Account name prefix; the search account is `<prefix>SEARCH`
    #[serde(default = "default_account_prefix")]
    pub account_prefix: String,

    #[serde(default = "default_tenant_count")]
    pub tenant_count: usize,

    #[serde(default = "default_folders_per_tenant")]
    pub folders_per_tenant: usize,

    /// Folder name prefix; folders are numbered from 1
    #[serde(default = "default_folder_prefix")]
    pub folder_prefix: String,

    /// JSON array of provisioned account ids, search account last
    #[serde(default = "default_ids_file")]
    pub ids_file: PathBuf,
}

// Default value functions
fn default_api_url() -> String {
    "https://api.box.com/2.0".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_top_folder_name() -> String {
    "HOUSE_LIST".to_string()
}

fn default_search_role() -> String {
    Role::Editor.as_str().to_string()
}

fn default_rate_limit() -> u32 {
    16
}

fn default_large_page() -> usize {
    1000
}

fn default_small_page() -> usize {
    100
}

fn default_max_attempts() -> u32 {
    4
}

fn default_base_delay_ms() -> u64 {
    250
}

fn default_max_delay_ms() -> u64 {
    8000
}

fn default_account_prefix() -> String {
    "ST_APP_USER_".to_string()
}

fn default_tenant_count() -> usize {
    5
}

fn default_folders_per_tenant() -> usize {
    10
}

fn default_folder_prefix() -> String {
    "TestFolder".to_string()
}

fn default_ids_file() -> PathBuf {
    PathBuf::from("testappusers.json")
}

fn default_config_dir() -> PathBuf {
    if let Some(proj_dirs) = ProjectDirs::from("dev", "reshelf", "reshelf") {
        proj_dirs.config_dir().to_path_buf()
    } else {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".reshelf")
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            url: default_api_url(),
            access_token: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            top_folder_name: default_top_folder_name(),
            search_tenant: None,
            search_role: default_search_role(),
            tenants: Vec::new(),
            rate_limit: default_rate_limit(),
            root_page_size: default_large_page(),
            verify_root_page_size: default_small_page(),
            child_page_size: default_large_page(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl Default for FixturesConfig {
    fn default() -> Self {
        Self {
            account_prefix: default_account_prefix(),
            tenant_count: default_tenant_count(),
            folders_per_tenant: default_folders_per_tenant(),
            folder_prefix: default_folder_prefix(),
            ids_file: default_ids_file(),
        }
    }
}

impl Config {
    /// Load configuration from file and environment.
    pub fn load(explicit: Option<&Path>) -> ReshelfResult<Self> {
        let path = Self::path_for(explicit);
        let mut config = Self::from_file(&path)?;
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Read `path`, or fall back to defaults if it does not exist.
    pub fn from_file(path: &Path) -> ReshelfResult<Self> {
        if !path.exists() {
            return Ok(Config::default());
        }
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Get the config file path.
    pub fn config_path() -> PathBuf {
        Self::path_for(None)
    }

    /// The file `load(explicit)` reads
    pub fn path_for(explicit: Option<&Path>) -> PathBuf {
        Self::resolve_path(explicit, |key| std::env::var(key).ok())
    }

    fn resolve_path(explicit: Option<&Path>, env: impl Fn(&str) -> Option<String>) -> PathBuf {
        match (explicit, env("RESHELF_CONFIG")) {
            (Some(path), _) => path.to_path_buf(),
            (None, Some(path)) => PathBuf::from(path),
            (None, None) => default_config_dir().join("config.toml"),
        }
    }

    /// Apply RESHELF_* overrides read through `env`.
    pub fn apply_env(&mut self, env: impl Fn(&str) -> Option<String>) -> ReshelfResult<()> {
        if let Some(token) = env("RESHELF_ACCESS_TOKEN") {
            self.api.access_token = Some(token);
        }
        if let Some(url) = env("RESHELF_API_URL") {
            self.api.url = url;
        }
        if let Some(limit) = env("RESHELF_RATE_LIMIT") {
            self.run.rate_limit = limit.trim().parse().map_err(|_| {
                ReshelfError::Config(format!(
                    "RESHELF_RATE_LIMIT must be a positive integer, got '{}'",
                    limit
                ))
            })?;
        }
        Ok(())
    }

    /// Copy with the access token masked, for display
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if copy.api.access_token.is_some() {
            copy.api.access_token = Some("********".to_string());
        }
        copy
    }

    pub fn access_token(&self) -> ReshelfResult<&str> {
        self.api
            .access_token
            .as_deref()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| {
                ReshelfError::MissingToken(Self::config_path().display().to_string())
            })
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.api.timeout_secs.max(1))
    }

    /// Validated workflow settings; `only` narrows the tenant list
    pub fn settings(&self, only: &[String]) -> ReshelfResult<Settings> {
        let run = &self.run;
        if run.top_folder_name.trim().is_empty() {
            return Err(ReshelfError::Config("run.top_folder_name must not be empty".into()));
        }
        let search = run
            .search_tenant
            .as_deref()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| ReshelfError::Config("run.search_tenant must be set".into()))?;
        let role: Role = run
            .search_role
            .parse()
            .map_err(|e: reshelf_core::Error| ReshelfError::Config(e.to_string()))?;

        let tenants: Vec<TenantId> = if only.is_empty() {
            run.tenants.iter().map(|t| TenantId::new(t.as_str())).collect()
        } else {
            only.iter().map(|t| TenantId::new(t.as_str())).collect()
        };
        if tenants.is_empty() {
            return Err(ReshelfError::Config("no tenants configured (run.tenants)".into()));
        }

        let mut settings =
            Settings::new(run.top_folder_name.clone(), TenantId::new(search), tenants);
        settings.search_role = role;
        settings.root_page_size = run.root_page_size.max(1);
        settings.verify_root_page_size = run.verify_root_page_size.max(1);
        settings.child_page_size = run.child_page_size.max(1);
        Ok(settings)
    }

    pub fn rate_gate(&self, override_limit: Option<u32>) -> ReshelfResult<RateGate> {
        let limit = override_limit.unwrap_or(self.run.rate_limit);
        NonZeroU32::new(limit)
            .map(RateGate::per_second)
            .ok_or_else(|| ReshelfError::Config("rate limit must be greater than zero".into()))
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry.max_attempts.max(1),
            base_delay: Duration::from_millis(self.retry.base_delay_ms),
            max_delay: Duration::from_millis(self.retry.max_delay_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::tempdir;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.run.top_folder_name, "HOUSE_LIST");
        assert_eq!(config.run.rate_limit, 16);
        assert_eq!(config.run.search_role, "editor");
        assert_eq!(config.retry.max_attempts, 4);
        assert_eq!(config.fixtures.account_prefix, "ST_APP_USER_");
        assert!(config.api.access_token.is_none());
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let temp = tempdir().expect("Failed to create temp dir");
        let path = temp.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
[run]
search_tenant = "900"
tenants = ["101", "102"]
search_role = "viewer"

[retry]
max_attempts = 2
"#,
        )
        .unwrap();

        let config = Config::from_file(&path).expect("Failed to load config");

        assert_eq!(config.run.tenants, vec!["101", "102"]);
        assert_eq!(config.run.top_folder_name, "HOUSE_LIST");
        assert_eq!(config.retry.max_attempts, 2);
        assert_eq!(config.retry.base_delay_ms, 250);
        assert_eq!(config.api.url, "https://api.box.com/2.0");

        let settings = config.settings(&[]).expect("valid settings");
        assert_eq!(settings.search_tenant.as_str(), "900");
        assert_eq!(settings.search_role, Role::Viewer);
        assert_eq!(settings.tenants.len(), 2);
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let temp = tempdir().expect("Failed to create temp dir");
        let config = Config::from_file(&temp.path().join("absent.toml")).unwrap();
        assert_eq!(config.run.rate_limit, 16);
    }

    #[test]
    fn test_malformed_file_is_config_error() {
        let temp = tempdir().expect("Failed to create temp dir");
        let path = temp.path().join("config.toml");
        std::fs::write(&path, "[run\nrate_limit = ").unwrap();

        assert!(matches!(Config::from_file(&path), Err(ReshelfError::Config(_))));
    }

    #[test]
    fn test_rendered_config_loads_back() {
        let temp = tempdir().expect("Failed to create temp dir");
        let path = temp.path().join("config.toml");
        let mut config = Config::default();
        config.run.tenants = vec!["1".into()];
        config.fixtures.tenant_count = 3;

        std::fs::write(&path, toml::to_string_pretty(&config).unwrap()).unwrap();
        let loaded = Config::from_file(&path).expect("Failed to load config");

        assert_eq!(loaded.run.tenants, vec!["1"]);
        assert_eq!(loaded.fixtures.tenant_count, 3);
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config
            .apply_env(env(&[
                ("RESHELF_ACCESS_TOKEN", "secret"),
                ("RESHELF_API_URL", "http://localhost:9000"),
                ("RESHELF_RATE_LIMIT", "4"),
            ]))
            .unwrap();

        assert_eq!(config.access_token().unwrap(), "secret");
        assert_eq!(config.api.url, "http://localhost:9000");
        assert_eq!(config.rate_gate(None).unwrap().limit(), 4);
    }

    #[test]
    fn test_bad_rate_limit_env_is_rejected() {
        let mut config = Config::default();
        let err = config.apply_env(env(&[("RESHELF_RATE_LIMIT", "fast")])).unwrap_err();
        assert!(err.to_string().contains("RESHELF_RATE_LIMIT"));
    }

    #[test]
    fn test_resolve_path_precedence() {
        let explicit = PathBuf::from("/etc/reshelf.toml");
        let from_env = env(&[("RESHELF_CONFIG", "/tmp/env.toml")]);

        assert_eq!(Config::resolve_path(Some(&explicit), &from_env), explicit);
        assert_eq!(Config::resolve_path(None, &from_env), PathBuf::from("/tmp/env.toml"));
        assert!(Config::resolve_path(None, env(&[])).ends_with("config.toml"));
    }

    #[test]
    fn test_settings_validation() {
        let mut config = Config::default();
        assert!(config.settings(&[]).is_err(), "search tenant is required");

        config.run.search_tenant = Some("9".into());
        assert!(config.settings(&[]).is_err(), "tenants are required");

        let settings = config.settings(&["5".to_string()]).unwrap();
        assert_eq!(settings.tenants, vec![TenantId::from("5")]);

        config.run.tenants = vec!["1".into()];
        config.run.top_folder_name = "  ".into();
        assert!(config.settings(&[]).is_err());

        config.run.top_folder_name = "TOP".into();
        config.run.search_role = "owner".into();
        assert!(config.settings(&[]).is_err());
    }

    #[test]
    fn test_zero_rate_limit_is_rejected() {
        let config = Config::default();
        assert!(config.rate_gate(Some(0)).is_err());
        assert_eq!(config.rate_gate(Some(2)).unwrap().limit(), 2);
    }

    #[test]
    fn test_redacted_hides_token() {
        let mut config = Config::default();
        config.api.access_token = Some("secret".into());
        let shown = toml::to_string_pretty(&config.redacted()).unwrap();
        assert!(!shown.contains("secret"));
    }
}
