//! Configuration loading for the album classifier
//!
//! Settings are resolved in layers, lowest priority first:
//! 1. Built-in defaults (code constants)
//! 2. TOML configuration file
//! 3. Environment variables (`AMC_<SECTION>__<KEY>`, e.g. `AMC_API__MAX_ATTEMPTS=5`)
//!
//! Command-line flags are applied on top by the binary.
//!
//! A missing TOML file is not an error: a warning is logged and the
//! remaining layers still apply.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Prefix for environment variable overrides
pub const ENV_PREFIX: &str = "AMC_";

/// Environment variable naming an explicit config file
pub const CONFIG_PATH_ENV: &str = "AMC_CONFIG";

/// Environment variables consulted for the remote API key, in priority order
pub const API_KEY_ENV_VARS: [&str; 2] = ["AMC_API_KEY", "OPENAI_API_KEY"];

const VALID_LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Secret used to authenticate against the remote classification service
///
/// `Debug` and `Display` never print the key itself.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ApiKey(String);

impl ApiKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Raw key, for building the Authorization header only
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Non-empty, non-whitespace
    pub fn is_valid(&self) -> bool {
        !self.0.trim().is_empty()
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiKey(<redacted>)")
    }
}

impl fmt::Display for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("<redacted>")
    }
}

/// Complete configuration file model
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TomlConfig {
    pub api: ApiConfig,
    pub caching: CachingConfig,
    pub concurrency: ConcurrencyConfig,
    pub pipeline: PipelineSettings,
    pub logging: LoggingConfig,
}

/// Remote classification service settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Base URL of the chat-completions compatible endpoint
    pub base_url: String,
    /// Fast, cheap model used by Extraction (and canonical verification)
    pub extraction_model: String,
    /// Richer, slower model used by Enrichment
    pub enrichment_model: String,
    /// Total attempts per remote call, including the first
    pub max_attempts: u32,
    /// First backoff delay; doubles per attempt
    pub base_delay_ms: u64,
    /// Backoff ceiling
    pub max_delay_ms: u64,
    /// Per-request timeout
    pub timeout_seconds: f64,
    /// Corrective re-prompts allowed for a malformed response
    pub repair_attempts: u32,
    /// API key from the TOML file (environment takes priority)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<ApiKey>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            extraction_model: "gpt-4o-mini".to_string(),
            enrichment_model: "gpt-4o".to_string(),
            max_attempts: 4,
            base_delay_ms: 1000,
            max_delay_ms: 60_000,
            timeout_seconds: 30.0,
            repair_attempts: 1,
            api_key: None,
        }
    }
}

/// Cache database settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CachingConfig {
    /// SQLite file holding both cache tiers
    pub database_path: PathBuf,
    /// Response cache entries older than this are treated as misses
    pub response_expiry_days: u32,
    /// Execution records older than this are purged at startup (0 = keep forever)
    pub execution_expiry_days: u32,
}

impl Default for CachingConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            response_expiry_days: 30,
            execution_expiry_days: 0,
        }
    }
}

/// Worker pool and remote gate sizes
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConcurrencyConfig {
    /// Items processed in parallel
    pub max_workers: usize,
    /// Remote calls in flight at once (must not exceed max_workers)
    pub api_concurrency: usize,
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            max_workers: 4,
            api_concurrency: 2,
        }
    }
}

/// Stage pipeline behavior
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    /// Re-entries of a stage after a retryable failure
    pub stage_retry_limit: u32,
    /// Issue a verification call during Canonicalization
    pub verify_canonical: bool,
    /// Audio file extensions accepted by Triage (lowercase, with dot)
    pub audio_extensions: Vec<String>,
    /// Directory names skipped during album discovery
    pub ignored_dirs: Vec<String>,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            stage_retry_limit: 2,
            verify_canonical: false,
            audio_extensions: [
                ".flac", ".mp3", ".m4a", ".wav", ".aiff", ".ogg", ".opus", ".ape", ".wv", ".dsf",
                ".dff",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            ignored_dirs: ["covers", "artwork", "scans", "booklet", "@eadir"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Log file path (optional, logs to stderr if not specified)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
        }
    }
}

impl TomlConfig {
    /// Parse a TOML document on top of the built-in defaults
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(format!("Parse TOML failed: {}", e)))
    }

    /// Check value ranges and cross-field constraints
    pub fn validate(&self) -> Result<()> {
        if self.api.max_attempts < 1 {
            return Err(Error::Config("api.max_attempts must be at least 1".to_string()));
        }
        if !(self.api.timeout_seconds > 0.0) {
            return Err(Error::Config("api.timeout_seconds must be a positive number".to_string()));
        }
        if self.api.max_delay_ms < self.api.base_delay_ms {
            return Err(Error::Config(
                "api.max_delay_ms must not be smaller than api.base_delay_ms".to_string(),
            ));
        }
        if self.concurrency.max_workers < 1 {
            return Err(Error::Config("concurrency.max_workers must be a positive integer".to_string()));
        }
        if self.concurrency.api_concurrency < 1 {
            return Err(Error::Config(
                "concurrency.api_concurrency must be a positive integer".to_string(),
            ));
        }
        if self.concurrency.api_concurrency > self.concurrency.max_workers {
            return Err(Error::Config(format!(
                "concurrency.api_concurrency ({}) must not exceed concurrency.max_workers ({})",
                self.concurrency.api_concurrency, self.concurrency.max_workers
            )));
        }
        if self.caching.response_expiry_days < 1 {
            return Err(Error::Config(
                "caching.response_expiry_days must be a positive integer".to_string(),
            ));
        }
        if self.pipeline.audio_extensions.is_empty() {
            return Err(Error::Config("pipeline.audio_extensions must be a non-empty list".to_string()));
        }
        let level = self.logging.level.to_lowercase();
        if !VALID_LOG_LEVELS.contains(&level.as_str()) {
            return Err(Error::Config(format!(
                "logging.level must be one of {:?}, got '{}'",
                VALID_LOG_LEVELS, self.logging.level
            )));
        }
        Ok(())
    }
}

/// Load configuration: defaults, then the TOML file (if any), then the
/// process environment. The result is validated.
pub fn load_config(path: Option<&Path>) -> Result<TomlConfig> {
    let config = match path {
        Some(p) if p.exists() => {
            let content = std::fs::read_to_string(p)
                .map_err(|e| Error::Config(format!("Read TOML failed: {}", e)))?;
            info!("Loaded configuration from {}", p.display());
            TomlConfig::from_toml_str(&content)?
        }
        Some(p) => {
            warn!("Config file {} not found, using defaults", p.display());
            TomlConfig::default()
        }
        None => TomlConfig::default(),
    };

    let mut config = apply_env_overrides(config, std::env::vars())?;
    config.caching.database_path = expand_home(&config.caching.database_path);
    config.validate()?;
    Ok(config)
}

/// Apply `AMC_<SECTION>__<KEY>` overrides from the given variables
///
/// Values are converted to the type of the setting they replace, so
/// `AMC_CONCURRENCY__MAX_WORKERS=8` becomes an integer while
/// `AMC_API__EXTRACTION_MODEL=123` stays a string. List settings accept a JSON
/// array or a comma-separated string.
pub fn apply_env_overrides<I>(config: TomlConfig, vars: I) -> Result<TomlConfig>
where
    I: IntoIterator<Item = (String, String)>,
{
    let mut tree = toml::Value::try_from(&config)
        .map_err(|e| Error::Config(format!("Serialize config failed: {}", e)))?;
    let mut applied = 0usize;

    for (name, raw) in vars {
        let Some(rest) = name.strip_prefix(ENV_PREFIX) else {
            continue;
        };
        let path: Vec<String> = rest.split("__").map(|s| s.to_lowercase()).collect();
        if path.len() != 2 || path.iter().any(|p| p.is_empty()) {
            continue;
        }

        let Some(section) = tree.get_mut(&path[0]).and_then(|v| v.as_table_mut()) else {
            warn!(variable = %name, "Unknown configuration section in environment override");
            continue;
        };
        let value = convert_env_value(&name, &raw, section.get(&path[1]))?;
        section.insert(path[1].clone(), value);
        applied += 1;
    }

    if applied > 0 {
        info!(count = applied, "Applied environment configuration overrides");
    }

    tree.try_into()
        .map_err(|e| Error::Config(format!("Invalid environment override: {}", e)))
}

fn convert_env_value(name: &str, raw: &str, current: Option<&toml::Value>) -> Result<toml::Value> {
    let invalid = |kind: &str| Error::Config(format!("{} must be {}, got '{}'", name, kind, raw));

    let value = match current {
        Some(toml::Value::Integer(_)) => {
            toml::Value::Integer(raw.trim().parse().map_err(|_| invalid("an integer"))?)
        }
        Some(toml::Value::Float(_)) => {
            toml::Value::Float(raw.trim().parse().map_err(|_| invalid("a number"))?)
        }
        Some(toml::Value::Boolean(_)) => match raw.trim().to_lowercase().as_str() {
            "true" | "yes" | "1" | "on" => toml::Value::Boolean(true),
            "false" | "no" | "0" | "off" => toml::Value::Boolean(false),
            _ => return Err(invalid("a boolean")),
        },
        Some(toml::Value::Array(_)) => {
            let items: Vec<String> = if raw.trim_start().starts_with('[') {
                serde_json::from_str(raw).map_err(|_| invalid("a JSON array of strings"))?
            } else {
                raw.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            };
            toml::Value::Array(items.into_iter().map(toml::Value::String).collect())
        }
        _ => toml::Value::String(raw.to_string()),
    };
    Ok(value)
}

/// Resolve the remote API key
///
/// **Priority:** Environment (`AMC_API_KEY`, then `OPENAI_API_KEY`) → TOML
pub fn resolve_api_key(config: &ApiConfig) -> Option<ApiKey> {
    let env_key = API_KEY_ENV_VARS
        .iter()
        .find_map(|var| std::env::var(var).ok().map(ApiKey::new).filter(ApiKey::is_valid));
    let toml_key = config.api_key.clone().filter(ApiKey::is_valid);

    if env_key.is_some() && toml_key.is_some() {
        warn!("API key found in both environment and TOML config. Using environment (highest priority).");
    }

    if let Some(key) = env_key {
        info!("API key loaded from environment variable");
        return Some(key);
    }
    if let Some(key) = toml_key {
        info!("API key loaded from TOML config");
        return Some(key);
    }
    None
}

/// Config file location: explicit argument, then `AMC_CONFIG`, then the
/// per-user default if it exists
pub fn resolve_config_path(cli_arg: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = cli_arg {
        return Some(path.to_path_buf());
    }
    if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
        return Some(PathBuf::from(path));
    }
    default_config_path().filter(|p| p.exists())
}

/// `<config_dir>/amc/config.toml`
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("amc").join("config.toml"))
}

/// OS-dependent default cache database location
fn default_database_path() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("amc").join("cache.db"))
        .unwrap_or_else(|| PathBuf::from("./amc_data/cache.db"))
}

/// Expand a leading `~/` to the user's home directory
pub fn expand_home(path: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => dirs::home_dir()
            .map(|home| home.join(rest))
            .unwrap_or_else(|| path.to_path_buf()),
        Err(_) => path.to_path_buf(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = TomlConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.concurrency.max_workers, 4);
        assert_eq!(config.concurrency.api_concurrency, 2);
        assert_eq!(config.api.extraction_model, "gpt-4o-mini");
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = TomlConfig::from_toml_str(
            r#"
            [concurrency]
            max_workers = 8
            "#,
        )
        .unwrap();
        assert_eq!(config.concurrency.max_workers, 8);
        assert_eq!(config.concurrency.api_concurrency, 2);
        assert_eq!(config.api.max_attempts, 4);
    }

    #[test]
    fn test_env_override_types_follow_setting() {
        let config = apply_env_overrides(
            TomlConfig::default(),
            vars(&[
                ("AMC_API__MAX_ATTEMPTS", "7"),
                ("AMC_API__EXTRACTION_MODEL", "123"),
                ("AMC_PIPELINE__VERIFY_CANONICAL", "yes"),
                ("AMC_PIPELINE__AUDIO_EXTENSIONS", ".flac, .mp3"),
                ("AMC_API__TIMEOUT_SECONDS", "12.5"),
                ("UNRELATED__KEY", "x"),
            ]),
        )
        .unwrap();

        assert_eq!(config.api.max_attempts, 7);
        assert_eq!(config.api.extraction_model, "123");
        assert!(config.pipeline.verify_canonical);
        assert_eq!(config.pipeline.audio_extensions, vec![".flac", ".mp3"]);
        assert_eq!(config.api.timeout_seconds, 12.5);
    }

    #[test]
    fn test_env_override_rejects_bad_integer() {
        let result = apply_env_overrides(
            TomlConfig::default(),
            vars(&[("AMC_CONCURRENCY__MAX_WORKERS", "many")]),
        );
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_api_concurrency_cannot_exceed_workers() {
        let mut config = TomlConfig::default();
        config.concurrency.max_workers = 2;
        config.concurrency.api_concurrency = 3;
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_invalid_log_level_rejected() {
        let mut config = TomlConfig::default();
        config.logging.level = "verbose".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_api_key_is_redacted() {
        let key = ApiKey::new("sk-secret-value");
        assert_eq!(format!("{:?}", key), "ApiKey(<redacted>)");
        assert_eq!(format!("{}", key), "<redacted>");
        assert!(!format!("{:?}", ApiConfig { api_key: Some(key), ..Default::default() })
            .contains("sk-secret-value"));
    }

    #[test]
    fn test_expand_home() {
        let plain = Path::new("/var/lib/amc/cache.db");
        assert_eq!(expand_home(plain), plain.to_path_buf());

        let expanded = expand_home(Path::new("~/cache.db"));
        if dirs::home_dir().is_some() {
            assert!(!expanded.starts_with("~"));
            assert!(expanded.ends_with("cache.db"));
        }
    }
}
