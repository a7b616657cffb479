//! TOML configuration parsing and validation.
//!
//! Every section except `[upstream]` is optional and falls back to the
//! defaults below. [`load_config`] reads the file, applies environment
//! overrides, and validates the result; an invalid configuration never
//! reaches the fetch client.
//!
//! ```toml
//! [server]
//! bind = "127.0.0.1:3000"
//! allowed_origins = ["*"]
//! environment = "development"
//!
//! [upstream]
//! base_url = "https://api.quotable.io"
//! timeout_ms = 5000
//! call_timeout_grace_ms = 1000
//! retries = 3
//! backoff_base_ms = 100
//!
//! [breaker]
//! enabled = true
//! error_threshold_percentage = 50
//! reset_timeout_ms = 30000
//! rolling_window_ms = 10000
//! rolling_buckets = 10
//!
//! [logging]
//! level = "info"
//! format = "compact"
//! ```
//!
//! # Environment overrides
//!
//! | Variable | Overrides |
//! |----------|-----------|
//! | `QUOTE_RELAY_UPSTREAM_URL` | `upstream.base_url` |
//! | `QUOTE_RELAY_BIND` | `server.bind` |

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

pub const UPSTREAM_URL_ENV: &str = "QUOTE_RELAY_UPSTREAM_URL";
pub const BIND_ENV: &str = "QUOTE_RELAY_BIND";

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub breaker: BreakerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Development,
    Production,
    Test,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Development => "development",
            Environment::Production => "production",
            Environment::Test => "test",
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    /// `["*"]` allows any origin.
    #[serde(default = "default_allowed_origins")]
    pub allowed_origins: Vec<String>,
    #[serde(default)]
    pub environment: Environment,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            allowed_origins: default_allowed_origins(),
            environment: Environment::default(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:3000".to_string()
}
fn default_allowed_origins() -> Vec<String> {
    vec!["*".to_string()]
}

#[derive(Debug, Deserialize, Clone)]
pub struct UpstreamConfig {
    pub base_url: String,
    /// Per-attempt request timeout.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Added to `timeout_ms` to bound a whole logical call, retries and
    /// backoff included.
    #[serde(default = "default_call_timeout_grace_ms")]
    pub call_timeout_grace_ms: u64,
    /// Retries after the first attempt, per logical call.
    #[serde(default = "default_retries")]
    pub retries: u32,
    /// Retry `n` waits `backoff_base_ms * 2^n` plus jitter.
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    #[serde(default)]
    pub accept_invalid_certs: bool,
}

impl UpstreamConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            timeout_ms: default_timeout_ms(),
            call_timeout_grace_ms: default_call_timeout_grace_ms(),
            retries: default_retries(),
            backoff_base_ms: default_backoff_base_ms(),
            accept_invalid_certs: false,
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Budget for one logical call: `timeout_ms + call_timeout_grace_ms`.
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms.saturating_add(self.call_timeout_grace_ms))
    }
}

fn default_timeout_ms() -> u64 {
    5000
}
fn default_call_timeout_grace_ms() -> u64 {
    1000
}
fn default_retries() -> u32 {
    3
}
fn default_backoff_base_ms() -> u64 {
    100
}

#[derive(Debug, Deserialize, Clone)]
pub struct BreakerConfig {
    /// `false` turns the breaker into a pass-through.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Error rate (percent of calls in the rolling window) that opens the circuit.
    #[serde(default = "default_error_threshold")]
    pub error_threshold_percentage: f64,
    #[serde(default = "default_reset_timeout_ms")]
    pub reset_timeout_ms: u64,
    #[serde(default = "default_rolling_window_ms")]
    pub rolling_window_ms: u64,
    #[serde(default = "default_rolling_buckets")]
    pub rolling_buckets: u32,
    /// Minimum calls in the window before the error rate is evaluated.
    #[serde(default)]
    pub volume_threshold: u32,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            error_threshold_percentage: default_error_threshold(),
            reset_timeout_ms: default_reset_timeout_ms(),
            rolling_window_ms: default_rolling_window_ms(),
            rolling_buckets: default_rolling_buckets(),
            volume_threshold: 0,
        }
    }
}

impl BreakerConfig {
    pub fn reset_timeout(&self) -> Duration {
        Duration::from_millis(self.reset_timeout_ms)
    }

    pub fn bucket_duration(&self) -> Duration {
        Duration::from_millis(self.rolling_window_ms / u64::from(self.rolling_buckets.max(1)))
    }

    /// Same settings with the breaker switched off.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_error_threshold() -> f64 {
    50.0
}
fn default_reset_timeout_ms() -> u64 {
    30_000
}
fn default_rolling_window_ms() -> u64 {
    10_000
}
fn default_rolling_buckets() -> u32 {
    10
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Json,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// A complete configuration with every default, pointed at the public
    /// quotes API. Used by CLI commands when no config file exists.
    pub fn minimal() -> Self {
        Self {
            server: ServerConfig::default(),
            upstream: UpstreamConfig::new("https://api.quotable.io"),
            breaker: BreakerConfig::default(),
            logging: LoggingConfig::default(),
        }
    }

    /// Breaker settings after the environment rule: `test` always runs
    /// with the breaker disabled so call outcomes stay deterministic.
    pub fn effective_breaker(&self) -> BreakerConfig {
        if self.server.environment == Environment::Test {
            BreakerConfig {
                enabled: false,
                ..self.breaker.clone()
            }
        } else {
            self.breaker.clone()
        }
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var(UPSTREAM_URL_ENV) {
            if !url.trim().is_empty() {
                self.upstream.base_url = url;
            }
        }
        if let Ok(bind) = std::env::var(BIND_ENV) {
            if !bind.trim().is_empty() {
                self.server.bind = bind;
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        validate_upstream(&self.upstream)?;
        validate_breaker(&self.breaker)?;

        if self.server.bind.trim().is_empty() {
            bail!("server.bind must not be empty");
        }
        if self.server.allowed_origins.is_empty() {
            bail!("server.allowed_origins must list at least one origin (use \"*\" for any)");
        }

        match self.logging.level.to_ascii_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            other => bail!(
                "Unknown logging.level: '{}'. Must be trace, debug, info, warn, or error.",
                other
            ),
        }

        Ok(())
    }
}

/// Validate upstream settings. Shared with [`UpstreamClient::new`](crate::upstream::UpstreamClient::new)
/// so a client built without a config file gets the same checks.
pub fn validate_upstream(upstream: &UpstreamConfig) -> Result<()> {
    let url = reqwest::Url::parse(&upstream.base_url)
        .with_context(|| format!("upstream.base_url is not a valid URL: {}", upstream.base_url))?;
    match url.scheme() {
        "http" | "https" => {}
        other => bail!("upstream.base_url must be http or https, got '{}'", other),
    }
    if upstream.timeout_ms == 0 {
        bail!("upstream.timeout_ms must be > 0");
    }
    if upstream.backoff_base_ms == 0 {
        bail!("upstream.backoff_base_ms must be > 0");
    }
    if upstream.retries > 10 {
        bail!("upstream.retries must be <= 10");
    }
    Ok(())
}

pub fn validate_breaker(breaker: &BreakerConfig) -> Result<()> {
    if !(breaker.error_threshold_percentage > 0.0 && breaker.error_threshold_percentage <= 100.0) {
        bail!("breaker.error_threshold_percentage must be in (0, 100]");
    }
    if breaker.reset_timeout_ms == 0 {
        bail!("breaker.reset_timeout_ms must be > 0");
    }
    if breaker.rolling_window_ms == 0 {
        bail!("breaker.rolling_window_ms must be > 0");
    }
    if breaker.rolling_buckets == 0 {
        bail!("breaker.rolling_buckets must be > 0");
    }
    if breaker.rolling_window_ms % u64::from(breaker.rolling_buckets) != 0 {
        bail!(
            "breaker.rolling_window_ms ({}) must be divisible by breaker.rolling_buckets ({})",
            breaker.rolling_window_ms,
            breaker.rolling_buckets
        );
    }
    Ok(())
}

/// Parse and validate configuration from TOML text, without environment overrides.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;
    config.validate()?;
    Ok(config)
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let mut config: Config =
        toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    config.apply_env_overrides();
    config.validate()?;

    Ok(config)
}

/// Load `path` if it exists; otherwise start from [`Config::minimal`].
///
/// Environment overrides apply in both cases. A file that exists but does
/// not parse or validate is still an error.
pub fn load_config_or_default(path: &Path) -> Result<Config> {
    if path.exists() {
        return load_config(path);
    }

    tracing::debug!(path = %path.display(), "Config file not found, using defaults");
    let mut config = Config::minimal();
    config.apply_env_overrides();
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_minimal_file_gets_defaults() {
        let cfg = parse_config("[upstream]\nbase_url = \"http://localhost:9999\"\n").unwrap();
        assert_eq!(cfg.server.bind, "127.0.0.1:3000");
        assert_eq!(cfg.upstream.retries, 3);
        assert_eq!(cfg.upstream.timeout(), Duration::from_millis(5000));
        assert!(cfg.breaker.enabled);
        assert_eq!(cfg.breaker.bucket_duration(), Duration::from_millis(1000));
        assert_eq!(cfg.logging.format, LogFormat::Compact);
    }

    #[test]
    fn test_missing_upstream_section_is_rejected() {
        assert!(parse_config("[server]\nbind = \"0.0.0.0:1\"\n").is_err());
    }

    #[test]
    fn test_invalid_url_is_rejected() {
        let err = parse_config("[upstream]\nbase_url = \"not a url\"\n").unwrap_err();
        assert!(err.to_string().contains("base_url"));

        let err = parse_config("[upstream]\nbase_url = \"ftp://example.com\"\n").unwrap_err();
        assert!(err.to_string().contains("http or https"));
    }

    #[test]
    fn test_breaker_validation() {
        let base = "[upstream]\nbase_url = \"http://localhost\"\n";
        assert!(parse_config(&format!(
            "{}[breaker]\nerror_threshold_percentage = 0\n",
            base
        ))
        .is_err());
        assert!(parse_config(&format!(
            "{}[breaker]\nerror_threshold_percentage = 150\n",
            base
        ))
        .is_err());
        assert!(parse_config(&format!(
            "{}[breaker]\nrolling_window_ms = 1000\nrolling_buckets = 3\n",
            base
        ))
        .is_err());
        assert!(parse_config(&format!("{}[breaker]\nreset_timeout_ms = 0\n", base)).is_err());
    }

    #[test]
    fn test_unknown_log_level_is_rejected() {
        let text = "[upstream]\nbase_url = \"http://localhost\"\n[logging]\nlevel = \"loud\"\n";
        assert!(parse_config(text).is_err());
    }

    #[test]
    fn test_test_environment_disables_breaker() {
        let text = "[server]\nenvironment = \"test\"\n[upstream]\nbase_url = \"http://localhost\"\n";
        let cfg = parse_config(text).unwrap();
        assert!(cfg.breaker.enabled);
        assert!(!cfg.effective_breaker().enabled);
    }

    #[test]
    fn test_load_config_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[upstream]\nbase_url = \"https://quotes.example.com\"\ntimeout_ms = 250\n"
        )
        .unwrap();
        let cfg = load_config(file.path()).unwrap();
        assert_eq!(cfg.upstream.timeout_ms, 250);
        assert_eq!(cfg.upstream.call_timeout(), Duration::from_millis(1250));
    }

    #[test]
    fn test_load_config_or_default_without_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let cfg = load_config_or_default(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(cfg.server.environment, Environment::Development);
        assert!(cfg.breaker.enabled);
    }

    #[test]
    fn test_load_config_missing_file() {
        let err = load_config(Path::new("/definitely/not/here.toml")).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }
}
