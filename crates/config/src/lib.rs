//! Configuration loading, validation, and management for huddle.
//!
//! Loads configuration from `~/.huddle/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use huddle_core::{Connection, ModelTier, SessionType};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.huddle/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Built-in backend (used without a user connection)
    #[serde(default)]
    pub builtin: BuiltinConfig,

    /// Which catalog providers may take part in a chain
    #[serde(default)]
    pub providers: ProvidersConfig,

    /// Per-provider credentials, keyed by provider id
    #[serde(default)]
    pub connections: HashMap<String, ConnectionConfig>,

    /// Context budget settings
    #[serde(default)]
    pub context: ContextConfig,

    /// Meeting behavior
    #[serde(default)]
    pub session: SessionConfig,

    /// Cost tracking
    #[serde(default)]
    pub telemetry: TelemetryConfig,

    /// Token refresh for OAuth-style connections
    #[serde(default)]
    pub oauth: OAuthConfig,
}

fn default_true() -> bool {
    true
}

/// Redact a secret string for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

// ── Built-in backend ──

#[derive(Clone, Serialize, Deserialize)]
pub struct BuiltinConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default = "default_builtin_url")]
    pub base_url: String,

    #[serde(default = "default_request_timeout")]
    pub timeout_secs: u64,
}

fn default_builtin_url() -> String {
    "https://api.anthropic.com".into()
}
fn default_request_timeout() -> u64 {
    120
}

impl Default for BuiltinConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: default_builtin_url(),
            timeout_secs: default_request_timeout(),
        }
    }
}

impl std::fmt::Debug for BuiltinConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuiltinConfig")
            .field("api_key", &redact(&self.api_key))
            .field("base_url", &self.base_url)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

// ── Providers ──

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvidersConfig {
    /// Enabled provider ids, in no particular order (the chain sorts by price)
    #[serde(default = "default_enabled_providers")]
    pub enabled: Vec<String>,

    /// User-defined OpenAI-compatible providers
    #[serde(default)]
    pub custom: Vec<CustomProviderConfig>,
}

fn default_enabled_providers() -> Vec<String> {
    vec!["huddle".into()]
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled_providers(),
            custom: vec![],
        }
    }
}

/// An OpenAI-compatible endpoint the catalog doesn't know about.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomProviderConfig {
    pub id: String,

    #[serde(default)]
    pub name: String,

    pub base_url: String,

    /// Whether the endpoint needs an API key from `connections`
    #[serde(default)]
    pub requires_key: bool,

    #[serde(default)]
    pub models: Vec<CustomModelConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomModelConfig {
    pub id: String,

    #[serde(default)]
    pub input_per_m: Option<f64>,

    #[serde(default)]
    pub output_per_m: Option<f64>,
}

// ── Connections ──

/// A stored credential for one provider.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// API key or OAuth access token
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,

    /// Unix seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub models: Vec<String>,
}

impl ConnectionConfig {
    pub fn to_connection(&self, provider: &str) -> Connection {
        Connection {
            provider: provider.to_string(),
            access_token: self.access_token.clone().unwrap_or_default(),
            refresh_token: self.refresh_token.clone(),
            expires_at: self.expires_at,
            base_url: self.base_url.clone(),
            models: self.models.clone(),
            refreshed: false,
        }
    }
}

impl std::fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("access_token", &redact(&self.access_token))
            .field("refresh_token", &redact(&self.refresh_token))
            .field("expires_at", &self.expires_at)
            .field("base_url", &self.base_url)
            .field("models", &self.models)
            .finish()
    }
}

// ── Context ──

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextConfig {
    /// Approximate token ceiling for assembled context
    #[serde(default = "default_context_tokens")]
    pub max_tokens: usize,

    /// Projects whose status always gets Tier 2 room
    #[serde(default)]
    pub focus_projects: Vec<String>,

    /// People whose facts always get Tier 2 room
    #[serde(default)]
    pub focus_people: Vec<String>,
}

fn default_context_tokens() -> usize {
    20_000
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            max_tokens: default_context_tokens(),
            focus_projects: vec![],
            focus_people: vec![],
        }
    }
}

// ── Session ──

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Tier overrides keyed by session type (`check_in = "standard"`)
    #[serde(default)]
    pub tiers: HashMap<String, ModelTier>,

    /// Snapshot the session to the store after every turn
    #[serde(default = "default_true")]
    pub snapshot_each_turn: bool,

    /// Cumulative defers at which an item is flagged as a pattern
    #[serde(default = "default_defer_threshold")]
    pub defer_pattern_threshold: u32,

    /// Assistant persona, the first system block
    #[serde(default = "default_persona")]
    pub persona: String,

    /// Max tokens per reply
    #[serde(default = "default_reply_tokens")]
    pub max_reply_tokens: u32,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Reply used when every backend fails on the opening turn
    #[serde(default = "default_opening_fallback")]
    pub opening_fallback: String,

    /// Reply used when every backend fails on a later turn
    #[serde(default = "default_turn_fallback")]
    pub turn_fallback: String,
}

pub const DEFAULT_DEFER_PATTERN_THRESHOLD: u32 = 3;

fn default_defer_threshold() -> u32 {
    DEFAULT_DEFER_PATTERN_THRESHOLD
}
fn default_persona() -> String {
    "You are a sharp, warm chief of staff running a short planning meeting. \
     Keep replies brief, ask one question at a time, and never lecture."
        .into()
}
fn default_reply_tokens() -> u32 {
    1024
}
fn default_temperature() -> f32 {
    0.7
}
fn default_opening_fallback() -> String {
    "Good morning! I'm having trouble connecting right now, but let's get started when the connection is restored.".into()
}
fn default_turn_fallback() -> String {
    "I'm having trouble connecting right now. Let's continue when the connection is restored."
        .into()
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            tiers: HashMap::new(),
            snapshot_each_turn: true,
            defer_pattern_threshold: default_defer_threshold(),
            persona: default_persona(),
            max_reply_tokens: default_reply_tokens(),
            temperature: default_temperature(),
            opening_fallback: default_opening_fallback(),
            turn_fallback: default_turn_fallback(),
        }
    }
}

impl SessionConfig {
    /// Model tier for a session type, honoring overrides.
    pub fn tier_for(&self, session_type: SessionType) -> ModelTier {
        self.tiers
            .get(session_type.as_str())
            .copied()
            .unwrap_or_else(|| session_type.tier())
    }
}

// ── Telemetry ──

/// Cost tracking configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Whether cost tracking is enabled
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Custom model pricing overrides (model name → pricing)
    #[serde(default)]
    pub custom_pricing: HashMap<String, PricingOverrideConfig>,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            custom_pricing: HashMap::new(),
        }
    }
}

/// Custom per-million-token pricing for a model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PricingOverrideConfig {
    /// Price per 1M input tokens in USD
    pub input_per_m: f64,
    /// Price per 1M output tokens in USD
    pub output_per_m: f64,
}

// ── OAuth ──

#[derive(Clone, Serialize, Deserialize)]
pub struct OAuthConfig {
    /// Token endpoint used to refresh expiring access tokens
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,

    #[serde(default = "default_refresh_timeout")]
    pub timeout_secs: u64,
}

fn default_refresh_timeout() -> u64 {
    15
}

impl Default for OAuthConfig {
    fn default() -> Self {
        Self {
            refresh_url: None,
            client_id: None,
            client_secret: None,
            timeout_secs: default_refresh_timeout(),
        }
    }
}

impl std::fmt::Debug for OAuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuthConfig")
            .field("refresh_url", &self.refresh_url)
            .field("client_id", &self.client_id)
            .field("client_secret", &redact(&self.client_secret))
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.huddle/config.toml).
    ///
    /// Also checks environment variables for the built-in API key:
    /// - `HUDDLE_API_KEY` (highest priority)
    /// - `ANTHROPIC_API_KEY`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;

        if config.builtin.api_key.is_none() {
            config.builtin.api_key = std::env::var("HUDDLE_API_KEY")
                .ok()
                .or_else(|| std::env::var("ANTHROPIC_API_KEY").ok())
                .filter(|k| !k.is_empty());
        }

        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Get the configuration directory path (`HUDDLE_CONFIG_DIR` overrides).
    pub fn config_dir() -> PathBuf {
        match std::env::var("HUDDLE_CONFIG_DIR") {
            Ok(dir) if !dir.is_empty() => PathBuf::from(dir),
            _ => dirs_home().join(".huddle"),
        }
    }

    /// Validate the configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        let s = &self.session;
        if !(0.0..=2.0).contains(&s.temperature) {
            return Err(ConfigError::ValidationError(
                "session.temperature must be between 0.0 and 2.0".into(),
            ));
        }

        if s.defer_pattern_threshold == 0 {
            return Err(ConfigError::ValidationError(
                "session.defer_pattern_threshold must be >= 1".into(),
            ));
        }

        for key in s.tiers.keys() {
            if !SessionType::ALL.iter().any(|t| t.as_str() == key) {
                return Err(ConfigError::ValidationError(format!(
                    "session.tiers: unknown session type '{key}'"
                )));
            }
        }

        for custom in &self.providers.custom {
            if custom.id.is_empty() || custom.base_url.is_empty() {
                return Err(ConfigError::ValidationError(
                    "providers.custom entries need an id and a base_url".into(),
                ));
            }
        }

        for (model, price) in &self.telemetry.custom_pricing {
            if price.input_per_m < 0.0 || price.output_per_m < 0.0 {
                return Err(ConfigError::ValidationError(format!(
                    "telemetry.custom_pricing.{model}: prices must be non-negative"
                )));
            }
        }

        Ok(())
    }

    /// Check if the built-in backend has a key.
    pub fn has_builtin_key(&self) -> bool {
        self.builtin.api_key.is_some()
    }

    /// Materialize every configured connection.
    pub fn connections(&self) -> Vec<Connection> {
        let mut ids: Vec<&String> = self.connections.keys().collect();
        ids.sort();
        ids.into_iter()
            .map(|id| self.connections[id].to_connection(id))
            .collect()
    }

    /// Generate a default config TOML string.
    pub fn default_toml() -> String {
        toml::to_string_pretty(&Self::default()).unwrap_or_default()
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

impl From<ConfigError> for huddle_core::Error {
    fn from(e: ConfigError) -> Self {
        huddle_core::Error::Config {
            message: e.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn default_config_is_valid() {
        let config = AppConfig::default();
        assert_eq!(config.providers.enabled, vec!["huddle".to_string()]);
        assert_eq!(config.context.max_tokens, 20_000);
        assert_eq!(config.session.defer_pattern_threshold, 3);
        assert!(config.session.snapshot_each_turn);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn config_roundtrip_toml() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.context.max_tokens, config.context.max_tokens);
        assert_eq!(parsed.builtin.base_url, config.builtin.base_url);
    }

    #[test]
    fn invalid_temperature_rejected() {
        let mut config = AppConfig::default();
        config.session.temperature = 5.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_defer_threshold_rejected() {
        let mut config = AppConfig::default();
        config.session.defer_pattern_threshold = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn unknown_tier_override_rejected() {
        let mut config = AppConfig::default();
        config.session.tiers.insert("brunch".into(), ModelTier::Basic);
        assert!(config.validate().is_err());
    }

    #[test]
    fn missing_config_file_returns_defaults() {
        let config = AppConfig::load_from(Path::new("/nonexistent/config.toml")).unwrap();
        assert_eq!(config.session.defer_pattern_threshold, 3);
    }

    #[test]
    fn tier_overrides_apply() {
        let mut session = SessionConfig::default();
        assert_eq!(session.tier_for(SessionType::CheckIn), ModelTier::Basic);
        session.tiers.insert("check_in".into(), ModelTier::Reasoning);
        assert_eq!(session.tier_for(SessionType::CheckIn), ModelTier::Reasoning);
        assert_eq!(
            session.tier_for(SessionType::WeeklyReview),
            ModelTier::Reasoning
        );
    }

    #[test]
    fn loads_file_with_connections_and_custom_providers() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
[providers]
enabled = ["huddle", "groq", "lab"]

[[providers.custom]]
id = "lab"
name = "Lab box"
base_url = "http://10.0.0.5:8000/v1"
[[providers.custom.models]]
id = "qwen-72b"

[connections.groq]
access_token = "gsk_test"

[connections.openai]
access_token = "at"
refresh_token = "rt"
expires_at = 1700000000

[session]
defer_pattern_threshold = 4
[session.tiers]
morning_meeting = "reasoning"

[telemetry.custom_pricing.qwen-72b]
input_per_m = 0.2
output_per_m = 0.6
"#
        )
        .unwrap();

        let config = AppConfig::load_from(file.path()).unwrap();
        assert_eq!(config.providers.enabled.len(), 3);
        assert_eq!(config.providers.custom[0].models[0].id, "qwen-72b");
        assert_eq!(config.session.defer_pattern_threshold, 4);
        assert_eq!(
            config.session.tier_for(SessionType::MorningMeeting),
            ModelTier::Reasoning
        );

        let conns = config.connections();
        assert_eq!(conns.len(), 2);
        assert_eq!(conns[0].provider, "groq");
        assert!(!conns[0].is_oauth());
        assert!(conns[1].is_oauth());
        assert_eq!(conns[1].expires_at, Some(1_700_000_000));
    }

    #[test]
    fn malformed_file_is_a_parse_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "[session\nbroken").unwrap();
        let err = AppConfig::load_from(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));
    }

    #[test]
    fn debug_redacts_secrets() {
        let mut config = AppConfig::default();
        config.builtin.api_key = Some("sk-ant-secret".into());
        config.connections.insert(
            "groq".into(),
            ConnectionConfig {
                access_token: Some("gsk_secret".into()),
                ..ConnectionConfig::default()
            },
        );
        let dbg = format!("{config:?}");
        assert!(!dbg.contains("sk-ant-secret"));
        assert!(!dbg.contains("gsk_secret"));
    }
}
