//! Configuration loading and management
//!
//! Configuration is loaded from `~/.config/wxdigest/config.toml`, then the
//! environment variables listed in [`Config::apply_env`] override file values.
//! The resulting [`Config`] is built once at startup and passed down
//! explicitly.
//!
//! This module follows the XDG Base Directory Specification:
//! - Config: `$XDG_CONFIG_HOME/wxdigest/` (~/.config/wxdigest/)
//! - State/Logs: `$XDG_STATE_HOME/wxdigest/` (~/.local/state/wxdigest/)

use crate::error::{Error, Result};
use crate::filter::{CapStrategy, FilterOptions};
use crate::types::MessageType;
use chrono_tz::Tz;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Returns a best-effort home directory path.
fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Returns XDG_CONFIG_HOME or ~/.config
fn xdg_config_home() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"))
}

/// Returns XDG_STATE_HOME or ~/.local/state
fn xdg_state_home() -> PathBuf {
    std::env::var("XDG_STATE_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/state"))
}

/// Expand a leading `~` to the home directory.
pub fn expand_home(path: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => home_dir().join(rest),
        Err(_) => path.to_path_buf(),
    }
}

/// Main configuration struct
#[derive(Debug, Deserialize, Default, Clone)]
pub struct Config {
    /// Where the chat store lives
    #[serde(default)]
    pub store: StoreConfig,

    /// Rooms to summarize
    #[serde(default)]
    pub rooms: RoomsConfig,

    /// Filter chain settings
    #[serde(default)]
    pub filter: FilterConfig,

    /// Language-model providers
    #[serde(default)]
    pub llm: LlmConfig,

    /// Report output
    #[serde(default)]
    pub output: OutputConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Store location settings
#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    /// Chat data root containing one directory per account
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Explicit store file; skips account discovery
    #[serde(default)]
    pub db_path: Option<PathBuf>,

    /// Account directory name to use when several exist
    #[serde(default)]
    pub account: Option<String>,

    /// Upper bound for each store query
    #[serde(default = "default_query_timeout")]
    pub query_timeout_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            db_path: None,
            account: None,
            query_timeout_secs: default_query_timeout(),
        }
    }
}

impl StoreConfig {
    pub fn query_timeout(&self) -> Duration {
        Duration::from_secs(self.query_timeout_secs.max(1))
    }
}

fn default_data_dir() -> PathBuf {
    dirs::document_dir()
        .unwrap_or_else(|| home_dir().join("Documents"))
        .join("WeChat Files")
}

fn default_query_timeout() -> u64 {
    30
}

/// Target rooms
#[derive(Debug, Deserialize, Default, Clone)]
pub struct RoomsConfig {
    /// Room ids or name fragments
    #[serde(default)]
    pub targets: Vec<String>,
}

/// Filter chain settings
#[derive(Debug, Deserialize, Clone)]
pub struct FilterConfig {
    /// Message type codes to keep (1 = text)
    #[serde(default = "default_message_types")]
    pub message_types: Vec<i64>,

    #[serde(default = "default_max_messages")]
    pub max_messages: usize,

    /// `recent`, `oldest` or `sample`; unknown names mean `recent`
    #[serde(default = "default_cap_strategy")]
    pub cap_strategy: String,

    #[serde(default = "default_min_content_length")]
    pub min_content_length: usize,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            message_types: default_message_types(),
            max_messages: default_max_messages(),
            cap_strategy: default_cap_strategy(),
            min_content_length: default_min_content_length(),
        }
    }
}

impl FilterConfig {
    pub fn message_types(&self) -> Vec<MessageType> {
        self.message_types
            .iter()
            .copied()
            .map(MessageType::from_code)
            .collect()
    }

    pub fn cap_strategy(&self) -> CapStrategy {
        CapStrategy::from_name(&self.cap_strategy)
    }

    /// Filter options for the chain; an empty type list keeps every type.
    pub fn to_options(&self) -> FilterOptions {
        let types = self.message_types();
        FilterOptions {
            rooms: None,
            types: (!types.is_empty()).then_some(types),
            min_content_length: self.min_content_length,
            strategy: self.cap_strategy(),
            max_messages: self.max_messages,
        }
    }
}

fn default_message_types() -> Vec<i64> {
    vec![1]
}

fn default_max_messages() -> usize {
    500
}

fn default_cap_strategy() -> String {
    "recent".to_string()
}

fn default_min_content_length() -> usize {
    1
}

/// Supported LLM providers
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    Zhipu,
    DeepSeek,
    OpenAI,
}

impl LlmProvider {
    pub const ALL: [LlmProvider; 3] = [LlmProvider::Zhipu, LlmProvider::DeepSeek, LlmProvider::OpenAI];

    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "zhipu" => Some(LlmProvider::Zhipu),
            "deepseek" => Some(LlmProvider::DeepSeek),
            "openai" => Some(LlmProvider::OpenAI),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LlmProvider::Zhipu => "zhipu",
            LlmProvider::DeepSeek => "deepseek",
            LlmProvider::OpenAI => "openai",
        }
    }

    /// Prefix of this provider's environment variables
    pub fn env_prefix(&self) -> &'static str {
        match self {
            LlmProvider::Zhipu => "ZHIPU",
            LlmProvider::DeepSeek => "DEEPSEEK",
            LlmProvider::OpenAI => "OPENAI",
        }
    }

    pub fn default_base_url(&self) -> &'static str {
        match self {
            LlmProvider::Zhipu => "https://open.bigmodel.cn/api/paas/v4",
            LlmProvider::DeepSeek => "https://api.deepseek.com",
            LlmProvider::OpenAI => "https://api.openai.com/v1",
        }
    }

    pub fn default_model(&self) -> &'static str {
        match self {
            LlmProvider::Zhipu => "glm-4-flash",
            LlmProvider::DeepSeek => "deepseek-chat",
            LlmProvider::OpenAI => "gpt-4o-mini",
        }
    }
}

/// Per-provider credentials and endpoint; unset fields use provider defaults
#[derive(Debug, Deserialize, Default, Clone, PartialEq, Eq)]
pub struct ProviderSettings {
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub model: Option<String>,
}

/// LLM provider configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    /// Providers in priority order
    #[serde(default = "default_providers")]
    pub providers: Vec<LlmProvider>,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Request timeout in seconds
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,

    #[serde(default)]
    pub zhipu: ProviderSettings,

    #[serde(default)]
    pub deepseek: ProviderSettings,

    #[serde(default)]
    pub openai: ProviderSettings,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            providers: default_providers(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            timeout_secs: default_llm_timeout(),
            zhipu: ProviderSettings::default(),
            deepseek: ProviderSettings::default(),
            openai: ProviderSettings::default(),
        }
    }
}

/// A provider picked by [`LlmConfig::resolve`], with defaults filled in.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedLlm {
    pub provider: LlmProvider,
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout_secs: u64,
}

impl LlmConfig {
    pub fn settings(&self, provider: LlmProvider) -> &ProviderSettings {
        match provider {
            LlmProvider::Zhipu => &self.zhipu,
            LlmProvider::DeepSeek => &self.deepseek,
            LlmProvider::OpenAI => &self.openai,
        }
    }

    fn settings_mut(&mut self, provider: LlmProvider) -> &mut ProviderSettings {
        match provider {
            LlmProvider::Zhipu => &mut self.zhipu,
            LlmProvider::DeepSeek => &mut self.deepseek,
            LlmProvider::OpenAI => &mut self.openai,
        }
    }

    /// The first provider in priority order that has an API key.
    pub fn resolve(&self) -> Result<ResolvedLlm> {
        for provider in &self.providers {
            let settings = self.settings(*provider);
            let Some(api_key) = settings.api_key.as_deref().filter(|k| !k.trim().is_empty()) else {
                tracing::debug!(provider = provider.as_str(), "Provider has no API key, skipping");
                continue;
            };
            return Ok(ResolvedLlm {
                provider: *provider,
                api_key: api_key.trim().to_string(),
                base_url: settings
                    .base_url
                    .clone()
                    .unwrap_or_else(|| provider.default_base_url().to_string()),
                model: settings
                    .model
                    .clone()
                    .unwrap_or_else(|| provider.default_model().to_string()),
                temperature: self.temperature,
                max_tokens: self.max_tokens,
                timeout_secs: self.timeout_secs,
            });
        }

        let vars = self
            .providers
            .iter()
            .map(|p| format!("{}_API_KEY", p.env_prefix()))
            .collect::<Vec<_>>()
            .join(", ");
        Err(Error::Config(format!(
            "no LLM provider has an API key; set one of {} or llm.<provider>.api_key",
            if vars.is_empty() { "llm.providers".to_string() } else { vars }
        )))
    }
}

fn default_providers() -> Vec<LlmProvider> {
    LlmProvider::ALL.to_vec()
}

fn default_temperature() -> f32 {
    0.3
}

fn default_max_tokens() -> u32 {
    4000
}

fn default_llm_timeout() -> u64 {
    60
}

/// Report output settings
#[derive(Debug, Deserialize, Clone)]
pub struct OutputConfig {
    #[serde(default = "default_output_dir")]
    pub dir: PathBuf,

    /// IANA zone used for day boundaries and clock times
    #[serde(default = "default_timezone")]
    pub timezone: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: default_output_dir(),
            timezone: default_timezone(),
        }
    }
}

impl OutputConfig {
    pub fn tz(&self) -> Result<Tz> {
        self.timezone
            .trim()
            .parse::<Tz>()
            .map_err(|_| Error::Config(format!("unknown time zone '{}'", self.timezone)))
    }
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("./output")
}

fn default_timezone() -> String {
    "Asia/Shanghai".to_string()
}

/// Logging configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load the default config file (if any), then apply environment overrides
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();
        let mut config = if config_path.exists() {
            Self::load_from(&config_path)?
        } else {
            tracing::info!("No config file found at {:?}, using defaults", config_path);
            Config::default()
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Load configuration from a specific path, without environment overrides
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read config file {:?}: {}", path, e)))?;

        let mut config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse config: {}", e)))?;

        config.store.data_dir = expand_home(&config.store.data_dir);
        config.store.db_path = config.store.db_path.as_deref().map(expand_home);
        config.output.dir = expand_home(&config.output.dir);
        Ok(config)
    }

    /// Apply environment overrides through `lookup`.
    ///
    /// Recognized: `{ZHIPU,DEEPSEEK,OPENAI}_{API_KEY,BASE_URL,MODEL}`,
    /// `LLM_PROVIDERS`, `WX_DATA_DIR`, `WX_DB_PATH`, `TARGET_ROOMS`,
    /// `MSG_TYPES`, `MAX_MESSAGES`, `OUTPUT_DIR`, `TIMEZONE`. Empty values are
    /// ignored; list values are comma separated.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        for provider in LlmProvider::ALL {
            let prefix = provider.env_prefix();
            let settings = self.llm.settings_mut(provider);
            if let Some(v) = get(&format!("{prefix}_API_KEY")) {
                settings.api_key = Some(v);
            }
            if let Some(v) = get(&format!("{prefix}_BASE_URL")) {
                settings.base_url = Some(v);
            }
            if let Some(v) = get(&format!("{prefix}_MODEL")) {
                settings.model = Some(v);
            }
        }

        if let Some(v) = get("LLM_PROVIDERS") {
            self.llm.providers = split_list(&v)
                .map(|name| {
                    LlmProvider::from_name(name)
                        .ok_or_else(|| Error::Config(format!("LLM_PROVIDERS: unknown provider '{}'", name)))
                })
                .collect::<Result<Vec<_>>>()?;
        }
        if let Some(v) = get("WX_DATA_DIR") {
            self.store.data_dir = expand_home(Path::new(&v));
        }
        if let Some(v) = get("WX_DB_PATH") {
            self.store.db_path = Some(expand_home(Path::new(&v)));
        }
        if let Some(v) = get("TARGET_ROOMS") {
            self.rooms.targets = split_list(&v).map(ToString::to_string).collect();
        }
        if let Some(v) = get("MSG_TYPES") {
            self.filter.message_types = split_list(&v)
                .map(|code| {
                    code.parse::<i64>()
                        .map_err(|_| Error::Config(format!("MSG_TYPES: '{}' is not a type code", code)))
                })
                .collect::<Result<Vec<_>>>()?;
        }
        if let Some(v) = get("MAX_MESSAGES") {
            self.filter.max_messages = v
                .parse()
                .map_err(|_| Error::Config(format!("MAX_MESSAGES: '{}' is not a number", v)))?;
        }
        if let Some(v) = get("OUTPUT_DIR") {
            self.output.dir = expand_home(Path::new(&v));
        }
        if let Some(v) = get("TIMEZONE") {
            self.output.timezone = v;
        }
        Ok(())
    }

    /// Human-readable dump with API keys masked
    pub fn redacted_summary(&self) -> String {
        let mut lines = vec![
            format!("config file:      {}", Self::config_path().display()),
            format!("data dir:         {}", self.store.data_dir.display()),
            format!(
                "store file:       {}",
                self.store
                    .db_path
                    .as_ref()
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|| "(discovered)".to_string())
            ),
            format!(
                "account:          {}",
                self.store.account.as_deref().unwrap_or("(first found)")
            ),
            format!(
                "target rooms:     {}",
                if self.rooms.targets.is_empty() {
                    "(none)".to_string()
                } else {
                    self.rooms.targets.join(", ")
                }
            ),
            format!(
                "message types:    {}",
                self.filter
                    .message_types()
                    .iter()
                    .map(|t| format!("{} ({})", t.code(), t.display_name()))
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
            format!(
                "max messages:     {} ({})",
                self.filter.max_messages,
                self.filter.cap_strategy()
            ),
            format!("output dir:       {}", self.output.dir.display()),
            format!("time zone:        {}", self.output.timezone),
            format!(
                "providers:        {}",
                self.llm
                    .providers
                    .iter()
                    .map(|p| p.as_str())
                    .collect::<Vec<_>>()
                    .join(" > ")
            ),
        ];
        for provider in LlmProvider::ALL {
            let settings = self.llm.settings(provider);
            lines.push(format!(
                "  {:<9} key={} model={} url={}",
                provider.as_str(),
                mask_key(settings.api_key.as_deref()),
                settings.model.as_deref().unwrap_or(provider.default_model()),
                settings
                    .base_url
                    .as_deref()
                    .unwrap_or(provider.default_base_url())
            ));
        }
        lines.join("\n")
    }

    /// Returns the default config file path
    ///
    /// `$XDG_CONFIG_HOME/wxdigest/config.toml` (~/.config/wxdigest/config.toml)
    pub fn config_path() -> PathBuf {
        xdg_config_home().join("wxdigest").join("config.toml")
    }

    /// Returns the state directory path (for logs)
    ///
    /// `$XDG_STATE_HOME/wxdigest/` (~/.local/state/wxdigest/)
    pub fn state_dir() -> PathBuf {
        xdg_state_home().join("wxdigest")
    }

    /// Returns the log file path
    ///
    /// `$XDG_STATE_HOME/wxdigest/wxdigest.log` (~/.local/state/wxdigest/wxdigest.log)
    pub fn log_path() -> PathBuf {
        Self::state_dir().join("wxdigest.log")
    }
}

fn split_list(value: &str) -> impl Iterator<Item = &str> {
    value.split(',').map(str::trim).filter(|s| !s.is_empty())
}

fn mask_key(key: Option<&str>) -> String {
    match key.map(str::trim).filter(|k| !k.is_empty()) {
        None => "(not set)".to_string(),
        Some(k) if k.chars().count() <= 8 => "****".to_string(),
        Some(k) => {
            let head: String = k.chars().take(4).collect();
            format!("{}****", head)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

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
        assert_eq!(config.filter.message_types, vec![1]);
        assert_eq!(config.filter.max_messages, 500);
        assert_eq!(config.filter.cap_strategy(), CapStrategy::Recent);
        assert_eq!(config.llm.providers, LlmProvider::ALL.to_vec());
        assert_eq!(config.llm.max_tokens, 4000);
        assert_eq!(config.output.tz().unwrap(), chrono_tz::Asia::Shanghai);
        assert!(config.store.data_dir.ends_with("WeChat Files"));
    }

    #[test]
    fn test_parse_config() {
        let toml = r#"
[store]
db_path = "/tmp/MSG.db"
query_timeout_secs = 5

[rooms]
targets = ["US stocks", "12345@chatroom"]

[filter]
message_types = [1, 49]
cap_strategy = "sample"

[llm]
providers = ["deepseek", "zhipu"]

[llm.deepseek]
api_key = "sk-deepseek"
model = "deepseek-reasoner"

[logging]
level = "debug"
"#;
        let config: Config = toml::from_str(toml).unwrap();

        assert_eq!(config.store.db_path, Some(PathBuf::from("/tmp/MSG.db")));
        assert_eq!(config.store.query_timeout(), Duration::from_secs(5));
        assert_eq!(config.rooms.targets.len(), 2);
        assert_eq!(
            config.filter.message_types(),
            vec![MessageType::Text, MessageType::LinkOrFile]
        );
        assert_eq!(config.filter.to_options().strategy, CapStrategy::Sample);
        assert_eq!(config.logging.level, "debug");

        let llm = config.llm.resolve().unwrap();
        assert_eq!(llm.provider, LlmProvider::DeepSeek);
        assert_eq!(llm.model, "deepseek-reasoner");
        assert_eq!(llm.base_url, "https://api.deepseek.com");
    }

    #[test]
    fn test_resolve_skips_providers_without_key() {
        let mut config = Config::default();
        config
            .apply_env(env(&[("OPENAI_API_KEY", "sk-openai"), ("ZHIPU_API_KEY", "  ")]))
            .unwrap();
        let llm = config.llm.resolve().unwrap();
        assert_eq!(llm.provider, LlmProvider::OpenAI);
        assert_eq!(llm.model, "gpt-4o-mini");
        assert_eq!(llm.timeout_secs, 60);
    }

    #[test]
    fn test_resolve_without_any_key_fails() {
        let err = Config::default().llm.resolve().unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert!(err.to_string().contains("ZHIPU_API_KEY"));
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config
            .apply_env(env(&[
                ("LLM_PROVIDERS", "openai, zhipu"),
                ("TARGET_ROOMS", "A股,美股 ,"),
                ("MSG_TYPES", "1,49"),
                ("MAX_MESSAGES", "200"),
                ("WX_DB_PATH", "/data/MSG.db"),
                ("TIMEZONE", "UTC"),
                ("ZHIPU_BASE_URL", "http://localhost:9000"),
            ]))
            .unwrap();

        assert_eq!(config.llm.providers, vec![LlmProvider::OpenAI, LlmProvider::Zhipu]);
        assert_eq!(config.rooms.targets, vec!["A股", "美股"]);
        assert_eq!(config.filter.message_types, vec![1, 49]);
        assert_eq!(config.filter.max_messages, 200);
        assert_eq!(config.store.db_path, Some(PathBuf::from("/data/MSG.db")));
        assert_eq!(config.output.tz().unwrap(), chrono_tz::UTC);
        assert_eq!(config.llm.zhipu.base_url.as_deref(), Some("http://localhost:9000"));
    }

    #[test]
    fn test_bad_env_values_are_config_errors() {
        let mut config = Config::default();
        assert!(config.apply_env(env(&[("LLM_PROVIDERS", "claude")])).is_err());
        assert!(config.apply_env(env(&[("MAX_MESSAGES", "lots")])).is_err());
    }

    #[test]
    fn test_redacted_summary_masks_keys() {
        let mut config = Config::default();
        config
            .apply_env(env(&[("DEEPSEEK_API_KEY", "sk-1234567890abcdef")]))
            .unwrap();
        let summary = config.redacted_summary();
        assert!(summary.contains("sk-1****"));
        assert!(!summary.contains("sk-1234567890abcdef"));
        assert!(summary.contains("(not set)"));
    }
}
