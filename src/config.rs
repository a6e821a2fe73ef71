//! Settings for the pilot binary: YAML file, then environment, then CLI flags.

use std::path::Path;

use eoka_agent::{AgentConfig, DispatchConfig, LaunchConfig, Timings};
use serde::Deserialize;

pub const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";

/// Errors that can occur while loading settings.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config error: {0}")]
    Invalid(String),

    #[error("yaml parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub app: AppSettings,
    pub ai: AiSettings,
    pub browser: BrowserSettings,
    pub agent: AgentSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppSettings {
    pub log_level: String,
    pub debug: bool,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            log_level: "info".into(),
            debug: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AiSettings {
    pub api_key: Option<String>,
    pub model: String,
    pub max_tokens: u32,
    pub base_url: String,
}

impl Default for AiSettings {
    fn default() -> Self {
        Self {
            api_key: None,
            model: DEFAULT_MODEL.into(),
            max_tokens: 4096,
            base_url: "https://api.anthropic.com".into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BrowserSettings {
    pub headless: bool,
    /// Navigation timeout.
    pub timeout_ms: u64,
    pub use_screenshots: bool,
    pub viewport: Viewport,
    pub user_agent: Option<String>,
    pub proxy: Option<String>,
}

impl Default for BrowserSettings {
    fn default() -> Self {
        Self {
            headless: false,
            timeout_ms: 30_000,
            use_screenshots: true,
            viewport: Viewport::default(),
            user_agent: None,
            proxy: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: 1920,
            height: 1080,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AgentSettings {
    pub max_iterations: u32,
    pub max_consecutive_errors: u32,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            max_iterations: 16,
            max_consecutive_errors: 3,
        }
    }
}

fn parse_bool(key: &str, raw: &str) -> Result<bool> {
    match raw.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        other => Err(ConfigError::Invalid(format!(
            "{} must be a boolean, got '{}'",
            key, other
        ))),
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T> {
    raw.trim()
        .parse()
        .map_err(|_| ConfigError::Invalid(format!("{} must be a number, got '{}'", key, raw)))
}

impl Settings {
    /// Load settings: defaults, then `path` if given, then the process environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut settings = match path {
            Some(p) => Self::parse(&std::fs::read_to_string(p)?)?,
            None => Self::default(),
        };
        settings.apply_env(|key| std::env::var(key).ok())?;
        settings.validate()?;
        Ok(settings)
    }

    /// Parse settings from a YAML string. Missing keys take their defaults.
    pub fn parse(yaml: &str) -> Result<Self> {
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Overlay values from an environment lookup.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("LOG_LEVEL") {
            self.app.log_level = v;
        }
        if let Some(v) = lookup("DEBUG") {
            self.app.debug = parse_bool("DEBUG", &v)?;
        }
        if let Some(v) = lookup("AI_API_KEY").filter(|v| !v.trim().is_empty()) {
            self.ai.api_key = Some(v);
        }
        if let Some(v) = lookup("AI_MODEL") {
            self.ai.model = v;
        }
        if let Some(v) = lookup("BROWSER_HEADLESS") {
            self.browser.headless = parse_bool("BROWSER_HEADLESS", &v)?;
        }
        if let Some(v) = lookup("BROWSER_TIMEOUT") {
            self.browser.timeout_ms = parse_number("BROWSER_TIMEOUT", &v)?;
        }
        if let Some(v) = lookup("BROWSER_USE_SCREENSHOTS") {
            self.browser.use_screenshots = parse_bool("BROWSER_USE_SCREENSHOTS", &v)?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.ai.model.trim().is_empty() {
            return Err(ConfigError::Invalid("ai.model is required".into()));
        }
        if self.agent.max_iterations == 0 {
            return Err(ConfigError::Invalid(
                "agent.max_iterations must be at least 1".into(),
            ));
        }
        if self.agent.max_consecutive_errors == 0 {
            return Err(ConfigError::Invalid(
                "agent.max_consecutive_errors must be at least 1".into(),
            ));
        }
        if self.browser.timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "browser.timeout_ms must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// The API key, required before any task can run.
    pub fn api_key(&self) -> Result<&str> {
        self.ai
            .api_key
            .as_deref()
            .ok_or_else(|| ConfigError::Invalid("AI_API_KEY is not set".into()))
    }

    pub fn launch_config(&self) -> LaunchConfig {
        LaunchConfig {
            headless: self.browser.headless,
            viewport_width: self.browser.viewport.width,
            viewport_height: self.browser.viewport.height,
            user_agent: self.browser.user_agent.clone(),
            proxy: self.browser.proxy.clone(),
            ..LaunchConfig::default()
        }
    }

    pub fn agent_config(&self) -> AgentConfig {
        AgentConfig {
            max_iterations: self.agent.max_iterations,
            max_consecutive_errors: self.agent.max_consecutive_errors,
            timings: Timings {
                navigation_timeout_ms: self.browser.timeout_ms,
                ..Timings::default()
            },
            dispatch: DispatchConfig {
                use_screenshots: self.browser.use_screenshots,
                ..DispatchConfig::default()
            },
            ..AgentConfig::default()
        }
    }

    /// Log filter directive when neither `RUST_LOG` nor a CLI flag decides.
    pub fn log_directive(&self) -> &str {
        if self.app.debug {
            "debug"
        } else {
            &self.app.log_level
        }
    }
}
