//! Configuration helpers for the agent runtime

use std::env;

/// Inference backends a runner can be created for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Provider {
    /// Messages-style streaming API
    Anthropic,
    /// Responses-style streaming API
    OpenAi,
    /// In-process model loaded through a `ModelRegistry`
    Local,
}

impl Provider {
    /// Get the default base URL for this provider
    pub fn default_url(&self) -> &'static str {
        match self {
            Provider::Anthropic => "https://api.anthropic.com",
            Provider::OpenAi => "https://api.openai.com/v1",
            Provider::Local => "",
        }
    }

    /// Environment variable holding the API key, if the provider needs one
    pub fn api_key_env(&self) -> Option<&'static str> {
        match self {
            Provider::Anthropic => Some("ANTHROPIC_API_KEY"),
            Provider::OpenAi => Some("OPENAI_API_KEY"),
            Provider::Local => None,
        }
    }

    /// Stable lowercase name, used in logs and the CLI
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Anthropic => "anthropic",
            Provider::OpenAi => "openai",
            Provider::Local => "local",
        }
    }

    /// Parse a provider from a string
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "anthropic" | "claude" => Some(Provider::Anthropic),
            "openai" | "open-ai" | "open_ai" | "responses" => Some(Provider::OpenAi),
            "local" | "in-process" | "inprocess" => Some(Provider::Local),
            _ => None,
        }
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Get the base URL from environment variable or provider default
///
/// Priority:
/// 1. AGENT_BASE_URL environment variable
/// 2. fallback parameter
/// 3. Provider default URL
///
/// # Examples
///
/// ```rust,no_run
/// use agent_runtime::{get_base_url, Provider};
///
/// let url = get_base_url(Provider::Anthropic, None);
/// let url = get_base_url(Provider::OpenAi, Some("http://localhost:4010/v1"));
/// ```
pub fn get_base_url(provider: Provider, fallback: Option<&str>) -> String {
    if let Ok(url) = env::var("AGENT_BASE_URL") {
        return url;
    }

    fallback
        .unwrap_or(provider.default_url())
        .trim_end_matches('/')
        .to_string()
}

/// Get the model name from environment variable or fallback
///
/// Priority:
/// 1. AGENT_MODEL environment variable (if prefer_env is true)
/// 2. fallback parameter
pub fn get_model(fallback: Option<&str>, prefer_env: bool) -> Option<String> {
    if prefer_env {
        if let Ok(model) = env::var("AGENT_MODEL") {
            return Some(model);
        }
    }

    fallback.map(|s| s.to_string())
}

/// Get the API key for a provider: an explicit value wins over the environment
pub fn get_api_key(provider: Provider, explicit: Option<&str>) -> Option<String> {
    if let Some(key) = explicit {
        return Some(key.to_string());
    }
    provider
        .api_key_env()
        .and_then(|name| env::var(name).ok())
        .filter(|key| !key.is_empty())
}
