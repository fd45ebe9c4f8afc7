//! Environment configuration, read once at startup.

use std::env;
use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;

use reqwest::Url;
use thiserror::Error;
use tracing::{info, warn};

use crate::identity::CallbackTiming;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid {key} value '{value}': {reason}")]
    Invalid { key: &'static str, value: String, reason: String },
    #[error("{0} must be set for the rest backend")]
    Missing(&'static str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Rest,
    Memory,
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "rest" => Ok(BackendKind::Rest),
            "memory" => Ok(BackendKind::Memory),
            other => Err(format!("expected 'rest' or 'memory', got '{other}'")),
        }
    }
}

/// Hosted BaaS project.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupabaseConfig {
    pub url: Url,
    pub publishable_key: String,
    pub service_role_key: Option<String>,
}

/// Chat completion API used by the assistant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssistantConfig {
    pub api_key: Option<String>,
    pub model: String,
    pub base_url: Url,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub http_port: u16,
    pub site_origin: String,
    pub backend: BackendKind,
    pub supabase: Option<SupabaseConfig>,
    pub assistant: AssistantConfig,
    pub callback_retry: Duration,
    pub notice_delay: Duration,
}

impl Config {
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_lookup(|k| env::var(k).ok())
    }

    /// Build from any key lookup; `load` uses the process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |k: &str| lookup(k).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let http_port: u16 = parse_or(&get, "DETECTIFY_HTTP_PORT", "7878")?;
        let site_origin = get("DETECTIFY_SITE_ORIGIN").unwrap_or_else(|| format!("http://localhost:{http_port}"));
        parse_url("DETECTIFY_SITE_ORIGIN", &site_origin)?;
        let backend: BackendKind = parse_or(&get, "DETECTIFY_BACKEND", "rest")?;

        let supabase = match backend {
            BackendKind::Memory => None,
            BackendKind::Rest => {
                let url = get("SUPABASE_URL").ok_or(ConfigError::Missing("SUPABASE_URL"))?;
                let publishable_key = get("SUPABASE_PUBLISHABLE_KEY").ok_or(ConfigError::Missing("SUPABASE_PUBLISHABLE_KEY"))?;
                let service_role_key = get("SUPABASE_SERVICE_ROLE_KEY");
                if service_role_key.is_none() {
                    info!(target: "startup", "SUPABASE_SERVICE_ROLE_KEY not set, account deletion disabled");
                }
                Some(SupabaseConfig { url: parse_url("SUPABASE_URL", &url)?, publishable_key, service_role_key })
            }
        };

        let api_key = get("OPENAI_API_KEY");
        if api_key.is_none() {
            warn!(target: "startup", "OPENAI_API_KEY not set, assistant requests will fail");
        }
        let base_url = get("OPENAI_BASE_URL").unwrap_or_else(|| "https://api.openai.com".into());
        let assistant = AssistantConfig {
            api_key,
            model: get("OPENAI_MODEL").unwrap_or_else(|| "gpt-5-mini".into()),
            base_url: parse_url("OPENAI_BASE_URL", &base_url)?,
        };

        let retry_ms: u64 = parse_or(&get, "DETECTIFY_CALLBACK_RETRY_MS", "400")?;
        let notice_ms: u64 = parse_or(&get, "DETECTIFY_NOTICE_DELAY_MS", "2500")?;

        Ok(Config {
            http_port,
            site_origin: site_origin.trim_end_matches('/').to_string(),
            backend,
            supabase,
            assistant,
            callback_retry: Duration::from_millis(retry_ms),
            notice_delay: Duration::from_millis(notice_ms),
        })
    }

    pub fn callback_timing(&self) -> CallbackTiming {
        CallbackTiming { retry_delay: self.callback_retry, notice_delay: self.notice_delay }
    }
}

fn parse_or<T, G>(get: &G, key: &'static str, default: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: Display,
    G: Fn(&str) -> Option<String>,
{
    let raw = get(key).unwrap_or_else(|| {
        info!(target: "startup", "{key} not set, using default: {default}");
        default.to_string()
    });
    raw.parse().map_err(|e: T::Err| {
        warn!(target: "startup", "Invalid {key} value: {e}");
        ConfigError::Invalid { key, value: raw.clone(), reason: e.to_string() }
    })
}

fn parse_url(key: &'static str, raw: &str) -> Result<Url, ConfigError> {
    match Url::parse(raw) {
        Ok(u) if matches!(u.scheme(), "http" | "https") => Ok(u),
        Ok(u) => Err(ConfigError::Invalid { key, value: raw.into(), reason: format!("unsupported scheme '{}'", u.scheme()) }),
        Err(e) => Err(ConfigError::Invalid { key, value: raw.into(), reason: e.to_string() }),
    }
}
