// src/config/mod.rs

use std::str::FromStr;

use tracing::warn;

/// Runtime configuration. Loaded once at startup and injected into the
/// server state; nothing reads the environment after that.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    // ── Server
    pub host: String,
    pub port: u16,

    // ── Model gateway
    pub gateway_base_url: String,
    /// Process-wide default credential, used when a request carries none.
    pub gateway_api_key: Option<String>,
    pub model: String,

    // ── Image backend
    pub openai_base_url: String,
    pub openai_api_key: Option<String>,
    pub image_model: String,

    // ── Stream behavior
    pub stream_timeout_secs: u64,
    pub max_steps: usize,
}

fn env_var_or<T>(key: &str, default: T) -> T
where
    T: FromStr,
{
    match std::env::var(key) {
        Ok(val) => match val.trim().parse::<T>() {
            Ok(parsed) => parsed,
            Err(_) => {
                warn!("config: {} = '{}' failed to parse, using default", key, val);
                default
            }
        },
        Err(_) => default,
    }
}

/// Optional string variable; empty counts as unset.
fn env_var(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl RelayConfig {
    pub fn from_env() -> Self {
        Self {
            host: env_var_or("ATELIER_HOST", "127.0.0.1".to_string()),
            port: env_var_or("ATELIER_PORT", 3000),
            gateway_base_url: env_var_or(
                "ATELIER_GATEWAY_BASE_URL",
                "https://ai-gateway.vercel.sh/v1".to_string(),
            ),
            gateway_api_key: env_var("AI_GATEWAY_API_KEY"),
            model: env_var_or("ATELIER_MODEL", "openai/gpt-4o".to_string()),
            openai_base_url: env_var_or(
                "ATELIER_OPENAI_BASE_URL",
                "https://api.openai.com/v1".to_string(),
            ),
            openai_api_key: env_var("OPENAI_API_KEY"),
            image_model: env_var_or("ATELIER_IMAGE_MODEL", "dall-e-3".to_string()),
            stream_timeout_secs: env_var_or("ATELIER_STREAM_TIMEOUT_SECS", 30),
            max_steps: env_var_or("ATELIER_MAX_STEPS", 1),
        }
    }
}
