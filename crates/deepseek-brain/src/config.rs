//! Configuration for DeepSeekBrain.

use std::env;

use crate::error::BrainError;

/// Configuration for DeepSeekBrain.
#[derive(Debug, Clone)]
pub struct DeepSeekConfig {
    /// API base URL.
    pub api_url: String,

    /// API key for authentication.
    pub api_key: String,

    /// Model name to use.
    pub model: String,

    /// Temperature for generation (0.0 - 2.0).
    pub temperature: Option<f32>,

    /// Maximum number of conversation turns loaded as context.
    pub max_history_turns: i64,
}

impl Default for DeepSeekConfig {
    fn default() -> Self {
        Self {
            api_url: "https://api.deepseek.com".to_string(),
            api_key: String::new(),
            model: "deepseek-chat".to_string(),
            temperature: Some(0.8),
            max_history_turns: 10,
        }
    }
}

impl DeepSeekConfig {
    /// Create configuration from environment variables.
    ///
    /// Required environment variables:
    /// - `DEEPSEEK_API_KEY` - API key for authentication
    ///
    /// Optional environment variables:
    /// - `DEEPSEEK_BASE_URL` - API base URL (default: https://api.deepseek.com)
    /// - `DEEPSEEK_MODEL` - Model name (default: deepseek-chat)
    /// - `DEEPSEEK_TEMPERATURE` - Temperature (default: 0.8)
    /// - `DEEPSEEK_MAX_HISTORY_TURNS` - Context turns loaded per request (default: 10)
    pub fn from_env() -> Result<Self, BrainError> {
        let api_key = env::var("DEEPSEEK_API_KEY")
            .map_err(|_| BrainError::Configuration("DEEPSEEK_API_KEY not set".to_string()))?;

        let api_url = env::var("DEEPSEEK_BASE_URL")
            .unwrap_or_else(|_| "https://api.deepseek.com".to_string());

        let model = env::var("DEEPSEEK_MODEL").unwrap_or_else(|_| "deepseek-chat".to_string());

        let temperature = env::var("DEEPSEEK_TEMPERATURE")
            .ok()
            .and_then(|v| v.parse().ok())
            .or(Some(0.8));

        let max_history_turns = env::var("DEEPSEEK_MAX_HISTORY_TURNS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(10);

        Ok(Self {
            api_url,
            api_key,
            model,
            temperature,
            max_history_turns,
        })
    }
}
