use std::time::Duration;

use serde::Deserialize;

const DEFAULT_TEMPERATURE: f32 = 0.7;
const DEFAULT_MAX_TOKENS: u32 = 512;
const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 15_000;

fn default_temperature() -> f32 {
    DEFAULT_TEMPERATURE
}

fn default_max_tokens() -> u32 {
    DEFAULT_MAX_TOKENS
}

fn default_request_timeout_ms() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_MS
}

/// Configuration of the external text-generation endpoint.
///
/// Usually nested under the `assistant` key of the service configuration. The API
/// key is not part of it, it is read from the environment.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct AssistantConfig {
    /// Full URL of an OpenAI-compatible chat completions endpoint,
    /// e.g. "https://api.openai.com/v1/chat/completions"
    pub endpoint_url: String,

    /// Model name sent with every request
    pub model: String,

    /// Sampling temperature
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Upper bound on the number of generated tokens
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Bound on the whole upstream exchange, in milliseconds
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

impl AssistantConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}
