use std::{fmt, time::Duration};

use reqwest::{Client, StatusCode};
use thiserror::Error;
use tracing::{info, instrument, warn};
use url::Url;

use crate::{
    config::AssistantConfig,
    types::{
        ChatCompletionRequest, ChatCompletionResponse, ChatExchange, ChatMessage, ChatOutcome,
        Role,
    },
};

/// System instruction sent ahead of every user message.
pub const SYSTEM_INSTRUCTION: &str = "You are a helpful assistant specialized in heart disease.";

/// Reply returned whenever the upstream assistant cannot be used.
pub const FALLBACK_REPLY: &str = "Sorry, I could not process your request at this time.";

/// Reasons the upstream assistant could not produce a reply.
///
/// These never reach the caller of [`AssistantProxy::converse`]; they are logged
/// and replaced by [`FALLBACK_REPLY`].
#[derive(Debug, Error)]
pub enum AssistantError {
    #[error("request to assistant endpoint failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("assistant endpoint returned status {0}")]
    Status(StatusCode),
    #[error("assistant endpoint did not answer within {0:?}")]
    Timeout(Duration),
    #[error("malformed assistant response: {0}")]
    MalformedResponse(String),
}

/// Invalid assistant configuration, detected at startup.
#[derive(Debug, Error)]
pub enum AssistantConfigError {
    #[error("invalid assistant endpoint url `{url}`: {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },
    #[error("assistant endpoint url must use http or https, got `{0}`")]
    UnsupportedScheme(String),
    #[error("failed to build assistant http client: {0}")]
    Client(#[source] reqwest::Error),
}

/// Forwards user messages to an external text-generation endpoint, degrading to a
/// fixed reply on any failure.
///
/// Cloning is cheap; clones share the underlying connection pool.
#[derive(Clone)]
pub struct AssistantProxy {
    client: Client,
    endpoint: Url,
    api_key: String,
    config: AssistantConfig,
}

impl fmt::Debug for AssistantProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AssistantProxy")
            .field("endpoint", &self.endpoint.as_str())
            .field("api_key", &"<redacted>")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl AssistantProxy {
    /// Builds a proxy for the endpoint described by `config`.
    ///
    /// # Errors
    ///
    /// Returns an [`AssistantConfigError`] if the endpoint url is not an absolute
    /// http(s) url or the http client cannot be built.
    pub fn new(config: AssistantConfig, api_key: String) -> Result<Self, AssistantConfigError> {
        let endpoint =
            Url::parse(&config.endpoint_url).map_err(|source| AssistantConfigError::InvalidUrl {
                url: config.endpoint_url.clone(),
                source,
            })?;
        if !matches!(endpoint.scheme(), "http" | "https") {
            return Err(AssistantConfigError::UnsupportedScheme(
                endpoint.scheme().to_string(),
            ));
        }
        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(AssistantConfigError::Client)?;
        Ok(Self {
            client,
            endpoint,
            api_key,
            config,
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Sends `message` to the upstream assistant and returns its reply.
    ///
    /// Never fails: network errors, non-2xx statuses, malformed bodies and timeouts
    /// all yield [`FALLBACK_REPLY`] with [`ChatOutcome::Fallback`]. The upstream call is
    /// awaited inline, so dropping the returned future aborts it.
    #[instrument(
        level = "info",
        skip_all,
        fields(endpoint = %self.endpoint, message_len = message.len())
    )]
    pub async fn converse(&self, message: &str) -> ChatExchange {
        let timeout = self.config.request_timeout();
        let result = match tokio::time::timeout(timeout, self.request_reply(message)).await {
            Ok(result) => result,
            Err(_) => Err(AssistantError::Timeout(timeout)),
        };

        match result {
            Ok(reply) => {
                info!(
                    target = "heartrisk-assistant",
                    event = "assistant_answered",
                    reply_len = reply.len(),
                );
                ChatExchange {
                    user_message: message.to_string(),
                    reply,
                    outcome: ChatOutcome::Answered,
                }
            }
            Err(e) => {
                warn!(
                    target = "heartrisk-assistant",
                    event = "assistant_fallback",
                    error = %e,
                    "Assistant unavailable, returning fallback reply"
                );
                ChatExchange {
                    user_message: message.to_string(),
                    reply: FALLBACK_REPLY.to_string(),
                    outcome: ChatOutcome::Fallback,
                }
            }
        }
    }

    async fn request_reply(&self, message: &str) -> Result<String, AssistantError> {
        let request = ChatCompletionRequest {
            model: &self.config.model,
            messages: vec![
                ChatMessage {
                    role: Role::System,
                    content: SYSTEM_INSTRUCTION.to_string(),
                },
                ChatMessage {
                    role: Role::User,
                    content: message.to_string(),
                },
            ],
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
        };

        let response = self
            .client
            .post(self.endpoint.clone())
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(AssistantError::Status(status));
        }

        let body = response.bytes().await?;
        let completion: ChatCompletionResponse = serde_json::from_slice(&body)
            .map_err(|e| AssistantError::MalformedResponse(e.to_string()))?;

        completion
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|content| !content.trim().is_empty())
            .ok_or_else(|| AssistantError::MalformedResponse("no reply content".to_string()))
    }
}
