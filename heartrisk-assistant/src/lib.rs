pub mod config;
pub mod proxy;
pub mod types;

pub use crate::{
    config::AssistantConfig,
    proxy::{AssistantConfigError, AssistantError, AssistantProxy, FALLBACK_REPLY, SYSTEM_INSTRUCTION},
    types::{ChatExchange, ChatOutcome},
};
