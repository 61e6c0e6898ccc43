#![allow(clippy::module_name_repetitions)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::missing_errors_doc)]

pub(crate) mod components;
pub mod config;
pub mod error;
pub mod handlers;
pub mod server;
#[cfg(test)]
mod tests;

pub use crate::{
    config::{HeartRiskServiceConfig, ASSISTANT_API_KEY_ENV},
    error::{HeartRiskServiceError, StartupError},
    server::{build_app_state, cors_layer, create_router, run_server, AppState},
};
