use std::{any::Any, sync::Arc};

use axum::{
    http::{
        header::{AUTHORIZATION, CONTENT_TYPE},
        HeaderValue, Method,
    },
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use heartrisk_assistant::AssistantProxy;
use heartrisk_inference::{InferenceInvoker, LoadedModel};
use serde_json::json;
use tokio::{net::TcpListener, signal, sync::watch::Sender};
use tower::ServiceBuilder;
use tower_http::{
    catch_panic::CatchPanicLayer,
    cors::{AllowOrigin, Any as AnyOrigin, CorsLayer},
    trace::TraceLayer,
};
use tracing::{error, info, instrument};
use utoipa::OpenApi;

use crate::{
    components::openapi::openapi_routes,
    config::{HeartRiskServiceConfig, ASSISTANT_API_KEY_ENV},
    error::{HeartRiskServiceError, StartupError},
    handlers::{
        chat::{chat_handler, CHAT_PATH},
        metrics::encode_metrics,
        predict::{predict_handler, PREDICT_PATH},
    },
};

pub const ROOT_PATH: &str = "/";
pub const HEALTH_PATH: &str = "/health";
pub const METRICS_PATH: &str = "/metrics";

/// Represents the shared state of the application.
///
/// Everything in here is built once at startup and only read afterwards, so
/// request handlers can run concurrently without any locking.
#[derive(Clone)]
pub struct AppState {
    /// Runs the model loaded at startup on validated patient records.
    pub invoker: InferenceInvoker,

    /// Client of the external assistant answering `/chat` messages.
    pub assistant: Arc<AssistantProxy>,
}

/// Loads the model artifact and builds the assistant client.
///
/// # Errors
///
/// * [`StartupError::ModelArtifact`] if the artifact is missing, unreadable or incompatible
/// * [`StartupError::MissingCredential`] if no assistant API key was provided
/// * [`StartupError::Assistant`] if the assistant endpoint is not a valid http(s) url
#[instrument(level = "info", skip_all, fields(model_artifact_path = %config.model_artifact_path.display()))]
pub fn build_app_state(
    config: &HeartRiskServiceConfig,
    api_key: Option<String>,
) -> Result<AppState, StartupError> {
    let model = LoadedModel::from_artifact_path(&config.model_artifact_path)?;
    let api_key = api_key
        .filter(|key| !key.trim().is_empty())
        .ok_or(StartupError::MissingCredential(ASSISTANT_API_KEY_ENV))?;
    let assistant = AssistantProxy::new(config.assistant.clone(), api_key)?;

    info!(
        target = "heartrisk-service",
        event = "app_state_ready",
        capability = %model.capability(),
        assistant_endpoint = %assistant.endpoint(),
    );

    Ok(AppState {
        invoker: InferenceInvoker::new(model),
        assistant: Arc::new(assistant),
    })
}

/// Builds the CORS policy for the configured origins.
///
/// `*` allows any origin, in which case credentials are not allowed. Otherwise only
/// the listed origins are allowed, with credentials.
///
/// # Errors
///
/// Returns [`StartupError::InvalidOrigin`] if an origin is not a valid header value.
pub fn cors_layer(allowed_origins: &[String]) -> Result<CorsLayer, StartupError> {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([CONTENT_TYPE, AUTHORIZATION]);

    if allowed_origins.iter().any(|origin| origin == "*") {
        return Ok(layer.allow_origin(AnyOrigin));
    }

    let origins = allowed_origins
        .iter()
        .map(|origin| {
            HeaderValue::from_str(origin).map_err(|_| StartupError::InvalidOrigin(origin.clone()))
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(layer
        .allow_origin(AllowOrigin::list(origins))
        .allow_credentials(true))
}

/// Creates a router with the service's routes, the OpenAPI documentation and the
/// given CORS policy.
pub fn create_router(app_state: AppState, cors: CorsLayer) -> Router {
    Router::new()
        .route(PREDICT_PATH, post(predict_handler))
        .route(CHAT_PATH, post(chat_handler))
        .with_state(app_state)
        .route(ROOT_PATH, get(root))
        .route(HEALTH_PATH, get(health))
        .route(METRICS_PATH, get(metrics_handler))
        .merge(openapi_routes())
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors)
                .layer(CatchPanicLayer::custom(handle_panic))
                .into_inner(),
        )
}

/// Starts and runs the HTTP server with graceful shutdown handling.
///
/// The server stops accepting connections on Ctrl+C, lets in-flight requests finish,
/// then notifies `shutdown_sender`.
///
/// # Errors
///
/// Returns an error if the server fails while serving or if the shutdown
/// notification cannot be delivered.
pub async fn run_server(
    app_state: AppState,
    cors: CorsLayer,
    tcp_listener: TcpListener,
    shutdown_sender: Sender<bool>,
) -> anyhow::Result<()> {
    let app = create_router(app_state, cors);
    let shutdown_signal = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(
                target = "heartrisk-service",
                event = "shutdown_signal_error",
                error = %e,
                "Failed to listen for Ctrl+C, shutting down"
            );
        }
        info!("Shutting down server...");
    };
    let server =
        axum::serve(tcp_listener, app.into_make_service()).with_graceful_shutdown(shutdown_signal);
    server.await?;

    shutdown_sender.send(true)?;

    Ok(())
}

fn handle_panic(panic: Box<dyn Any + Send + 'static>) -> Response {
    let message = panic
        .downcast_ref::<String>()
        .cloned()
        .or_else(|| panic.downcast_ref::<&str>().map(ToString::to_string))
        .unwrap_or_else(|| "unknown panic".to_string());
    HeartRiskServiceError::InternalError {
        message: format!("request handler panicked: {message}"),
        endpoint: "unknown".to_string(),
    }
    .into_response()
}

#[derive(OpenApi)]
#[openapi(paths(root))]
pub(crate) struct RootOpenApi;

/// Welcome endpoint.
#[utoipa::path(
    get,
    path = "/",
    tag = "health",
    responses(
        (status = OK, description = "Service is up", body = Value)
    )
)]
pub async fn root() -> impl IntoResponse {
    Json(json!({ "result": "welcome" }))
}

#[derive(OpenApi)]
#[openapi(paths(health))]
pub(crate) struct HealthOpenApi;

/// Handles the health check endpoint.
///
/// Typically used by load balancers or monitoring systems. The model and the
/// assistant client are both ready once the server accepts connections.
#[utoipa::path(
    get,
    path = "/health",
    tag = "health",
    responses(
        (status = OK, description = "Service is healthy", body = Value)
    )
)]
pub async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

#[derive(OpenApi)]
#[openapi(paths(metrics_handler))]
pub(crate) struct MetricsOpenApi;

/// Exposes the service metrics in the Prometheus text format.
#[utoipa::path(
    get,
    path = "/metrics",
    tag = "metrics",
    responses(
        (status = OK, description = "Prometheus metrics", body = String, content_type = "text/plain"),
        (status = INTERNAL_SERVER_ERROR, description = "Failed to encode metrics")
    )
)]
pub async fn metrics_handler() -> Result<impl IntoResponse, HeartRiskServiceError> {
    let body = encode_metrics().map_err(|e| HeartRiskServiceError::InternalError {
        message: format!("failed to encode metrics: {e}"),
        endpoint: METRICS_PATH.to_string(),
    })?;
    Ok(([(CONTENT_TYPE, "text/plain; version=0.0.4")], body))
}
