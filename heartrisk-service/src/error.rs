use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use heartrisk_assistant::AssistantConfigError;
use heartrisk_inference::{
    InferenceError, InvocationError, ModelContractError, ModelLoadError, ValidationError,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

/// Response structure for API errors
///
/// Wraps [`ErrorDetails`] in an `error` field, giving every error response the
/// JSON shape `{"error": {"code": ..., "message": ...}}`.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    pub error: ErrorDetails,
}

/// Details of an API error response
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorDetails {
    /// A machine-readable error code string (e.g., "VALIDATION_ERROR", "INFERENCE_ERROR")
    pub code: String,
    /// A human-readable error message describing what went wrong
    pub message: String,
}

/// Represents all possible request-level errors of the heart risk service
#[derive(Debug, Error)]
pub enum HeartRiskServiceError {
    /// The request body is not valid JSON or does not match the expected schema
    #[error("Invalid request body: {message}")]
    InvalidBody {
        /// Description of why the request body is invalid
        message: String,
        /// The endpoint that the error occurred on
        endpoint: String,
    },

    /// A patient record field is outside its declared bounds
    #[error("Validation error: {error}")]
    Validation {
        /// The first violated field constraint
        error: ValidationError,
        /// The endpoint that the error occurred on
        endpoint: String,
    },

    /// The loaded model returned a label outside of the {0, 1} contract
    #[error("Model contract violated: {error}")]
    ModelContract {
        error: ModelContractError,
        /// The endpoint that the error occurred on
        endpoint: String,
    },

    /// Any other failure while invoking the model
    #[error("Inference error: {error}")]
    Inference {
        error: InferenceError,
        /// The endpoint that the error occurred on
        endpoint: String,
    },

    /// Error returned for unexpected internal server errors
    #[error("Internal server error: {message}")]
    InternalError {
        /// Description of the internal error
        message: String,
        /// The endpoint that the error occurred on
        endpoint: String,
    },
}

impl HeartRiskServiceError {
    /// Maps a model invocation failure to its request-level error.
    pub fn from_invocation(error: InvocationError, endpoint: &str) -> Self {
        match error {
            InvocationError::ModelContract(error) => Self::ModelContract {
                error,
                endpoint: endpoint.to_string(),
            },
            InvocationError::Inference(error) => Self::Inference {
                error,
                endpoint: endpoint.to_string(),
            },
        }
    }

    /// Returns the machine-readable error code for this error type
    fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidBody { .. } => "INVALID_BODY",
            Self::Validation { .. } => "VALIDATION_ERROR",
            Self::ModelContract { .. } => "MODEL_CONTRACT_ERROR",
            Self::Inference { .. } => "INFERENCE_ERROR",
            Self::InternalError { .. } => "INTERNAL_ERROR",
        }
    }

    /// Returns the message exposed to API clients
    ///
    /// Caller mistakes are described precisely so they can be corrected; model and
    /// internal failures only get a generic message, the cause stays in the logs.
    fn client_message(&self) -> String {
        match self {
            Self::InvalidBody { message, .. } => format!("Invalid request body: {message}"),
            Self::Validation { error, .. } => error.message(),
            Self::ModelContract { .. } | Self::Inference { .. } => "Prediction failed".to_string(),
            Self::InternalError { .. } => "Internal server error occurred".to_string(),
        }
    }

    /// Returns the HTTP status code associated with this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidBody { .. } | Self::Validation { .. } => StatusCode::BAD_REQUEST,
            Self::ModelContract { .. } | Self::Inference { .. } | Self::InternalError { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Returns the endpoint where the error occurred
    fn endpoint(&self) -> &str {
        match self {
            Self::InvalidBody { endpoint, .. }
            | Self::Validation { endpoint, .. }
            | Self::ModelContract { endpoint, .. }
            | Self::Inference { endpoint, .. }
            | Self::InternalError { endpoint, .. } => endpoint,
        }
    }
}

impl IntoResponse for HeartRiskServiceError {
    fn into_response(self) -> Response {
        match &self {
            Self::ModelContract { .. } => tracing::error!(
                target = "heartrisk-service",
                event = "model_contract_violation",
                endpoint = self.endpoint(),
                error = %self,
                "Loaded model is incompatible with the prediction contract"
            ),
            Self::Inference { .. } | Self::InternalError { .. } => tracing::error!(
                target = "heartrisk-service",
                event = "error_occurred",
                endpoint = self.endpoint(),
                error = %self,
            ),
            Self::InvalidBody { .. } | Self::Validation { .. } => tracing::info!(
                target = "heartrisk-service",
                event = "request_rejected",
                endpoint = self.endpoint(),
                error = %self,
            ),
        }
        let error_response = ErrorResponse {
            error: ErrorDetails {
                code: self.error_code().to_string(),
                message: self.client_message(),
            },
        };
        (self.status_code(), Json(error_response)).into_response()
    }
}

/// Errors that prevent the service from starting. None of them is recoverable.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("failed to load configuration: {0}")]
    Config(#[from] config::ConfigError),
    #[error("failed to load model artifact: {0}")]
    ModelArtifact(#[from] ModelLoadError),
    #[error("missing required credential `{0}`")]
    MissingCredential(&'static str),
    #[error("invalid assistant configuration: {0}")]
    Assistant(#[from] AssistantConfigError),
    #[error("invalid allowed origin `{0}`")]
    InvalidOrigin(String),
}
