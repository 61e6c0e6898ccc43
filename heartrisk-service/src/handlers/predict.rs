use std::time::Instant;

use axum::{
    extract::{rejection::JsonRejection, State},
    Json,
};
use heartrisk_inference::{FeatureValidator, PatientRecord, PredictionResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, instrument};
use utoipa::{OpenApi, ToSchema};

use crate::{
    error::{ErrorResponse, HeartRiskServiceError},
    handlers::metrics::{PREDICT_LATENCY, PREDICT_NUM_REQUESTS},
    server::AppState,
};

pub const PREDICT_PATH: &str = "/predict";

#[derive(OpenApi)]
#[openapi(
    paths(predict_handler),
    components(schemas(PatientRecord, PredictResponse, ErrorResponse))
)]
pub(crate) struct PredictOpenApi;

/// Response body of a successful prediction.
#[derive(Debug, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct PredictResponse {
    /// Predicted label: 1 if heart disease is detected, 0 otherwise
    pub prediction: u8,
    /// `[P(no disease), P(disease)]`, or null when the model does not estimate probabilities
    pub proba: Option<Vec<f64>>,
    /// Human readable outcome
    pub message: String,
}

impl From<PredictionResult> for PredictResponse {
    fn from(result: PredictionResult) -> Self {
        Self {
            prediction: result.label(),
            proba: result.probabilities.map(|p| p.to_vec()),
            message: result.message().to_string(),
        }
    }
}

/// Validates a patient record and scores it with the loaded model.
///
/// # Errors
///
/// * `400` with `INVALID_BODY` if the body does not describe a patient record
///   (missing field, non-integral value for an integer field, ...)
/// * `400` with `VALIDATION_ERROR` naming the first out-of-range field and its bounds
/// * `500` with a generic message if the model fails or breaks its label contract
#[utoipa::path(
    post,
    path = "/predict",
    tag = "predict",
    request_body = PatientRecord,
    responses(
        (status = OK, description = "Prediction successful", body = PredictResponse),
        (status = BAD_REQUEST, description = "Invalid or out-of-range patient record", body = ErrorResponse),
        (status = INTERNAL_SERVER_ERROR, description = "Prediction failed", body = ErrorResponse)
    )
)]
#[instrument(level = "info", skip_all, fields(path = PREDICT_PATH))]
pub async fn predict_handler(
    State(state): State<AppState>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Result<Json<PredictResponse>, HeartRiskServiceError> {
    let timer = Instant::now();
    let result = predict(&state, payload);
    PREDICT_LATENCY.observe(timer.elapsed().as_secs_f64());

    let outcome = match &result {
        Ok(_) => "success",
        Err(HeartRiskServiceError::InvalidBody { .. }) => "invalid_body",
        Err(HeartRiskServiceError::Validation { .. }) => "validation_error",
        Err(HeartRiskServiceError::ModelContract { .. }) => "model_contract_error",
        Err(HeartRiskServiceError::Inference { .. } | HeartRiskServiceError::InternalError { .. }) => {
            "inference_error"
        }
    };
    PREDICT_NUM_REQUESTS.with_label_values(&[outcome]).inc();

    result.map(Json)
}

fn predict(
    state: &AppState,
    payload: Result<Json<Value>, JsonRejection>,
) -> Result<PredictResponse, HeartRiskServiceError> {
    let Json(payload) = payload.map_err(|e| HeartRiskServiceError::InvalidBody {
        message: e.body_text(),
        endpoint: PREDICT_PATH.to_string(),
    })?;
    let record: PatientRecord =
        serde_json::from_value(payload).map_err(|e| HeartRiskServiceError::InvalidBody {
            message: e.to_string(),
            endpoint: PREDICT_PATH.to_string(),
        })?;

    let vector =
        FeatureValidator::validate(&record).map_err(|error| HeartRiskServiceError::Validation {
            error,
            endpoint: PREDICT_PATH.to_string(),
        })?;

    let result = state
        .invoker
        .infer(&vector)
        .map_err(|e| HeartRiskServiceError::from_invocation(e, PREDICT_PATH))?;

    info!(
        target = "heartrisk-service",
        event = "prediction_completed",
        prediction = result.label(),
    );
    Ok(result.into())
}
