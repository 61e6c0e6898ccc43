use thiserror::Error;
use tracing::{debug, instrument};

use crate::{
    features::FeatureVector,
    model::{EstimatorError, LoadedModel, ModelCapability},
};

/// Message returned for label `1`.
pub const HEART_DISEASE_MESSAGE: &str = "Heart disease detected";
/// Message returned for label `0`.
pub const NO_HEART_DISEASE_MESSAGE: &str = "No heart disease detected";

/// The only labels a compatible model may return.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Diagnosis {
    NoHeartDisease,
    HeartDisease,
}

impl Diagnosis {
    pub const fn label(self) -> u8 {
        match self {
            Self::NoHeartDisease => 0,
            Self::HeartDisease => 1,
        }
    }

    pub const fn message(self) -> &'static str {
        match self {
            Self::NoHeartDisease => NO_HEART_DISEASE_MESSAGE,
            Self::HeartDisease => HEART_DISEASE_MESSAGE,
        }
    }
}

impl TryFrom<i64> for Diagnosis {
    type Error = ModelContractError;

    fn try_from(label: i64) -> Result<Self, Self::Error> {
        match label {
            0 => Ok(Self::NoHeartDisease),
            1 => Ok(Self::HeartDisease),
            label => Err(ModelContractError { label }),
        }
    }
}

/// Outcome of a single inference.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PredictionResult {
    pub diagnosis: Diagnosis,
    /// `[P(no disease), P(disease)]`, absent when the model cannot estimate probabilities
    pub probabilities: Option<[f64; 2]>,
}

impl PredictionResult {
    pub fn label(&self) -> u8 {
        self.diagnosis.label()
    }

    pub fn message(&self) -> &'static str {
        self.diagnosis.message()
    }
}

/// The loaded model returned a label outside `{0, 1}`.
///
/// This is a deployment defect (model and feature contract disagree), not a user error.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
#[error("model returned label {label}, expected 0 or 1")]
pub struct ModelContractError {
    pub label: i64,
}

/// Any other failure while invoking the model.
#[derive(Clone, Debug, Error, PartialEq)]
#[error("model invocation failed: {cause}")]
pub struct InferenceError {
    #[source]
    pub cause: EstimatorError,
}

#[derive(Clone, Debug, Error, PartialEq)]
pub enum InvocationError {
    #[error(transparent)]
    ModelContract(#[from] ModelContractError),
    #[error(transparent)]
    Inference(#[from] InferenceError),
}

impl From<EstimatorError> for InvocationError {
    fn from(cause: EstimatorError) -> Self {
        Self::Inference(InferenceError { cause })
    }
}

/// Runs a pre-fitted model on validated feature vectors.
///
/// Holds no mutable state: clones share the same read-only model and can be
/// used from any number of concurrent requests. Inference is deterministic, so
/// failures are never retried here.
#[derive(Clone, Debug)]
pub struct InferenceInvoker {
    model: LoadedModel,
}

impl InferenceInvoker {
    pub fn new(model: LoadedModel) -> Self {
        Self { model }
    }

    pub fn capability(&self) -> ModelCapability {
        self.model.capability()
    }

    /// Predicts the diagnosis for `vector`, with class probabilities when the
    /// model supports them.
    ///
    /// The vector is submitted as a single row of ten columns, untouched: any
    /// scaling must already be part of the loaded model.
    ///
    /// # Errors
    ///
    /// * [`InvocationError::ModelContract`] if the model returns a label other than 0 or 1
    /// * [`InvocationError::Inference`] for any other model failure
    #[instrument(level = "debug", skip_all, fields(capability = %self.capability()))]
    pub fn infer(&self, vector: &FeatureVector) -> Result<PredictionResult, InvocationError> {
        let rows = [vector.to_row()];

        let label = single(self.model.predict(&rows)?)?;
        let diagnosis = Diagnosis::try_from(label)?;

        let probabilities = match &self.model {
            LoadedModel::LabelOnly(_) => None,
            LoadedModel::LabelWithProbability(model) => {
                let proba = single(model.predict_proba(&rows)?)?;
                if proba.iter().any(|p| !p.is_finite()) {
                    return Err(EstimatorError::NonFinite.into());
                }
                Some(proba)
            }
        };

        debug!(
            target = "heartrisk-inference",
            event = "inference_completed",
            label = diagnosis.label(),
            has_probabilities = probabilities.is_some(),
        );
        Ok(PredictionResult {
            diagnosis,
            probabilities,
        })
    }
}

fn single<T>(mut outputs: Vec<T>) -> Result<T, EstimatorError> {
    if outputs.len() != 1 {
        return Err(EstimatorError::OutputLength {
            expected: 1,
            found: outputs.len(),
        });
    }
    outputs.pop().ok_or(EstimatorError::OutputLength {
        expected: 1,
        found: 0,
    })
}
