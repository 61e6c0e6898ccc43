#![allow(clippy::module_name_repetitions)]
#![allow(clippy::doc_markdown)]

pub mod features;
pub mod invoker;
pub mod model;

pub use crate::{
    features::{
        Feature, FeatureBounds, FeatureValidator, FeatureVector, PatientRecord, ValidationError,
        FEATURE_ORDER, NUM_FEATURES,
    },
    invoker::{
        Diagnosis, InferenceError, InferenceInvoker, InvocationError, ModelContractError,
        PredictionResult, HEART_DISEASE_MESSAGE, NO_HEART_DISEASE_MESSAGE,
    },
    model::{
        Classifier, EstimatorError, LoadedModel, ModelArtifact, ModelCapability, ModelLoadError,
        ProbabilisticClassifier,
    },
};
