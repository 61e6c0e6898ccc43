use std::{
    fmt,
    path::{Path, PathBuf},
    sync::Arc,
};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, instrument, warn};

use crate::features::{FEATURE_ORDER, NUM_FEATURES};

/// Errors raised by a fitted estimator while scoring samples.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum EstimatorError {
    #[error("expected samples with {expected} features, got {found}")]
    ShapeMismatch { expected: usize, found: usize },
    #[error("estimator produced {found} outputs for {expected} samples")]
    OutputLength { expected: usize, found: usize },
    #[error("estimator produced a non-finite value")]
    NonFinite,
    #[error("{0}")]
    Other(String),
}

/// A fitted binary classifier that can only predict labels.
///
/// Implementations receive a batch of rows and must not refit or rescale
/// anything outside of what was fitted offline.
pub trait Classifier: Send + Sync {
    /// Number of columns each row must have.
    fn num_features(&self) -> usize;

    /// Predicts one label per row.
    fn predict(&self, rows: &[Vec<f64>]) -> Result<Vec<i64>, EstimatorError>;
}

/// A fitted binary classifier that also estimates class probabilities.
pub trait ProbabilisticClassifier: Classifier {
    /// Predicts `[P(class 0), P(class 1)]` per row.
    fn predict_proba(&self, rows: &[Vec<f64>]) -> Result<Vec<[f64; 2]>, EstimatorError>;
}

/// Which optional operations a loaded model supports.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ModelCapability {
    LabelOnly,
    LabelWithProbability,
}

impl fmt::Display for ModelCapability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LabelOnly => write!(f, "label_only"),
            Self::LabelWithProbability => write!(f, "label_with_probability"),
        }
    }
}

/// A fitted model, loaded once at startup and shared read-only afterwards.
///
/// The capability variant is decided when the model is loaded and never
/// re-checked per request.
#[derive(Clone)]
pub enum LoadedModel {
    LabelOnly(Arc<dyn Classifier>),
    LabelWithProbability(Arc<dyn ProbabilisticClassifier>),
}

impl fmt::Debug for LoadedModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadedModel")
            .field("capability", &self.capability())
            .field("num_features", &self.num_features())
            .finish()
    }
}

impl LoadedModel {
    pub fn capability(&self) -> ModelCapability {
        match self {
            Self::LabelOnly(_) => ModelCapability::LabelOnly,
            Self::LabelWithProbability(_) => ModelCapability::LabelWithProbability,
        }
    }

    pub fn num_features(&self) -> usize {
        match self {
            Self::LabelOnly(model) => model.num_features(),
            Self::LabelWithProbability(model) => model.num_features(),
        }
    }

    /// Predicts labels regardless of the capability variant.
    pub fn predict(&self, rows: &[Vec<f64>]) -> Result<Vec<i64>, EstimatorError> {
        match self {
            Self::LabelOnly(model) => model.predict(rows),
            Self::LabelWithProbability(model) => model.predict(rows),
        }
    }

    /// Reads and validates a JSON model artifact from disk.
    ///
    /// # Errors
    ///
    /// Returns a [`ModelLoadError`] if the file cannot be read or parsed, or if the
    /// artifact does not describe a model fitted on [`FEATURE_ORDER`].
    #[instrument(level = "info", skip_all, fields(path = %path.as_ref().display()))]
    pub fn from_artifact_path<P: AsRef<Path>>(path: P) -> Result<Self, ModelLoadError> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).map_err(|source| ModelLoadError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let artifact: ModelArtifact = serde_json::from_slice(&bytes)?;
        let model = Self::from_artifact(artifact)?;
        info!(
            target = "heartrisk-inference",
            event = "model_loaded",
            capability = %model.capability(),
            "Loaded fitted model artifact"
        );
        Ok(model)
    }

    /// Builds a model from an already parsed artifact.
    ///
    /// # Errors
    ///
    /// See [`LoadedModel::from_artifact_path`].
    pub fn from_artifact(artifact: ModelArtifact) -> Result<Self, ModelLoadError> {
        match &artifact.feature_names {
            Some(names) => check_feature_order(names)?,
            None => warn!(
                target = "heartrisk-inference",
                event = "missing_feature_names",
                "Model artifact has no feature_names, feature order cannot be verified"
            ),
        }
        if let Some(scaler) = &artifact.scaler {
            scaler.check()?;
        }

        let ModelArtifact {
            classes,
            scaler,
            estimator,
            ..
        } = artifact;
        match estimator {
            EstimatorSpec::LogisticRegression {
                coefficients,
                intercept,
            } => {
                let linear = LinearPipeline::new(scaler, coefficients, intercept, classes)?;
                Ok(Self::LabelWithProbability(Arc::new(LogisticRegression(
                    linear,
                ))))
            }
            EstimatorSpec::LinearSvc {
                coefficients,
                intercept,
            } => {
                let linear = LinearPipeline::new(scaler, coefficients, intercept, classes)?;
                Ok(Self::LabelOnly(Arc::new(LinearSvc(linear))))
            }
        }
    }
}

/// Errors raised while loading a model artifact. All of them are fatal at startup.
#[derive(Debug, Error)]
pub enum ModelLoadError {
    #[error("failed to read model artifact `{}`: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse model artifact: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("model was fitted on features {found:?}, expected {expected:?}")]
    FeatureOrderMismatch {
        expected: Vec<String>,
        found: Vec<String>,
    },
    #[error("`{component}` has {found} entries, expected {expected}")]
    DimensionMismatch {
        component: &'static str,
        expected: usize,
        found: usize,
    },
    #[error("scaler scale at index {index} must be finite and non-zero")]
    InvalidScale { index: usize },
    #[error("`{component}` contains a non-finite value")]
    NonFiniteParameter { component: &'static str },
}

fn default_classes() -> [i64; 2] {
    [0, 1]
}

/// On-disk description of a fitted estimator, optionally preceded by a standard scaler.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ModelArtifact {
    /// Column names, in the order the model was fitted with
    #[serde(default)]
    pub feature_names: Option<Vec<String>>,
    /// Class labels; the second one is predicted when the decision value is positive
    #[serde(default = "default_classes")]
    pub classes: [i64; 2],
    /// Fitted standardization step, applied before the estimator
    #[serde(default)]
    pub scaler: Option<StandardScaler>,
    pub estimator: EstimatorSpec,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EstimatorSpec {
    LogisticRegression {
        coefficients: Vec<f64>,
        intercept: f64,
    },
    LinearSvc {
        coefficients: Vec<f64>,
        intercept: f64,
    },
}

/// A fitted `(x - mean) / scale` transform.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct StandardScaler {
    pub mean: Vec<f64>,
    pub scale: Vec<f64>,
}

impl StandardScaler {
    fn check(&self) -> Result<(), ModelLoadError> {
        check_len("scaler.mean", self.mean.len())?;
        check_len("scaler.scale", self.scale.len())?;
        if self.mean.iter().any(|m| !m.is_finite()) {
            return Err(ModelLoadError::NonFiniteParameter {
                component: "scaler.mean",
            });
        }
        if let Some(index) = self
            .scale
            .iter()
            .position(|s| !s.is_finite() || *s == 0.0)
        {
            return Err(ModelLoadError::InvalidScale { index });
        }
        Ok(())
    }

    fn transform(&self, row: &[f64]) -> Vec<f64> {
        row.iter()
            .zip(self.mean.iter().zip(&self.scale))
            .map(|(x, (mean, scale))| (x - mean) / scale)
            .collect()
    }
}

fn check_len(component: &'static str, found: usize) -> Result<(), ModelLoadError> {
    if found != NUM_FEATURES {
        return Err(ModelLoadError::DimensionMismatch {
            component,
            expected: NUM_FEATURES,
            found,
        });
    }
    Ok(())
}

fn check_feature_order(names: &[String]) -> Result<(), ModelLoadError> {
    let expected: Vec<String> = FEATURE_ORDER
        .iter()
        .map(|f| f.wire_name().to_string())
        .collect();
    if names != expected.as_slice() {
        return Err(ModelLoadError::FeatureOrderMismatch {
            expected,
            found: names.to_vec(),
        });
    }
    Ok(())
}

/// Shared scoring path of linear estimators: optional scaling, then `w·x + b`.
#[derive(Debug)]
struct LinearPipeline {
    scaler: Option<StandardScaler>,
    coefficients: Vec<f64>,
    intercept: f64,
    classes: [i64; 2],
}

impl LinearPipeline {
    fn new(
        scaler: Option<StandardScaler>,
        coefficients: Vec<f64>,
        intercept: f64,
        classes: [i64; 2],
    ) -> Result<Self, ModelLoadError> {
        check_len("estimator.coefficients", coefficients.len())?;
        if coefficients.iter().any(|c| !c.is_finite()) || !intercept.is_finite() {
            return Err(ModelLoadError::NonFiniteParameter {
                component: "estimator",
            });
        }
        Ok(Self {
            scaler,
            coefficients,
            intercept,
            classes,
        })
    }

    fn decision_function(&self, rows: &[Vec<f64>]) -> Result<Vec<f64>, EstimatorError> {
        rows.iter()
            .map(|row| {
                if row.len() != self.coefficients.len() {
                    return Err(EstimatorError::ShapeMismatch {
                        expected: self.coefficients.len(),
                        found: row.len(),
                    });
                }
                let scaled;
                let x = match &self.scaler {
                    Some(scaler) => {
                        scaled = scaler.transform(row);
                        scaled.as_slice()
                    }
                    None => row.as_slice(),
                };
                let z = x
                    .iter()
                    .zip(&self.coefficients)
                    .map(|(x, w)| x * w)
                    .sum::<f64>()
                    + self.intercept;
                if z.is_finite() {
                    Ok(z)
                } else {
                    Err(EstimatorError::NonFinite)
                }
            })
            .collect()
    }

    fn predict(&self, rows: &[Vec<f64>]) -> Result<Vec<i64>, EstimatorError> {
        Ok(self
            .decision_function(rows)?
            .into_iter()
            .map(|z| self.classes[usize::from(z > 0.0)])
            .collect())
    }
}

/// Logistic regression: exposes calibrated class probabilities.
#[derive(Debug)]
struct LogisticRegression(LinearPipeline);

impl Classifier for LogisticRegression {
    fn num_features(&self) -> usize {
        self.0.coefficients.len()
    }

    fn predict(&self, rows: &[Vec<f64>]) -> Result<Vec<i64>, EstimatorError> {
        self.0.predict(rows)
    }
}

impl ProbabilisticClassifier for LogisticRegression {
    fn predict_proba(&self, rows: &[Vec<f64>]) -> Result<Vec<[f64; 2]>, EstimatorError> {
        Ok(self
            .0
            .decision_function(rows)?
            .into_iter()
            .map(|z| {
                let p = sigmoid(z);
                [1.0 - p, p]
            })
            .collect())
    }
}

/// Linear support vector classifier: labels only.
#[derive(Debug)]
struct LinearSvc(LinearPipeline);

impl Classifier for LinearSvc {
    fn num_features(&self) -> usize {
        self.0.coefficients.len()
    }

    fn predict(&self, rows: &[Vec<f64>]) -> Result<Vec<i64>, EstimatorError> {
        self.0.predict(rows)
    }
}

fn sigmoid(z: f64) -> f64 {
    if z >= 0.0 {
        1.0 / (1.0 + (-z).exp())
    } else {
        let e = z.exp();
        e / (1.0 + e)
    }
}
