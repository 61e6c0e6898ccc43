use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{instrument, trace};
use utoipa::ToSchema;

/// The number of clinical attributes the heart disease model consumes.
pub const NUM_FEATURES: usize = 10;

/// The column order the model was fitted with.
///
/// Any change to this order silently produces wrong-but-plausible predictions,
/// so model artifacts carrying `feature_names` are checked against it at load time.
pub const FEATURE_ORDER: [Feature; NUM_FEATURES] = [
    Feature::Age,
    Feature::ChestPainType,
    Feature::RestingBloodPressure,
    Feature::Cholesterol,
    Feature::RestingEcg,
    Feature::MaxHeartRate,
    Feature::StDepression,
    Feature::Slope,
    Feature::VesselCount,
    Feature::Thalassemia,
];

/// A clinical attribute of a patient record.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Feature {
    /// Age in years
    Age,
    /// Chest pain type (0 = typical angina, 1 = atypical angina, 2 = non-anginal pain, 3 = asymptomatic)
    ChestPainType,
    /// Resting blood pressure in mm Hg
    RestingBloodPressure,
    /// Serum cholesterol in mg/dl
    Cholesterol,
    /// Resting electrocardiographic result (0, 1, 2)
    RestingEcg,
    /// Maximum heart rate achieved
    MaxHeartRate,
    /// ST depression induced by exercise relative to rest
    StDepression,
    /// Slope of the peak exercise ST segment
    Slope,
    /// Number of major vessels colored by fluoroscopy
    VesselCount,
    /// Thalassemia code
    Thalassemia,
}

impl Feature {
    /// The key of this attribute in the `/predict` request body and in model artifacts.
    pub const fn wire_name(self) -> &'static str {
        match self {
            Self::Age => "age",
            Self::ChestPainType => "cp",
            Self::RestingBloodPressure => "trestbps",
            Self::Cholesterol => "chol",
            Self::RestingEcg => "restecg",
            Self::MaxHeartRate => "thalach",
            Self::StDepression => "oldpeak",
            Self::Slope => "slope",
            Self::VesselCount => "ca",
            Self::Thalassemia => "thal",
        }
    }

    /// Human readable name, used in validation messages.
    pub const fn display_name(self) -> &'static str {
        match self {
            Self::Age => "age",
            Self::ChestPainType => "chest pain type",
            Self::RestingBloodPressure => "resting blood pressure",
            Self::Cholesterol => "cholesterol",
            Self::RestingEcg => "resting ECG",
            Self::MaxHeartRate => "max heart rate",
            Self::StDepression => "ST depression",
            Self::Slope => "slope",
            Self::VesselCount => "vessel count",
            Self::Thalassemia => "thalassemia code",
        }
    }

    /// Inclusive range of physiologically plausible values for this attribute.
    pub const fn bounds(self) -> FeatureBounds {
        let (min, max) = match self {
            Self::Age => (0.0, 120.0),
            Self::ChestPainType => (0.0, 3.0),
            Self::RestingBloodPressure => (90.0, 200.0),
            Self::Cholesterol => (100.0, 600.0),
            Self::RestingEcg => (0.0, 2.0),
            Self::MaxHeartRate => (60.0, 202.0),
            Self::StDepression => (0.0, 6.2),
            Self::Slope => (0.0, 2.0),
            Self::VesselCount => (0.0, 4.0),
            Self::Thalassemia => (0.0, 3.0),
        };
        FeatureBounds { min, max }
    }
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.display_name(), self.wire_name())
    }
}

/// Closed interval `[min, max]`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FeatureBounds {
    pub min: f64,
    pub max: f64,
}

impl FeatureBounds {
    /// Returns `true` if `value` lies within the interval, bounds included.
    /// `NaN` is never contained.
    pub fn contains(&self, value: f64) -> bool {
        (self.min..=self.max).contains(&value)
    }
}

impl fmt::Display for FeatureBounds {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.min, self.max)
    }
}

/// A raw patient record, as received on `POST /predict`.
///
/// Nine attributes are integers; serde rejects non-integral JSON numbers for them
/// before validation runs. `oldpeak` is the only floating point attribute.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct PatientRecord {
    /// Age in years, `[0, 120]`
    pub age: i64,
    /// Chest pain type, `[0, 3]`
    pub cp: i64,
    /// Resting blood pressure in mm Hg, `[90, 200]`
    pub trestbps: i64,
    /// Serum cholesterol in mg/dl, `[100, 600]`
    pub chol: i64,
    /// Resting ECG result, `[0, 2]`
    pub restecg: i64,
    /// Maximum heart rate achieved, `[60, 202]`
    pub thalach: i64,
    /// ST depression induced by exercise, `[0, 6.2]`
    pub oldpeak: f64,
    /// Slope of the peak exercise ST segment, `[0, 2]`
    pub slope: i64,
    /// Number of major vessels, `[0, 4]`
    pub ca: i64,
    /// Thalassemia code, `[0, 3]`
    pub thal: i64,
}

impl PatientRecord {
    /// Returns the value of `feature` as a float.
    #[allow(clippy::cast_precision_loss)]
    pub fn value(&self, feature: Feature) -> f64 {
        match feature {
            Feature::Age => self.age as f64,
            Feature::ChestPainType => self.cp as f64,
            Feature::RestingBloodPressure => self.trestbps as f64,
            Feature::Cholesterol => self.chol as f64,
            Feature::RestingEcg => self.restecg as f64,
            Feature::MaxHeartRate => self.thalach as f64,
            Feature::StDepression => self.oldpeak,
            Feature::Slope => self.slope as f64,
            Feature::VesselCount => self.ca as f64,
            Feature::Thalassemia => self.thal as f64,
        }
    }
}

/// A validated patient record, laid out in [`FEATURE_ORDER`].
///
/// Only [`FeatureValidator::validate`] constructs it, so every value is in range.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FeatureVector([f64; NUM_FEATURES]);

impl FeatureVector {
    pub fn as_slice(&self) -> &[f64] {
        &self.0
    }

    pub fn get(&self, feature: Feature) -> f64 {
        let index = FEATURE_ORDER
            .iter()
            .position(|f| *f == feature)
            .unwrap_or_default();
        self.0[index]
    }

    /// Reshapes the vector into a single sample: one row of [`NUM_FEATURES`] columns.
    pub fn to_row(&self) -> Vec<f64> {
        self.0.to_vec()
    }
}

/// A single violated field constraint.
#[derive(Clone, Copy, Debug, Error, PartialEq)]
#[error("{field} must be within {bounds}, got {value}")]
pub struct ValidationError {
    /// The first field, in [`FEATURE_ORDER`], found outside its bounds
    pub field: Feature,
    /// The bounds the field violated
    pub bounds: FeatureBounds,
    /// The offending value
    pub value: f64,
}

impl ValidationError {
    /// Human readable message naming the field and its required range.
    pub fn message(&self) -> String {
        self.to_string()
    }
}

/// Checks patient records against the declared per-field bounds.
#[derive(Clone, Copy, Debug, Default)]
pub struct FeatureValidator;

impl FeatureValidator {
    /// Validates `record` and lays it out as a [`FeatureVector`].
    ///
    /// Fields are checked in [`FEATURE_ORDER`]; the first violation ends the check,
    /// so callers fix one field at a time.
    ///
    /// # Errors
    ///
    /// Returns a [`ValidationError`] naming the first out-of-range field.
    #[instrument(level = "trace", skip_all)]
    pub fn validate(record: &PatientRecord) -> Result<FeatureVector, ValidationError> {
        let mut values = [0.0; NUM_FEATURES];
        for (slot, feature) in values.iter_mut().zip(FEATURE_ORDER) {
            let value = record.value(feature);
            let bounds = feature.bounds();
            if !bounds.contains(value) {
                trace!(
                    target = "heartrisk-inference",
                    event = "validation_failed",
                    field = feature.wire_name(),
                    value,
                );
                return Err(ValidationError {
                    field: feature,
                    bounds,
                    value,
                });
            }
            *slot = value;
        }
        Ok(FeatureVector(values))
    }
}
