use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use xdoc_core::{Audience, Disease, FeatureMap, PredictionResult};

fn default_audience() -> String {
    Audience::default().to_string()
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PredictRequest {
    pub features: FeatureMap,
    /// Parsed by the pipeline so unknown values surface as `invalid_audience`.
    #[serde(default = "default_audience")]
    pub audience: String,
    #[serde(default)]
    pub patient_id: Option<String>,
    /// Requesting physician, stored with the record.
    #[serde(default)]
    pub doctor_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictResponse {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub result: PredictionResult,
}

/// Stored summary of a completed prediction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagnosisRecord {
    pub id: Uuid,
    pub patient_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doctor_id: Option<String>,
    pub disease: Disease,
    pub audience: Audience,
    pub predicted_class: usize,
    pub label: String,
    pub confidence: f64,
    pub explanation: String,
    pub model_version: String,
    pub created_at: DateTime<Utc>,
}

impl DiagnosisRecord {
    pub fn from_result(
        id: Uuid,
        request: &PredictRequest,
        created_at: DateTime<Utc>,
        result: &PredictionResult,
    ) -> Self {
        Self {
            id,
            patient_id: request.patient_id.clone(),
            doctor_id: request.doctor_id.clone(),
            disease: result.disease,
            audience: result.audience,
            predicted_class: result.predicted_class,
            label: result.label.clone(),
            confidence: result.confidence,
            explanation: result.explanation.clone(),
            model_version: result.model_version.clone(),
            created_at,
        }
    }
}
