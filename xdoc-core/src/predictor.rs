//! Per-disease pipelines and the request facade tying them together.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::attribution::{self, FeatureAttribution};
use crate::error::{Result, XdocError};
use crate::explanation::{ExplanationGenerator, ExplanationRequest, SamplingParams};
use crate::model::{GradientBoostedModel, xgboost};
use crate::preprocess::{FeatureMap, Preprocessor};
use crate::prompt::{self, Audience, PromptInput};
use crate::schema::Disease;
use crate::scorer::Scorer;

/// Everything returned for one prediction request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionResult {
    pub disease: Disease,
    pub audience: Audience,
    pub predicted_class: usize,
    pub label: String,
    pub confidence: f64,
    pub probabilities: Vec<f64>,
    /// Expected margin of the predicted class before any feature is known.
    pub base_value: f64,
    pub attribution: Vec<FeatureAttribution>,
    pub explanation: String,
    pub model_version: String,
}

/// Fitted preprocessing and model artifacts of one disease.
#[derive(Debug, Clone)]
pub struct DiseasePipeline {
    disease: Disease,
    preprocessor: Preprocessor,
    scorer: Scorer,
}

impl DiseasePipeline {
    /// Pairs a preprocessor and a model, checking both match the disease schema.
    pub fn new(
        disease: Disease,
        preprocessor: Preprocessor,
        model: GradientBoostedModel,
    ) -> Result<Self> {
        let schema = disease.schema();
        if preprocessor.schema().disease != disease {
            return Err(XdocError::artifact(
                model.version(),
                format!(
                    "preprocessor fitted for {} used with {disease}",
                    preprocessor.schema().disease
                ),
            ));
        }
        if model.num_features() != schema.len() {
            return Err(XdocError::artifact(
                model.version(),
                format!(
                    "model expects {} features, {disease} schema has {}",
                    model.num_features(),
                    schema.len()
                ),
            ));
        }
        if model.num_classes() != schema.num_classes() {
            return Err(XdocError::artifact(
                model.version(),
                format!(
                    "model has {} classes, {disease} has {}",
                    model.num_classes(),
                    schema.num_classes()
                ),
            ));
        }
        Ok(Self {
            disease,
            preprocessor,
            scorer: Scorer::new(model),
        })
    }

    /// Loads `{disease}_model.json` and `{disease}_preprocessor.json` from `dir`.
    ///
    /// Returns `Ok(None)` if either file does not exist; the disease then
    /// stays unloaded.
    pub fn load(dir: &Path, disease: Disease) -> Result<Option<Self>> {
        let schema = disease.schema();
        let model_path = dir.join(format!("{disease}_model.json"));
        let preprocessor_path = dir.join(format!("{disease}_preprocessor.json"));
        for path in [&model_path, &preprocessor_path] {
            if !path.exists() {
                warn!(disease = %disease, path = %path.display(), "artifact not found, disease not loaded");
                return Ok(None);
            }
        }

        let imported = xgboost::load(&model_path)?;
        if !imported.feature_names.is_empty()
            && imported
                .feature_names
                .iter()
                .map(String::as_str)
                .ne(schema.feature_names())
        {
            return Err(XdocError::artifact(
                model_path.display().to_string(),
                format!(
                    "trained on features {:?}, expected schema order",
                    imported.feature_names
                ),
            ));
        }

        let preprocessor = Preprocessor::load(schema, &preprocessor_path)?;
        Self::new(disease, preprocessor, imported.model).map(Some)
    }

    pub fn disease(&self) -> Disease {
        self.disease
    }

    pub fn model_version(&self) -> &str {
        self.scorer.version()
    }
}

/// Explicit disease → pipeline lookup table.
#[derive(Debug, Clone, Default)]
pub struct ModelRegistry {
    pipelines: HashMap<Disease, Arc<DiseasePipeline>>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_pipeline(mut self, pipeline: DiseasePipeline) -> Self {
        self.insert(pipeline);
        self
    }

    pub fn insert(&mut self, pipeline: DiseasePipeline) {
        self.pipelines.insert(pipeline.disease, Arc::new(pipeline));
    }

    /// Loads every disease that has artifacts in `dir`.
    pub fn load_dir(dir: &Path) -> Result<Self> {
        let mut registry = Self::new();
        for disease in Disease::ALL {
            if let Some(pipeline) = DiseasePipeline::load(dir, disease)? {
                info!(
                    disease = %disease,
                    version = pipeline.model_version(),
                    "loaded disease pipeline"
                );
                registry.insert(pipeline);
            }
        }
        Ok(registry)
    }

    pub fn get(&self, disease: Disease) -> Result<&Arc<DiseasePipeline>> {
        self.pipelines
            .get(&disease)
            .ok_or_else(|| XdocError::ModelNotLoaded(disease.to_string()))
    }

    /// Loaded diseases in declaration order.
    pub fn loaded(&self) -> Vec<Disease> {
        Disease::ALL
            .into_iter()
            .filter(|d| self.pipelines.contains_key(d))
            .collect()
    }
}

/// Immutable state shared by every request, built once at start-up.
pub struct PredictorContext {
    pub registry: ModelRegistry,
    pub generator: Arc<dyn ExplanationGenerator>,
    pub sampling: SamplingParams,
}

#[derive(Clone)]
pub struct Predictor {
    context: Arc<PredictorContext>,
}

impl Predictor {
    pub fn new(context: PredictorContext) -> Self {
        Self {
            context: Arc::new(context),
        }
    }

    pub fn registry(&self) -> &ModelRegistry {
        &self.context.registry
    }

    /// Runs preprocess → score → attribute → prompt → generate.
    ///
    /// Any failure aborts the request; no partial result is produced.
    pub async fn predict(
        &self,
        disease: &str,
        features: &FeatureMap,
        audience: &str,
    ) -> Result<PredictionResult> {
        let disease: Disease = disease.parse()?;
        let audience: Audience = audience.parse()?;
        let pipeline = self.context.registry.get(disease)?;
        let schema = disease.schema();

        let input = pipeline.preprocessor.transform(features)?;
        debug!(disease = %disease, shape = ?input.shape(), "preprocessed features");

        let probabilities = pipeline.scorer.score(input.row());
        let predicted_class = probabilities.predicted_class();
        let confidence = probabilities.confidence();
        let label = schema.class_label(predicted_class);
        info!(
            disease = %disease,
            predicted_class,
            confidence,
            "scored input"
        );

        let attribution =
            attribution::attribute(pipeline.scorer.model(), schema, &input, predicted_class)?;

        let prompt = prompt::build_prompt(
            audience,
            &PromptInput {
                schema,
                label,
                confidence,
                probabilities: probabilities.as_slice(),
                attribution: &attribution,
            },
        );
        let request = ExplanationRequest {
            persona: audience.persona().to_string(),
            prompt,
            sampling: self.context.sampling,
        };

        let explanation = self
            .context
            .generator
            .generate(&request)
            .await
            .map_err(|e| {
                error!(
                    provider = self.context.generator.name(),
                    kind = e.kind(),
                    "explanation generation failed: {}",
                    e
                );
                e
            })?;
        info!(disease = %disease, audience = %audience, "generated explanation");

        Ok(PredictionResult {
            disease,
            audience,
            predicted_class,
            label: label.to_string(),
            confidence,
            probabilities: probabilities.into_vec(),
            base_value: attribution.base_value,
            attribution: attribution.features,
            explanation,
            model_version: pipeline.model_version().to_string(),
        })
    }
}
