pub mod attribution;
pub mod error;
pub mod explanation;
pub mod model;
pub mod predictor;
pub mod preprocess;
pub mod prompt;
pub mod schema;
pub mod scorer;

pub use attribution::{Attribution, FeatureAttribution};
pub use error::{Result, SchemaViolation, XdocError};
pub use explanation::{
    ExplanationGenerator, ExplanationRequest, RetryPolicy, RetryingGenerator, SamplingParams,
    UpstreamError,
};
#[cfg(feature = "gemini")]
pub use explanation::{GeminiConfig, GeminiGenerator};
#[cfg(feature = "rig")]
pub use explanation::OpenRouterGenerator;
pub use model::GradientBoostedModel;
pub use predictor::{DiseasePipeline, ModelRegistry, PredictionResult, Predictor, PredictorContext};
pub use preprocess::{FeatureMap, Preprocessor, RawValue};
pub use prompt::Audience;
pub use schema::{Disease, DiseaseSchema, MarkerStatus, ReferenceRange};
