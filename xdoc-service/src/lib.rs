pub mod config;
pub mod error;
pub mod history;
pub mod models;
pub mod service;

pub use config::{Config, LlmProvider, LogFormat};
pub use error::ApiError;
pub use history::{DiagnosisHistory, InMemoryDiagnosisHistory};
pub use models::*;
pub use service::{AppState, build_router, create_app};
