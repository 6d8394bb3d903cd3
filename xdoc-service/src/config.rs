//! Configuration module

use anyhow::{Context, bail};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use xdoc_core::SamplingParams;

use crate::history::DEFAULT_HISTORY_LIMIT;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmProvider {
    Gemini,
    OpenRouter,
}

impl FromStr for LlmProvider {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "gemini" => Ok(LlmProvider::Gemini),
            "openrouter" => Ok(LlmProvider::OpenRouter),
            other => bail!("unknown LLM_PROVIDER `{other}`, expected gemini or openrouter"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
}

impl LogFormat {
    pub fn from_env() -> Self {
        match std::env::var("LOG_FORMAT").as_deref() {
            Ok("pretty") => LogFormat::Pretty,
            _ => LogFormat::Json,
        }
    }
}

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,

    /// Directory holding `{disease}_model.json` and `{disease}_preprocessor.json`
    pub model_dir: PathBuf,

    pub provider: LlmProvider,

    /// API key of the selected provider
    pub api_key: String,

    pub llm_model: String,

    /// Overrides the Gemini endpoint, mostly for local testing
    pub gemini_base_url: Option<String>,

    pub llm_timeout: Duration,

    pub llm_max_attempts: u32,

    /// Bound on every attempt of one explanation, backoff included
    pub llm_deadline: Duration,

    /// Diagnosis records kept in memory before the oldest are evicted
    pub history_limit: usize,

    pub sampling: SamplingParams,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let provider: LlmProvider = lookup("LLM_PROVIDER")
            .as_deref()
            .unwrap_or("gemini")
            .parse()?;

        let (key_var, model_var, default_model) = match provider {
            LlmProvider::Gemini => ("GEMINI_API_KEY", "GEMINI_MODEL", "gemini-2.0-flash"),
            LlmProvider::OpenRouter => (
                "OPENROUTER_API_KEY",
                "OPENROUTER_MODEL",
                "openai/gpt-4.1-mini",
            ),
        };
        let api_key = lookup(key_var)
            .filter(|k| !k.trim().is_empty())
            .with_context(|| format!("{key_var} environment variable is required"))?;

        Ok(Self {
            port: parse_or(&lookup, "PORT", 3000)?,
            model_dir: lookup("XDOC_MODEL_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("models")),
            provider,
            api_key,
            llm_model: lookup(model_var).unwrap_or_else(|| default_model.to_string()),
            gemini_base_url: lookup("GEMINI_BASE_URL"),
            llm_timeout: Duration::from_secs(parse_or(&lookup, "LLM_TIMEOUT_SECS", 8)?),
            llm_max_attempts: parse_or(&lookup, "LLM_MAX_ATTEMPTS", 2)?,
            llm_deadline: Duration::from_secs(parse_or(&lookup, "LLM_DEADLINE_SECS", 9)?),
            history_limit: parse_or(&lookup, "XDOC_HISTORY_LIMIT", DEFAULT_HISTORY_LIMIT)?,
            sampling: SamplingParams {
                temperature: parse_or(&lookup, "LLM_TEMPERATURE", 0.3)?,
                max_output_tokens: parse_or(&lookup, "LLM_MAX_OUTPUT_TOKENS", 1024)?,
            },
        })
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("invalid value `{raw}` for {key}")),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> anyhow::Result<Config> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_apply() {
        let config = config(&[("GEMINI_API_KEY", "key")]).unwrap();
        assert_eq!(config.port, 3000);
        assert_eq!(config.model_dir, PathBuf::from("models"));
        assert_eq!(config.provider, LlmProvider::Gemini);
        assert_eq!(config.llm_model, "gemini-2.0-flash");
        assert_eq!(config.llm_timeout, Duration::from_secs(8));
        assert_eq!(config.llm_max_attempts, 2);
        assert_eq!(config.llm_deadline, Duration::from_secs(9));
        assert_eq!(config.history_limit, DEFAULT_HISTORY_LIMIT);
        assert_eq!(config.sampling, SamplingParams::default());
    }

    #[test]
    fn missing_api_key_is_an_error() {
        let err = config(&[]).unwrap_err();
        assert!(err.to_string().contains("GEMINI_API_KEY"));

        let err = config(&[("LLM_PROVIDER", "openrouter"), ("GEMINI_API_KEY", "key")]).unwrap_err();
        assert!(err.to_string().contains("OPENROUTER_API_KEY"));
    }

    #[test]
    fn overrides_are_parsed() {
        let config = config(&[
            ("LLM_PROVIDER", "OpenRouter"),
            ("OPENROUTER_API_KEY", "key"),
            ("PORT", "8081"),
            ("LLM_TIMEOUT_SECS", "3"),
            ("LLM_TEMPERATURE", "0.1"),
            ("LLM_DEADLINE_SECS", "5"),
            ("XDOC_HISTORY_LIMIT", "500"),
        ])
        .unwrap();
        assert_eq!(config.llm_deadline, Duration::from_secs(5));
        assert_eq!(config.history_limit, 500);
        assert_eq!(config.provider, LlmProvider::OpenRouter);
        assert_eq!(config.llm_model, "openai/gpt-4.1-mini");
        assert_eq!(config.port, 8081);
        assert_eq!(config.llm_timeout, Duration::from_secs(3));
        assert_eq!(config.sampling.temperature, 0.1);
    }

    #[test]
    fn bad_numbers_are_rejected() {
        assert!(config(&[("GEMINI_API_KEY", "key"), ("PORT", "eighty")]).is_err());
    }
}
