//! Run configuration: the model list and the scorer map.
//!
//! Configuration is a single JSON document:
//!
//! ```json
//! {
//!   "models": [
//!     {"name": "gpt4", "model": "openai/gpt-4", "parallelism": 8,
//!      "retry_budget": 5, "region": null}
//!   ],
//!   "scorers": {
//!     "judgment": {
//!       "parallelism": 10,
//!       "judges": [
//!         {"model": "openai/gpt-4", "weight": 3.0,
//!          "params": {"temperature": 0.0, "max_tokens": 4096}}
//!       ]
//!     }
//!   }
//! }
//! ```
//!
//! Defaults for parallelism and the retry budget can be overridden with the
//! `DEFAULT_GENERATOR_CONCURRENCY`, `DEFAULT_GENERATOR_NB_TRY` and
//! `DEFAULT_SCORER_CONCURRENCY` environment variables.

use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error reading '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid configuration JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("No models configured")]
    NoModels,

    #[error("Scorer '{scorer}' is not a known scorer")]
    UnknownScorer { scorer: String },

    #[error("Scorer '{scorer}' has no judges configured")]
    NoJudges { scorer: String },

    #[error("Duplicate model identifier '{model}'")]
    DuplicateModel { model: String },
}

fn env_usize(key: &str, fallback: usize) -> usize {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(fallback)
}

fn default_generator_parallelism() -> usize {
    env_usize("DEFAULT_GENERATOR_CONCURRENCY", 8)
}

fn default_retry_budget() -> u32 {
    env_usize("DEFAULT_GENERATOR_NB_TRY", 5) as u32
}

fn default_scorer_parallelism() -> usize {
    env_usize("DEFAULT_SCORER_CONCURRENCY", 10)
}

fn default_judge_temperature() -> f64 {
    0.0
}

fn default_judge_max_tokens() -> u32 {
    4096
}

fn default_judge_n() -> u32 {
    1
}

/// One generation model: identity, pool size, and retry budget.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Human-readable name used in reports.
    pub name: String,
    /// Provider model identifier sent to the completion service.
    pub model: String,
    /// Number of concurrent workers pulling from this model's queue.
    #[serde(default = "default_generator_parallelism")]
    pub parallelism: usize,
    /// Non-rate-limit failures tolerated per completion.
    #[serde(default = "default_retry_budget")]
    pub retry_budget: u32,
    /// Region whose credential authenticates requests for this model.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
}

/// Request parameters for one judge model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JudgeParams {
    #[serde(default = "default_judge_temperature")]
    pub temperature: f64,
    #[serde(default = "default_judge_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_judge_n")]
    pub n: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
}

impl Default for JudgeParams {
    fn default() -> Self {
        Self {
            temperature: default_judge_temperature(),
            max_tokens: default_judge_max_tokens(),
            n: default_judge_n(),
            region: None,
        }
    }
}

/// One judge in a consensus panel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JudgeConfig {
    /// Provider model identifier of the judge.
    pub model: String,
    /// Weight of this judge's vote.
    pub weight: f64,
    /// Request parameters for the judge's completions.
    #[serde(default)]
    pub params: JudgeParams,
}

/// One scorer: pool size plus its judge panel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScorerConfig {
    /// Number of concurrent workers pulling from this scorer's queue.
    #[serde(default = "default_scorer_parallelism")]
    pub parallelism: usize,
    /// Judge panel; may be empty for scorers that never call a model.
    #[serde(default)]
    pub judges: Vec<JudgeConfig>,
}

/// Full run configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Models every sample is generated with.
    pub models: Vec<ModelConfig>,
    /// Scorers keyed by registry name.
    pub scorers: HashMap<String, ScorerConfig>,
}

impl Config {
    /// Loads and validates a configuration file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let config: Config = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Structural validation: at least one model, unique model identifiers,
    /// every scorer name known to the registry, judges present where the
    /// scorer needs them.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.models.is_empty() {
            return Err(ConfigError::NoModels);
        }

        let mut seen = std::collections::HashSet::new();
        for model in &self.models {
            if !seen.insert(model.model.as_str()) {
                return Err(ConfigError::DuplicateModel {
                    model: model.model.clone(),
                });
            }
        }

        for (name, scorer) in &self.scorers {
            if !crate::scorer::is_known_scorer(name) {
                return Err(ConfigError::UnknownScorer {
                    scorer: name.clone(),
                });
            }
            if crate::scorer::requires_judges(name) && scorer.judges.is_empty() {
                return Err(ConfigError::NoJudges {
                    scorer: name.clone(),
                });
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_config_json() -> serde_json::Value {
        serde_json::json!({
            "models": [
                {"name": "gpt4", "model": "openai/gpt-4"}
            ],
            "scorers": {
                "judgment": {
                    "judges": [
                        {"model": "openai/gpt-4", "weight": 1.0}
                    ]
                }
            }
        })
    }

    #[test]
    fn test_defaults_applied() {
        let config: Config =
            serde_json::from_value(minimal_config_json()).expect("config should parse");

        assert_eq!(config.models[0].parallelism, 8);
        assert_eq!(config.models[0].retry_budget, 5);
        assert!(config.models[0].region.is_none());

        let scorer = &config.scorers["judgment"];
        assert_eq!(scorer.parallelism, 10);
        assert_eq!(scorer.judges[0].params.temperature, 0.0);
        assert_eq!(scorer.judges[0].params.max_tokens, 4096);
        assert_eq!(scorer.judges[0].params.n, 1);

        config.validate().expect("valid config");
    }

    #[test]
    fn test_unknown_scorer_rejected() {
        let mut raw = minimal_config_json();
        raw["scorers"]["no_such_scorer"] = serde_json::json!({"judges": []});
        let config: Config = serde_json::from_value(raw).expect("config should parse");

        assert!(matches!(
            config.validate(),
            Err(ConfigError::UnknownScorer { .. })
        ));
    }

    #[test]
    fn test_judge_scorer_requires_judges() {
        let raw = serde_json::json!({
            "models": [{"name": "gpt4", "model": "openai/gpt-4"}],
            "scorers": {"judgment": {"judges": []}}
        });
        let config: Config = serde_json::from_value(raw).expect("config should parse");

        assert!(matches!(config.validate(), Err(ConfigError::NoJudges { .. })));
    }

    #[test]
    fn test_duplicate_models_rejected() {
        let raw = serde_json::json!({
            "models": [
                {"name": "a", "model": "openai/gpt-4"},
                {"name": "b", "model": "openai/gpt-4"}
            ],
            "scorers": {}
        });
        let config: Config = serde_json::from_value(raw).expect("config should parse");

        assert!(matches!(
            config.validate(),
            Err(ConfigError::DuplicateModel { .. })
        ));
    }

    #[test]
    fn test_empty_model_list_rejected() {
        let raw = serde_json::json!({"models": [], "scorers": {}});
        let config: Config = serde_json::from_value(raw).expect("config should parse");

        assert!(matches!(config.validate(), Err(ConfigError::NoModels)));
    }
}
