//! Runtime configuration, read once from the environment at start-up.

use crate::gemini::{qualify_model, GeminiClientConfig, DEFAULT_MODEL};
use std::path::PathBuf;

pub const API_KEY_VAR: &str = "GEMINI_API_KEY";
pub const MODEL_VAR: &str = "BAAYLIVE_MODEL";
pub const SYSTEM_INSTRUCTION_VAR: &str = "BAAYLIVE_SYSTEM_INSTRUCTION";
pub const RECORD_DIR_VAR: &str = "BAAYLIVE_RECORD_DIR";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} is not set")]
    Missing(&'static str),
}

#[derive(Debug, Clone, Default)]
pub struct Config {
    pub api_key: String,
    pub model: String,
    pub system_instruction: Option<String>,
    /// Write each conversation's audio under this directory
    pub record_dir: Option<PathBuf>,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let api_key = get(API_KEY_VAR).ok_or(ConfigError::Missing(API_KEY_VAR))?;
        let model = get(MODEL_VAR)
            .map(|m| qualify_model(m.trim()))
            .unwrap_or_else(|| DEFAULT_MODEL.to_string());

        Ok(Self {
            api_key,
            model,
            system_instruction: get(SYSTEM_INSTRUCTION_VAR),
            record_dir: get(RECORD_DIR_VAR).map(PathBuf::from),
        })
    }

    pub fn client_config(&self) -> GeminiClientConfig {
        GeminiClientConfig {
            model: self.model.clone(),
            system_instruction: self.system_instruction.clone(),
            ..GeminiClientConfig::from_api_key(&self.api_key)
        }
    }
}
