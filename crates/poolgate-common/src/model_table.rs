use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::tier::{OPUS_MODEL, SONNET_MODEL};

/// Metadata for one serveable model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelInfo {
    /// Upstream bot id the public model name maps to.
    #[serde(rename = "baseModel")]
    pub base_model_id: String,
    /// Context budget used by transcript trimming.
    #[serde(rename = "tokens", default = "default_token_limit")]
    pub token_limit: usize,
    /// Quota points charged per completed call.
    #[serde(rename = "points", default = "default_points_cost")]
    pub points_cost: u64,
    /// Image models receive the bare prompt instead of the transcript.
    #[serde(rename = "text2image", default)]
    pub is_image_model: bool,
}

fn default_token_limit() -> usize {
    4_000
}

fn default_points_cost() -> u64 {
    300
}

#[derive(Debug, thiserror::Error)]
pub enum ModelTableError {
    #[error("failed to read model table: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed model table: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Typed registry of model metadata, keyed by canonical lower-case id.
///
/// Loaded once at startup and passed by reference; never consulted through
/// ambient global state.
#[derive(Debug, Clone, Default)]
pub struct ModelTable {
    models: HashMap<String, ModelInfo>,
}

impl ModelTable {
    pub fn new(models: HashMap<String, ModelInfo>) -> Self {
        let models = models
            .into_iter()
            .map(|(name, info)| (name.to_lowercase(), info))
            .collect();
        Self { models }
    }

    pub fn load(path: &Path) -> Result<Self, ModelTableError> {
        let raw = std::fs::read_to_string(path)?;
        let models: HashMap<String, ModelInfo> = serde_json::from_str(&raw)?;
        Ok(Self::new(models))
    }

    /// Stock table covering the models every deployment serves.
    pub fn builtin() -> Self {
        let mut models = HashMap::new();
        models.insert(
            OPUS_MODEL.to_string(),
            ModelInfo {
                base_model_id: OPUS_MODEL.to_string(),
                token_limit: 190_000,
                points_cost: 1_500,
                is_image_model: false,
            },
        );
        models.insert(
            SONNET_MODEL.to_string(),
            ModelInfo {
                base_model_id: SONNET_MODEL.to_string(),
                token_limit: 190_000,
                points_cost: 300,
                is_image_model: false,
            },
        );
        Self::new(models)
    }

    /// Case-insensitive lookup by public model name.
    pub fn lookup(&self, name: &str) -> Option<&ModelInfo> {
        self.models.get(&name.to_lowercase())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.lookup(name).is_some()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.models.keys().map(String::as_str)
    }
}
