//! Advertised model ids and their upstream profile mapping.
//!
//! Loaded once at startup from `models.json`. Two shapes are accepted:
//! the current `{"models": {...}, "anthropic_model_mappings": {...}}` object
//! and the legacy plain string array where each id maps to itself.

use std::collections::HashMap;
use std::path::Path;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelInfo {
    pub id: String,
    pub object: String,
    pub created: i64,
    pub owned_by: String,
}

#[derive(Debug, Deserialize, Default)]
struct ModelsConfig {
    #[serde(default)]
    models: HashMap<String, String>,
    #[serde(default)]
    anthropic_model_mappings: HashMap<String, String>,
}

#[derive(Debug, Default)]
pub struct ModelRegistry {
    models: HashMap<String, String>,
    anthropic_aliases: HashMap<String, String>,
    listed: Vec<ModelInfo>,
}

impl ModelRegistry {
    pub fn load(path: &Path) -> Self {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) => {
                warn!("Error loading {:?}: {}", path, e);
                return Self::default();
            }
        };
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Self {
        let config = match serde_json::from_str::<ModelsConfig>(raw) {
            Ok(config) => config,
            Err(_) => {
                // Legacy shape: a plain array of model ids.
                match serde_json::from_str::<Vec<String>>(raw) {
                    Ok(ids) => ModelsConfig {
                        models: ids.into_iter().map(|id| (id.clone(), id)).collect(),
                        anthropic_model_mappings: HashMap::new(),
                    },
                    Err(e) => {
                        warn!("Error parsing models config: {}", e);
                        ModelsConfig::default()
                    }
                }
            }
        };

        let now = Utc::now().timestamp();
        let mut listed: Vec<ModelInfo> = config
            .models
            .keys()
            .map(|id| ModelInfo {
                id: id.clone(),
                object: "model".to_string(),
                created: now,
                owned_by: "jetbrains-ai".to_string(),
            })
            .collect();
        listed.sort_by(|a, b| a.id.cmp(&b.id));

        info!("Loaded {} model(s) from models config", config.models.len());
        Self {
            models: config.models,
            anthropic_aliases: config.anthropic_model_mappings,
            listed,
        }
    }

    /// Upstream profile id for an advertised model, if known.
    pub fn resolve(&self, model_id: &str) -> Option<&str> {
        self.models.get(model_id).map(String::as_str)
    }

    pub fn contains(&self, model_id: &str) -> bool {
        self.models.contains_key(model_id)
    }

    /// Map an Anthropic-dialect alias onto an advertised model id. Unknown
    /// aliases pass through unchanged so the main table decides.
    pub fn resolve_anthropic_alias<'a>(&'a self, model_id: &'a str) -> &'a str {
        self.anthropic_aliases
            .get(model_id)
            .map(String::as_str)
            .unwrap_or(model_id)
    }

    /// Rows for `GET /v1/models`, stable order.
    pub fn listed(&self) -> &[ModelInfo] {
        &self.listed
    }
}
