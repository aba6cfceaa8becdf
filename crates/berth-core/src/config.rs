//! berth.toml configuration parser.

use std::path::Path;

use serde::{Deserialize, Serialize};

/// Engine configuration loaded from `berth.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub placement: PlacementConfig,
}

/// Placement pipeline configuration.
///
/// The strategy chain runs in the listed order; the first strategy that can
/// handle a request and produces a destination wins.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlacementConfig {
    /// Ordered strategy chain, by registered name.
    pub strategies: Vec<String>,
    /// Shield dedicated capacity from workloads that did not request
    /// dedication. Defaults to true.
    pub protect_dedicated: Option<bool>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            placement: PlacementConfig {
                strategies: vec!["dedication-aware".to_string(), "first-fit".to_string()],
                protect_dedicated: Some(true),
            },
        }
    }
}

impl EngineConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: EngineConfig = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}

impl PlacementConfig {
    pub fn protect_dedicated(&self) -> bool {
        self.protect_dedicated.unwrap_or(true)
    }
}
