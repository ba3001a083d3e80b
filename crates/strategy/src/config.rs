use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use common::Result;

/// Top-level strategy config file (TOML).
///
/// Example `config/strategies.toml`:
/// ```toml
/// [[strategy]]
/// type = "rsi"
///
/// [strategy.params]
/// period = 14
/// oversold = 30.0
/// overbought = 70.0
///
/// [[strategy]]
/// type = "harmonic"
/// base_weight = 0.15
/// ```
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StrategyFileConfig {
    #[serde(rename = "strategy", default)]
    pub strategies: Vec<StrategyConfig>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct StrategyConfig {
    /// Strategy type identifier, e.g. "rsi" or "volume_profile".
    #[serde(rename = "type")]
    pub strategy_type: String,
    /// Aggregation weight for strategies outside the core weight table.
    #[serde(default)]
    pub base_weight: Option<f64>,
    /// Indicator-specific parameters.
    #[serde(default)]
    pub params: HashMap<String, toml::Value>,
}

impl StrategyConfig {
    /// A bare config for a strategy id with no file entry: default
    /// parameters, default weight.
    pub fn bare(strategy_type: impl Into<String>) -> Self {
        Self {
            strategy_type: strategy_type.into(),
            base_weight: None,
            params: HashMap::new(),
        }
    }
}

impl StrategyFileConfig {
    /// Load from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }
}
