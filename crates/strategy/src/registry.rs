use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::str::FromStr;

use tracing::info;

use common::{Error, Result, StrategyId};

use crate::config::{StrategyConfig, StrategyFileConfig};
use crate::indicators::{
    BollingerStrategy, HarmonicStrategy, IchimokuStrategy, MacdStrategy, RsiStrategy,
    VolumeProfileStrategy,
};
use crate::Strategy;

/// Build a configured strategy instance from its identifier.
/// Fails with `UnknownStrategy` for unrecognized identifiers.
pub fn create(strategy_id: &str, cfg: &StrategyConfig) -> Result<Box<dyn Strategy>> {
    Ok(build(StrategyId::from_str(strategy_id)?, cfg))
}

/// Typed factory: identifiers are a closed set, so this cannot fail.
pub fn build(id: StrategyId, cfg: &StrategyConfig) -> Box<dyn Strategy> {
    let p = &cfg.params;
    match id {
        StrategyId::Rsi => Box::new(RsiStrategy::new(
            param_usize(p, "period", 14),
            param_f64(p, "oversold", 30.0),
            param_f64(p, "overbought", 70.0),
        )),
        StrategyId::Macd => Box::new(MacdStrategy::new(
            param_usize(p, "fast", 12),
            param_usize(p, "slow", 26),
            param_usize(p, "signal", 9),
        )),
        StrategyId::Bollinger => Box::new(BollingerStrategy::new(
            param_usize(p, "period", 20),
            param_f64(p, "std", 2.0),
        )),
        StrategyId::Ichimoku => Box::new(IchimokuStrategy::new(
            param_usize(p, "tenkan", 20),
            param_usize(p, "kijun", 60),
            param_usize(p, "senkou", 120),
            param_usize(p, "displacement", 30),
        )),
        StrategyId::Harmonic => Box::new(HarmonicStrategy::new(
            param_usize(p, "swing_window", 5),
            param_f64(p, "tolerance", 0.15),
        )),
        StrategyId::VolumeProfile => Box::new(VolumeProfileStrategy::new(
            param_usize(p, "levels", 100),
            param_f64(p, "value_area", 0.70),
        )),
    }
}

/// Parse a control-interface strategy list: comma-separated identifiers
/// or `all`.
pub fn parse_strategy_list(input: &str) -> Result<Vec<StrategyId>> {
    let input = input.trim().to_lowercase();
    if input == "all" {
        return Ok(StrategyId::ALL.to_vec());
    }
    let mut out = BTreeSet::new();
    for part in input.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        out.insert(StrategyId::from_str(part)?);
    }
    if out.is_empty() {
        return Err(Error::Config("no valid strategies provided".to_string()));
    }
    Ok(out.into_iter().collect())
}

/// Owns strategy configuration and the per-symbol active sets.
///
/// Configuration is immutable per instance: replacing a strategy's
/// config swaps in a whole new `StrategyConfig`, it is never mutated in
/// place. Pipelines receive snapshots of the active (id, config) pairs
/// and rebuild instances when a snapshot differs from what they hold.
pub struct StrategyRegistry {
    configs: BTreeMap<StrategyId, StrategyConfig>,
    /// Strategies applied to every tracked symbol without an override.
    defaults: BTreeSet<StrategyId>,
    /// Per-symbol active sets; masks `defaults` when present.
    overrides: HashMap<String, BTreeSet<StrategyId>>,
}

impl StrategyRegistry {
    /// Build the registry from the TOML file config. Fails on unknown
    /// strategy type identifiers.
    pub fn from_config(file_cfg: &StrategyFileConfig) -> Result<Self> {
        let mut configs = BTreeMap::new();
        for cfg in &file_cfg.strategies {
            let id = StrategyId::from_str(&cfg.strategy_type)?;
            info!(strategy = %id, "Registered strategy config");
            configs.insert(id, cfg.clone());
        }
        Ok(Self {
            configs,
            defaults: BTreeSet::new(),
            overrides: HashMap::new(),
        })
    }

    pub fn empty() -> Self {
        Self {
            configs: BTreeMap::new(),
            defaults: BTreeSet::new(),
            overrides: HashMap::new(),
        }
    }

    /// The configuration for a strategy id: the file entry if present,
    /// defaults otherwise.
    pub fn config(&self, id: StrategyId) -> StrategyConfig {
        self.configs
            .get(&id)
            .cloned()
            .unwrap_or_else(|| StrategyConfig::bare(id.as_str()))
    }

    /// Replace a strategy's configuration. Returns true when the stored
    /// config actually changed; re-applying an identical config is a
    /// no-op.
    pub fn replace_config(&mut self, id: StrategyId, cfg: StrategyConfig) -> bool {
        if self.configs.get(&id) == Some(&cfg) {
            return false;
        }
        self.configs.insert(id, cfg);
        true
    }

    /// Currently active strategies for a symbol.
    pub fn active(&self, symbol: &str) -> Vec<StrategyId> {
        self.active_set(symbol).iter().copied().collect()
    }

    fn active_set(&self, symbol: &str) -> &BTreeSet<StrategyId> {
        self.overrides.get(symbol).unwrap_or(&self.defaults)
    }

    /// Active (id, config) snapshot for a symbol, the unit pipelines
    /// rebuild from.
    pub fn active_configs(&self, symbol: &str) -> Vec<(StrategyId, StrategyConfig)> {
        self.active_set(symbol)
            .iter()
            .map(|&id| (id, self.config(id)))
            .collect()
    }

    /// Activate strategies for one symbol, or for the default set (and
    /// every override) when `symbol` is `None`. Idempotent. Returns the
    /// resulting active set for the scope.
    pub fn subscribe(&mut self, symbol: Option<&str>, ids: &[StrategyId]) -> Vec<StrategyId> {
        match symbol {
            Some(symbol) => {
                let set = self
                    .overrides
                    .entry(symbol.to_string())
                    .or_insert_with(|| self.defaults.clone());
                set.extend(ids.iter().copied());
                set.iter().copied().collect()
            }
            None => {
                self.defaults.extend(ids.iter().copied());
                for set in self.overrides.values_mut() {
                    set.extend(ids.iter().copied());
                }
                self.defaults.iter().copied().collect()
            }
        }
    }

    /// Deactivate strategies (all of them when `ids` is `None`) for one
    /// symbol or for every scope. Returns the resulting active set.
    pub fn unsubscribe(
        &mut self,
        symbol: Option<&str>,
        ids: Option<&[StrategyId]>,
    ) -> Vec<StrategyId> {
        match symbol {
            Some(symbol) => {
                let set = self
                    .overrides
                    .entry(symbol.to_string())
                    .or_insert_with(|| self.defaults.clone());
                match ids {
                    Some(ids) => {
                        for id in ids {
                            set.remove(id);
                        }
                    }
                    None => set.clear(),
                }
                set.iter().copied().collect()
            }
            None => {
                match ids {
                    Some(ids) => {
                        for id in ids {
                            self.defaults.remove(id);
                        }
                        for set in self.overrides.values_mut() {
                            for id in ids {
                                set.remove(id);
                            }
                        }
                    }
                    None => {
                        self.defaults.clear();
                        self.overrides.clear();
                    }
                }
                self.defaults.iter().copied().collect()
            }
        }
    }

    /// Window capacity required by a symbol's active strategies.
    pub fn required_capacity(&self, symbol: &str) -> usize {
        self.active_configs(symbol)
            .iter()
            .map(|(id, cfg)| build(*id, cfg).min_candles())
            .max()
            .unwrap_or(0)
    }
}

fn param_f64(params: &HashMap<String, toml::Value>, key: &str, default: f64) -> f64 {
    params
        .get(key)
        .and_then(|v| v.as_float().or_else(|| v.as_integer().map(|i| i as f64)))
        .unwrap_or(default)
}

fn param_usize(params: &HashMap<String, toml::Value>, key: &str, default: usize) -> usize {
    params
        .get(key)
        .and_then(|v| v.as_integer())
        .map(|v| v as usize)
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_rejects_unknown_identifier() {
        let cfg = StrategyConfig::bare("sma_cross");
        assert!(matches!(
            create("sma_cross", &cfg),
            Err(Error::UnknownStrategy(_))
        ));
    }

    #[test]
    fn create_builds_every_known_identifier() {
        for id in StrategyId::ALL {
            let built = create(id.as_str(), &StrategyConfig::bare(id.as_str())).unwrap();
            assert_eq!(built.id(), id);
            assert!(built.min_candles() > 0);
        }
    }

    #[test]
    fn default_min_candles_match_contract() {
        let expected = [
            (StrategyId::Rsi, 15),
            (StrategyId::Macd, 27),
            (StrategyId::Bollinger, 20),
            (StrategyId::Ichimoku, 120),
            (StrategyId::Harmonic, 30),
            (StrategyId::VolumeProfile, 50),
        ];
        for (id, min) in expected {
            let built = build(id, &StrategyConfig::bare(id.as_str()));
            assert_eq!(built.min_candles(), min, "{id}");
        }
    }

    #[test]
    fn parse_strategy_list_handles_all_and_lists() {
        assert_eq!(parse_strategy_list("all").unwrap().len(), 6);
        assert_eq!(
            parse_strategy_list("rsi, macd").unwrap(),
            vec![StrategyId::Rsi, StrategyId::Macd]
        );
        assert!(parse_strategy_list("rsi,nope").is_err());
        assert!(parse_strategy_list("  ").is_err());
    }

    #[test]
    fn subscribe_is_idempotent() {
        let mut reg = StrategyRegistry::empty();
        reg.subscribe(Some("BTCUSDT"), &[StrategyId::Rsi]);
        let again = reg.subscribe(Some("BTCUSDT"), &[StrategyId::Rsi]);
        assert_eq!(again, vec![StrategyId::Rsi]);
    }

    #[test]
    fn global_subscribe_reaches_symbol_overrides() {
        let mut reg = StrategyRegistry::empty();
        reg.subscribe(Some("BTCUSDT"), &[StrategyId::Rsi]);
        reg.subscribe(None, &[StrategyId::Macd]);
        assert_eq!(reg.active("BTCUSDT"), vec![StrategyId::Rsi, StrategyId::Macd]);
        // Symbols without an override follow the defaults.
        assert_eq!(reg.active("ETHUSDT"), vec![StrategyId::Macd]);
    }

    #[test]
    fn unsubscribe_shrinks_required_capacity() {
        let mut reg = StrategyRegistry::empty();
        reg.subscribe(Some("BTCUSDT"), &[StrategyId::Rsi, StrategyId::Ichimoku]);
        assert_eq!(reg.required_capacity("BTCUSDT"), 120);
        reg.unsubscribe(Some("BTCUSDT"), Some(&[StrategyId::Ichimoku]));
        assert_eq!(reg.required_capacity("BTCUSDT"), 15);
    }

    #[test]
    fn replace_config_detects_no_op() {
        let mut reg = StrategyRegistry::empty();
        let cfg = StrategyConfig::bare("rsi");
        assert!(reg.replace_config(StrategyId::Rsi, cfg.clone()));
        assert!(!reg.replace_config(StrategyId::Rsi, cfg));
        let mut changed = StrategyConfig::bare("rsi");
        changed
            .params
            .insert("period".to_string(), toml::Value::Integer(21));
        assert!(reg.replace_config(StrategyId::Rsi, changed));
    }
}
