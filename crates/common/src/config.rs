use crate::Interval;

/// All configuration loaded from environment variables at startup.
/// Every variable has a sensible default; an invalid value panics with a
/// clear message rather than starting with a half-applied configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Candle interval used for new symbol windows.
    pub default_interval: Interval,

    /// Path to the TOML strategy configuration file.
    pub strategy_config_path: String,

    /// Symbols tracked from startup. Symbols seen on the feed are added
    /// to the tracked set as they appear.
    pub symbols: Vec<String>,

    /// Path to a JSONL candle file for the replay feed; stdin when unset.
    pub feed_path: Option<String>,
}

impl Config {
    /// Load all configuration from environment variables.
    /// Loads `.env` if present.
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv(); // ignore error if .env not present

        let default_interval = optional_env("DEFAULT_INTERVAL")
            .map(|v| {
                Interval::parse(&v).unwrap_or_else(|e| {
                    panic!("ERROR: invalid DEFAULT_INTERVAL '{v}': {e}")
                })
            })
            .unwrap_or_default();

        let symbols = optional_env("SYMBOLS")
            .map(|v| {
                v.split(',')
                    .map(|s| s.trim().to_uppercase())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        Config {
            default_interval,
            strategy_config_path: optional_env("STRATEGY_CONFIG_PATH")
                .unwrap_or_else(|| "config/strategies.toml".to_string()),
            symbols,
            feed_path: optional_env("FEED_PATH"),
        }
    }
}

fn optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok()
}
