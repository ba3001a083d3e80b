use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single closed OHLCV candle from the exchange feed.
/// Immutable once closed; the feed only delivers finalized candles.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub close_time: DateTime<Utc>,
}

/// Candle interval, validated against the exchange's kline grammar.
///
/// Stored internally in minutes; parses and displays the exchange form
/// (`"1"`, `"5"`, `"60"`, ..., `"D"`, `"W"`, `"M"`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Interval(u32);

impl Interval {
    const VALID_MINUTES: [u32; 10] = [1, 3, 5, 15, 30, 60, 120, 240, 360, 720];
    const DAY: u32 = 1_440;
    const WEEK: u32 = 10_080;
    const MONTH: u32 = 43_200; // 30-day approximation

    pub fn parse(s: &str) -> Result<Self, crate::Error> {
        let minutes = match s {
            "D" => Self::DAY,
            "W" => Self::WEEK,
            "M" => Self::MONTH,
            other => other
                .parse::<u32>()
                .ok()
                .filter(|m| Self::VALID_MINUTES.contains(m))
                .ok_or_else(|| crate::Error::Config(format!("invalid interval: {other}")))?,
        };
        Ok(Self(minutes))
    }

    pub fn minutes(&self) -> u32 {
        self.0
    }

    /// The wall-clock span of one candle at this interval.
    pub fn duration(&self) -> chrono::Duration {
        chrono::Duration::minutes(i64::from(self.0))
    }
}

impl Default for Interval {
    fn default() -> Self {
        Self(60)
    }
}

impl std::fmt::Display for Interval {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.0 {
            Self::DAY => write!(f, "D"),
            Self::WEEK => write!(f, "W"),
            Self::MONTH => write!(f, "M"),
            m => write!(f, "{m}"),
        }
    }
}

impl std::str::FromStr for Interval {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Interval {
    type Error = crate::Error;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<Interval> for String {
    fn from(i: Interval) -> String {
        i.to_string()
    }
}

/// Direction of a strategy or aggregated signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Buy,
    Sell,
    Neutral,
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Action::Buy => write!(f, "BUY"),
            Action::Sell => write!(f, "SELL"),
            Action::Neutral => write!(f, "NEUTRAL"),
        }
    }
}

/// Identifier for the closed set of indicator strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyId {
    Rsi,
    Macd,
    Bollinger,
    Ichimoku,
    Harmonic,
    VolumeProfile,
}

impl StrategyId {
    pub const ALL: [StrategyId; 6] = [
        StrategyId::Rsi,
        StrategyId::Macd,
        StrategyId::Bollinger,
        StrategyId::Ichimoku,
        StrategyId::Harmonic,
        StrategyId::VolumeProfile,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyId::Rsi => "rsi",
            StrategyId::Macd => "macd",
            StrategyId::Bollinger => "bollinger",
            StrategyId::Ichimoku => "ichimoku",
            StrategyId::Harmonic => "harmonic",
            StrategyId::VolumeProfile => "volume_profile",
        }
    }
}

impl std::fmt::Display for StrategyId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for StrategyId {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "rsi" => Ok(StrategyId::Rsi),
            "macd" => Ok(StrategyId::Macd),
            "bollinger" => Ok(StrategyId::Bollinger),
            "ichimoku" => Ok(StrategyId::Ichimoku),
            "harmonic" => Ok(StrategyId::Harmonic),
            "volume_profile" => Ok(StrategyId::VolumeProfile),
            other => Err(crate::Error::UnknownStrategy(other.to_string())),
        }
    }
}

/// Signal produced by one strategy for one window snapshot.
/// Created fresh on every evaluation and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategySignal {
    pub strategy: StrategyId,
    pub action: Action,
    /// Calibrated confidence in [0, 1].
    pub confidence: f64,
    /// Named numeric values that fed the confidence formula.
    pub metrics: BTreeMap<String, f64>,
}

impl StrategySignal {
    pub fn new(
        strategy: StrategyId,
        action: Action,
        confidence: f64,
        metrics: BTreeMap<String, f64>,
    ) -> Self {
        Self {
            strategy,
            action,
            confidence: confidence.clamp(0.0, 1.0),
            metrics,
        }
    }

    /// A no-opinion signal; the aggregator discards these.
    pub fn neutral(strategy: StrategyId, metrics: BTreeMap<String, f64>) -> Self {
        Self::new(strategy, Action::Neutral, 0.0, metrics)
    }
}

/// Combined cross-strategy signal for one symbol, read-only once emitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatedSignal {
    pub symbol: String,
    pub action: Action,
    /// Combined confidence in [0, 1].
    pub confidence: f64,
    /// Contributing signals, ordered by individual confidence descending.
    pub contributors: Vec<StrategySignal>,
    pub generated_at: DateTime<Utc>,
}
