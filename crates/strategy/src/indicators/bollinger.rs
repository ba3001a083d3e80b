use std::collections::BTreeMap;

use common::{Action, Candle, StrategyId, StrategySignal};

use crate::{Evaluation, Strategy};

use super::{closes, ratio01, sma, stddev};

/// Bollinger Bands strategy.
///
/// Bands are an SMA middle line ± `k` standard deviations. A close
/// outside the bands signals mean-reversion entry: below the lower band
/// is a Buy, above the upper band a Sell. Confidence weighs how deep the
/// close penetrates the band against how stretched it is from the middle
/// line, both normalized by band width. A zero-width band (dead-flat
/// window) contributes nothing rather than dividing by zero.
#[derive(Debug, Clone)]
pub struct BollingerStrategy {
    period: usize,
    k: f64,
}

const PENETRATION_WEIGHT: f64 = 0.70;
const TREND_WEIGHT: f64 = 0.30;

impl BollingerStrategy {
    pub fn new(period: usize, k: f64) -> Self {
        assert!(period >= 2, "Bollinger period must be >= 2");
        assert!(k > 0.0, "Bollinger band width multiplier must be positive");
        Self { period, k }
    }
}

impl Strategy for BollingerStrategy {
    fn id(&self) -> StrategyId {
        StrategyId::Bollinger
    }

    fn min_candles(&self) -> usize {
        self.period
    }

    fn evaluate(&self, window: &[Candle]) -> Evaluation {
        if window.len() < self.min_candles() {
            return Evaluation::Insufficient;
        }
        let closes = closes(window);
        let close = *closes.last().unwrap();

        let middle = sma(&closes, self.period);
        let sd = stddev(&closes, self.period);
        let upper = middle + self.k * sd;
        let lower = middle - self.k * sd;
        let width = upper - lower;

        let mut metrics = BTreeMap::new();
        metrics.insert("upper".to_string(), upper);
        metrics.insert("middle".to_string(), middle);
        metrics.insert("lower".to_string(), lower);
        metrics.insert("width".to_string(), width);
        metrics.insert("percent_b".to_string(), ratio01(close - lower, width));

        let (action, penetration) = if close < lower {
            (Action::Buy, ratio01(lower - close, width))
        } else if close > upper {
            (Action::Sell, ratio01(close - upper, width))
        } else {
            return Evaluation::Signal(StrategySignal::neutral(StrategyId::Bollinger, metrics));
        };

        let trend_context = ratio01((close - middle).abs(), width);
        let confidence = PENETRATION_WEIGHT * penetration + TREND_WEIGHT * trend_context;

        Evaluation::Signal(StrategySignal::new(
            StrategyId::Bollinger,
            action,
            confidence,
            metrics,
        ))
    }
}
