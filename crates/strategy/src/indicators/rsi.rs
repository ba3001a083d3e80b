use std::collections::BTreeMap;

use common::{Action, Candle, StrategyId, StrategySignal};

use crate::{Evaluation, Strategy};

use super::{clamp01, closes, ratio01};

/// RSI (Relative Strength Index) strategy.
///
/// Uses Wilder's smoothed moving average (same as TradingView / standard
/// RSI). Signals Buy below the oversold threshold and Sell above the
/// overbought threshold; confidence blends how deep the RSI sits in the
/// signal zone with how fast it got there.
#[derive(Debug, Clone)]
pub struct RsiStrategy {
    period: usize,
    oversold: f64,
    overbought: f64,
    /// Candles looked back when measuring RSI momentum.
    momentum_span: usize,
}

/// Below/above these the market is in the extreme zone and the flat
/// confidence bonus applies.
const EXTREME_LOW: f64 = 20.0;
const EXTREME_HIGH: f64 = 80.0;
/// RSI points of movement that count as maximal momentum.
const MOMENTUM_NORM: f64 = 20.0;
const EXTREME_BONUS: f64 = 0.10;
const DISTANCE_WEIGHT: f64 = 0.60;
const MOMENTUM_WEIGHT: f64 = 0.40;

impl RsiStrategy {
    pub fn new(period: usize, oversold: f64, overbought: f64) -> Self {
        assert!(period >= 2, "RSI period must be >= 2");
        assert!(oversold < overbought, "RSI thresholds must not cross");
        Self {
            period,
            oversold,
            overbought,
            momentum_span: 3,
        }
    }

    /// RSI change over the last `momentum_span` candles, normalized to
    /// [0, 1]. The lookback RSI shortens its period when the window
    /// cannot fit the full one, so a minimum-size window still yields a
    /// momentum reading.
    fn momentum(&self, closes: &[f64], rsi_now: f64) -> f64 {
        let prev = &closes[..closes.len().saturating_sub(self.momentum_span)];
        if prev.len() < 2 {
            return 0.0;
        }
        let prev_period = self.period.min(prev.len() - 1);
        match wilder_rsi(prev, prev_period) {
            Some(rsi_then) => clamp01((rsi_now - rsi_then).abs() / MOMENTUM_NORM),
            None => 0.0,
        }
    }
}

impl Strategy for RsiStrategy {
    fn id(&self) -> StrategyId {
        StrategyId::Rsi
    }

    fn min_candles(&self) -> usize {
        self.period + 1
    }

    fn evaluate(&self, window: &[Candle]) -> Evaluation {
        if window.len() < self.min_candles() {
            return Evaluation::Insufficient;
        }
        let closes = closes(window);
        let rsi = match wilder_rsi(&closes, self.period) {
            Some(v) => v,
            None => return Evaluation::Insufficient,
        };

        let momentum = self.momentum(&closes, rsi);
        let (action, distance) = if rsi < self.oversold {
            (Action::Buy, ratio01(self.oversold - rsi, self.oversold - EXTREME_LOW))
        } else if rsi > self.overbought {
            (Action::Sell, ratio01(rsi - self.overbought, EXTREME_HIGH - self.overbought))
        } else {
            let mut metrics = BTreeMap::new();
            metrics.insert("rsi".to_string(), rsi);
            return Evaluation::Signal(StrategySignal::neutral(StrategyId::Rsi, metrics));
        };

        let mut confidence = DISTANCE_WEIGHT * distance + MOMENTUM_WEIGHT * momentum;
        if rsi < EXTREME_LOW || rsi > EXTREME_HIGH {
            confidence += EXTREME_BONUS;
        }

        let mut metrics = BTreeMap::new();
        metrics.insert("rsi".to_string(), rsi);
        metrics.insert("distance".to_string(), distance);
        metrics.insert("momentum".to_string(), momentum);
        Evaluation::Signal(StrategySignal::new(StrategyId::Rsi, action, confidence, metrics))
    }
}

/// Compute RSI from a slice of close prices (oldest first).
/// Returns `None` if there are fewer than `period + 1` values.
pub(crate) fn wilder_rsi(closes: &[f64], period: usize) -> Option<f64> {
    if period < 1 || closes.len() < period + 1 {
        return None;
    }

    // First average gain/loss over the initial `period` changes
    let changes: Vec<f64> = closes.windows(2).map(|w| w[1] - w[0]).collect();
    let initial = &changes[..period];

    let mut avg_gain = initial.iter().filter(|&&c| c > 0.0).sum::<f64>() / period as f64;
    let mut avg_loss = initial.iter().filter(|&&c| c < 0.0).map(|c| c.abs()).sum::<f64>()
        / period as f64;

    // Wilder smoothing over remaining changes
    for &change in &changes[period..] {
        let gain = if change > 0.0 { change } else { 0.0 };
        let loss = if change < 0.0 { change.abs() } else { 0.0 };
        avg_gain = (avg_gain * (period - 1) as f64 + gain) / period as f64;
        avg_loss = (avg_loss * (period - 1) as f64 + loss) / period as f64;
    }

    if avg_loss == 0.0 {
        // A dead-flat window has no direction; all-gains is pinned high.
        return Some(if avg_gain == 0.0 { 50.0 } else { 100.0 });
    }

    let rs = avg_gain / avg_loss;
    Some(100.0 - 100.0 / (1.0 + rs))
}
