use std::collections::BTreeMap;

use common::{Action, Candle, StrategyId, StrategySignal};

use crate::{Evaluation, Strategy};

use super::{closes, ema, ratio01};

/// MACD (Moving Average Convergence/Divergence) strategy.
///
/// Computes MACD line = EMA(fast) − EMA(slow) and a signal line EMA over
/// it, then watches the histogram (MACD − signal) for a sign crossover.
/// A crossover only signals when the recent average divergence is
/// non-degenerate; confidence blends the crossover's strength against
/// recent divergence, the recent histogram range, and how consistently
/// the MACD line has been moving in the crossover direction.
#[derive(Debug, Clone)]
pub struct MacdStrategy {
    fast: usize,
    slow: usize,
    signal: usize,
}

/// Bars of histogram averaged to confirm a crossover.
const CONFIRM_SPAN: usize = 5;
/// MACD-line deltas inspected for trend consistency.
const CONSISTENCY_SPAN: usize = 5;
const DIVERGENCE_WEIGHT: f64 = 0.50;
const RANGE_WEIGHT: f64 = 0.30;
const CONSISTENCY_WEIGHT: f64 = 0.20;

impl MacdStrategy {
    pub fn new(fast: usize, slow: usize, signal: usize) -> Self {
        assert!(fast < slow, "MACD fast period must be less than slow period");
        assert!(signal >= 1, "MACD signal period must be >= 1");
        Self { fast, slow, signal }
    }

    /// MACD line and histogram, one value per candle from index
    /// `slow - 1` onward.
    fn series(&self, closes: &[f64]) -> (Vec<f64>, Vec<f64>) {
        let macd_line: Vec<f64> = (self.slow - 1..closes.len())
            .map(|i| {
                let slice = &closes[..=i];
                ema(slice, self.fast) - ema(slice, self.slow)
            })
            .collect();

        let hist: Vec<f64> = (0..macd_line.len())
            .map(|j| macd_line[j] - ema(&macd_line[..=j], self.signal))
            .collect();

        (macd_line, hist)
    }
}

impl Strategy for MacdStrategy {
    fn id(&self) -> StrategyId {
        StrategyId::Macd
    }

    fn min_candles(&self) -> usize {
        self.slow + 1
    }

    fn evaluate(&self, window: &[Candle]) -> Evaluation {
        if window.len() < self.min_candles() {
            return Evaluation::Insufficient;
        }
        let closes = closes(window);
        let (macd_line, hist) = self.series(&closes);
        if hist.len() < 2 {
            return Evaluation::Insufficient;
        }

        let curr = *hist.last().unwrap();
        let prev = hist[hist.len() - 2];
        let crossed_up = prev <= 0.0 && curr > 0.0;
        let crossed_down = prev >= 0.0 && curr < 0.0;

        let recent = &hist[hist.len() - CONFIRM_SPAN.min(hist.len())..];
        let avg_divergence = recent.iter().map(|h| h.abs()).sum::<f64>() / recent.len() as f64;

        let mut metrics = BTreeMap::new();
        metrics.insert("macd".to_string(), *macd_line.last().unwrap());
        metrics.insert("histogram".to_string(), curr);
        metrics.insert("avg_divergence".to_string(), avg_divergence);

        if (!crossed_up && !crossed_down) || avg_divergence <= f64::EPSILON {
            return Evaluation::Signal(StrategySignal::neutral(StrategyId::Macd, metrics));
        }

        let divergence = ratio01(curr.abs(), avg_divergence);

        let hist_max = hist.iter().cloned().fold(f64::MIN, f64::max);
        let hist_min = hist.iter().cloned().fold(f64::MAX, f64::min);
        let range_strength = ratio01(curr.abs(), hist_max - hist_min);

        let deltas: Vec<f64> = macd_line.windows(2).map(|w| w[1] - w[0]).collect();
        let tail = &deltas[deltas.len() - CONSISTENCY_SPAN.min(deltas.len())..];
        let consistency = if tail.is_empty() {
            0.0
        } else {
            let agreeing = tail
                .iter()
                .filter(|&&d| if crossed_up { d > 0.0 } else { d < 0.0 })
                .count();
            agreeing as f64 / tail.len() as f64
        };

        let confidence = DIVERGENCE_WEIGHT * divergence
            + RANGE_WEIGHT * range_strength
            + CONSISTENCY_WEIGHT * consistency;

        let action = if crossed_up { Action::Buy } else { Action::Sell };
        Evaluation::Signal(StrategySignal::new(StrategyId::Macd, action, confidence, metrics))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicators::testutil::candles_from_closes;

    fn default_macd() -> MacdStrategy {
        MacdStrategy::new(12, 26, 9)
    }

    #[test]
    fn insufficient_below_min_candles() {
        let s = default_macd();
        let window = candles_from_closes(&vec![100.0; 26]);
        assert_eq!(s.evaluate(&window), Evaluation::Insufficient);
    }

    #[test]
    fn evaluates_at_exactly_min_candles() {
        let s = default_macd();
        let window = candles_from_closes(&vec![100.0; 27]);
        assert!(matches!(s.evaluate(&window), Evaluation::Signal(_)));
    }

    #[test]
    fn bullish_crossover_after_reversal() {
        // 30 bars of steady decline pin the histogram at zero, then one
        // sharp up bar flips it positive: a fresh bullish crossover.
        let s = default_macd();
        let mut closes: Vec<f64> = (0..30).map(|i| 100.0 - 0.5 * i as f64).collect();
        closes.push(closes[29] + 1.0);
        let sig = s.evaluate(&candles_from_closes(&closes)).into_signal().unwrap();
        assert_eq!(sig.action, Action::Buy);
        assert!((sig.confidence - 0.84).abs() < 1e-6, "got {}", sig.confidence);
    }

    #[test]
    fn bearish_crossover_after_reversal() {
        let s = default_macd();
        let mut closes: Vec<f64> = (0..30).map(|i| 100.0 + 0.5 * i as f64).collect();
        closes.push(closes[29] - 1.0);
        let sig = s.evaluate(&candles_from_closes(&closes)).into_signal().unwrap();
        assert_eq!(sig.action, Action::Sell);
        assert!(sig.confidence > 0.0 && sig.confidence <= 1.0);
    }

    #[test]
    fn flat_window_is_neutral() {
        let s = default_macd();
        let window = candles_from_closes(&vec![100.0; 40]);
        let sig = s.evaluate(&window).into_signal().unwrap();
        assert_eq!(sig.action, Action::Neutral);
        assert_eq!(sig.confidence, 0.0);
    }

    #[test]
    fn steady_trend_yields_a_valid_signal() {
        // A linear up-trend keeps MACD above signal without crossing; the
        // exact outcome near the seed frames is numeric noise, so only
        // require a well-formed result.
        let s = default_macd();
        let closes: Vec<f64> = (0..40).map(|i| 100.0 + i as f64 * 0.5).collect();
        let sig = s.evaluate(&candles_from_closes(&closes)).into_signal().unwrap();
        assert!((0.0..=1.0).contains(&sig.confidence));
    }
}
