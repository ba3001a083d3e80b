use std::collections::BTreeMap;

use common::{Action, Candle, StrategyId, StrategySignal};
use tracing::debug;

use crate::{Evaluation, Strategy};

use super::clamp01;

/// Harmonic pattern strategy (Gartley, Butterfly, Bat, Crab).
///
/// Finds the last five swing points in the window and measures the
/// XABCD legs against each pattern's Fibonacci ratios with a widened
/// tolerance for crypto volatility. A pattern only counts as completed
/// when every defining ratio is inside tolerance; its score is the
/// tolerance-weighted closeness of the ratios, already in [0, 1].
/// Direction comes from the completion point: D below C resolves up
/// (Buy), D above C resolves down (Sell).
#[derive(Debug, Clone)]
pub struct HarmonicStrategy {
    swing_window: usize,
    tolerance: f64,
}

struct PatternRatios {
    name: &'static str,
    ab: f64,
    bc: f64,
    cd: f64,
}

/// AB/XA retracement, BC/AB retracement, CD/BC extension.
const PATTERNS: [PatternRatios; 4] = [
    PatternRatios { name: "gartley", ab: 0.618, bc: 0.386, cd: 1.272 },
    PatternRatios { name: "butterfly", ab: 0.786, bc: 0.382, cd: 1.618 },
    PatternRatios { name: "bat", ab: 0.382, bc: 0.886, cd: 2.618 },
    PatternRatios { name: "crab", ab: 0.382, bc: 0.886, cd: 3.618 },
];

impl HarmonicStrategy {
    pub fn new(swing_window: usize, tolerance: f64) -> Self {
        assert!(swing_window >= 1, "swing window must be >= 1");
        assert!(tolerance > 0.0, "ratio tolerance must be positive");
        Self {
            swing_window,
            tolerance,
        }
    }

    /// Indices of swing highs and lows: bars strictly above (below)
    /// every neighbor within `swing_window` on both sides.
    fn swing_points(&self, window: &[Candle]) -> Vec<usize> {
        let w = self.swing_window;
        let mut points = Vec::new();
        for i in w..window.len().saturating_sub(w) {
            let is_high = (1..=w)
                .all(|j| window[i].high > window[i - j].high && window[i].high > window[i + j].high);
            let is_low = (1..=w)
                .all(|j| window[i].low < window[i - j].low && window[i].low < window[i + j].low);
            if is_high || is_low {
                points.push(i);
            }
        }
        points
    }

    /// Score one pattern against the measured legs; 0 unless every
    /// ratio is inside tolerance.
    fn score(&self, ab: f64, bc: f64, cd: f64, pattern: &PatternRatios) -> f64 {
        let checks = [(ab, pattern.ab), (bc, pattern.bc), (cd, pattern.cd)];
        let mut total = 0.0;
        for (actual, expected) in checks {
            let diff = (actual - expected).abs() / expected;
            if diff > self.tolerance {
                return 0.0;
            }
            total += 1.0 - diff / self.tolerance;
        }
        clamp01(total / checks.len() as f64)
    }
}

impl Strategy for HarmonicStrategy {
    fn id(&self) -> StrategyId {
        StrategyId::Harmonic
    }

    fn min_candles(&self) -> usize {
        30
    }

    fn evaluate(&self, window: &[Candle]) -> Evaluation {
        if window.len() < self.min_candles() {
            return Evaluation::Insufficient;
        }

        let points = self.swing_points(window);
        if points.len() < 5 {
            return Evaluation::Signal(StrategySignal::neutral(StrategyId::Harmonic, BTreeMap::new()));
        }
        let last5 = &points[points.len() - 5..];
        let [x, a, b, c, d] = [
            window[last5[0]].close,
            window[last5[1]].close,
            window[last5[2]].close,
            window[last5[3]].close,
            window[last5[4]].close,
        ];

        let xa = (a - x).abs();
        let ab_leg = (b - a).abs();
        let bc_leg = (c - b).abs();
        let cd_leg = (d - c).abs();
        if xa <= f64::EPSILON || ab_leg <= f64::EPSILON || bc_leg <= f64::EPSILON {
            return Evaluation::Signal(StrategySignal::neutral(StrategyId::Harmonic, BTreeMap::new()));
        }
        let ab = ab_leg / xa;
        let bc = bc_leg / ab_leg;
        let cd = cd_leg / bc_leg;

        let mut best_score = 0.0;
        let mut best_name = "";
        for pattern in &PATTERNS {
            let score = self.score(ab, bc, cd, pattern);
            if score > best_score {
                best_score = score;
                best_name = pattern.name;
            }
        }

        let mut metrics = BTreeMap::new();
        metrics.insert("ab_ratio".to_string(), ab);
        metrics.insert("bc_ratio".to_string(), bc);
        metrics.insert("cd_ratio".to_string(), cd);
        metrics.insert("pattern_score".to_string(), best_score);

        if best_score <= 0.0 || cd_leg <= f64::EPSILON {
            return Evaluation::Signal(StrategySignal::neutral(StrategyId::Harmonic, metrics));
        }

        let action = if d < c { Action::Buy } else { Action::Sell };
        debug!(pattern = best_name, score = best_score, "harmonic pattern completed");
        Evaluation::Signal(StrategySignal::new(StrategyId::Harmonic, action, best_score, metrics))
    }
}
