use std::collections::BTreeMap;

use common::{Action, Candle, StrategyId, StrategySignal};

use crate::{Evaluation, Strategy};

use super::{clamp01, ratio01};

/// Volume Profile strategy.
///
/// Distributes each candle's volume across fixed price levels in
/// proportion to the candle's overlap with the level, then reads the
/// Point of Control (highest-volume level) and the Value Area (top
/// levels holding 70% of traded volume). High/low-volume nodes are the
/// touched levels above the 80th / below the 20th volume percentile;
/// untouched levels count as low-volume.
///
/// A signal needs a node interaction at the latest close (crossing a
/// node level, or closing within one level of it), with direction from
/// the close's position against the POC (below: Buy) and the Value Area
/// high (above: Sell). Confidence weighs the node's volume concentration
/// against how price behaved at the node boundary (acceptance,
/// rejection, or a plain cross).
#[derive(Debug, Clone)]
pub struct VolumeProfileStrategy {
    levels: usize,
    value_area: f64,
    hvn_quantile: f64,
    lvn_quantile: f64,
}

const CONCENTRATION_WEIGHT: f64 = 0.60;
const BOUNDARY_WEIGHT: f64 = 0.40;
const ACCEPTANCE_SCORE: f64 = 0.90;
const REJECTION_SCORE: f64 = 0.80;
const CROSS_SCORE: f64 = 0.50;
const NEAR_SCORE: f64 = 0.25;

#[derive(Debug, Clone, Copy, PartialEq)]
enum NodeKind {
    High,
    Low,
}

struct Profile {
    volumes: Vec<f64>,
    price_min: f64,
    delta: f64,
}

impl Profile {
    fn center(&self, level: usize) -> f64 {
        self.price_min + (level as f64 + 0.5) * self.delta
    }
}

impl VolumeProfileStrategy {
    pub fn new(levels: usize, value_area: f64) -> Self {
        assert!(levels >= 2, "volume profile needs at least two price levels");
        assert!((0.0..=1.0).contains(&value_area), "value area must be a fraction");
        Self {
            levels,
            value_area,
            hvn_quantile: 0.80,
            lvn_quantile: 0.20,
        }
    }

    fn build_profile(&self, window: &[Candle]) -> Option<Profile> {
        let price_min = window.iter().map(|c| c.low).fold(f64::MAX, f64::min);
        let price_max = window.iter().map(|c| c.high).fold(f64::MIN, f64::max);
        if price_max - price_min <= f64::EPSILON {
            return None;
        }
        let delta = (price_max - price_min) / self.levels as f64;

        let mut volumes = vec![0.0; self.levels];
        for candle in window {
            let range = candle.high - candle.low;
            if range <= 0.0 {
                continue;
            }
            for (j, slot) in volumes.iter_mut().enumerate() {
                let level_low = price_min + j as f64 * delta;
                let level_high = level_low + delta;
                if candle.low <= level_high && candle.high >= level_low {
                    let overlap = candle.high.min(level_high) - candle.low.max(level_low);
                    *slot += candle.volume * (overlap / range);
                }
            }
        }

        Some(Profile {
            volumes,
            price_min,
            delta,
        })
    }

    /// Upper bound of the Value Area: the top-volume levels that
    /// together hold `value_area` of total volume.
    fn value_area_high(&self, profile: &Profile, total: f64) -> f64 {
        let mut order: Vec<usize> = (0..profile.volumes.len()).collect();
        order.sort_by(|&a, &b| profile.volumes[b].total_cmp(&profile.volumes[a]));

        let mut acc = 0.0;
        let mut top = 0;
        for level in order {
            acc += profile.volumes[level];
            top = top.max(level);
            if acc >= total * self.value_area {
                break;
            }
        }
        profile.center(top)
    }

    /// The node interacting with the latest close: crossed between the
    /// last two closes, or within one level of the close. The nearest
    /// interacting node wins.
    fn interacting_node(
        &self,
        profile: &Profile,
        prev_close: f64,
        close: f64,
    ) -> Option<(usize, NodeKind, bool)> {
        let touched: Vec<f64> = profile
            .volumes
            .iter()
            .copied()
            .filter(|&v| v > 0.0)
            .collect();
        if touched.is_empty() {
            return None;
        }
        let hvn_threshold = quantile(&touched, self.hvn_quantile);
        let lvn_threshold = quantile(&touched, self.lvn_quantile);

        let (lo, hi) = (prev_close.min(close), prev_close.max(close));
        let mut best: Option<(f64, usize, NodeKind, bool)> = None;
        for (level, &vol) in profile.volumes.iter().enumerate() {
            let kind = if vol >= hvn_threshold {
                NodeKind::High
            } else if vol <= lvn_threshold {
                NodeKind::Low
            } else {
                continue;
            };
            let center = profile.center(level);
            let crossed = lo < center && center < hi;
            let near = (close - center).abs() < profile.delta;
            if !crossed && !near {
                continue;
            }
            let dist = (close - center).abs();
            if best.map_or(true, |(d, ..)| dist < d) {
                best = Some((dist, level, kind, crossed));
            }
        }
        best.map(|(_, level, kind, crossed)| (level, kind, crossed))
    }
}

impl Strategy for VolumeProfileStrategy {
    fn id(&self) -> StrategyId {
        StrategyId::VolumeProfile
    }

    fn min_candles(&self) -> usize {
        50
    }

    fn evaluate(&self, window: &[Candle]) -> Evaluation {
        if window.len() < self.min_candles() {
            return Evaluation::Insufficient;
        }
        let profile = match self.build_profile(window) {
            Some(p) => p,
            None => {
                return Evaluation::Signal(StrategySignal::neutral(
                    StrategyId::VolumeProfile,
                    BTreeMap::new(),
                ))
            }
        };
        let total: f64 = profile.volumes.iter().sum();
        if total <= 0.0 {
            return Evaluation::Signal(StrategySignal::neutral(
                StrategyId::VolumeProfile,
                BTreeMap::new(),
            ));
        }

        let Some(poc_level) = (0..profile.volumes.len())
            .max_by(|&a, &b| profile.volumes[a].total_cmp(&profile.volumes[b]))
        else {
            return Evaluation::Signal(StrategySignal::neutral(
                StrategyId::VolumeProfile,
                BTreeMap::new(),
            ));
        };
        let poc_price = profile.center(poc_level);
        let va_high = self.value_area_high(&profile, total);

        let close = window[window.len() - 1].close;
        let prev_close = window[window.len() - 2].close;

        let mut metrics = BTreeMap::new();
        metrics.insert("poc_price".to_string(), poc_price);
        metrics.insert("value_area_high".to_string(), va_high);

        let (node_level, kind, crossed) =
            match self.interacting_node(&profile, prev_close, close) {
                Some(node) => node,
                None => {
                    return Evaluation::Signal(StrategySignal::neutral(
                        StrategyId::VolumeProfile,
                        metrics,
                    ))
                }
            };
        let node_center = profile.center(node_level);
        let node_volume = profile.volumes[node_level];

        let action = if close < poc_price {
            Action::Buy
        } else if close > va_high {
            Action::Sell
        } else {
            return Evaluation::Signal(StrategySignal::neutral(StrategyId::VolumeProfile, metrics));
        };

        let mean = total / profile.volumes.len() as f64;
        let max_volume = profile.volumes.iter().cloned().fold(f64::MIN, f64::max);
        let concentration = match kind {
            NodeKind::High => ratio01(node_volume - mean, max_volume - mean),
            NodeKind::Low => ratio01(mean - node_volume, mean),
        };

        let recent_closes = &window[window.len() - 10.min(window.len())..];
        let acceptance = recent_closes
            .iter()
            .all(|c| (c.close - node_center).abs() < profile.delta);
        let recent_high = window[window.len() - 5.min(window.len())..]
            .iter()
            .map(|c| c.high)
            .fold(f64::MIN, f64::max);
        let rejection =
            (recent_high - node_center).abs() < profile.delta && close < node_center - profile.delta;

        let boundary = if acceptance {
            ACCEPTANCE_SCORE
        } else if rejection {
            REJECTION_SCORE
        } else if crossed {
            CROSS_SCORE
        } else {
            NEAR_SCORE
        };

        metrics.insert("node_price".to_string(), node_center);
        metrics.insert("node_volume".to_string(), node_volume);
        metrics.insert("concentration".to_string(), concentration);

        let confidence =
            clamp01(CONCENTRATION_WEIGHT * concentration + BOUNDARY_WEIGHT * boundary);
        Evaluation::Signal(StrategySignal::new(
            StrategyId::VolumeProfile,
            action,
            confidence,
            metrics,
        ))
    }
}

/// Nearest-rank quantile of an unsorted sample.
fn quantile(values: &[f64], q: f64) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let idx = (q * (sorted.len() - 1) as f64).round() as usize;
    sorted[idx]
}
