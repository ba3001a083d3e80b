use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use tracing::debug;

use common::{Action, AggregatedSignal, StrategyId, StrategySignal};

/// Per-strategy signals below this confidence are noise and never reach
/// weighting; combined results below it are withheld entirely.
pub const NOISE_FLOOR: f64 = 0.30;

/// Scale applied to the average confidence of agreeing signals.
pub const AGREEMENT_BONUS: f64 = 0.20;

/// Weight for strategies outside the core table when none is configured.
pub const RESIDUAL_WEIGHT: f64 = 0.15;

/// Base weight for a strategy. The core four carry a fixed table;
/// everything else uses its configured weight or the residual default.
pub fn base_weight(id: StrategyId, configured: Option<f64>) -> f64 {
    match id {
        StrategyId::Rsi => 0.32,
        StrategyId::Ichimoku => 0.27,
        StrategyId::Macd => 0.23,
        StrategyId::Bollinger => 0.18,
        _ => configured.unwrap_or(RESIDUAL_WEIGHT),
    }
}

/// Combine one evaluation cycle's strategy signals for a symbol into a
/// single confidence-scored decision, or `None` when nothing qualifies.
///
/// `weights` holds the resolved base weight per strategy; strategies
/// missing from the map fall back to the static table. The function is
/// pure: it owns no state beyond its arguments, and absence of a
/// qualifying signal is a value, not an error.
///
/// Order of operations: noise filter, direction resolution, weight
/// scaling by own confidence, renormalization, weighted sum, agreement
/// bonus, final floor.
pub fn aggregate(
    symbol: &str,
    signals: Vec<StrategySignal>,
    weights: &BTreeMap<StrategyId, f64>,
    generated_at: DateTime<Utc>,
) -> Option<AggregatedSignal> {
    let weight_of = |s: &StrategySignal| {
        weights
            .get(&s.strategy)
            .copied()
            .unwrap_or_else(|| base_weight(s.strategy, None))
    };

    let mut buys = Vec::new();
    let mut sells = Vec::new();
    for signal in signals {
        if signal.confidence < NOISE_FLOOR {
            continue;
        }
        match signal.action {
            Action::Buy => buys.push(signal),
            Action::Sell => sells.push(signal),
            Action::Neutral => {}
        }
    }

    // Conflicting directions: the side with more weighted conviction
    // wins outright, the other side is discarded.
    let side_total = |side: &[StrategySignal]| {
        side.iter().map(|s| weight_of(s) * s.confidence).sum::<f64>()
    };
    let (action, mut side) = match (buys.is_empty(), sells.is_empty()) {
        (true, true) => return None,
        (false, true) => (Action::Buy, buys),
        (true, false) => (Action::Sell, sells),
        (false, false) => {
            if side_total(&buys) >= side_total(&sells) {
                debug!(symbol, "discarding sell side in mixed-direction cycle");
                (Action::Buy, buys)
            } else {
                debug!(symbol, "discarding buy side in mixed-direction cycle");
                (Action::Sell, sells)
            }
        }
    };

    // Dynamic weighting: scale each base weight by its own confidence so
    // stronger signals dominate beyond what the static table allows.
    let scaled: Vec<f64> = side.iter().map(|s| weight_of(s) * s.confidence).collect();
    let scale_total: f64 = scaled.iter().sum();
    if scale_total <= 0.0 {
        return None;
    }
    let mut combined: f64 = side
        .iter()
        .zip(&scaled)
        .map(|(s, w)| (w / scale_total) * s.confidence)
        .sum();

    if side.len() >= 2 {
        let avg = side.iter().map(|s| s.confidence).sum::<f64>() / side.len() as f64;
        combined = (combined + AGREEMENT_BONUS * avg).min(1.0);
    }

    if combined < NOISE_FLOOR {
        return None;
    }

    side.sort_by(|a, b| {
        b.confidence
            .total_cmp(&a.confidence)
            .then(a.strategy.cmp(&b.strategy))
    });

    Some(AggregatedSignal {
        symbol: symbol.to_string(),
        action,
        confidence: combined,
        contributors: side,
        generated_at,
    })
}

/// Display ordering for a batch of aggregated signals: confidence
/// descending, ties broken by symbol ascending.
pub fn rank(mut signals: Vec<AggregatedSignal>) -> Vec<AggregatedSignal> {
    signals.sort_by(|a, b| {
        b.confidence
            .total_cmp(&a.confidence)
            .then_with(|| a.symbol.cmp(&b.symbol))
    });
    signals
}
