use std::collections::BTreeMap;

use common::{Action, Candle, StrategyId, StrategySignal};

use crate::{Evaluation, Strategy};

use super::{hl_midpoint, price_range, ratio01};

/// Ichimoku Cloud strategy with crypto-optimized periods.
///
/// Tenkan/Kijun are high-low midpoints over their periods; the cloud is
/// the pair of Senkou spans projected `displacement` bars forward, so
/// the cloud under the current bar is read from spans computed
/// `displacement` bars back. Rolling windows saturate to the candles
/// available, which lets a minimum-size window evaluate without the
/// full span history.
///
/// A close beyond the cloud, confirmed by Tenkan sitting on the same
/// side of Kijun, signals in the breakout direction. Confidence weighs
/// the distance from the cloud edge, the Tenkan/Kijun separation, and
/// the cloud thickness, each normalized by the recent price range.
#[derive(Debug, Clone)]
pub struct IchimokuStrategy {
    tenkan_period: usize,
    kijun_period: usize,
    senkou_period: usize,
    displacement: usize,
}

const DISTANCE_WEIGHT: f64 = 0.40;
const TK_WEIGHT: f64 = 0.30;
const THICKNESS_WEIGHT: f64 = 0.30;

impl IchimokuStrategy {
    pub fn new(
        tenkan_period: usize,
        kijun_period: usize,
        senkou_period: usize,
        displacement: usize,
    ) -> Self {
        assert!(
            tenkan_period < kijun_period && kijun_period < senkou_period,
            "Ichimoku periods must be strictly increasing"
        );
        assert!(displacement < senkou_period, "displacement must fit inside the cloud span");
        Self {
            tenkan_period,
            kijun_period,
            senkou_period,
            displacement,
        }
    }
}

impl Strategy for IchimokuStrategy {
    fn id(&self) -> StrategyId {
        StrategyId::Ichimoku
    }

    fn min_candles(&self) -> usize {
        self.senkou_period
    }

    fn evaluate(&self, window: &[Candle]) -> Evaluation {
        if window.len() < self.min_candles() {
            return Evaluation::Insufficient;
        }
        let i = window.len() - 1;
        let close = window[i].close;

        let tenkan = hl_midpoint(window, i, self.tenkan_period);
        let kijun = hl_midpoint(window, i, self.kijun_period);

        // Cloud under the current bar: spans computed `displacement` bars back.
        let j = i - self.displacement;
        let senkou_a =
            (hl_midpoint(window, j, self.tenkan_period) + hl_midpoint(window, j, self.kijun_period))
                / 2.0;
        let senkou_b = hl_midpoint(window, j, self.senkou_period);
        let cloud_top = senkou_a.max(senkou_b);
        let cloud_bottom = senkou_a.min(senkou_b);

        let range = price_range(window, self.kijun_period);

        let mut metrics = BTreeMap::new();
        metrics.insert("tenkan".to_string(), tenkan);
        metrics.insert("kijun".to_string(), kijun);
        metrics.insert("senkou_a".to_string(), senkou_a);
        metrics.insert("senkou_b".to_string(), senkou_b);
        metrics.insert("cloud_thickness".to_string(), cloud_top - cloud_bottom);

        let (action, distance) = if close > cloud_top && tenkan > kijun {
            (Action::Buy, ratio01(close - cloud_top, range))
        } else if close < cloud_bottom && tenkan < kijun {
            (Action::Sell, ratio01(cloud_bottom - close, range))
        } else {
            return Evaluation::Signal(StrategySignal::neutral(StrategyId::Ichimoku, metrics));
        };

        let tk_strength = ratio01((tenkan - kijun).abs(), range);
        let thickness = ratio01(cloud_top - cloud_bottom, range);
        let confidence =
            DISTANCE_WEIGHT * distance + TK_WEIGHT * tk_strength + THICKNESS_WEIGHT * thickness;

        Evaluation::Signal(StrategySignal::new(StrategyId::Ichimoku, action, confidence, metrics))
    }
}
