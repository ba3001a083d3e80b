//! The six indicator strategies and the shared series math they build on.

pub mod bollinger;
pub mod harmonic;
pub mod ichimoku;
pub mod macd;
pub mod rsi;
pub mod volume_profile;

pub use bollinger::BollingerStrategy;
pub use harmonic::HarmonicStrategy;
pub use ichimoku::IchimokuStrategy;
pub use macd::MacdStrategy;
pub use rsi::RsiStrategy;
pub use volume_profile::VolumeProfileStrategy;

use common::Candle;

/// Clamp a confidence component into [0, 1]. Non-finite values (from a
/// degenerate ratio upstream) collapse to 0 so one bad component can
/// never poison a whole evaluation.
pub(crate) fn clamp01(x: f64) -> f64 {
    if x.is_finite() {
        x.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

/// `num / den` clamped to [0, 1]; 0 when the denominator is not a
/// usable positive value (zero band width, zero price range).
pub(crate) fn ratio01(num: f64, den: f64) -> f64 {
    if den > f64::EPSILON {
        clamp01(num / den)
    } else {
        0.0
    }
}

pub(crate) fn closes(window: &[Candle]) -> Vec<f64> {
    window.iter().map(|c| c.close).collect()
}

/// Mean of the last `period` values.
pub(crate) fn sma(data: &[f64], period: usize) -> f64 {
    let n = period.min(data.len());
    if n == 0 {
        return 0.0;
    }
    data[data.len() - n..].iter().sum::<f64>() / n as f64
}

/// Population standard deviation of the last `period` values.
pub(crate) fn stddev(data: &[f64], period: usize) -> f64 {
    let n = period.min(data.len());
    if n == 0 {
        return 0.0;
    }
    let slice = &data[data.len() - n..];
    let mean = slice.iter().sum::<f64>() / n as f64;
    let var = slice.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n as f64;
    var.sqrt()
}

/// Exponential Moving Average of the last `period` values in `data`.
pub(crate) fn ema(data: &[f64], period: usize) -> f64 {
    if data.is_empty() || period == 0 {
        return 0.0;
    }
    let k = 2.0 / (period as f64 + 1.0);
    let start = data.len().saturating_sub(period * 3); // enough history
    let slice = &data[start..];

    // Seed with SMA of first `period` values
    let seed_len = period.min(slice.len());
    let mut ema_val: f64 = slice[..seed_len].iter().sum::<f64>() / seed_len as f64;

    for &price in &slice[seed_len..] {
        ema_val = price * k + ema_val * (1.0 - k);
    }
    ema_val
}

/// Midpoint of the highest high and lowest low over the last `period`
/// candles ending at `upto` (inclusive). The window saturates to the
/// candles actually available.
pub(crate) fn hl_midpoint(window: &[Candle], upto: usize, period: usize) -> f64 {
    let start = (upto + 1).saturating_sub(period);
    let slice = &window[start..=upto];
    let high = slice.iter().map(|c| c.high).fold(f64::MIN, f64::max);
    let low = slice.iter().map(|c| c.low).fold(f64::MAX, f64::min);
    (high + low) / 2.0
}

/// Highest high minus lowest low over the last `period` candles.
pub(crate) fn price_range(window: &[Candle], period: usize) -> f64 {
    let n = period.min(window.len());
    let slice = &window[window.len() - n..];
    let high = slice.iter().map(|c| c.high).fold(f64::MIN, f64::max);
    let low = slice.iter().map(|c| c.low).fold(f64::MAX, f64::min);
    high - low
}

#[cfg(test)]
pub(crate) mod testutil {
    use chrono::{Duration, TimeZone, Utc};
    use common::Candle;

    /// Build candles from close prices, one hour apart, with a small
    /// high/low envelope around each close.
    pub fn candles_from_closes(closes: &[f64]) -> Vec<Candle> {
        let base = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        closes
            .iter()
            .enumerate()
            .map(|(i, &close)| Candle {
                open: close,
                high: close + 0.5,
                low: close - 0.5,
                close,
                volume: 1_000.0,
                close_time: base + Duration::hours(i as i64),
            })
            .collect()
    }
}
