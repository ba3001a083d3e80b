use std::collections::VecDeque;
use std::sync::Arc;

use tracing::{debug, warn};

use common::{Candle, Error, Interval, Result};

/// Bounded, ordered candle history for one (symbol, interval) pair.
///
/// The window exclusively owns its candles; consumers only ever see
/// immutable snapshots. Candles are strictly increasing in close_time:
/// duplicate or out-of-order deliveries from the at-least-once feed are
/// absorbed without observable change. Missing candles are never
/// fabricated: a gap is logged and evaluation proceeds on what exists.
pub struct PriceWindow {
    symbol: String,
    interval: Interval,
    capacity: usize,
    candles: VecDeque<Candle>,
}

/// Result of offering a candle to the window.
pub enum WindowUpdate {
    /// Candle appended; evaluate against this snapshot.
    Appended(Arc<[Candle]>),
    /// Duplicate or out-of-order delivery; window unchanged.
    Stale(Arc<[Candle]>),
}

impl PriceWindow {
    pub fn new(symbol: impl Into<String>, interval: Interval, capacity: usize) -> Self {
        Self {
            symbol: symbol.into(),
            interval,
            capacity,
            candles: VecDeque::new(),
        }
    }

    pub fn interval(&self) -> Interval {
        self.interval
    }

    pub fn len(&self) -> usize {
        self.candles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Retarget the window capacity after a subscription change. Growth
    /// applies immediately (history simply accumulates, no backfill);
    /// shrinking evicts lazily on the next update.
    pub fn set_capacity(&mut self, capacity: usize) {
        self.capacity = capacity;
    }

    /// Drop all history and re-establish the window on a new interval.
    pub fn reset(&mut self, interval: Interval) {
        self.interval = interval;
        self.candles.clear();
    }

    /// Append a candle and return a snapshot for evaluation.
    ///
    /// A candle whose close_time does not advance the window is a no-op
    /// returning the current snapshot. A candle on the wrong interval is
    /// a configuration error; the caller must re-establish the window to
    /// change interval.
    pub fn update(&mut self, interval: Interval, candle: Candle) -> Result<WindowUpdate> {
        if interval != self.interval {
            return Err(Error::IntervalMismatch {
                symbol: self.symbol.clone(),
                expected: self.interval,
                got: interval,
            });
        }

        if let Some(last) = self.candles.back() {
            if candle.close_time <= last.close_time {
                debug!(
                    symbol = %self.symbol,
                    close_time = %candle.close_time,
                    "stale candle ignored"
                );
                return Ok(WindowUpdate::Stale(self.snapshot()));
            }
            if candle.close_time - last.close_time > self.interval.duration() {
                warn!(
                    symbol = %self.symbol,
                    last = %last.close_time,
                    next = %candle.close_time,
                    "feed gap detected — evaluating on available data"
                );
            }
        }

        self.candles.push_back(candle);
        while self.candles.len() > self.capacity {
            self.candles.pop_front();
        }
        Ok(WindowUpdate::Appended(self.snapshot()))
    }

    pub fn snapshot(&self) -> Arc<[Candle]> {
        self.candles.iter().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Duration, TimeZone, Utc};

    fn hour() -> Interval {
        Interval::parse("60").unwrap()
    }

    fn candle_at(i: i64) -> Candle {
        let base = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        Candle {
            open: 100.0,
            high: 101.0,
            low: 99.0,
            close: 100.0 + i as f64,
            volume: 1_000.0,
            close_time: base + Duration::hours(i),
        }
    }

    fn close_times(snapshot: &[Candle]) -> Vec<DateTime<Utc>> {
        snapshot.iter().map(|c| c.close_time).collect()
    }

    #[test]
    fn duplicate_delivery_is_a_no_op() {
        let mut w = PriceWindow::new("BTCUSDT", hour(), 10);
        w.update(hour(), candle_at(0)).unwrap();
        let before = w.snapshot();

        match w.update(hour(), candle_at(0)).unwrap() {
            WindowUpdate::Stale(snap) => {
                assert_eq!(close_times(&snap), close_times(&before));
            }
            WindowUpdate::Appended(_) => panic!("duplicate must not append"),
        }
        assert_eq!(w.len(), 1);
    }

    #[test]
    fn out_of_order_delivery_is_rejected() {
        let mut w = PriceWindow::new("BTCUSDT", hour(), 10);
        w.update(hour(), candle_at(5)).unwrap();
        assert!(matches!(
            w.update(hour(), candle_at(3)).unwrap(),
            WindowUpdate::Stale(_)
        ));
        assert_eq!(w.len(), 1);
    }

    #[test]
    fn oldest_candle_evicted_on_overflow() {
        let mut w = PriceWindow::new("BTCUSDT", hour(), 3);
        for i in 0..5 {
            w.update(hour(), candle_at(i)).unwrap();
        }
        assert_eq!(w.len(), 3);
        let snap = w.snapshot();
        assert_eq!(snap[0].close, 102.0);
        assert!(snap.windows(2).all(|p| p[0].close_time < p[1].close_time));
    }

    #[test]
    fn interval_mismatch_is_a_configuration_error() {
        let mut w = PriceWindow::new("BTCUSDT", hour(), 10);
        let minute = Interval::parse("1").unwrap();
        assert!(matches!(
            w.update(minute, candle_at(0)),
            Err(Error::IntervalMismatch { .. })
        ));
        assert!(w.is_empty());
    }

    #[test]
    fn capacity_shrink_applies_on_next_update() {
        let mut w = PriceWindow::new("BTCUSDT", hour(), 5);
        for i in 0..5 {
            w.update(hour(), candle_at(i)).unwrap();
        }
        w.set_capacity(2);
        // Lazy: nothing evicted until the next candle arrives.
        assert_eq!(w.len(), 5);
        w.update(hour(), candle_at(5)).unwrap();
        assert_eq!(w.len(), 2);
    }

    #[test]
    fn capacity_growth_keeps_history() {
        let mut w = PriceWindow::new("BTCUSDT", hour(), 2);
        for i in 0..4 {
            w.update(hour(), candle_at(i)).unwrap();
        }
        assert_eq!(w.len(), 2);
        w.set_capacity(4);
        w.update(hour(), candle_at(4)).unwrap();
        assert_eq!(w.len(), 3, "window refills toward the new capacity");
    }

    #[test]
    fn feed_gap_does_not_fabricate_candles() {
        let mut w = PriceWindow::new("BTCUSDT", hour(), 10);
        w.update(hour(), candle_at(0)).unwrap();
        w.update(hour(), candle_at(7)).unwrap();
        assert_eq!(w.len(), 2, "gap logged, nothing filled in");
    }

    #[test]
    fn reset_reestablishes_interval() {
        let mut w = PriceWindow::new("BTCUSDT", hour(), 10);
        w.update(hour(), candle_at(0)).unwrap();
        let minute = Interval::parse("1").unwrap();
        w.reset(minute);
        assert!(w.is_empty());
        assert_eq!(w.interval(), minute);
        assert!(w.update(minute, candle_at(1)).is_ok());
    }
}
