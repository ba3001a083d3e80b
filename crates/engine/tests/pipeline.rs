use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, TimeZone, Utc};
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};

use common::{Action, AggregatedSignal, Candle, Interval, SignalSink, StrategyId};
use engine::Engine;
use strategy::StrategyRegistry;

const SYMBOL: &str = "TESTUSDT";

struct TestSink(mpsc::Sender<AggregatedSignal>);

#[async_trait]
impl SignalSink for TestSink {
    async fn deliver(&self, signal: &AggregatedSignal) {
        let _ = self.0.send(signal.clone()).await;
    }
}

fn hour() -> Interval {
    Interval::parse("60").unwrap()
}

/// Declining closes force RSI to 0: every evaluated window is a
/// confident Buy, so signal presence tracks evaluation exactly.
fn declining_candle(i: i64) -> Candle {
    let base = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    let close = 500.0 - i as f64;
    Candle {
        open: close + 1.0,
        high: close + 1.5,
        low: close - 0.5,
        close,
        volume: 1_000.0,
        close_time: base + ChronoDuration::hours(i),
    }
}

async fn start_engine() -> (engine::EngineHandle, mpsc::Receiver<AggregatedSignal>) {
    let (mut eng, handle) = Engine::new(StrategyRegistry::empty(), hour());
    let (sink_tx, sink_rx) = mpsc::channel(256);
    eng.on_aggregated_signal(Arc::new(TestSink(sink_tx)));
    tokio::spawn(eng.run());
    (handle, sink_rx)
}

async fn expect_signal(rx: &mut mpsc::Receiver<AggregatedSignal>) -> AggregatedSignal {
    timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("timed out waiting for signal")
        .expect("signal channel closed")
}

async fn expect_silence(rx: &mut mpsc::Receiver<AggregatedSignal>) {
    let outcome = timeout(Duration::from_millis(200), rx.recv()).await;
    assert!(outcome.is_err(), "unexpected signal: {:?}", outcome);
}

#[tokio::test]
async fn signals_flow_in_close_time_order() {
    let (handle, mut signals) = start_engine().await;
    let active = handle.subscribe(Some(SYMBOL), &[StrategyId::Rsi]).await;
    assert_eq!(active, vec![StrategyId::Rsi]);

    // Window filling: below min_candles nothing can be emitted.
    for i in 0..14 {
        handle.ingest(SYMBOL, hour(), declining_candle(i)).await;
        sleep(Duration::from_millis(10)).await;
    }
    expect_silence(&mut signals).await;

    // From the 15th candle on, every update yields one Buy signal in
    // close_time order.
    let mut last_emitted = None;
    for i in 14..24 {
        let candle = declining_candle(i);
        handle.ingest(SYMBOL, hour(), candle).await;
        let signal = expect_signal(&mut signals).await;
        assert_eq!(signal.symbol, SYMBOL);
        assert_eq!(signal.action, Action::Buy);
        assert_eq!(signal.generated_at, candle.close_time);
        assert!((0.0..=1.0).contains(&signal.confidence));
        let ids: Vec<StrategyId> = signal.contributors.iter().map(|c| c.strategy).collect();
        assert_eq!(ids, vec![StrategyId::Rsi]);
        if let Some(prev) = last_emitted {
            assert!(signal.generated_at > prev, "signals re-ordered");
        }
        last_emitted = Some(signal.generated_at);
    }
}

#[tokio::test]
async fn burst_feed_coalesces_without_reordering() {
    let (handle, mut signals) = start_engine().await;
    handle.subscribe(Some(SYMBOL), &[StrategyId::Rsi]).await;

    // Flood the pipeline faster than it evaluates: it may skip to the
    // latest candle, but every emitted signal must still map to a fed
    // candle and arrive in close_time order.
    for i in 0..60 {
        handle.ingest(SYMBOL, hour(), declining_candle(i)).await;
    }
    // Then a paced tail so the window is guaranteed to fill.
    for i in 60..75 {
        handle.ingest(SYMBOL, hour(), declining_candle(i)).await;
        sleep(Duration::from_millis(10)).await;
    }
    sleep(Duration::from_millis(200)).await;

    let fed_times: Vec<_> = (0..75).map(|i| declining_candle(i).close_time).collect();
    let mut received = Vec::new();
    while let Ok(signal) = signals.try_recv() {
        received.push(signal);
    }
    assert!(!received.is_empty(), "paced tail must produce signals");
    assert!(received.len() <= 75 - 14, "more signals than evaluable candles");
    assert!(received
        .windows(2)
        .all(|w| w[0].generated_at < w[1].generated_at));
    assert!(received
        .iter()
        .all(|s| fed_times.contains(&s.generated_at)));
}

#[tokio::test]
async fn duplicate_candle_produces_no_second_signal() {
    let (handle, mut signals) = start_engine().await;
    handle.subscribe(Some(SYMBOL), &[StrategyId::Rsi]).await;

    for i in 0..14 {
        handle.ingest(SYMBOL, hour(), declining_candle(i)).await;
        sleep(Duration::from_millis(10)).await;
    }
    handle.ingest(SYMBOL, hour(), declining_candle(14)).await;
    expect_signal(&mut signals).await;

    // At-least-once delivery: the same candle again is absorbed.
    handle.ingest(SYMBOL, hour(), declining_candle(14)).await;
    expect_silence(&mut signals).await;

    handle.ingest(SYMBOL, hour(), declining_candle(15)).await;
    expect_signal(&mut signals).await;
}

#[tokio::test]
async fn unsubscribe_is_observed_on_the_next_candle() {
    let (handle, mut signals) = start_engine().await;
    let active = handle
        .subscribe(Some(SYMBOL), &[StrategyId::Rsi, StrategyId::Ichimoku])
        .await;
    assert_eq!(active, vec![StrategyId::Rsi, StrategyId::Ichimoku]);

    for i in 0..14 {
        handle.ingest(SYMBOL, hour(), declining_candle(i)).await;
        sleep(Duration::from_millis(10)).await;
    }
    for i in 14..18 {
        handle.ingest(SYMBOL, hour(), declining_candle(i)).await;
        let signal = expect_signal(&mut signals).await;
        // Ichimoku is still short of its 120 candles; only RSI speaks.
        let ids: Vec<StrategyId> = signal.contributors.iter().map(|c| c.strategy).collect();
        assert_eq!(ids, vec![StrategyId::Rsi]);
    }

    // Dropping Ichimoku leaves RSI untouched.
    let active = handle
        .unsubscribe(Some(SYMBOL), Some(&[StrategyId::Ichimoku]))
        .await;
    assert_eq!(active, vec![StrategyId::Rsi]);
    for i in 18..21 {
        handle.ingest(SYMBOL, hour(), declining_candle(i)).await;
        expect_signal(&mut signals).await;
    }

    // Dropping everything silences the pipeline from the next candle.
    let active = handle.unsubscribe(Some(SYMBOL), None).await;
    assert!(active.is_empty());
    for i in 21..25 {
        handle.ingest(SYMBOL, hour(), declining_candle(i)).await;
        sleep(Duration::from_millis(10)).await;
    }
    expect_silence(&mut signals).await;
}

#[tokio::test]
async fn set_interval_reestablishes_the_window() {
    let (handle, mut signals) = start_engine().await;
    handle.subscribe(Some(SYMBOL), &[StrategyId::Rsi]).await;

    for i in 0..14 {
        handle.ingest(SYMBOL, hour(), declining_candle(i)).await;
        sleep(Duration::from_millis(10)).await;
    }
    handle.ingest(SYMBOL, hour(), declining_candle(14)).await;
    expect_signal(&mut signals).await;

    // Interval change drops the window; history must refill before
    // anything is emitted again.
    let minute = Interval::parse("1").unwrap();
    handle.set_interval(Some(SYMBOL), minute).await;

    let base = Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap();
    let minute_candle = |i: i64| Candle {
        close_time: base + ChronoDuration::minutes(i),
        ..declining_candle(i)
    };
    for i in 0..14 {
        handle.ingest(SYMBOL, minute, minute_candle(i)).await;
        sleep(Duration::from_millis(10)).await;
    }
    expect_silence(&mut signals).await;

    // A candle on the stale interval is rejected outright.
    handle.ingest(SYMBOL, hour(), declining_candle(40)).await;
    expect_silence(&mut signals).await;

    handle.ingest(SYMBOL, minute, minute_candle(14)).await;
    expect_signal(&mut signals).await;
}
