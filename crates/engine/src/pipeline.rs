use std::collections::BTreeMap;

use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use common::{AggregatedSignal, Candle, Interval, StrategyId};
use strategy::{build, Evaluation, Strategy, StrategyConfig};

use crate::store::{PriceWindow, WindowUpdate};

/// Control changes serialized through a pipeline. Applied between candle
/// evaluations, never mid-evaluation.
pub(crate) enum PipelineCtrl {
    /// Full desired (id, config) set for this symbol.
    SetStrategies(Vec<(StrategyId, StrategyConfig)>),
    /// Re-establish the window on a new interval, dropping history.
    SetInterval(Interval),
}

/// One evaluation pipeline per symbol: owns the symbol's window and
/// strategy instances, and serializes store update → evaluation →
/// aggregation → dispatch for one candle at a time.
///
/// Candles arrive on a watch channel, so a pipeline that falls behind
/// the feed naturally coalesces to the latest candle instead of queueing
/// unboundedly. Control messages are drained before the next candle is
/// picked up.
pub(crate) struct Pipeline {
    symbol: String,
    window: PriceWindow,
    configs: Vec<(StrategyId, StrategyConfig)>,
    strategies: Vec<Box<dyn Strategy>>,
    weights: BTreeMap<StrategyId, f64>,
    ctrl_rx: mpsc::Receiver<PipelineCtrl>,
    candle_rx: watch::Receiver<Option<(Interval, Candle)>>,
    signal_tx: mpsc::Sender<AggregatedSignal>,
}

impl Pipeline {
    pub(crate) fn new(
        symbol: impl Into<String>,
        interval: Interval,
        configs: Vec<(StrategyId, StrategyConfig)>,
        ctrl_rx: mpsc::Receiver<PipelineCtrl>,
        candle_rx: watch::Receiver<Option<(Interval, Candle)>>,
        signal_tx: mpsc::Sender<AggregatedSignal>,
    ) -> Self {
        let symbol = symbol.into();
        let strategies: Vec<Box<dyn Strategy>> =
            configs.iter().map(|(id, cfg)| build(*id, cfg)).collect();
        let capacity = strategies.iter().map(|s| s.min_candles()).max().unwrap_or(0);
        let weights = resolve_weights(&configs);
        Self {
            window: PriceWindow::new(symbol.clone(), interval, capacity),
            symbol,
            configs,
            strategies,
            weights,
            ctrl_rx,
            candle_rx,
            signal_tx,
        }
    }

    /// Run the pipeline loop. Call from `tokio::spawn`. Exits when both
    /// inbound channels close.
    pub(crate) async fn run(mut self) {
        debug!(symbol = %self.symbol, "pipeline started");
        loop {
            tokio::select! {
                // Control first: a subscription change queued before the
                // next candle must be visible to that candle's evaluation.
                biased;

                ctrl = self.ctrl_rx.recv() => match ctrl {
                    Some(ctrl) => self.apply_ctrl(ctrl),
                    None => {
                        debug!(symbol = %self.symbol, "control channel closed — pipeline exiting");
                        return;
                    }
                },

                changed = self.candle_rx.changed() => {
                    if changed.is_err() {
                        debug!(symbol = %self.symbol, "candle channel closed — pipeline exiting");
                        return;
                    }
                    let latest = self.candle_rx.borrow_and_update().clone();
                    if let Some((interval, candle)) = latest {
                        self.on_candle(interval, candle);
                    }
                }
            }
        }
    }

    fn apply_ctrl(&mut self, ctrl: PipelineCtrl) {
        match ctrl {
            PipelineCtrl::SetStrategies(desired) => {
                if desired == self.configs {
                    debug!(symbol = %self.symbol, "strategy set unchanged");
                    return;
                }
                self.strategies = desired.iter().map(|(id, cfg)| build(*id, cfg)).collect();
                self.weights = resolve_weights(&desired);
                self.configs = desired;
                let capacity = self
                    .strategies
                    .iter()
                    .map(|s| s.min_candles())
                    .max()
                    .unwrap_or(0);
                self.window.set_capacity(capacity);
                info!(
                    symbol = %self.symbol,
                    strategies = ?self.configs.iter().map(|(id, _)| id.as_str()).collect::<Vec<_>>(),
                    capacity,
                    "active strategies updated"
                );
            }
            PipelineCtrl::SetInterval(interval) => {
                if interval == self.window.interval() {
                    return;
                }
                info!(symbol = %self.symbol, %interval, "interval changed — window re-established");
                self.window.reset(interval);
            }
        }
    }

    fn on_candle(&mut self, interval: Interval, candle: Candle) {
        let snapshot = match self.window.update(interval, candle) {
            Ok(WindowUpdate::Appended(snapshot)) => snapshot,
            Ok(WindowUpdate::Stale(_)) => return,
            Err(e) => {
                warn!(symbol = %self.symbol, error = %e, "candle rejected");
                return;
            }
        };
        if self.strategies.is_empty() {
            return;
        }

        let mut signals = Vec::with_capacity(self.strategies.len());
        for strat in &self.strategies {
            match strat.evaluate(&snapshot) {
                Evaluation::Signal(signal) => signals.push(signal),
                Evaluation::Insufficient => debug!(
                    symbol = %self.symbol,
                    strategy = %strat.id(),
                    have = snapshot.len(),
                    need = strat.min_candles(),
                    "insufficient data"
                ),
            }
        }

        let Some(aggregated) =
            aggregate::aggregate(&self.symbol, signals, &self.weights, candle.close_time)
        else {
            return;
        };

        // Best-effort dispatch: production never blocks on delivery.
        match self.signal_tx.try_send(aggregated) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(signal)) => {
                warn!(symbol = %signal.symbol, "signal channel full — dropping signal");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!(symbol = %self.symbol, "signal channel closed");
            }
        }
    }
}

fn resolve_weights(configs: &[(StrategyId, StrategyConfig)]) -> BTreeMap<StrategyId, f64> {
    configs
        .iter()
        .map(|(id, cfg)| (*id, aggregate::base_weight(*id, cfg.base_weight)))
        .collect()
}
