pub mod dispatch;
pub mod pipeline;
pub mod store;

pub use dispatch::{Dispatcher, LogSink};
pub use store::{PriceWindow, WindowUpdate};

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch, RwLock};
use tracing::{info, warn};

use common::{AggregatedSignal, Candle, Interval, SignalSink, StrategyId};
use strategy::StrategyRegistry;

use crate::pipeline::{Pipeline, PipelineCtrl};

/// Commands serialized through the engine's command channel. Candle
/// routing and control changes share the channel, so a control change
/// issued after a candle is routed after it too.
pub enum EngineCommand {
    Candle {
        symbol: String,
        interval: Interval,
        candle: Candle,
    },
    Subscribe {
        symbol: Option<String>,
        strategies: Vec<StrategyId>,
        resp: oneshot::Sender<Vec<StrategyId>>,
    },
    Unsubscribe {
        symbol: Option<String>,
        strategies: Option<Vec<StrategyId>>,
        resp: oneshot::Sender<Vec<StrategyId>>,
    },
    SetInterval {
        symbol: Option<String>,
        interval: Interval,
        resp: oneshot::Sender<()>,
    },
}

/// Cloneable handle passed to the feed and control collaborators.
#[derive(Clone)]
pub struct EngineHandle {
    command_tx: mpsc::Sender<EngineCommand>,
    registry: Arc<RwLock<StrategyRegistry>>,
}

impl EngineHandle {
    /// Inbound feed boundary: offer one closed candle.
    pub async fn ingest(&self, symbol: impl Into<String>, interval: Interval, candle: Candle) {
        let _ = self
            .command_tx
            .send(EngineCommand::Candle {
                symbol: symbol.into(),
                interval,
                candle,
            })
            .await;
    }

    /// Activate strategies for a symbol, or for all tracked symbols when
    /// `symbol` is `None`. Returns the resulting active set.
    pub async fn subscribe(
        &self,
        symbol: Option<&str>,
        strategies: &[StrategyId],
    ) -> Vec<StrategyId> {
        let (resp, rx) = oneshot::channel();
        let _ = self
            .command_tx
            .send(EngineCommand::Subscribe {
                symbol: symbol.map(Into::into),
                strategies: strategies.to_vec(),
                resp,
            })
            .await;
        rx.await.unwrap_or_default()
    }

    /// Deactivate strategies (all when `strategies` is `None`) for a
    /// symbol or for all tracked symbols. Returns the resulting set.
    pub async fn unsubscribe(
        &self,
        symbol: Option<&str>,
        strategies: Option<&[StrategyId]>,
    ) -> Vec<StrategyId> {
        let (resp, rx) = oneshot::channel();
        let _ = self
            .command_tx
            .send(EngineCommand::Unsubscribe {
                symbol: symbol.map(Into::into),
                strategies: strategies.map(|s| s.to_vec()),
                resp,
            })
            .await;
        rx.await.unwrap_or_default()
    }

    /// Change candle interval; the affected windows are re-established
    /// and refill from the feed.
    pub async fn set_interval(&self, symbol: Option<&str>, interval: Interval) {
        let (resp, rx) = oneshot::channel();
        let _ = self
            .command_tx
            .send(EngineCommand::SetInterval {
                symbol: symbol.map(Into::into),
                interval,
                resp,
            })
            .await;
        let _ = rx.await;
    }

    /// Currently active strategies for a symbol.
    pub async fn active(&self, symbol: &str) -> Vec<StrategyId> {
        self.registry.read().await.active(symbol)
    }
}

struct PipelineHandles {
    candle_tx: watch::Sender<Option<(Interval, Candle)>>,
    ctrl_tx: mpsc::Sender<PipelineCtrl>,
    task: tokio::task::JoinHandle<()>,
}

/// The signal engine: spawns one pipeline per symbol as candles arrive
/// and routes control changes through the same per-symbol channels.
pub struct Engine {
    registry: Arc<RwLock<StrategyRegistry>>,
    default_interval: Interval,
    /// Per-symbol interval overrides for pipelines not yet spawned.
    intervals: HashMap<String, Interval>,
    command_rx: mpsc::Receiver<EngineCommand>,
    signal_tx: mpsc::Sender<AggregatedSignal>,
    signal_rx: Option<mpsc::Receiver<AggregatedSignal>>,
    sinks: Vec<Arc<dyn SignalSink>>,
    pipelines: HashMap<String, PipelineHandles>,
}

impl Engine {
    const COMMAND_BUFFER: usize = 1024;
    const SIGNAL_BUFFER: usize = 256;

    pub fn new(registry: StrategyRegistry, default_interval: Interval) -> (Self, EngineHandle) {
        let (command_tx, command_rx) = mpsc::channel(Self::COMMAND_BUFFER);
        let (signal_tx, signal_rx) = mpsc::channel(Self::SIGNAL_BUFFER);
        let registry = Arc::new(RwLock::new(registry));

        let handle = EngineHandle {
            command_tx,
            registry: registry.clone(),
        };

        let engine = Engine {
            registry,
            default_interval,
            intervals: HashMap::new(),
            command_rx,
            signal_tx,
            signal_rx: Some(signal_rx),
            sinks: Vec::new(),
            pipelines: HashMap::new(),
        };

        (engine, handle)
    }

    /// Register an outbound sink. Call before `run`.
    pub fn on_aggregated_signal(&mut self, sink: Arc<dyn SignalSink>) {
        self.sinks.push(sink);
    }

    /// Run the engine. Call from `tokio::spawn`. Exits when every handle
    /// is dropped.
    pub async fn run(mut self) {
        let Some(signal_rx) = self.signal_rx.take() else {
            warn!("Engine started twice — ignoring");
            return;
        };
        tokio::spawn(Dispatcher::new(signal_rx, std::mem::take(&mut self.sinks)).run());

        info!(interval = %self.default_interval, "Engine running");
        while let Some(command) = self.command_rx.recv().await {
            match command {
                EngineCommand::Candle {
                    symbol,
                    interval,
                    candle,
                } => self.route_candle(symbol, interval, candle).await,

                EngineCommand::Subscribe {
                    symbol,
                    strategies,
                    resp,
                } => {
                    let result = {
                        let mut registry = self.registry.write().await;
                        registry.subscribe(symbol.as_deref(), &strategies)
                    };
                    self.refresh_pipelines(symbol.as_deref()).await;
                    let _ = resp.send(result);
                }

                EngineCommand::Unsubscribe {
                    symbol,
                    strategies,
                    resp,
                } => {
                    let result = {
                        let mut registry = self.registry.write().await;
                        registry.unsubscribe(symbol.as_deref(), strategies.as_deref())
                    };
                    self.refresh_pipelines(symbol.as_deref()).await;
                    let _ = resp.send(result);
                }

                EngineCommand::SetInterval {
                    symbol,
                    interval,
                    resp,
                } => {
                    self.apply_interval(symbol.as_deref(), interval).await;
                    let _ = resp.send(());
                }
            }
        }

        warn!("Engine command channel closed — shutting down pipelines");
        for (_, handles) in self.pipelines.drain() {
            drop(handles.ctrl_tx);
            drop(handles.candle_tx);
            handles.task.abort();
        }
    }

    async fn route_candle(&mut self, symbol: String, interval: Interval, candle: Candle) {
        if !self.pipelines.contains_key(&symbol) {
            let handles = self.spawn_pipeline(&symbol).await;
            self.pipelines.insert(symbol.clone(), handles);
        }
        if let Some(handles) = self.pipelines.get(&symbol) {
            // watch semantics coalesce: a pipeline that cannot keep pace
            // evaluates only the latest candle.
            let _ = handles.candle_tx.send(Some((interval, candle)));
        }
    }

    async fn spawn_pipeline(&self, symbol: &str) -> PipelineHandles {
        let configs = self.registry.read().await.active_configs(symbol);
        let interval = self
            .intervals
            .get(symbol)
            .copied()
            .unwrap_or(self.default_interval);

        let (candle_tx, candle_rx) = watch::channel(None);
        let (ctrl_tx, ctrl_rx) = mpsc::channel(16);
        let pipeline = Pipeline::new(
            symbol,
            interval,
            configs,
            ctrl_rx,
            candle_rx,
            self.signal_tx.clone(),
        );
        info!(symbol, %interval, "pipeline spawned");
        PipelineHandles {
            candle_tx,
            ctrl_tx,
            task: tokio::spawn(pipeline.run()),
        }
    }

    /// Push fresh strategy snapshots to the affected pipelines so the
    /// change lands between two candle evaluations.
    async fn refresh_pipelines(&mut self, symbol: Option<&str>) {
        let registry = self.registry.clone();
        match symbol {
            Some(symbol) => {
                if let Some(handles) = self.pipelines.get(symbol) {
                    let configs = registry.read().await.active_configs(symbol);
                    let _ = handles.ctrl_tx.send(PipelineCtrl::SetStrategies(configs)).await;
                }
            }
            None => {
                for (symbol, handles) in &self.pipelines {
                    let configs = registry.read().await.active_configs(symbol);
                    let _ = handles.ctrl_tx.send(PipelineCtrl::SetStrategies(configs)).await;
                }
            }
        }
    }

    async fn apply_interval(&mut self, symbol: Option<&str>, interval: Interval) {
        match symbol {
            Some(symbol) => {
                self.intervals.insert(symbol.to_string(), interval);
                if let Some(handles) = self.pipelines.get(symbol) {
                    let _ = handles.ctrl_tx.send(PipelineCtrl::SetInterval(interval)).await;
                }
            }
            None => {
                self.default_interval = interval;
                self.intervals.clear();
                for handles in self.pipelines.values() {
                    let _ = handles.ctrl_tx.send(PipelineCtrl::SetInterval(interval)).await;
                }
            }
        }
    }
}
