use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use common::{AggregatedSignal, SignalSink};

/// Fans aggregated signals out to the registered sinks.
///
/// A single consumer task preserves the per-symbol emission order;
/// sinks are awaited sequentially, so a slow sink delays later
/// deliveries but never signal production (pipelines drop on a full
/// channel instead of blocking).
pub struct Dispatcher {
    signal_rx: mpsc::Receiver<AggregatedSignal>,
    sinks: Vec<Arc<dyn SignalSink>>,
}

impl Dispatcher {
    pub(crate) fn new(
        signal_rx: mpsc::Receiver<AggregatedSignal>,
        sinks: Vec<Arc<dyn SignalSink>>,
    ) -> Self {
        Self { signal_rx, sinks }
    }

    /// Run the dispatch loop. Call from `tokio::spawn`.
    pub async fn run(mut self) {
        info!(sinks = self.sinks.len(), "Dispatcher running");
        while let Some(signal) = self.signal_rx.recv().await {
            debug!(
                symbol = %signal.symbol,
                action = %signal.action,
                confidence = signal.confidence,
                "dispatching signal"
            );
            for sink in &self.sinks {
                sink.deliver(&signal).await;
            }
        }
        warn!("Dispatcher: signal channel closed");
    }
}

/// Default sink: renders each signal as a structured log line. Stands in
/// for the external notification layer.
pub struct LogSink;

#[async_trait]
impl SignalSink for LogSink {
    async fn deliver(&self, signal: &AggregatedSignal) {
        let strategies: Vec<&str> = signal
            .contributors
            .iter()
            .map(|c| c.strategy.as_str())
            .collect();
        info!(
            symbol = %signal.symbol,
            action = %signal.action,
            confidence = %format!("{:.2}", signal.confidence),
            ?strategies,
            at = %signal.generated_at,
            "aggregated signal"
        );
    }
}
