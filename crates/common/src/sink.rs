use async_trait::async_trait;

use crate::AggregatedSignal;

/// Outbound boundary to the external notification layer.
///
/// The engine delivers each qualifying `AggregatedSignal` to every
/// registered sink, best-effort. A sink must never assume it sees every
/// signal: production does not block on delivery, and signals queued
/// behind a slow sink may be dropped.
#[async_trait]
pub trait SignalSink: Send + Sync {
    async fn deliver(&self, signal: &AggregatedSignal);
}
