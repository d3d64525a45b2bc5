//! Fire-and-forget query telemetry.

use serde::Serialize;

/// One upstream query as seen by the executor.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryEvent {
    pub resource: String,
    pub path: String,
    /// Upstream status; `None` when the request never got a response.
    pub status: Option<u16>,
    pub elapsed_ms: u64,
    pub result_count: Option<u64>,
    pub rql: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
    pub order: Option<String>,
    pub select: Option<String>,
    /// The result came from the audit-select rollback.
    pub retried: bool,
}

/// Receives query events. Implementations must not block or fail the caller.
pub trait AnalyticsSink: Send + Sync {
    fn record(&self, event: &QueryEvent);
}

/// Logs events at target `marketplace::analytics`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl AnalyticsSink for TracingSink {
    fn record(&self, event: &QueryEvent) {
        tracing::info!(
            target: "marketplace::analytics",
            resource = %event.resource,
            path = %event.path,
            status = ?event.status,
            elapsed_ms = event.elapsed_ms,
            result_count = ?event.result_count,
            select = ?event.select,
            retried = event.retried,
            "api query"
        );
    }
}

/// Drops every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSink;

impl AnalyticsSink for NoopSink {
    fn record(&self, _event: &QueryEvent) {}
}
