//! On-demand aggregation for the debug inspector. Everything here is
//! pulled per request and never retained.

use crate::status::{derive_status, ServerStatus};
use serde::Serialize;
use turbo_bridge::{AnalysisBridge, CombinedCacheStats, RecentDiagnosticsSummary};
use turbo_checker_pool::WorkerStatus;
use turbo_logging::{LogEntry, StructuredLogger};
use turbo_protocol::TurboConfig;
use turbo_trace::SpanSnapshot;

const RECENT_TRACES: usize = 20;
const RECENT_DIAGNOSTICS: usize = 20;
const RECENT_LOGS: usize = 50;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InspectorData {
    pub status: ServerStatus,
    pub cache: CombinedCacheStats,
    pub processes: Vec<WorkerStatus>,
    pub recent_traces: Vec<SpanSnapshot>,
    pub recent_diagnostics: Vec<RecentDiagnosticsSummary>,
    pub recent_logs: Vec<LogEntry>,
    pub config: TurboConfig,
}

pub fn collect(bridge: &AnalysisBridge, logger: &StructuredLogger) -> InspectorData {
    let status = bridge.status();
    InspectorData {
        status: derive_status(&status),
        cache: bridge.cache_stats(),
        processes: bridge.worker_statuses(),
        recent_traces: bridge.recent_traces(RECENT_TRACES),
        recent_diagnostics: bridge.recent_diagnostics(RECENT_DIAGNOSTICS),
        recent_logs: logger.recent(RECENT_LOGS),
        config: bridge.config(),
    }
}
