pub mod bridge;
pub mod error;
mod queue;

pub use bridge::{
    AnalysisBridge, BridgeOptions, BridgeStatus, CombinedCacheStats, RecentDiagnosticsSummary,
};
pub use error::{BridgeError, Result};
