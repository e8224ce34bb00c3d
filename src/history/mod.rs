//! Run history sink
//!
//! The engine hands every finished `DagRunResult` to a `HistorySink`.
//! Recording is fire-and-forget: a failing sink is logged and never fails
//! the run it describes.

pub mod store;

use crate::runtime::DagRunResult;
use anyhow::Result;
use async_trait::async_trait;

pub use store::{NodeRunRecord, RunRecord, SqliteHistoryStore};

/// Destination for structured run records
#[async_trait]
pub trait HistorySink: Send + Sync {
    async fn record_run(&self, workflow_id: &str, result: &DagRunResult) -> Result<()>;
}

/// Record a run, logging and swallowing any failure
///
/// Returns whether the record was written.
pub async fn record_run_history(sink: &dyn HistorySink, workflow_id: &str, result: &DagRunResult) -> bool {
    match sink.record_run(workflow_id, result).await {
        Ok(()) => {
            tracing::debug!(
                run_id = %result.run_id,
                "📝 Recorded run history for workflow '{}'",
                workflow_id
            );
            true
        }
        Err(e) => {
            tracing::error!(
                run_id = %result.run_id,
                "❌ Failed to record run history for workflow '{}': {}",
                workflow_id,
                e
            );
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::{OverallStatus, ScopeKind};
    use chrono::Utc;

    struct BrokenSink;

    #[async_trait]
    impl HistorySink for BrokenSink {
        async fn record_run(&self, _workflow_id: &str, _result: &DagRunResult) -> Result<()> {
            Err(anyhow::anyhow!("disk full"))
        }
    }

    #[tokio::test]
    async fn sink_failures_are_swallowed() {
        let result = DagRunResult {
            run_id: "r1".to_string(),
            started_at: Utc::now(),
            overall_status: OverallStatus::Success,
            scope: ScopeKind::Full,
            duration_ms: 0,
            node_results: vec![],
        };
        assert!(!record_run_history(&BrokenSink, "wf-1", &result).await);
    }
}
