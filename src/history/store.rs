//! SQLite-backed run history
//!
//! One row per run in `workflow_runs`, one row per node result in
//! `node_runs`, written together in a transaction.

use crate::history::HistorySink;
use crate::runtime::DagRunResult;
use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use sqlx::{sqlite::SqlitePool, Row};

/// Stored run with its node results
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunRecord {
    pub id: String,
    pub workflow_id: String,
    pub status: String,
    pub scope: String,
    pub duration_ms: i64,
    pub started_at: String,
    pub node_runs: Vec<NodeRunRecord>,
}

/// Stored result of one node within a run
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeRunRecord {
    pub node_id: String,
    pub node_type: String,
    pub name: String,
    pub status: String,
    pub duration_ms: i64,
    pub output: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SqliteHistoryStore {
    pool: SqlitePool,
}

impl SqliteHistoryStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create history tables (idempotent)
    pub async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS workflow_runs (
                id TEXT PRIMARY KEY,
                workflow_id TEXT NOT NULL,
                status TEXT NOT NULL,
                scope TEXT NOT NULL,
                duration_ms INTEGER NOT NULL,
                started_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS node_runs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                run_id TEXT NOT NULL REFERENCES workflow_runs(id) ON DELETE CASCADE,
                position INTEGER NOT NULL,
                node_id TEXT NOT NULL,
                node_type TEXT NOT NULL,
                name TEXT NOT NULL,
                status TEXT NOT NULL,
                duration_ms INTEGER NOT NULL,
                output TEXT,
                error TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_workflow_runs_workflow ON workflow_runs(workflow_id)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_node_runs_run ON node_runs(run_id)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Runs newest first, optionally for one workflow only
    pub async fn list_runs(&self, workflow_id: Option<&str>, limit: i64) -> Result<Vec<RunRecord>> {
        let rows = match workflow_id {
            Some(workflow_id) => {
                sqlx::query(
                    "SELECT id, workflow_id, status, scope, duration_ms, started_at FROM workflow_runs
                     WHERE workflow_id = ? ORDER BY started_at DESC, rowid DESC LIMIT ?",
                )
                .bind(workflow_id)
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    "SELECT id, workflow_id, status, scope, duration_ms, started_at FROM workflow_runs
                     ORDER BY started_at DESC, rowid DESC LIMIT ?",
                )
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
        };

        let mut runs = Vec::with_capacity(rows.len());
        for row in rows {
            let id: String = row.get("id");
            let node_runs = self.node_runs(&id).await?;
            runs.push(RunRecord {
                id,
                workflow_id: row.get("workflow_id"),
                status: row.get("status"),
                scope: row.get("scope"),
                duration_ms: row.get("duration_ms"),
                started_at: row.get("started_at"),
                node_runs,
            });
        }
        Ok(runs)
    }

    async fn node_runs(&self, run_id: &str) -> Result<Vec<NodeRunRecord>> {
        let rows = sqlx::query(
            "SELECT node_id, node_type, name, status, duration_ms, output, error FROM node_runs
             WHERE run_id = ? ORDER BY position",
        )
        .bind(run_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| NodeRunRecord {
                node_id: row.get("node_id"),
                node_type: row.get("node_type"),
                name: row.get("name"),
                status: row.get("status"),
                duration_ms: row.get("duration_ms"),
                output: row.get("output"),
                error: row.get("error"),
            })
            .collect())
    }
}

#[async_trait]
impl HistorySink for SqliteHistoryStore {
    async fn record_run(&self, workflow_id: &str, result: &DagRunResult) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO workflow_runs (id, workflow_id, status, scope, duration_ms, started_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&result.run_id)
        .bind(workflow_id)
        .bind(result.overall_status.as_str())
        .bind(result.scope.as_str())
        .bind(result.duration_ms as i64)
        .bind(result.started_at.to_rfc3339())
        .execute(&mut *tx)
        .await?;

        for (position, node) in result.node_results.iter().enumerate() {
            sqlx::query(
                "INSERT INTO node_runs (run_id, position, node_id, node_type, name, status, duration_ms, output, error)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&result.run_id)
            .bind(position as i64)
            .bind(&node.node_id)
            .bind(node.node_type.as_str())
            .bind(&node.name)
            .bind(node.status.as_str())
            .bind(node.duration_ms as i64)
            .bind(&node.output)
            .bind(&node.error)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::NodeKind;
    use crate::runtime::{NodeResult, NodeStatus, OverallStatus, ScopeKind};
    use chrono::{Duration, Utc};
    use sqlx::sqlite::SqlitePoolOptions;

    async fn store() -> SqliteHistoryStore {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        let store = SqliteHistoryStore::new(pool);
        store.init_schema().await.unwrap();
        store
    }

    fn run(run_id: &str, minutes_ago: i64, status: OverallStatus) -> DagRunResult {
        DagRunResult {
            run_id: run_id.to_string(),
            started_at: Utc::now() - Duration::minutes(minutes_ago),
            overall_status: status,
            scope: ScopeKind::Full,
            duration_ms: 12,
            node_results: vec![
                NodeResult {
                    node_id: "t".to_string(),
                    name: "Prompt".to_string(),
                    node_type: NodeKind::Text,
                    status: NodeStatus::Success,
                    duration_ms: 0,
                    output: Some("hello".to_string()),
                    error: None,
                },
                NodeResult {
                    node_id: "l".to_string(),
                    name: "llm".to_string(),
                    node_type: NodeKind::Llm,
                    status: NodeStatus::Failed,
                    duration_ms: 12,
                    output: None,
                    error: Some("quota".to_string()),
                },
            ],
        }
    }

    #[tokio::test]
    async fn runs_come_back_newest_first_with_nodes() {
        let store = store().await;
        store.record_run("wf-1", &run("old", 10, OverallStatus::Failed)).await.unwrap();
        store.record_run("wf-1", &run("new", 1, OverallStatus::Partial)).await.unwrap();
        store.record_run("wf-2", &run("other", 0, OverallStatus::Success)).await.unwrap();

        let runs = store.list_runs(Some("wf-1"), 50).await.unwrap();
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0].id, "new");
        assert_eq!(runs[0].status, "partial");
        assert_eq!(runs[0].node_runs.len(), 2);
        assert_eq!(runs[0].node_runs[0].node_type, "text");
        assert_eq!(runs[0].node_runs[1].error.as_deref(), Some("quota"));

        assert_eq!(store.list_runs(None, 50).await.unwrap().len(), 3);
        assert_eq!(store.list_runs(None, 1).await.unwrap()[0].id, "other");
    }

    #[tokio::test]
    async fn duplicate_run_ids_roll_back_cleanly() {
        let store = store().await;
        store.record_run("wf-1", &run("r1", 0, OverallStatus::Success)).await.unwrap();
        assert!(store.record_run("wf-1", &run("r1", 0, OverallStatus::Success)).await.is_err());

        let runs = store.list_runs(Some("wf-1"), 50).await.unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].node_runs.len(), 2);
    }
}
