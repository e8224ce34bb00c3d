//! SQLite persistence layer for workflow storage
//!
//! Workflows are stored as JSON in a single table with indexed lookup fields.
//! Inline binary payloads are stripped before anything is written.

use crate::runtime::DagRunResult;
use crate::workflow::types::Workflow;
use anyhow::Result;
use chrono::Utc;
use serde::Serialize;
use sqlx::{sqlite::SqlitePool, Row};

/// SQLite-based workflow storage manager
#[derive(Debug, Clone)]
pub struct WorkflowStorage {
    /// SQLite connection pool for the main database
    pool: SqlitePool,
}

/// Basic workflow metadata for listing operations
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowMetadata {
    pub id: String,
    pub name: String,
    pub description: String,
    pub created_at: String,
    pub updated_at: String,
}

impl WorkflowStorage {
    /// Create new storage instance with database connection
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Initialize the workflow storage schema
    ///
    /// Safe to call multiple times (uses IF NOT EXISTS).
    pub async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS workflows (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                definition TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_workflows_updated
            ON workflows(updated_at)
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Store a new workflow or update existing one
    ///
    /// Binary payloads are stripped from a copy first; the stored copy is
    /// returned so callers can hand back exactly what was persisted.
    pub async fn save_workflow(&self, workflow: &Workflow) -> Result<Workflow> {
        let mut stored = workflow.clone();
        let cleared = stored.strip_binary_payloads();
        if cleared > 0 {
            tracing::debug!("🧹 Stripped {} inline payloads from workflow '{}'", cleared, stored.id);
        }

        let definition_json = serde_json::to_string(&stored)?;
        let now = Utc::now().to_rfc3339();

        sqlx::query(
            r#"
            INSERT INTO workflows (id, name, description, definition, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                description = excluded.description,
                definition = excluded.definition,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&stored.id)
        .bind(&stored.name)
        .bind(&stored.description)
        .bind(&definition_json)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        Ok(stored)
    }

    /// Write a run's outputs into the currently stored workflow
    ///
    /// The stored definition is re-read inside the transaction, so graph
    /// edits made while the run was in flight are kept. Nodes deleted in the
    /// meantime are skipped. Returns `None` if the workflow itself is gone.
    pub async fn store_run_outputs(&self, id: &str, result: &DagRunResult) -> Result<Option<usize>> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query("SELECT definition FROM workflows WHERE id = ?")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?;
        let Some(row) = row else {
            return Ok(None);
        };

        let definition_json: String = row.get("definition");
        let mut workflow: Workflow = serde_json::from_str(&definition_json)?;
        let applied = result.apply_outputs(&mut workflow.graph);
        if applied == 0 {
            return Ok(Some(0));
        }
        workflow.strip_binary_payloads();

        sqlx::query("UPDATE workflows SET definition = ?, updated_at = ? WHERE id = ?")
            .bind(serde_json::to_string(&workflow)?)
            .bind(Utc::now().to_rfc3339())
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        tracing::debug!("💾 Stored {} node outputs for workflow '{}'", applied, id);
        Ok(Some(applied))
    }

    /// Retrieve a workflow by ID
    pub async fn get_workflow(&self, id: &str) -> Result<Option<Workflow>> {
        let row = sqlx::query("SELECT definition FROM workflows WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let definition_json: String = row.get("definition");
                let workflow: Workflow = serde_json::from_str(&definition_json)?;
                Ok(Some(workflow))
            }
            None => Ok(None),
        }
    }

    /// List all workflows with basic metadata, most recently updated first
    pub async fn list_workflows(&self) -> Result<Vec<WorkflowMetadata>> {
        let rows = sqlx::query(
            "SELECT id, name, description, created_at, updated_at FROM workflows ORDER BY updated_at DESC",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| WorkflowMetadata {
                id: row.get("id"),
                name: row.get("name"),
                description: row.get("description"),
                created_at: row.get("created_at"),
                updated_at: row.get("updated_at"),
            })
            .collect())
    }

    /// Delete a workflow by ID
    pub async fn delete_workflow(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM workflows WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Node, WorkflowGraph};
    use sqlx::sqlite::SqlitePoolOptions;

    async fn storage() -> WorkflowStorage {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        let storage = WorkflowStorage::new(pool);
        storage.init_schema().await.unwrap();
        storage
    }

    #[tokio::test]
    async fn save_get_list_delete() {
        let storage = storage().await;
        let workflow = Workflow::new(
            "wf-1",
            "Captions",
            WorkflowGraph::new(vec![Node::text("t", "describe the product")], vec![]),
        );

        storage.save_workflow(&workflow).await.unwrap();
        let loaded = storage.get_workflow("wf-1").await.unwrap().unwrap();
        assert_eq!(loaded, workflow);

        let mut renamed = workflow.clone();
        renamed.name = "Captions v2".to_string();
        storage.save_workflow(&renamed).await.unwrap();

        let listed = storage.list_workflows().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].name, "Captions v2");

        assert!(storage.delete_workflow("wf-1").await.unwrap());
        assert!(!storage.delete_workflow("wf-1").await.unwrap());
        assert!(storage.get_workflow("wf-1").await.unwrap().is_none());
    }

    fn llm_run(node_id: &str, output: &str) -> DagRunResult {
        use crate::graph::NodeKind;
        use crate::runtime::{NodeResult, NodeStatus, OverallStatus, ScopeKind};

        DagRunResult {
            run_id: "r1".to_string(),
            started_at: Utc::now(),
            overall_status: OverallStatus::Success,
            scope: ScopeKind::Full,
            duration_ms: 5,
            node_results: vec![NodeResult {
                node_id: node_id.to_string(),
                name: "llm".to_string(),
                node_type: NodeKind::Llm,
                status: NodeStatus::Success,
                duration_ms: 5,
                output: Some(output.to_string()),
                error: None,
            }],
        }
    }

    #[tokio::test]
    async fn run_outputs_keep_edits_made_during_the_run() {
        use crate::graph::{Edge, LlmData, NodeData};

        let storage = storage().await;
        let llm = Node::new("llm", NodeData::Llm(LlmData::default()));
        let before = Workflow::new(
            "wf-3",
            "Edited mid-run",
            WorkflowGraph::new(vec![Node::text("t", "hi"), llm], vec![]),
        );
        storage.save_workflow(&before).await.unwrap();

        // Someone connects an edge while the run is still polling
        let mut edited = before.clone();
        edited
            .graph
            .connect(Edge::new("t", "text", "llm", "user_message"))
            .unwrap();
        storage.save_workflow(&edited).await.unwrap();

        let applied = storage
            .store_run_outputs("wf-3", &llm_run("llm", "a caption"))
            .await
            .unwrap();
        assert_eq!(applied, Some(1));

        let stored = storage.get_workflow("wf-3").await.unwrap().unwrap();
        assert_eq!(stored.graph.edges.len(), 1);
        assert_eq!(stored.graph.node("llm").unwrap().output_value().as_deref(), Some("a caption"));
    }

    #[tokio::test]
    async fn run_outputs_skip_deleted_nodes_and_workflows() {
        let storage = storage().await;
        let workflow = Workflow::new(
            "wf-4",
            "Shrunk",
            WorkflowGraph::new(vec![Node::text("t", "hi")], vec![]),
        );
        storage.save_workflow(&workflow).await.unwrap();

        assert_eq!(
            storage.store_run_outputs("wf-4", &llm_run("gone", "x")).await.unwrap(),
            Some(0)
        );
        assert_eq!(
            storage.store_run_outputs("missing", &llm_run("gone", "x")).await.unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn stored_copy_has_no_inline_media() {
        let storage = storage().await;
        let workflow: Workflow = serde_json::from_value(serde_json::json!({
            "id": "wf-2",
            "name": "Media",
            "nodes": [{"id": "img", "type": "uploadImage", "data": {"imageUrl": "data:image/png;base64,AAAA"}}],
            "edges": []
        }))
        .unwrap();

        let stored = storage.save_workflow(&workflow).await.unwrap();
        assert_ne!(stored, workflow);

        let loaded = storage.get_workflow("wf-2").await.unwrap().unwrap();
        assert_eq!(loaded, stored);
        assert_eq!(loaded.graph.nodes[0].output_value(), None);
    }
}
