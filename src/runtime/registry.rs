//! Lock-free registry of live run contexts using ArcSwap
//!
//! Each workflow gets one `RunContext`. Readers load the map without
//! locking; inserts clone the map and swap the pointer atomically, so HTTP
//! handlers can look up live state while runs are in flight.

use crate::runtime::context::RunContext;
use arc_swap::ArcSwap;
use std::{collections::HashMap, sync::Arc};

#[derive(Debug)]
pub struct RunRegistry {
    /// Key: workflow_id, Value: live context for that workflow
    contexts: ArcSwap<HashMap<String, Arc<RunContext>>>,
    /// Log capacity handed to newly created contexts
    log_capacity: usize,
}

impl RunRegistry {
    pub fn new(log_capacity: usize) -> Self {
        Self {
            contexts: ArcSwap::new(Arc::new(HashMap::new())),
            log_capacity,
        }
    }

    /// Get a context by workflow id (lock-free read)
    pub fn get(&self, workflow_id: &str) -> Option<Arc<RunContext>> {
        self.contexts.load().get(workflow_id).cloned()
    }

    /// Get the context for a workflow, creating it on first use
    pub fn context_for(&self, workflow_id: &str) -> Arc<RunContext> {
        if let Some(existing) = self.get(workflow_id) {
            return existing;
        }

        let fresh = Arc::new(RunContext::new(self.log_capacity));
        // rcu retries the clone-and-swap if another writer got in first
        let previous = self.contexts.rcu(|current| {
            let mut updated = HashMap::clone(current);
            updated
                .entry(workflow_id.to_string())
                .or_insert_with(|| fresh.clone());
            updated
        });

        match previous.get(workflow_id) {
            Some(existing) => existing.clone(),
            None => {
                tracing::debug!("🆕 Created run context for workflow: {}", workflow_id);
                fresh
            }
        }
    }

    /// Drop a workflow's context; refused while a run is active
    ///
    /// The context is retired first, which fails if a run holds it and
    /// blocks any run from starting on it afterwards.
    pub fn remove(&self, workflow_id: &str) -> bool {
        let Some(ctx) = self.get(workflow_id) else {
            return false;
        };
        if !ctx.retire() {
            return false;
        }

        self.contexts.rcu(|current| {
            let mut updated = HashMap::clone(current);
            if updated.get(workflow_id).is_some_and(|live| Arc::ptr_eq(live, &ctx)) {
                updated.remove(workflow_id);
            }
            updated
        });
        tracing::info!("🗑️ Removed run context for workflow: {}", workflow_id);
        true
    }

    /// List workflow ids with a live context
    pub fn workflow_ids(&self) -> Vec<String> {
        self.contexts.load().keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_util::sync::CancellationToken;

    #[test]
    fn contexts_are_created_once_per_workflow() {
        let registry = RunRegistry::new(10);
        let first = registry.context_for("wf-1");
        let again = registry.context_for("wf-1");
        assert!(Arc::ptr_eq(&first, &again));

        let other = registry.context_for("wf-2");
        assert!(!Arc::ptr_eq(&first, &other));
        assert_eq!(registry.workflow_ids().len(), 2);
    }

    #[test]
    fn running_contexts_are_not_removed() {
        let registry = RunRegistry::new(10);
        let ctx = registry.context_for("wf-1");
        ctx.begin_run("r1", &[], CancellationToken::new()).unwrap();

        assert!(!registry.remove("wf-1"));
        ctx.finish_run("r1", crate::runtime::result::OverallStatus::Success);
        assert!(registry.remove("wf-1"));
        assert!(registry.get("wf-1").is_none());
    }

    #[test]
    fn removed_context_cannot_start_a_run() {
        let registry = RunRegistry::new(10);
        let held = registry.context_for("wf-1");
        assert!(registry.remove("wf-1"));

        // A handler that fetched the context before removal is turned away
        assert!(matches!(
            held.begin_run("r1", &[], CancellationToken::new()),
            Err(crate::runtime::EngineError::Retired)
        ));

        // The workflow id gets a fresh context if it comes back
        let fresh = registry.context_for("wf-1");
        assert!(!Arc::ptr_eq(&held, &fresh));
        assert!(fresh.begin_run("r2", &[], CancellationToken::new()).is_ok());
    }
}
