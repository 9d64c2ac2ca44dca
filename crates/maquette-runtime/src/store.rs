//! In-memory run store.
//!
//! Runs live for the lifetime of the process; there is no persistence.
//! Status transitions go through [`RunStore::transition`], which enforces
//! the monotonic `pending → running → {completed, failed, cancelled}`
//! lifecycle.

use std::{
    collections::HashMap,
    sync::RwLock,
};

use chrono::Utc;
use maquette_types::{Run, RunConfig, RunId, RunMetricsSummary, RunStatus};

use crate::{Result, RuntimeError};

#[derive(Debug, Default)]
struct Inner {
    runs: HashMap<RunId, Run>,
    /// Creation order, for stable listing.
    order: Vec<RunId>,
}

/// Thread-safe collection of run records.
#[derive(Debug, Default)]
pub struct RunStore {
    inner: RwLock<Inner>,
}

impl RunStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a pending run with a generated id.
    pub fn create(&self, config: RunConfig) -> Run {
        let run = Run::new(RunId::generate(), config);
        self.insert(run.clone());
        run
    }

    /// Creates a pending run with a caller-supplied id.
    pub fn create_with_id(&self, id: &str, config: RunConfig) -> Result<Run> {
        let run_id = RunId::parse(id).ok_or_else(|| RuntimeError::InvalidRunId(id.to_string()))?;
        {
            let inner = self.inner.read().expect("run store lock poisoned");
            if inner.runs.contains_key(&run_id) {
                return Err(RuntimeError::RunExists(id.to_string()));
            }
        }
        let run = Run::new(run_id, config);
        self.insert(run.clone());
        Ok(run)
    }

    fn insert(&self, run: Run) {
        let mut inner = self.inner.write().expect("run store lock poisoned");
        inner.order.push(run.id.clone());
        inner.runs.insert(run.id.clone(), run);
    }

    /// Returns a clone of a run.
    pub fn get(&self, id: &RunId) -> Result<Run> {
        let inner = self.inner.read().expect("run store lock poisoned");
        inner
            .runs
            .get(id)
            .cloned()
            .ok_or_else(|| RuntimeError::RunNotFound(id.to_string()))
    }

    /// Lists runs in creation order, optionally filtered by status.
    ///
    /// `limit` of zero means unlimited.
    pub fn list(&self, status: Option<RunStatus>, limit: usize, offset: usize) -> Vec<Run> {
        let inner = self.inner.read().expect("run store lock poisoned");
        let filtered = inner
            .order
            .iter()
            .filter_map(|id| inner.runs.get(id))
            .filter(|run| status.is_none_or(|s| run.status == s))
            .skip(offset);
        if limit == 0 {
            filtered.cloned().collect()
        } else {
            filtered.take(limit).cloned().collect()
        }
    }

    /// Moves a run to `next`, stamping lifecycle timestamps.
    ///
    /// Fails with `RunTerminal` when the transition would move backwards
    /// or leave a terminal state.
    pub fn transition(&self, id: &RunId, next: RunStatus) -> Result<Run> {
        let mut inner = self.inner.write().expect("run store lock poisoned");
        let run = inner
            .runs
            .get_mut(id)
            .ok_or_else(|| RuntimeError::RunNotFound(id.to_string()))?;

        if !run.status.can_transition_to(next) {
            return Err(RuntimeError::RunTerminal {
                id: id.to_string(),
                status: run.status,
            });
        }

        run.status = next;
        match next {
            RunStatus::Running => run.started_at = Some(Utc::now()),
            status if status.is_terminal() => {
                let ended = Utc::now();
                run.ended_at = Some(ended);
                if let Some(started) = run.started_at {
                    run.duration_ms = Some((ended - started).num_milliseconds().max(0) as u64);
                }
            }
            _ => {}
        }
        Ok(run.clone())
    }

    /// Records a failure message on a run.
    pub fn set_error(&self, id: &RunId, error: &str) {
        let mut inner = self.inner.write().expect("run store lock poisoned");
        if let Some(run) = inner.runs.get_mut(id) {
            run.error = Some(error.to_string());
        }
    }

    /// Attaches aggregated metrics to a run.
    pub fn set_metrics(&self, id: &RunId, metrics: RunMetricsSummary) {
        let mut inner = self.inner.write().expect("run store lock poisoned");
        if let Some(run) = inner.runs.get_mut(id) {
            run.metrics = Some(metrics);
        }
    }

    /// Writes a metadata entry on a run.
    pub fn set_metadata(&self, id: &RunId, key: &str, value: serde_json::Value) -> Result<()> {
        let mut inner = self.inner.write().expect("run store lock poisoned");
        let run = inner
            .runs
            .get_mut(id)
            .ok_or_else(|| RuntimeError::RunNotFound(id.to_string()))?;
        run.metadata.insert(key.to_string(), value);
        Ok(())
    }

    /// Removes a run from the store.
    pub fn remove(&self, id: &RunId) -> Result<()> {
        let mut inner = self.inner.write().expect("run store lock poisoned");
        if inner.runs.remove(id).is_none() {
            return Err(RuntimeError::RunNotFound(id.to_string()));
        }
        inner.order.retain(|existing| existing != id);
        Ok(())
    }

    /// Number of stored runs.
    pub fn len(&self) -> usize {
        let inner = self.inner.read().expect("run store lock poisoned");
        inner.runs.len()
    }

    /// Returns true when no runs are stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ============================================================================
// Tests
// ============================================================================
