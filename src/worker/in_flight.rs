//! In-flight execution table, keyed by step-run id.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, Notify};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::ProtocolError;

/// Tracked execution.
#[derive(Debug)]
struct InFlightEntry {
    generation: Uuid,
    action_id: String,
    cancel: CancellationToken,
    started_at: DateTime<Utc>,
}

/// Handle returned on insert; the execution uses it to observe cancellation
/// and to remove its own entry.
#[derive(Debug, Clone)]
pub struct InFlightHandle {
    pub generation: Uuid,
    pub cancel: CancellationToken,
}

/// The only process-wide mutable structure of the worker. A single mutex
/// serializes insert, cancel and remove.
#[derive(Debug, Default)]
pub struct InFlightTable {
    entries: Mutex<HashMap<String, InFlightEntry>>,
    emptied: Notify,
}

impl InFlightTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a new execution. A step-run id that is already tracked is
    /// rejected and the existing entry is left alone.
    pub async fn insert(
        &self,
        step_run_id: &str,
        action_id: &str,
    ) -> Result<InFlightHandle, ProtocolError> {
        let mut entries = self.entries.lock().await;
        if entries.contains_key(step_run_id) {
            return Err(ProtocolError::DuplicateStepRun {
                step_run_id: step_run_id.to_string(),
            });
        }

        let handle = InFlightHandle {
            generation: Uuid::new_v4(),
            cancel: CancellationToken::new(),
        };
        entries.insert(
            step_run_id.to_string(),
            InFlightEntry {
                generation: handle.generation,
                action_id: action_id.to_string(),
                cancel: handle.cancel.clone(),
                started_at: Utc::now(),
            },
        );
        Ok(handle)
    }

    /// Signal cancellation and drop the entry. Returns false when the step run
    /// is not tracked.
    pub async fn cancel(&self, step_run_id: &str) -> bool {
        let mut entries = self.entries.lock().await;
        let Some(entry) = entries.remove(step_run_id) else {
            return false;
        };
        entry.cancel.cancel();
        tracing::debug!(
            step_run_id,
            action_id = %entry.action_id,
            running_ms = (Utc::now() - entry.started_at).num_milliseconds(),
            "Cancelled in-flight execution"
        );
        if entries.is_empty() {
            self.emptied.notify_waiters();
        }
        true
    }

    /// Remove an entry on settlement. Only the entry with the matching
    /// generation is removed, so a step run that was cancelled and then
    /// started again keeps its new entry.
    pub async fn remove(&self, step_run_id: &str, generation: Uuid) -> bool {
        let mut entries = self.entries.lock().await;
        let matches = entries
            .get(step_run_id)
            .is_some_and(|entry| entry.generation == generation);
        if matches {
            entries.remove(step_run_id);
            if entries.is_empty() {
                self.emptied.notify_waiters();
            }
        }
        matches
    }

    /// Cancel every tracked execution. Returns how many were signalled.
    pub async fn cancel_all(&self) -> usize {
        let mut entries = self.entries.lock().await;
        let count = entries.len();
        for (_, entry) in entries.drain() {
            entry.cancel.cancel();
        }
        if count > 0 {
            self.emptied.notify_waiters();
        }
        count
    }

    pub async fn contains(&self, step_run_id: &str) -> bool {
        self.entries.lock().await.contains_key(step_run_id)
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Wait until no execution is tracked. Returns false on timeout.
    pub async fn wait_empty(&self, timeout: Duration) -> bool {
        let wait = async {
            loop {
                // Registered before the check so a concurrent removal is not missed.
                let notified = self.emptied.notified();
                if self.is_empty().await {
                    return;
                }
                notified.await;
            }
        };
        tokio::time::timeout(timeout, wait).await.is_ok()
    }
}
