//! Per-workflow serialization of facade mutations
//!
//! Each key (a workflow id, or `project/alias` while registering) gets its own
//! async mutex, so operations on one workflow queue up behind each other
//! while different workflows proceed in parallel. The table also records the
//! operation currently holding each key.
//!
//! ```ignore
//! let _guard = locks.acquire(&workflow_id, "update").await;
//! // store + queue mutation
//! ```

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, warn};

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ActiveOperation {
    pub key: String,
    pub operation: String,
    pub started_at: DateTime<Utc>,
}

#[derive(Default)]
pub struct WorkflowLocks {
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
    active: Mutex<HashMap<String, ActiveOperation>>,
}

/// Held for the duration of one operation; releases the key on drop.
pub struct WorkflowGuard<'a> {
    owner: &'a WorkflowLocks,
    key: String,
    _held: OwnedMutexGuard<()>,
}

impl WorkflowLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, key: &str, operation: &str) -> WorkflowGuard<'_> {
        let lock = {
            let mut locks = match self.locks.lock() {
                Ok(locks) => locks,
                Err(poisoned) => poisoned.into_inner(),
            };
            Arc::clone(
                locks
                    .entry(key.to_string())
                    .or_insert_with(|| Arc::new(AsyncMutex::new(()))),
            )
        };

        if lock.try_lock().is_err() {
            debug!("'{}' on {} waits for the running operation", operation, key);
        }
        let held = lock.lock_owned().await;

        self.with_active(|active| {
            active.insert(
                key.to_string(),
                ActiveOperation {
                    key: key.to_string(),
                    operation: operation.to_string(),
                    started_at: Utc::now(),
                },
            );
        });

        WorkflowGuard {
            owner: self,
            key: key.to_string(),
            _held: held,
        }
    }

    pub fn is_busy(&self, key: &str) -> bool {
        let mut busy = false;
        self.with_active(|active| busy = active.contains_key(key));
        busy
    }

    /// Operations currently holding a key, oldest first
    pub fn active_operations(&self) -> Vec<ActiveOperation> {
        let mut operations = Vec::new();
        self.with_active(|active| operations = active.values().cloned().collect());
        operations.sort_by_key(|op| op.started_at);
        operations
    }

    /// Number of keys with a live lock entry
    pub fn tracked_keys(&self) -> usize {
        match self.locks.lock() {
            Ok(locks) => locks.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    fn with_active(&self, f: impl FnOnce(&mut HashMap<String, ActiveOperation>)) {
        match self.active.lock() {
            Ok(mut active) => f(&mut active),
            Err(poisoned) => {
                warn!("Operation table lock was poisoned, recovering");
                f(&mut poisoned.into_inner())
            }
        }
    }

    fn release(&self, key: &str) {
        self.with_active(|active| {
            if let Some(op) = active.remove(key) {
                let duration = Utc::now().signed_duration_since(op.started_at);
                debug!(
                    "Finished '{}' on {} (took {}ms)",
                    op.operation,
                    key,
                    duration.num_milliseconds()
                );
            }
        });

        let mut locks = match self.locks.lock() {
            Ok(locks) => locks,
            Err(poisoned) => poisoned.into_inner(),
        };
        // The table and this guard are the only owners: nobody is waiting.
        let unused = locks
            .get(key)
            .map(|lock| Arc::strong_count(lock) == 2)
            .unwrap_or(false);
        if unused {
            locks.remove(key);
        }
    }
}

impl Drop for WorkflowGuard<'_> {
    fn drop(&mut self) {
        self.owner.release(&self.key);
    }
}
