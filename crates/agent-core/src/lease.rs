//! Lease table: dataset id -> lease expiration
//!
//! Every operation takes the table lock for a single read-then-mutate step
//! and never performs I/O. Callers act on the returned decision (start or
//! stop collection) after the lock is released.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use crate::{DatasetId, Expiration};

/// Outcome of applying a renewal to the table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaseTransition {
    /// Dataset was untracked and is now tracked; collection must start
    Started,

    /// Dataset was tracked and its lease lapsed; collection must stop
    Stopped,

    /// Dataset stays tracked with an updated expiration
    Renewed,

    /// Expiration for an untracked dataset; nothing to do
    Ignored,
}

/// Thread-safe lease table
#[derive(Debug, Default)]
pub struct LeaseTable {
    /// Map of dataset ID to expiration
    entries: Mutex<HashMap<DatasetId, Expiration>>,
}

impl LeaseTable {
    /// Create an empty lease table
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite a lease, returning the previous expiration if tracked
    pub fn upsert(&self, dataset_id: &str, expires_at: Expiration) -> Option<Expiration> {
        self.entries
            .lock()
            .insert(dataset_id.to_string(), expires_at)
    }

    /// Insert a lease only if the dataset is untracked; returns true if inserted
    pub fn insert_if_absent(&self, dataset_id: &str, expires_at: Expiration) -> bool {
        let mut entries = self.entries.lock();
        if entries.contains_key(dataset_id) {
            return false;
        }
        entries.insert(dataset_id.to_string(), expires_at);
        true
    }

    /// Remove a lease, returning its expiration if it was tracked
    pub fn remove(&self, dataset_id: &str) -> Option<Expiration> {
        self.entries.lock().remove(dataset_id)
    }

    /// Get the expiration of a tracked dataset
    pub fn get(&self, dataset_id: &str) -> Option<Expiration> {
        self.entries.lock().get(dataset_id).copied()
    }

    /// Returns true if the dataset is tracked
    pub fn contains(&self, dataset_id: &str) -> bool {
        self.entries.lock().contains_key(dataset_id)
    }

    /// Copy of every entry
    pub fn snapshot(&self) -> Vec<(DatasetId, Expiration)> {
        self.entries
            .lock()
            .iter()
            .map(|(id, at)| (id.clone(), *at))
            .collect()
    }

    /// Number of tracked datasets
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Returns true if no dataset is tracked
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Apply a renewal message and report which side effect it requires
    ///
    /// Untracked datasets are only inserted when an expiration is present.
    /// Tracked datasets always take the new value and are dropped when it is
    /// absent or already past `now`.
    pub fn apply_renewal(
        &self,
        dataset_id: &str,
        expires_at: Expiration,
        now: DateTime<Utc>,
    ) -> LeaseTransition {
        let mut entries = self.entries.lock();

        let Some(current) = entries.get_mut(dataset_id) else {
            return match expires_at {
                Some(_) => {
                    entries.insert(dataset_id.to_string(), expires_at);
                    LeaseTransition::Started
                }
                None => LeaseTransition::Ignored,
            };
        };

        *current = expires_at;
        match expires_at {
            Some(at) if at >= now => LeaseTransition::Renewed,
            _ => {
                entries.remove(dataset_id);
                LeaseTransition::Stopped
            }
        }
    }

    /// Remove and return every dataset whose expiration is set and before `now`
    pub fn take_expired(&self, now: DateTime<Utc>) -> Vec<DatasetId> {
        let mut entries = self.entries.lock();
        let expired: Vec<DatasetId> = entries
            .iter()
            .filter(|(_, at)| at.is_some_and(|at| at < now))
            .map(|(id, _)| id.clone())
            .collect();

        for dataset_id in &expired {
            entries.remove(dataset_id);
        }

        if !expired.is_empty() {
            debug!(count = expired.len(), remaining = entries.len(), "Leases expired");
        }
        expired
    }

    /// Remove every entry, returning the ids that were tracked
    pub fn drain(&self) -> Vec<DatasetId> {
        self.entries.lock().drain().map(|(id, _)| id).collect()
    }
}

/// Thread-safe handle to the lease table
pub type LeaseTableHandle = Arc<LeaseTable>;
