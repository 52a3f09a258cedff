//! StateStore: redb-backed persistence for REMC jobs.
//!
//! Provides typed operations over job rows, node rows, and leases. All
//! values are JSON-serialized into redb's `&[u8]` value columns. The store
//! supports both on-disk and in-memory backends (the latter for testing).
//!
//! redb serializes write transactions, so every read-modify-write below
//! (lease acquisition, snapshot save, iteration append) is atomic.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use redb::{Database, ReadableDatabase, ReadableTable};
use tracing::{debug, warn};

use crate::error::{StateError, StateResult};
use crate::lease::JobLease;
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        txn.open_table(JOBS).map_err(map_err!(Table))?;
        txn.open_table(NODES).map_err(map_err!(Table))?;
        txn.open_table(LEASES).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Jobs ───────────────────────────────────────────────────────

    /// Insert or replace a job row.
    pub fn put_job(&self, job: &JobRecord) -> StateResult<()> {
        let value = serde_json::to_vec(job).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(JOBS).map_err(map_err!(Table))?;
            table
                .insert(job.id.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(job_id = %job.id, status = %job.status, "job stored");
        Ok(())
    }

    /// Get a job row by ID.
    pub fn get_job(&self, job_id: &str) -> StateResult<Option<JobRecord>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(JOBS).map_err(map_err!(Table))?;
        match table.get(job_id).map_err(map_err!(Read))? {
            Some(guard) => {
                let job: JobRecord =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(job))
            }
            None => Ok(None),
        }
    }

    /// List all job rows.
    pub fn list_jobs(&self) -> StateResult<Vec<JobRecord>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(JOBS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let job: JobRecord =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push(job);
        }
        Ok(results)
    }

    /// Append a controller iteration tag to a job.
    pub fn append_controller_iteration(&self, job_id: &str, tag: &str) -> StateResult<JobRecord> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let job = {
            let mut table = txn.open_table(JOBS).map_err(map_err!(Table))?;
            let mut job: JobRecord = match table.get(job_id).map_err(map_err!(Read))? {
                Some(guard) => {
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?
                }
                None => return Err(StateError::JobNotFound(job_id.to_string())),
            };
            job.controller_iterations.push(tag.to_string());
            let value = serde_json::to_vec(&job).map_err(map_err!(Serialize))?;
            table
                .insert(job_id, value.as_slice())
                .map_err(map_err!(Write))?;
            job
        };
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%job_id, %tag, "controller iteration recorded");
        Ok(job)
    }

    /// Record where a job's results can be downloaded.
    pub fn set_results_url(&self, job_id: &str, url: &str) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(JOBS).map_err(map_err!(Table))?;
            let mut job: JobRecord = match table.get(job_id).map_err(map_err!(Read))? {
                Some(guard) => {
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?
                }
                None => return Err(StateError::JobNotFound(job_id.to_string())),
            };
            job.results_url = Some(url.to_string());
            let value = serde_json::to_vec(&job).map_err(map_err!(Serialize))?;
            table
                .insert(job_id, value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Nodes ──────────────────────────────────────────────────────

    /// Insert or replace a node row.
    pub fn put_node(&self, node: &NodeRecord) -> StateResult<()> {
        let key = node.table_key();
        let value = serde_json::to_vec(node).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(NODES).map_err(map_err!(Table))?;
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// List every node row of a job, stale rows included.
    pub fn list_nodes_for_job(&self, job_id: &str) -> StateResult<Vec<NodeRecord>> {
        let prefix = format!("{job_id}:");
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(NODES).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            if key.value().starts_with(&prefix) {
                let node: NodeRecord =
                    serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
                results.push(node);
            }
        }
        Ok(results)
    }

    // ── Snapshots ──────────────────────────────────────────────────

    /// Load a job row together with all of its node rows.
    pub fn load_job_state(&self, job_id: &str) -> StateResult<Option<JobState>> {
        let Some(job) = self.get_job(job_id)? else {
            return Ok(None);
        };
        let nodes = self.list_nodes_for_job(job_id)?;
        Ok(Some(JobState { job, nodes }))
    }

    /// Persist a job snapshot in one transaction.
    ///
    /// Node rows in the snapshot are upserted; every other row of the job
    /// is flagged `in_use = false`. The controller iteration tags and the
    /// results URL belong to the store and are never overwritten.
    pub fn save_job_state(&self, state: &JobState) -> StateResult<()> {
        let job_id = state.job.id.as_str();
        let prefix = format!("{job_id}:");
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut jobs = txn.open_table(JOBS).map_err(map_err!(Table))?;
            let mut job = state.job.clone();
            let existing: Option<JobRecord> = match jobs.get(job_id).map_err(map_err!(Read))? {
                Some(guard) => Some(
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?,
                ),
                None => None,
            };
            if let Some(existing) = existing {
                job.controller_iterations = existing.controller_iterations;
                job.results_url = existing.results_url.or(job.results_url);
            }
            let value = serde_json::to_vec(&job).map_err(map_err!(Serialize))?;
            jobs.insert(job_id, value.as_slice())
                .map_err(map_err!(Write))?;

            let mut nodes = txn.open_table(NODES).map_err(map_err!(Table))?;
            let current: Vec<String> = state.nodes.iter().map(NodeRecord::table_key).collect();
            let stale: Vec<(String, NodeRecord)> = {
                let mut stale = Vec::new();
                for entry in nodes.iter().map_err(map_err!(Read))? {
                    let (key, value) = entry.map_err(map_err!(Read))?;
                    let key = key.value().to_string();
                    if key.starts_with(&prefix) && !current.contains(&key) {
                        let row: NodeRecord = serde_json::from_slice(value.value())
                            .map_err(map_err!(Deserialize))?;
                        if row.in_use {
                            stale.push((key, row));
                        }
                    }
                }
                stale
            };
            for (key, mut row) in stale {
                row.in_use = false;
                let value = serde_json::to_vec(&row).map_err(map_err!(Serialize))?;
                nodes
                    .insert(key.as_str(), value.as_slice())
                    .map_err(map_err!(Write))?;
            }
            for row in &state.nodes {
                let value = serde_json::to_vec(row).map_err(map_err!(Serialize))?;
                nodes
                    .insert(row.table_key().as_str(), value.as_slice())
                    .map_err(map_err!(Write))?;
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%job_id, status = %state.job.status, nodes = state.nodes.len(), "job snapshot saved");
        Ok(())
    }

    // ── Leases ─────────────────────────────────────────────────────

    /// Try to take the exclusive lease on a job without waiting.
    ///
    /// Returns `None` if another holder owns an unexpired lease. The lease
    /// is released when the returned guard is dropped.
    pub fn try_lock(&self, job_id: &str, ttl: Duration) -> StateResult<Option<JobLease>> {
        let now = epoch_millis();
        let holder = uuid::Uuid::new_v4().to_string();
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(LEASES).map_err(map_err!(Table))?;
            let current: Option<LeaseRecord> = match table.get(job_id).map_err(map_err!(Read))? {
                Some(guard) => Some(
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?,
                ),
                None => None,
            };
            if let Some(current) = current {
                if current.expires_at_ms > now {
                    debug!(%job_id, holder = %current.holder, "job lease busy");
                    return Ok(None);
                }
                warn!(%job_id, holder = %current.holder, "taking over expired job lease");
            }
            let lease = LeaseRecord {
                job_id: job_id.to_string(),
                holder: holder.clone(),
                expires_at_ms: now.saturating_add(ttl.as_millis() as u64),
            };
            let value = serde_json::to_vec(&lease).map_err(map_err!(Serialize))?;
            table
                .insert(job_id, value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%job_id, %holder, "job lease acquired");
        Ok(Some(JobLease::new(self.clone(), job_id, holder)))
    }

    /// Whether a job currently has an unexpired lease.
    pub fn is_locked(&self, job_id: &str) -> StateResult<bool> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(LEASES).map_err(map_err!(Table))?;
        match table.get(job_id).map_err(map_err!(Read))? {
            Some(guard) => {
                let lease: LeaseRecord =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(lease.expires_at_ms > epoch_millis())
            }
            None => Ok(false),
        }
    }

    /// Remove a lease if it is still owned by `holder`. Returns true if removed.
    pub(crate) fn release_lease(&self, job_id: &str, holder: &str) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let released;
        {
            let mut table = txn.open_table(LEASES).map_err(map_err!(Table))?;
            let current: Option<LeaseRecord> = match table.get(job_id).map_err(map_err!(Read))? {
                Some(guard) => Some(
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?,
                ),
                None => None,
            };
            released = matches!(current, Some(ref lease) if lease.holder == holder);
            if released {
                table.remove(job_id).map_err(map_err!(Write))?;
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(released)
    }
}

/// Current Unix epoch in milliseconds.
fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
