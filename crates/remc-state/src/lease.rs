//! Job lease guard.

use tracing::{debug, warn};

use crate::error::StateResult;
use crate::store::StateStore;

/// An acquired job lease. Released explicitly with [`JobLease::release`]
/// or implicitly on drop.
pub struct JobLease {
    store: StateStore,
    job_id: String,
    holder: String,
    released: bool,
}

impl JobLease {
    pub(crate) fn new(store: StateStore, job_id: &str, holder: String) -> Self {
        Self {
            store,
            job_id: job_id.to_string(),
            holder,
            released: false,
        }
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn holder(&self) -> &str {
        &self.holder
    }

    /// Release the lease. Returns false if it had already expired and
    /// been taken over by another holder.
    pub fn release(mut self) -> StateResult<bool> {
        self.released = true;
        let released = self.store.release_lease(&self.job_id, &self.holder)?;
        debug!(job_id = %self.job_id, released, "job lease released");
        Ok(released)
    }
}

impl Drop for JobLease {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(e) = self.store.release_lease(&self.job_id, &self.holder) {
            warn!(job_id = %self.job_id, error = %e, "failed to release job lease");
        }
    }
}

impl std::fmt::Debug for JobLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobLease")
            .field("job_id", &self.job_id)
            .field("holder", &self.holder)
            .finish()
    }
}
