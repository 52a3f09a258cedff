//! Repository seam between the job aggregate and its persisted record.

use crate::error::StateResult;
use crate::store::StateStore;
use crate::types::JobState;

/// Load and save job snapshots.
///
/// The aggregate calls `save` at its sync checkpoints; nothing else
/// writes job or node rows on its behalf.
pub trait JobRepository: Send + Sync {
    fn load(&self, job_id: &str) -> StateResult<Option<JobState>>;

    fn save(&self, state: &JobState) -> StateResult<()>;
}

impl JobRepository for StateStore {
    fn load(&self, job_id: &str) -> StateResult<Option<JobState>> {
        self.load_job_state(job_id)
    }

    fn save(&self, state: &JobState) -> StateResult<()> {
        self.save_job_state(state)
    }
}
