//! On-disk persistence for proof job records.
//!
//! One JSON file per job, written through a temp file and renamed into
//! place so a crash never leaves a half-written record behind.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::PipelineError;
use crate::job::ProofJob;

pub struct JobStore {
    dir: PathBuf,
}

impl JobStore {
    pub fn at(dir: impl Into<PathBuf>) -> Result<Self, PipelineError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| PipelineError::io(&dir, e))?;
        Ok(Self { dir })
    }

    pub fn job_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }

    /// Writes the record, replacing any previous version atomically.
    pub fn persist(&self, job: &ProofJob) -> Result<(), PipelineError> {
        let path = self.job_path(&job.id);
        let staged = path.with_extension("json.tmp");
        let bytes = serde_json::to_vec_pretty(job)
            .map_err(|e| PipelineError::io(&path, std::io::Error::other(e)))?;
        fs::write(&staged, bytes).map_err(|e| PipelineError::io(&staged, e))?;
        fs::rename(&staged, &path).map_err(|e| PipelineError::io(&path, e))?;
        debug!(job_id = %job.id, path = %path.display(), status = %job.status, "job record persisted");
        Ok(())
    }

    pub fn load(&self, id: &str) -> Result<ProofJob, PipelineError> {
        let path = self.job_path(id);
        load_record(&path)
    }
}

fn load_record(path: &Path) -> Result<ProofJob, PipelineError> {
    let file = fs::File::open(path).map_err(|e| PipelineError::io(path, e))?;
    let des = &mut serde_json::Deserializer::from_reader(file);
    serde_path_to_error::deserialize(des)
        .map_err(|e| PipelineError::io(path, std::io::Error::other(e)))
}
