//! Filesystem layout for prover runs.
//!
//! Every job gets its own directory under the artifacts root, holding the
//! generated parameter file, the private/public input files and the proof
//! the prover writes back.

use std::path::{Path, PathBuf};

use anyhow::anyhow;
use directories::ProjectDirs;
use serde::Serialize;
use tracing::info;

use crate::error::PipelineError;

pub const PARAMETER_FILE: &str = "cpu_air_params.json";
pub const PRIVATE_INPUT_FILE: &str = "private_input.json";
pub const PUBLIC_INPUT_FILE: &str = "public_input.json";
pub const PROOF_FILE: &str = "proof.json";

const ARTIFACTS_DIR_ENV: &str = "FACTGATE_ARTIFACTS_DIR";
const ARTIFACTS_DIR_NAME: &str = "factgate";

/// Points the artifacts env var at the platform data directory unless the
/// operator already set it.
pub fn set_artifacts_dir_env_if_not_set() -> anyhow::Result<()> {
    if std::env::var_os(ARTIFACTS_DIR_ENV).is_none() {
        let dirs = ProjectDirs::from("", "", ARTIFACTS_DIR_NAME)
            .ok_or_else(|| anyhow!("no home directory found"))?;
        std::env::set_var(ARTIFACTS_DIR_ENV, dirs.data_local_dir());
    }
    Ok(())
}

/// Default artifacts root used when nothing is configured: the env var if
/// present, otherwise `./artifacts`.
pub fn default_artifacts_dir() -> PathBuf {
    std::env::var_os(ARTIFACTS_DIR_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("artifacts"))
}

pub fn run_dir(artifacts_root: &Path, job_id: &str) -> PathBuf {
    artifacts_root.join(job_id)
}

/// Serializes `value` as pretty JSON at `path`, creating parent directories
/// as needed.
pub async fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), PipelineError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| PipelineError::io(parent, e))?;
    }
    let bytes = serde_json::to_vec_pretty(value)
        .map_err(|e| PipelineError::io(path, std::io::Error::other(e)))?;
    tokio::fs::write(path, bytes)
        .await
        .map_err(|e| PipelineError::io(path, e))?;
    info!(path = %path.display(), "input file written");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn write_json_creates_parent_directories() {
        let dir = std::env::temp_dir()
            .join(format!("factgate-fs-{}", std::process::id()))
            .join("nested");
        let _ = std::fs::remove_dir_all(&dir);
        let path = dir.join("params.json");

        write_json(&path, &serde_json::json!({"field": "PrimeField0"}))
            .await
            .unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("PrimeField0"));
    }

    #[test]
    fn run_dirs_are_scoped_by_job() {
        let root = Path::new("/tmp/artifacts");
        assert_eq!(run_dir(root, "abc123"), PathBuf::from("/tmp/artifacts/abc123"));
        assert_ne!(run_dir(root, "a"), run_dir(root, "b"));
    }
}
