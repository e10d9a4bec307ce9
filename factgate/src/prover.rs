//! Driver for the external STARK prover binary.
//!
//! The prover is a black box invoked per job: we materialize its parameter
//! and input files in a job-scoped run directory, run it under a wall-clock
//! deadline, and read the proof artifact back. Nothing in here interprets
//! the proof beyond checking that the sections the registry needs are
//! present.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use itertools::Itertools;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::process::Command;
use tracing::{error, info};

use crate::error::PipelineError;
use crate::fri::{FriParameters, ProverParameters};
use crate::fs::{run_dir, write_json, PARAMETER_FILE, PRIVATE_INPUT_FILE, PROOF_FILE, PUBLIC_INPUT_FILE};
use crate::registry::{validate_artifact, ProofSettings};

/// Keep only this much of the prover's stderr on failure.
const STDERR_CAPTURE_LIMIT: usize = 4096;

#[derive(Clone, Debug)]
pub struct ProverConfig {
    pub binary: PathBuf,
    pub timeout: Duration,
    pub artifacts_dir: PathBuf,
    pub generate_annotations: bool,
    /// Optional tuning file forwarded to the prover verbatim.
    pub prover_config_file: Option<PathBuf>,
    pub settings: ProofSettings,
}

/// The public input descriptor produced by the trace generator. Only the
/// fields we act on are typed; the rest passes through untouched so the
/// prover sees exactly what the generator wrote.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PublicInput {
    pub layout: String,
    pub n_steps: u64,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Clone, Debug)]
pub struct TraceInputs {
    pub trace_file: PathBuf,
    pub memory_file: PathBuf,
    pub public_input: PublicInput,
}

/// Private input file in the prover's expected shape. The builtin segments
/// are empty for the allocation program.
#[derive(Serialize)]
struct PrivateInput {
    trace_path: String,
    memory_path: String,
    pedersen: Vec<serde_json::Value>,
    range_check: Vec<serde_json::Value>,
    ecdsa: Vec<serde_json::Value>,
}

/// A completed prover run.
#[derive(Clone, Debug)]
pub struct ProofArtifact {
    pub bytes: Vec<u8>,
    /// SHA-256 over the artifact bytes, hex.
    pub content_hash: String,
    pub generation_time: Duration,
    pub fri: FriParameters,
}

pub struct StoneProver {
    config: ProverConfig,
}

impl StoneProver {
    pub fn new(config: ProverConfig) -> Self {
        Self { config }
    }

    pub fn settings(&self) -> &ProofSettings {
        &self.config.settings
    }

    /// Runs the prover for one job and returns the artifact it wrote.
    ///
    /// The FRI schedule must cover the trace length the public input
    /// declares; a mismatched pair would make the prover fail late with an
    /// opaque assertion, so it is rejected up front.
    pub async fn prove(
        &self,
        job_id: &str,
        inputs: &TraceInputs,
        fri: &FriParameters,
    ) -> Result<ProofArtifact, PipelineError> {
        let n_steps = inputs.public_input.n_steps;
        if !fri.covers_trace(n_steps) {
            return Err(PipelineError::ParameterTraceMismatch {
                descriptor_steps: n_steps,
            });
        }

        let dir = run_dir(&self.config.artifacts_dir, job_id);
        let parameter_path = dir.join(PARAMETER_FILE);
        let private_input_path = dir.join(PRIVATE_INPUT_FILE);
        let public_input_path = dir.join(PUBLIC_INPUT_FILE);
        let out_path = dir.join(PROOF_FILE);

        write_json(&parameter_path, &ProverParameters::for_fri(fri)).await?;
        write_json(
            &private_input_path,
            &PrivateInput {
                trace_path: inputs.trace_file.display().to_string(),
                memory_path: inputs.memory_file.display().to_string(),
                pedersen: Vec::new(),
                range_check: Vec::new(),
                ecdsa: Vec::new(),
            },
        )
        .await?;
        write_json(&public_input_path, &inputs.public_input).await?;

        // The exact proof parameters, spelled out so a failed run can be
        // reproduced from the log alone.
        info!(
            job_id,
            binary = %self.config.binary.display(),
            layout = %self.config.settings.layout,
            hasher = %self.config.settings.hasher,
            stone_version = %self.config.settings.stone_version,
            memory_mode = %self.config.settings.memory_mode,
            n_steps,
            fri_steps = %fri.fri_step_list.iter().join(","),
            last_layer_degree_bound = fri.last_layer_degree_bound,
            "invoking prover"
        );

        let mut cmd = Command::new(&self.config.binary);
        cmd.arg("--parameter_file")
            .arg(&parameter_path)
            .arg("--private_input_file")
            .arg(&private_input_path)
            .arg("--public_input_file")
            .arg(&public_input_path)
            .arg("--out_file")
            .arg(&out_path);
        if let Some(tuning) = &self.config.prover_config_file {
            cmd.arg("--prover_config_file").arg(tuning);
        }
        if self.config.generate_annotations {
            cmd.arg("--generate_annotations");
        }
        cmd.stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let started = Instant::now();
        let child = cmd.spawn().map_err(|e| PipelineError::ProcessExitFailure {
            status: "failed to spawn".into(),
            stderr: e.to_string(),
        })?;

        // Hitting the deadline drops the wait future, and kill_on_drop
        // takes the process down with it.
        let output = tokio::time::timeout(self.config.timeout, child.wait_with_output())
            .await
            .map_err(|_| PipelineError::ProcessTimeout {
                timeout_secs: self.config.timeout.as_secs(),
            })?
            .map_err(|e| PipelineError::ProcessExitFailure {
                status: "wait failed".into(),
                stderr: e.to_string(),
            })?;

        if !output.status.success() {
            let stderr = stderr_tail(&output.stderr);
            error!(job_id, status = %output.status, "prover failed");
            return Err(PipelineError::ProcessExitFailure {
                status: output.status.to_string(),
                stderr,
            });
        }

        let bytes = tokio::fs::read(&out_path)
            .await
            .map_err(|_| PipelineError::OutputArtifactMissing {
                path: out_path.clone(),
            })?;
        let shape = validate_artifact(&bytes)?;
        let content_hash = hex::encode(Sha256::digest(&bytes));
        let generation_time = started.elapsed();
        info!(
            job_id,
            size_bytes = bytes.len(),
            proof_hash = %content_hash,
            layout = %shape.layout,
            elapsed_ms = generation_time.as_millis() as u64,
            "proof generated"
        );

        Ok(ProofArtifact {
            bytes,
            content_hash,
            generation_time,
            fri: fri.clone(),
        })
    }
}

/// Loads and parses a public input descriptor.
pub async fn load_public_input(path: &Path) -> Result<PublicInput, PipelineError> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| PipelineError::io(path, e))?;
    let des = &mut serde_json::Deserializer::from_slice(&bytes);
    serde_path_to_error::deserialize(des).map_err(|e| {
        PipelineError::Config(format!(
            "unreadable public input {}: {e}",
            path.display()
        ))
    })
}

fn stderr_tail(raw: &[u8]) -> String {
    let text = String::from_utf8_lossy(raw);
    if text.len() <= STDERR_CAPTURE_LIMIT {
        return text.into_owned();
    }
    let mut cut = text.len() - STDERR_CAPTURE_LIMIT;
    while !text.is_char_boundary(cut) {
        cut += 1;
    }
    format!("... {}", &text[cut..])
}
