use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

use crate::job::StateError;
use crate::rpc::failover::FailoverError;

/// Pipeline stages, used to attribute a failure to the step that produced it.
///
/// The stage name is prefixed onto the error recorded on the job, so that a
/// job record alone is enough to tell where a run stopped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    FriParameters,
    ProofGeneration,
    IntegrityRegistration,
    IntegrityVerification,
    AbiDetection,
    ExecutionEncoding,
    TransactionSubmission,
    TransactionConfirmation,
}

impl Stage {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::FriParameters => "fri_parameters",
            Self::ProofGeneration => "proof_generation",
            Self::IntegrityRegistration => "integrity_registration",
            Self::IntegrityVerification => "integrity_verification",
            Self::AbiDetection => "abi_detection",
            Self::ExecutionEncoding => "execution_encoding",
            Self::TransactionSubmission => "transaction_submission",
            Self::TransactionConfirmation => "transaction_confirmation",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything that can go wrong between receiving a trace and settling the
/// gated transaction.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The requested trace length cannot be proven.
    #[error("invalid trace size {0}: trace steps must be a power of two of at least 512")]
    InvalidTraceSize(u64),

    /// The public input descriptor disagrees with the FRI parameters built
    /// for this run.
    #[error("public input declares {descriptor_steps} steps, which the derived FRI parameters do not cover")]
    ParameterTraceMismatch { descriptor_steps: u64 },

    /// The prover process outlived its wall-clock budget and was killed.
    #[error("prover exceeded its {timeout_secs}s deadline and was killed")]
    ProcessTimeout { timeout_secs: u64 },

    /// The prover process exited abnormally.
    #[error("prover exited with {status}: {stderr}")]
    ProcessExitFailure { status: String, stderr: String },

    /// The prover reported success but its output file is not readable.
    #[error("prover reported success but produced no artifact at {}", .path.display())]
    OutputArtifactMissing { path: PathBuf },

    /// The proof artifact is missing a section the registry requires.
    #[error("malformed proof payload: {reason}")]
    MalformedProofPayload { reason: String },

    /// The fact registry rejected the registration call.
    #[error("fact registration failed: {reason}")]
    RegistrationFailure { reason: String },

    /// The registry would not confirm the fact after registration.
    #[error("fact {fact} could not be verified: {reason}")]
    VerificationFailure { fact: String, reason: String },

    /// Every configured endpoint failed for one chain operation.
    #[error("rpc failover exhausted during {operation}: {source}")]
    RpcExhausted {
        operation: &'static str,
        source: FailoverError,
    },

    /// An endpoint gave a definitive rejection; remaining endpoints were not
    /// consulted.
    #[error("chain operation {operation} rejected: {source}")]
    Chain {
        operation: &'static str,
        source: FailoverError,
    },

    /// The target contract only speaks a calling convention this pipeline
    /// refuses to use.
    #[error("contract exposes only the {detected} calling convention, which cannot carry a proof fact")]
    AbiVariantUnsupported { detected: String },

    /// A fact identifier could not be interpreted as a field element.
    #[error("fact identifier unusable: {0}")]
    InvalidFactIdentifier(String),

    /// The gated execution reverted on chain, or was definitively rejected at
    /// submission.
    #[error("gated execution reverted: {reason}")]
    TransactionReverted { reason: String },

    /// The transaction was accepted but never settled within the
    /// confirmation window. The job stays submitted; the transaction may
    /// still land later.
    #[error("transaction {tx_hash} not settled after {waited_secs}s")]
    ConfirmationTimeout { tx_hash: String, waited_secs: u64 },

    /// A job was driven through a transition its state machine forbids.
    /// Always a caller bug, never an environmental condition.
    #[error(transparent)]
    State(#[from] StateError),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("i/o failure at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl PipelineError {
    /// Convenience for the common "file operation failed" case.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
