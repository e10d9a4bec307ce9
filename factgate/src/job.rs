//! Proof job records and the status machine that guards them.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::Stage;
use crate::risk::AllocationSplit;

/// Lifecycle status of a proof job.
///
/// `Failed` and `Timeout` are dead ends. `Verified` is where a successful
/// run rests, both after fact verification and again after the gated
/// transaction settles.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProofStatus {
    Generating,
    Generated,
    Verifying,
    Verified,
    Submitted,
    Failed,
    Timeout,
}

impl ProofStatus {
    pub const fn is_dead_end(self) -> bool {
        matches!(self, Self::Failed | Self::Timeout)
    }

    pub const fn can_transition(self, to: ProofStatus) -> bool {
        use ProofStatus::*;
        match (self, to) {
            (Generating, Generated)
            | (Generated, Verifying)
            | (Verifying, Verified)
            | (Verified, Submitted)
            | (Submitted, Verified) => true,
            // Failures in the execution half (convention detection through
            // submission) land while the job is still Verified.
            (Generating, Failed) | (Verifying, Failed) | (Verified, Failed)
            | (Submitted, Failed) => true,
            (from, Timeout) => !from.is_dead_end(),
            _ => false,
        }
    }
}

impl fmt::Display for ProofStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Generating => "generating",
            Self::Generated => "generated",
            Self::Verifying => "verifying",
            Self::Verified => "verified",
            Self::Submitted => "submitted",
            Self::Failed => "failed",
            Self::Timeout => "timeout",
        };
        f.write_str(name)
    }
}

/// A status transition the machine forbids. Callers hitting this have a
/// sequencing bug; nothing environmental produces it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
#[error("illegal proof job transition {from} -> {to}")]
pub struct StateError {
    pub from: ProofStatus,
    pub to: ProofStatus,
}

/// Everything persisted about one pipeline run.
///
/// `error` is populated exactly when the status is `Failed` or `Timeout`,
/// prefixed with the stage that produced it.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProofJob {
    pub id: String,
    pub status: ProofStatus,
    /// SHA-256 of the proof artifact, hex.
    pub proof_hash: Option<String>,
    /// Fact identifier returned by the registry, hex.
    pub fact_hash: Option<String>,
    /// Raw proof artifact bytes; carried opaque, hex on disk.
    #[serde(default, with = "crate::hex::opt")]
    pub proof_data: Option<Vec<u8>>,
    /// Snapshot of the inputs that produced this job.
    pub metrics: serde_json::Value,
    pub allocation: Option<AllocationSplit>,
    pub created_at: u64,
    pub submitted_at: Option<u64>,
    pub verified_at: Option<u64>,
    pub settlement_block: Option<u64>,
    pub transaction_hash: Option<String>,
    pub error: Option<String>,
}

impl ProofJob {
    pub fn begin(metrics: serde_json::Value) -> Self {
        Self {
            id: format!("{:032x}", rand::random::<u128>()),
            status: ProofStatus::Generating,
            proof_hash: None,
            fact_hash: None,
            proof_data: None,
            metrics,
            allocation: None,
            created_at: now_secs(),
            submitted_at: None,
            verified_at: None,
            settlement_block: None,
            transaction_hash: None,
            error: None,
        }
    }

    fn transition(&mut self, to: ProofStatus) -> Result<(), StateError> {
        if !self.status.can_transition(to) {
            return Err(StateError {
                from: self.status,
                to,
            });
        }
        self.status = to;
        Ok(())
    }

    pub fn mark_generated(
        &mut self,
        proof_hash: String,
        proof_data: Vec<u8>,
    ) -> Result<(), StateError> {
        self.transition(ProofStatus::Generated)?;
        self.proof_hash = Some(proof_hash);
        self.proof_data = Some(proof_data);
        Ok(())
    }

    pub fn mark_verifying(&mut self) -> Result<(), StateError> {
        self.transition(ProofStatus::Verifying)
    }

    pub fn mark_verified(&mut self, fact_hash: String) -> Result<(), StateError> {
        self.transition(ProofStatus::Verified)?;
        self.fact_hash = Some(fact_hash);
        self.verified_at = Some(now_secs());
        Ok(())
    }

    pub fn mark_submitted(&mut self, transaction_hash: String) -> Result<(), StateError> {
        self.transition(ProofStatus::Submitted)?;
        self.transaction_hash = Some(transaction_hash);
        self.submitted_at = Some(now_secs());
        Ok(())
    }

    pub fn mark_settled(&mut self, block: u64) -> Result<(), StateError> {
        self.transition(ProofStatus::Verified)?;
        self.settlement_block = Some(block);
        Ok(())
    }

    pub fn fail(&mut self, stage: Stage, reason: &str) -> Result<(), StateError> {
        self.transition(ProofStatus::Failed)?;
        self.error = Some(format!("{stage}: {reason}"));
        Ok(())
    }

    pub fn time_out(&mut self, stage: Stage, reason: &str) -> Result<(), StateError> {
        self.transition(ProofStatus::Timeout)?;
        self.error = Some(format!("{stage}: {reason}"));
        Ok(())
    }
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}
