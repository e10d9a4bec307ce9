//! The proof lifecycle orchestrator.
//!
//! One `run` drives a single allocation request through parameter
//! derivation, proving, registration, verification, encoding, submission
//! and confirmation, persisting the job record after every status change.
//! Stage failures are recorded on the job and end the run; only
//! infrastructure problems (persistence, state machine misuse) surface as
//! errors to the caller.

use std::time::Duration;

use serde_json::json;
use starknet::core::types::FieldElement;
use tracing::{error, info, warn};

use crate::error::{PipelineError, Stage};
use crate::execution::{
    require_proof_gated, ConstraintSignature, ConventionDetector, GatedCallInputs,
};
use crate::fri::FriParameters;
use crate::job::{ProofJob, ProofStatus};
use crate::prover::{StoneProver, TraceInputs};
use crate::registry::FactRegistry;
use crate::risk::{allocation_split, risk_score, MetricsPair};
use crate::rpc::{ChainOps, ExecutionBounds};
use crate::store::JobStore;
use crate::submit::{await_settlement, submit_call, ConfirmationPolicy};

#[derive(Clone, Debug)]
pub struct PipelineConfig {
    pub router_address: FieldElement,
    pub entry_point: String,
    pub model_version: u32,
    pub bounds: ExecutionBounds,
    pub confirmation: ConfirmationPolicy,
    /// Hard ceiling on one whole run. Without it a wedged stage could hold
    /// the job non-terminal forever.
    pub run_deadline: Duration,
}

impl PipelineConfig {
    fn validate(&self) -> Result<(), PipelineError> {
        if self.run_deadline.is_zero() {
            return Err(PipelineError::Config(
                "run deadline must be non-zero".into(),
            ));
        }
        if self.entry_point.is_empty() {
            return Err(PipelineError::Config(
                "gated entry point name must not be empty".into(),
            ));
        }
        Ok(())
    }
}

/// One allocation request: the venue metrics being attested, the trace
/// artifacts that prove them, and the user's optional signed constraints.
#[derive(Clone, Debug)]
pub struct AllocationRequest {
    pub metrics: MetricsPair,
    pub trace: TraceInputs,
    pub constraint: Option<ConstraintSignature>,
}

pub struct Pipeline<G> {
    chain: G,
    prover: StoneProver,
    registry: FactRegistry,
    detector: ConventionDetector,
    store: JobStore,
    config: PipelineConfig,
}

impl<G: ChainOps> Pipeline<G> {
    pub fn new(
        chain: G,
        prover: StoneProver,
        registry: FactRegistry,
        store: JobStore,
        config: PipelineConfig,
    ) -> Result<Self, PipelineError> {
        config.validate()?;
        let detector = ConventionDetector::new(config.entry_point.clone());
        Ok(Self {
            chain,
            prover,
            registry,
            detector,
            store,
            config,
        })
    }

    /// Runs one request to a terminal (or submitted) state and returns the
    /// final job record. The record is persisted at every status change, so
    /// a crash mid-run leaves the last reached state on disk.
    pub async fn run(&self, request: AllocationRequest) -> Result<ProofJob, PipelineError> {
        let jediswap_risk = risk_score(&request.metrics.jediswap);
        let ekubo_risk = risk_score(&request.metrics.ekubo);
        let cap = request
            .constraint
            .as_ref()
            .filter(|c| !c.is_sentinel())
            .map(|c| c.max_single_bps)
            .filter(|bps| *bps > 0);
        let allocation = allocation_split(jediswap_risk, ekubo_risk, cap);

        let mut job = ProofJob::begin(json!({
            "jediswap": request.metrics.jediswap,
            "ekubo": request.metrics.ekubo,
            "jediswap_risk": jediswap_risk,
            "ekubo_risk": ekubo_risk,
            "layout": request.trace.public_input.layout,
            "n_steps": request.trace.public_input.n_steps,
        }));
        job.allocation = Some(allocation);
        self.store.persist(&job)?;
        info!(
            job_id = %job.id,
            jediswap_risk,
            ekubo_risk,
            jediswap_bps = allocation.jediswap_bps,
            ekubo_bps = allocation.ekubo_bps,
            "proof pipeline started"
        );

        match tokio::time::timeout(
            self.config.run_deadline,
            self.advance(&mut job, &request),
        )
        .await
        {
            Ok(result) => result?,
            Err(_) => {
                if !job.status.is_dead_end() {
                    let stage = interrupted_stage(job.status);
                    job.time_out(
                        stage,
                        &format!(
                            "run deadline of {}s exceeded",
                            self.config.run_deadline.as_secs()
                        ),
                    )?;
                    self.store.persist(&job)?;
                    error!(job_id = %job.id, %stage, "pipeline run timed out");
                }
            }
        }

        info!(job_id = %job.id, status = %job.status, "pipeline finished");
        Ok(job)
    }

    async fn advance(
        &self,
        job: &mut ProofJob,
        request: &AllocationRequest,
    ) -> Result<(), PipelineError> {
        let fri = match FriParameters::for_trace(request.trace.public_input.n_steps) {
            Ok(fri) => fri,
            Err(e) => return self.abort(job, Stage::FriParameters, e),
        };

        let artifact = match self.prover.prove(&job.id, &request.trace, &fri).await {
            Ok(artifact) => artifact,
            Err(e) => return self.abort(job, Stage::ProofGeneration, e),
        };
        job.mark_generated(artifact.content_hash.clone(), artifact.bytes.clone())?;
        self.store.persist(job)?;

        job.mark_verifying()?;
        self.store.persist(job)?;
        let fact = match self.registry.register(&self.chain, &artifact).await {
            Ok((fact, _endpoint)) => fact,
            Err(e) => return self.abort(job, Stage::IntegrityRegistration, e),
        };
        match self.registry.is_fact_valid(&self.chain, fact).await {
            Ok(true) => {}
            Ok(false) => {
                return self.abort(
                    job,
                    Stage::IntegrityVerification,
                    PipelineError::VerificationFailure {
                        fact: format!("{fact:#x}"),
                        reason: "registry reports the fact invalid".into(),
                    },
                )
            }
            Err(e) => return self.abort(job, Stage::IntegrityVerification, e),
        }
        let fact_hex = format!("{fact:#x}");
        job.mark_verified(fact_hex.clone())?;
        self.store.persist(job)?;

        let convention = self
            .detector
            .detect(&self.chain, self.config.router_address)
            .await;
        if let Err(e) = require_proof_gated(convention) {
            return self.abort(job, Stage::AbiDetection, e);
        }

        if let Some(constraint) = request.constraint.as_ref().filter(|c| !c.is_sentinel()) {
            let signer_hex = format!("{:#x}", constraint.signer);
            let message_hex = format!("{:#x}", constraint.message_hash());
            info!(signer = %signer_hex, message_hash = %message_hex, "user constraint attached");
        }
        let inputs = GatedCallInputs::new(
            request.metrics,
            fact_hex,
            self.registry.address(),
            self.config.model_version,
            request.constraint.clone(),
        );
        let call = match inputs.to_call(
            self.config.router_address,
            &self.config.entry_point,
            convention,
        ) {
            Ok(call) => call,
            Err(e) => return self.abort(job, Stage::ExecutionEncoding, e),
        };

        let submitted = match submit_call(&self.chain, call, self.config.bounds).await {
            Ok(response) => response,
            Err(e) => return self.abort(job, Stage::TransactionSubmission, e),
        };
        job.mark_submitted(format!("{:#x}", submitted.transaction_hash))?;
        self.store.persist(job)?;

        match await_settlement(&self.chain, submitted.transaction_hash, self.config.confirmation)
            .await
        {
            Ok(settlement) => {
                job.mark_settled(settlement.block)?;
                self.store.persist(job)?;
            }
            Err(PipelineError::TransactionReverted { reason }) => {
                return self.abort(
                    job,
                    Stage::TransactionConfirmation,
                    PipelineError::TransactionReverted { reason },
                )
            }
            Err(e) => {
                // Not observed within the window, or the poll could not
                // reach the chain. The transaction may still land, so the
                // job stays submitted and recoverable.
                warn!(job_id = %job.id, error = %e, "settlement unresolved, leaving job submitted");
            }
        }
        Ok(())
    }

    /// Records a stage failure on the job and ends the run without an error:
    /// the failure now lives on the record.
    fn abort(
        &self,
        job: &mut ProofJob,
        stage: Stage,
        err: PipelineError,
    ) -> Result<(), PipelineError> {
        error!(job_id = %job.id, %stage, error = %err, "pipeline stage failed");
        job.fail(stage, &err.to_string())?;
        self.store.persist(job)?;
        Ok(())
    }
}

fn interrupted_stage(status: ProofStatus) -> Stage {
    match status {
        ProofStatus::Generating => Stage::ProofGeneration,
        ProofStatus::Generated => Stage::IntegrityRegistration,
        ProofStatus::Verifying => Stage::IntegrityVerification,
        ProofStatus::Verified => Stage::TransactionSubmission,
        ProofStatus::Submitted
        | ProofStatus::Failed
        | ProofStatus::Timeout => Stage::TransactionConfirmation,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::{Path, PathBuf};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use url::Url;

    use crate::prover::{ProverConfig, PublicInput};
    use crate::registry::{ProofSettings, REGISTER_ENTRY_POINT, VALIDITY_ENTRY_POINTS};
    use crate::rpc::{selector, CallResponse, MockChainOps, ReceiptState, SubmitResponse};

    fn settings() -> ProofSettings {
        ProofSettings {
            layout: "small".into(),
            hasher: "keccak_160_lsb".into(),
            stone_version: "stone6".into(),
            memory_mode: "cairo1".into(),
        }
    }

    fn metrics() -> MetricsPair {
        MetricsPair {
            jediswap: crate::risk::ProtocolMetrics {
                utilization: 6_500,
                volatility: 3_500,
                liquidity: 1,
                audit_score: 98,
                age_days: 800,
            },
            ekubo: crate::risk::ProtocolMetrics {
                utilization: 5_000,
                volatility: 2_500,
                liquidity: 2,
                audit_score: 95,
                age_days: 600,
            },
        }
    }

    fn scratch_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "factgate-pipeline-{tag}-{}",
            std::process::id()
        ));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn request_in(dir: &Path) -> AllocationRequest {
        let trace_file = dir.join("trace.bin");
        let memory_file = dir.join("memory.bin");
        std::fs::write(&trace_file, b"trace").unwrap();
        std::fs::write(&memory_file, b"memory").unwrap();
        AllocationRequest {
            metrics: metrics(),
            trace: TraceInputs {
                trace_file,
                memory_file,
                public_input: PublicInput {
                    layout: "small".into(),
                    n_steps: 1024,
                    extra: serde_json::Map::new(),
                },
            },
            constraint: None,
        }
    }

    fn config() -> PipelineConfig {
        PipelineConfig {
            router_address: FieldElement::from(0x20u32),
            entry_point: "propose_and_execute_allocation".into(),
            model_version: 1,
            bounds: ExecutionBounds {
                gas: 300_000,
                gas_price: 100,
            },
            confirmation: ConfirmationPolicy {
                poll_interval: Duration::from_millis(5),
                timeout: Duration::from_millis(200),
            },
            run_deadline: Duration::from_secs(30),
        }
    }

    #[cfg(unix)]
    fn fake_prover(dir: &Path) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;
        let body = r#"#!/bin/sh
out=""
while [ "$#" -gt 0 ]; do
  if [ "$1" = "--out_file" ]; then out="$2"; fi
  shift
done
cat > "$out" <<'EOF'
{"proof_parameters": {"stark": {"fri": {"fri_step_list": [0, 4, 4]}}},
 "public_input": {"layout": "small", "n_steps": 1024},
 "proof_hex": "0x1234abcd"}
EOF
"#;
        let path = dir.join("fake_prover.sh");
        std::fs::write(&path, body).unwrap();
        let mut perms = std::fs::metadata(&path).unwrap().permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&path, perms).unwrap();
        path
    }

    #[cfg(unix)]
    fn prover_in(dir: &Path, binary: PathBuf, timeout: Duration) -> StoneProver {
        StoneProver::new(ProverConfig {
            binary,
            timeout,
            artifacts_dir: dir.join("artifacts"),
            generate_annotations: false,
            prover_config_file: None,
            settings: settings(),
        })
    }

    fn rpc_url() -> Url {
        Url::parse("http://rpc.example/").unwrap()
    }

    /// Chain fake for the happy path: registration answers with a fact,
    /// validity confirms it, class inspection reports the agent arity, the
    /// invoke is accepted and settles after one pending poll.
    fn happy_chain(expected_calldata_len: usize) -> MockChainOps {
        let mut chain = MockChainOps::new();
        let register = selector(REGISTER_ENTRY_POINT).unwrap();
        chain.expect_call_contract().returning(move |request| {
            let is_register = request.entry_point_selector == register;
            Box::pin(async move {
                if is_register {
                    Ok(CallResponse {
                        values: vec![FieldElement::from(0xfac7u32)],
                        endpoint: rpc_url(),
                    })
                } else {
                    Ok(CallResponse {
                        values: vec![FieldElement::ONE],
                        endpoint: rpc_url(),
                    })
                }
            })
        });
        chain
            .expect_entry_point_arity()
            .returning(|_, _| Box::pin(async { Ok(Some(9)) }));
        chain
            .expect_submit_invoke()
            .times(1)
            .returning(move |calls, _| {
                assert_eq!(calls.len(), 1);
                assert_eq!(calls[0].calldata.len(), expected_calldata_len);
                Box::pin(async {
                    Ok(SubmitResponse {
                        transaction_hash: FieldElement::from(0x77u32),
                        endpoint: rpc_url(),
                    })
                })
            });
        let polls = Arc::new(AtomicUsize::new(0));
        chain.expect_receipt_state().returning(move |_| {
            let n = polls.fetch_add(1, Ordering::SeqCst);
            Box::pin(async move {
                if n == 0 {
                    Ok(ReceiptState::Pending)
                } else {
                    Ok(ReceiptState::Settled { block: 7_777 })
                }
            })
        });
        chain
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn full_run_settles_and_persists_every_transition() {
        let dir = scratch_dir("happy");
        let prover = prover_in(&dir, fake_prover(&dir), Duration::from_secs(10));
        let store = JobStore::at(dir.join("jobs")).unwrap();
        let registry = FactRegistry::new(FieldElement::from(0x10u32), settings());
        // Agent-aware contract, so the full 24-element calldata goes out.
        let pipeline =
            Pipeline::new(happy_chain(24), prover, registry, store, config()).unwrap();

        let job = pipeline.run(request_in(&dir)).await.unwrap();

        assert_eq!(job.status, ProofStatus::Verified);
        assert_eq!(job.fact_hash.as_deref(), Some("0xfac7"));
        assert_eq!(job.transaction_hash.as_deref(), Some("0x77"));
        assert_eq!(job.settlement_block, Some(7_777));
        assert!(job.error.is_none());
        assert_eq!(job.proof_hash.as_ref().map(String::len), Some(64));
        let allocation = job.allocation.unwrap();
        assert_eq!(allocation.jediswap_bps + allocation.ekubo_bps, 10_000);

        let reloaded = JobStore::at(dir.join("jobs")).unwrap().load(&job.id).unwrap();
        assert_eq!(reloaded.status, ProofStatus::Verified);
        assert_eq!(reloaded.settlement_block, Some(7_777));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn rejected_fact_fails_the_job_at_verification() {
        let dir = scratch_dir("invalid-fact");
        let prover = prover_in(&dir, fake_prover(&dir), Duration::from_secs(10));
        let store = JobStore::at(dir.join("jobs")).unwrap();
        let registry = FactRegistry::new(FieldElement::from(0x10u32), settings());

        let mut chain = MockChainOps::new();
        let register = selector(REGISTER_ENTRY_POINT).unwrap();
        chain.expect_call_contract().returning(move |request| {
            let is_register = request.entry_point_selector == register;
            Box::pin(async move {
                Ok(CallResponse {
                    values: vec![if is_register {
                        FieldElement::from(0xfac7u32)
                    } else {
                        FieldElement::ZERO
                    }],
                    endpoint: rpc_url(),
                })
            })
        });

        let pipeline = Pipeline::new(chain, prover, registry, store, config()).unwrap();
        let job = pipeline.run(request_in(&dir)).await.unwrap();

        assert_eq!(job.status, ProofStatus::Failed);
        let error = job.error.unwrap();
        assert!(error.starts_with("integrity_verification:"), "{error}");
        // The proof itself was fine and stays on the record.
        assert!(job.proof_hash.is_some());
        assert!(job.fact_hash.is_none());
    }

    #[tokio::test]
    async fn undersized_trace_fails_before_any_chain_traffic() {
        let dir = scratch_dir("badtrace");
        let store = JobStore::at(dir.join("jobs")).unwrap();
        let registry = FactRegistry::new(FieldElement::from(0x10u32), settings());
        let prover = StoneProver::new(ProverConfig {
            binary: PathBuf::from("/nonexistent"),
            timeout: Duration::from_secs(1),
            artifacts_dir: dir.join("artifacts"),
            generate_annotations: false,
            prover_config_file: None,
            settings: settings(),
        });
        let pipeline =
            Pipeline::new(MockChainOps::new(), prover, registry, store, config()).unwrap();

        let mut request = request_in(&dir);
        request.trace.public_input.n_steps = 500;
        let job = pipeline.run(request).await.unwrap();

        assert_eq!(job.status, ProofStatus::Failed);
        assert!(job.error.unwrap().starts_with("fri_parameters:"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn stalled_prover_times_the_run_out() {
        use std::os::unix::fs::PermissionsExt;
        let dir = scratch_dir("stall");
        let path = dir.join("stall.sh");
        std::fs::write(&path, "#!/bin/sh\nsleep 30\n").unwrap();
        let mut perms = std::fs::metadata(&path).unwrap().permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&path, perms).unwrap();

        let prover = prover_in(&dir, path, Duration::from_secs(20));
        let store = JobStore::at(dir.join("jobs")).unwrap();
        let registry = FactRegistry::new(FieldElement::from(0x10u32), settings());
        let mut config = config();
        config.run_deadline = Duration::from_millis(200);
        let pipeline =
            Pipeline::new(MockChainOps::new(), prover, registry, store, config).unwrap();

        let job = pipeline.run(request_in(&dir)).await.unwrap();

        assert_eq!(job.status, ProofStatus::Timeout);
        assert!(job.error.unwrap().starts_with("proof_generation:"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn legacy_contract_fails_the_job_before_submission() {
        let dir = scratch_dir("legacy");
        let prover = prover_in(&dir, fake_prover(&dir), Duration::from_secs(10));
        let store = JobStore::at(dir.join("jobs")).unwrap();
        let registry = FactRegistry::new(FieldElement::from(0x10u32), settings());

        let mut chain = MockChainOps::new();
        let register = selector(REGISTER_ENTRY_POINT).unwrap();
        chain.expect_call_contract().returning(move |request| {
            let is_register = request.entry_point_selector == register;
            Box::pin(async move {
                Ok(CallResponse {
                    values: vec![if is_register {
                        FieldElement::from(0xfac7u32)
                    } else {
                        FieldElement::ONE
                    }],
                    endpoint: rpc_url(),
                })
            })
        });
        chain
            .expect_entry_point_arity()
            .returning(|_, _| Box::pin(async { Ok(Some(2)) }));

        let pipeline = Pipeline::new(chain, prover, registry, store, config()).unwrap();
        let job = pipeline.run(request_in(&dir)).await.unwrap();

        assert_eq!(job.status, ProofStatus::Failed);
        assert!(job.error.unwrap().starts_with("abi_detection:"));
        // Verification succeeded, so the fact is on the record.
        assert_eq!(job.fact_hash.as_deref(), Some("0xfac7"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn unconfirmed_transaction_leaves_the_job_submitted() {
        let dir = scratch_dir("unconfirmed");
        let prover = prover_in(&dir, fake_prover(&dir), Duration::from_secs(10));
        let store = JobStore::at(dir.join("jobs")).unwrap();
        let registry = FactRegistry::new(FieldElement::from(0x10u32), settings());

        let mut chain = MockChainOps::new();
        let register = selector(REGISTER_ENTRY_POINT).unwrap();
        chain.expect_call_contract().returning(move |request| {
            let is_register = request.entry_point_selector == register;
            Box::pin(async move {
                Ok(CallResponse {
                    values: vec![if is_register {
                        FieldElement::from(0xfac7u32)
                    } else {
                        FieldElement::ONE
                    }],
                    endpoint: rpc_url(),
                })
            })
        });
        chain
            .expect_entry_point_arity()
            .returning(|_, _| Box::pin(async { Ok(Some(7)) }));
        chain.expect_submit_invoke().returning(|_, _| {
            Box::pin(async {
                Ok(SubmitResponse {
                    transaction_hash: FieldElement::from(0x77u32),
                    endpoint: rpc_url(),
                })
            })
        });
        chain
            .expect_receipt_state()
            .returning(|_| Box::pin(async { Ok(ReceiptState::Pending) }));

        let pipeline = Pipeline::new(chain, prover, registry, store, config()).unwrap();
        let job = pipeline.run(request_in(&dir)).await.unwrap();

        // Recoverable: submitted, no error, settlement unknown.
        assert_eq!(job.status, ProofStatus::Submitted);
        assert!(job.error.is_none());
        assert!(job.settlement_block.is_none());
        assert_eq!(job.transaction_hash.as_deref(), Some("0x77"));
    }

    #[test]
    fn zero_deadline_configuration_is_rejected() {
        let dir = scratch_dir("zerodeadline");
        let store = JobStore::at(dir.join("jobs")).unwrap();
        let registry = FactRegistry::new(FieldElement::from(0x10u32), settings());
        let prover = StoneProver::new(ProverConfig {
            binary: PathBuf::from("/nonexistent"),
            timeout: Duration::from_secs(1),
            artifacts_dir: dir.join("artifacts"),
            generate_annotations: false,
            prover_config_file: None,
            settings: settings(),
        });
        let mut config = config();
        config.run_deadline = Duration::ZERO;
        assert!(matches!(
            Pipeline::new(MockChainOps::new(), prover, registry, store, config),
            Err(PipelineError::Config(_))
        ));
    }
}
