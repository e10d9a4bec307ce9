//! On-chain fact registry interaction.
//!
//! Registration submits the serialized proof behind a four-felt settings
//! prefix; the registry verifies the STARK and answers with the fact
//! identifier that gated contracts later check. Verification reads the
//! registry back through whichever validity entry point the deployment
//! exposes.

use starknet::core::types::{FieldElement, FunctionCall};
use tracing::{debug, info};
use url::Url;

use crate::error::PipelineError;
use crate::prover::ProofArtifact;
use crate::rpc::{selector, ChainOps};

pub const REGISTER_ENTRY_POINT: &str = "verify_proof_full_and_register_fact";

/// Validity query names tried in order. Registry deployments disagree on
/// the name; the first one that answers settles it.
pub const VALIDITY_ENTRY_POINTS: &[&str] =
    &["is_valid", "is_fact_valid", "isValid", "isCairoFactValid"];

/// Proof system identifiers prefixed onto every registration payload, each
/// encoded as a short string. The registry dispatches on these before
/// touching the proof itself, so they must match the deployed verifier
/// exactly.
#[derive(Clone, Debug)]
pub struct ProofSettings {
    pub layout: String,
    pub hasher: String,
    pub stone_version: String,
    pub memory_mode: String,
}

impl ProofSettings {
    pub fn prefix_felts(&self) -> Result<[FieldElement; 4], PipelineError> {
        Ok([
            short_string(&self.layout)?,
            short_string(&self.hasher)?,
            short_string(&self.stone_version)?,
            short_string(&self.memory_mode)?,
        ])
    }
}

fn short_string(value: &str) -> Result<FieldElement, PipelineError> {
    felt_codec::encode_short_string(value)
        .map_err(|e| PipelineError::Config(format!("bad proof setting: {e}")))
}

/// The artifact fields we check before spending a registration call on it.
#[derive(Clone, Debug)]
pub struct ArtifactShape {
    pub layout: String,
    pub n_steps: u64,
}

/// Structural check of a prover artifact: the parameter section, the public
/// input and a non-empty proof body must all be present. Anything missing
/// here would be rejected on chain at far greater cost.
pub fn validate_artifact(bytes: &[u8]) -> Result<ArtifactShape, PipelineError> {
    let doc: serde_json::Value = serde_json::from_slice(bytes)
        .map_err(|e| malformed(format!("not valid JSON: {e}")))?;
    let parameters = doc
        .get("proof_parameters")
        .ok_or_else(|| malformed("missing proof_parameters section".into()))?;
    if parameters.get("stark").and_then(|s| s.get("fri")).is_none() {
        return Err(malformed("missing stark.fri parameters".into()));
    }
    let public = doc
        .get("public_input")
        .ok_or_else(|| malformed("missing public_input section".into()))?;
    let layout = public
        .get("layout")
        .and_then(serde_json::Value::as_str)
        .ok_or_else(|| malformed("public_input lacks a layout".into()))?
        .to_owned();
    let n_steps = public
        .get("n_steps")
        .and_then(serde_json::Value::as_u64)
        .ok_or_else(|| malformed("public_input lacks n_steps".into()))?;
    let body = doc
        .get("proof_hex")
        .and_then(serde_json::Value::as_str)
        .ok_or_else(|| malformed("missing proof_hex body".into()))?;
    if body.trim_start_matches("0x").is_empty() {
        return Err(malformed("empty proof body".into()));
    }
    Ok(ArtifactShape { layout, n_steps })
}

fn malformed(reason: String) -> PipelineError {
    PipelineError::MalformedProofPayload { reason }
}

pub struct FactRegistry {
    address: FieldElement,
    settings: ProofSettings,
}

impl FactRegistry {
    pub fn new(address: FieldElement, settings: ProofSettings) -> Self {
        Self { address, settings }
    }

    pub fn address(&self) -> FieldElement {
        self.address
    }

    /// Registration calldata: the settings prefix followed by the artifact
    /// bytes packed big-endian into 31-byte field elements.
    pub fn registration_calldata(&self, payload: &[u8]) -> Result<Vec<FieldElement>, PipelineError> {
        let mut calldata = self.settings.prefix_felts()?.to_vec();
        calldata.extend(felt_codec::bytes_to_felts(payload));
        Ok(calldata)
    }

    /// Submits the proof for verification and returns the registered fact
    /// together with the endpoint that accepted it.
    pub async fn register<G: ChainOps>(
        &self,
        chain: &G,
        artifact: &ProofArtifact,
    ) -> Result<(FieldElement, Url), PipelineError> {
        let shape = validate_artifact(&artifact.bytes)?;
        let calldata = self.registration_calldata(&artifact.bytes)?;
        let registry_hex = format!("{:#x}", self.address);
        info!(
            registry = %registry_hex,
            layout = %shape.layout,
            n_steps = shape.n_steps,
            calldata_len = calldata.len(),
            "registering proof fact"
        );
        let request = FunctionCall {
            contract_address: self.address,
            entry_point_selector: selector(REGISTER_ENTRY_POINT)?,
            calldata,
        };
        let response = chain
            .call_contract(request)
            .await
            .map_err(specialize_registration)?;
        let fact = response.values.first().copied().ok_or_else(|| {
            PipelineError::RegistrationFailure {
                reason: "registry returned no fact identifier".into(),
            }
        })?;
        let fact_hex = format!("{fact:#x}");
        info!(fact = %fact_hex, endpoint = %response.endpoint, "fact registered");
        Ok((fact, response.endpoint))
    }

    pub async fn is_fact_valid<G: ChainOps>(
        &self,
        chain: &G,
        fact: FieldElement,
    ) -> Result<bool, PipelineError> {
        query_fact_validity(chain, self.address, fact).await
    }
}

/// Endpoint exhaustion passes through untouched; anything else becomes a
/// registration failure carrying the chain's reason.
fn specialize_registration(err: PipelineError) -> PipelineError {
    match err {
        PipelineError::RpcExhausted { .. } => err,
        other => PipelineError::RegistrationFailure {
            reason: other.to_string(),
        },
    }
}

/// Asks the registry whether `fact` is valid, walking the known validity
/// entry points until one answers. A rejected entry point just means the
/// deployment calls it something else; endpoint exhaustion aborts the whole
/// query since every later candidate would exhaust the same way.
pub async fn query_fact_validity<G: ChainOps>(
    chain: &G,
    registry: FieldElement,
    fact: FieldElement,
) -> Result<bool, PipelineError> {
    let mut last_rejection: Option<String> = None;
    for entry_point in VALIDITY_ENTRY_POINTS {
        let request = FunctionCall {
            contract_address: registry,
            entry_point_selector: selector(entry_point)?,
            calldata: vec![fact],
        };
        match chain.call_contract(request).await {
            Ok(response) => {
                let valid = response
                    .values
                    .first()
                    .is_some_and(|v| *v != FieldElement::ZERO);
                debug!(entry_point, valid, endpoint = %response.endpoint, "validity query answered");
                return Ok(valid);
            }
            Err(err @ PipelineError::RpcExhausted { .. }) => return Err(err),
            Err(err) => {
                debug!(entry_point, error = %err, "validity entry point refused, trying next");
                last_rejection = Some(err.to_string());
            }
        }
    }
    Err(PipelineError::VerificationFailure {
        fact: format!("{fact:#x}"),
        reason: last_rejection
            .unwrap_or_else(|| "no validity entry point answered".into()),
    })
}
