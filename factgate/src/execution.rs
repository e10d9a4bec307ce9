//! Proof-gated execution encoding.
//!
//! Deployed routers speak one of three calling conventions, distinguished
//! by the input count of their allocation entry point. Detection inspects
//! the contract class once and caches the answer per address; encoding then
//! lays the calldata out for whichever convention the contract expects.

use std::fmt;
use std::num::NonZeroUsize;

use lru::LruCache;
use serde::{Deserialize, Serialize};
use starknet::accounts::Call;
use starknet::core::types::FieldElement;
use starknet_crypto::poseidon_hash_many;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::error::PipelineError;
use crate::risk::{risk_score, MetricsPair, ProtocolMetrics};
use crate::rpc::{selector, ChainOps};

const CONVENTION_CACHE_SIZE: usize = 64;

/// Calldata shapes accepted by deployed allocation routers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CallingConvention {
    /// Metrics only; predates proof gating. Never submitted to.
    Legacy,
    /// Metrics plus fact and registry reference.
    ProofGated,
    /// Proof-gated plus model version and a constraint signature block.
    ProofGatedWithAgent,
}

impl CallingConvention {
    /// Maps an entry point's input count onto a convention. The agent
    /// threshold is checked first since its signature extends the gated one.
    pub const fn from_input_count(count: usize) -> Option<Self> {
        if count >= 9 {
            Some(Self::ProofGatedWithAgent)
        } else if count >= 7 {
            Some(Self::ProofGated)
        } else if count == 2 {
            Some(Self::Legacy)
        } else {
            None
        }
    }
}

impl fmt::Display for CallingConvention {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Legacy => "legacy",
            Self::ProofGated => "proof_gated",
            Self::ProofGatedWithAgent => "proof_gated_with_agent",
        };
        f.write_str(name)
    }
}

/// Refuses conventions that cannot carry a proof fact.
pub fn require_proof_gated(convention: CallingConvention) -> Result<(), PipelineError> {
    if convention == CallingConvention::Legacy {
        return Err(PipelineError::AbiVariantUnsupported {
            detected: convention.to_string(),
        });
    }
    Ok(())
}

/// Detects and caches the calling convention per contract address.
///
/// Detection never fails: a contract whose class cannot be fetched or
/// inspected is assumed to speak the richest convention, since extra
/// arguments are rejected loudly on chain while missing ones are not.
pub struct ConventionDetector {
    entry_point: String,
    cache: Mutex<LruCache<FieldElement, CallingConvention>>,
}

impl ConventionDetector {
    pub fn new(entry_point: String) -> Self {
        Self {
            entry_point,
            cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(CONVENTION_CACHE_SIZE).unwrap(),
            )),
        }
    }

    pub async fn detect<G: ChainOps>(
        &self,
        chain: &G,
        contract: FieldElement,
    ) -> CallingConvention {
        if let Some(cached) = self.cache.lock().await.get(&contract) {
            return *cached;
        }

        let contract_hex = format!("{contract:#x}");
        let convention = match chain
            .entry_point_arity(contract, self.entry_point.clone())
            .await
        {
            Ok(Some(count)) => match CallingConvention::from_input_count(count) {
                Some(convention) => {
                    info!(
                        contract = %contract_hex,
                        entry_point = %self.entry_point,
                        inputs = count,
                        %convention,
                        "calling convention detected"
                    );
                    convention
                }
                None => {
                    warn!(
                        contract = %contract_hex,
                        inputs = count,
                        "unrecognized input count, assuming the richest convention"
                    );
                    CallingConvention::ProofGatedWithAgent
                }
            },
            Ok(None) => {
                warn!(
                    contract = %contract_hex,
                    entry_point = %self.entry_point,
                    "entry point not found in class, assuming the richest convention"
                );
                CallingConvention::ProofGatedWithAgent
            }
            Err(error) => {
                warn!(
                    contract = %contract_hex,
                    %error,
                    "class inspection failed, assuming the richest convention"
                );
                CallingConvention::ProofGatedWithAgent
            }
        };

        self.cache.lock().await.put(contract, convention);
        convention
    }
}

/// A user's signed allocation constraints, passed through to agent-aware
/// contracts. Absent constraints are encoded as an all-zero sentinel block
/// the contract skips.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConstraintSignature {
    pub signer: FieldElement,
    pub max_single_bps: u32,
    pub min_diversification: u32,
    pub max_volatility_bps: u32,
    pub min_liquidity_tier: u32,
    pub signature_r: FieldElement,
    pub signature_s: FieldElement,
    pub timestamp: u64,
}

impl ConstraintSignature {
    pub fn sentinel() -> Self {
        Self {
            signer: FieldElement::ZERO,
            max_single_bps: 0,
            min_diversification: 0,
            max_volatility_bps: 0,
            min_liquidity_tier: 0,
            signature_r: FieldElement::ZERO,
            signature_s: FieldElement::ZERO,
            timestamp: 0,
        }
    }

    pub fn is_sentinel(&self) -> bool {
        self.signer == FieldElement::ZERO
            && self.signature_r == FieldElement::ZERO
            && self.signature_s == FieldElement::ZERO
    }

    /// Poseidon hash over the constraint fields, the message the signature
    /// is checked against on chain.
    pub fn message_hash(&self) -> FieldElement {
        poseidon_hash_many(&[
            FieldElement::from(self.max_single_bps),
            FieldElement::from(self.min_diversification),
            FieldElement::from(self.max_volatility_bps),
            FieldElement::from(self.min_liquidity_tier),
            FieldElement::from(self.timestamp),
        ])
    }

    fn felts(&self) -> [FieldElement; 8] {
        [
            self.signer,
            FieldElement::from(self.max_single_bps),
            FieldElement::from(self.min_diversification),
            FieldElement::from(self.max_volatility_bps),
            FieldElement::from(self.min_liquidity_tier),
            self.signature_r,
            self.signature_s,
            FieldElement::from(self.timestamp),
        ]
    }
}

/// Everything needed to encode one gated execution call. Risk scores are
/// recomputed from the metrics so calldata can never disagree with them.
#[derive(Clone, Debug)]
pub struct GatedCallInputs {
    pub metrics: MetricsPair,
    pub jediswap_risk: u32,
    pub ekubo_risk: u32,
    /// Fact identifier from the registry, hex.
    pub fact_hash: String,
    pub registry_address: FieldElement,
    pub model_version: u32,
    pub constraint: Option<ConstraintSignature>,
}

impl GatedCallInputs {
    pub fn new(
        metrics: MetricsPair,
        fact_hash: String,
        registry_address: FieldElement,
        model_version: u32,
        constraint: Option<ConstraintSignature>,
    ) -> Self {
        Self {
            jediswap_risk: risk_score(&metrics.jediswap),
            ekubo_risk: risk_score(&metrics.ekubo),
            metrics,
            fact_hash,
            registry_address,
            model_version,
            constraint,
        }
    }

    /// Lays out calldata for `convention`.
    ///
    /// Legacy is ten metric felts; the gated shape appends the fact twice
    /// (proposal and execution halves read it separately), both risk scores
    /// and the registry address; the agent shape further appends the model
    /// version and the constraint block, sentinel when absent.
    pub fn encode(&self, convention: CallingConvention) -> Result<Vec<FieldElement>, PipelineError> {
        let mut calldata = Vec::with_capacity(24);
        calldata.extend(metric_felts(&self.metrics.jediswap));
        calldata.extend(metric_felts(&self.metrics.ekubo));
        if convention == CallingConvention::Legacy {
            return Ok(calldata);
        }

        let (fact, reduced) = felt_codec::hex_to_felt(&self.fact_hash)
            .map_err(|e| PipelineError::InvalidFactIdentifier(e.to_string()))?;
        if reduced {
            warn!(fact = %self.fact_hash, "fact identifier exceeded the field and was reduced");
        }
        calldata.push(fact);
        calldata.push(fact);
        calldata.push(FieldElement::from(self.jediswap_risk));
        calldata.push(FieldElement::from(self.ekubo_risk));
        calldata.push(self.registry_address);
        if convention == CallingConvention::ProofGated {
            return Ok(calldata);
        }

        calldata.push(FieldElement::from(self.model_version));
        let constraint = self
            .constraint
            .clone()
            .unwrap_or_else(ConstraintSignature::sentinel);
        calldata.extend(constraint.felts());
        Ok(calldata)
    }

    pub fn to_call(
        &self,
        router: FieldElement,
        entry_point: &str,
        convention: CallingConvention,
    ) -> Result<Call, PipelineError> {
        Ok(Call {
            to: router,
            selector: selector(entry_point)?,
            calldata: self.encode(convention)?,
        })
    }
}

fn metric_felts(m: &ProtocolMetrics) -> [FieldElement; 5] {
    [
        FieldElement::from(m.utilization),
        FieldElement::from(m.volatility),
        FieldElement::from(m.liquidity),
        FieldElement::from(m.audit_score),
        FieldElement::from(m.age_days),
    ]
}
