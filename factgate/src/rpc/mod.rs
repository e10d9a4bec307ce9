//! Chain access: endpoint failover, error classification and the
//! [`ChainOps`] seam the rest of the pipeline is written against.
//!
//! Each attempt builds a fresh JSON-RPC client for the endpoint it targets;
//! the chain id is fetched once at connect time and reused for signing.

pub mod failover;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use starknet::accounts::{Account, AccountError, Call, ExecutionEncoding, SingleOwnerAccount};
use starknet::core::types::{
    BlockId, BlockTag, ContractClass, ExecutionResult, FieldElement, FunctionCall,
    LegacyContractAbiEntry, MaybePendingTransactionReceipt, PendingTransactionReceipt,
    StarknetError, TransactionReceipt,
};
use starknet::core::utils::{get_selector_from_name, parse_cairo_short_string};
use starknet::providers::jsonrpc::HttpTransport;
use starknet::providers::{JsonRpcClient, Provider, ProviderError};
use starknet::signers::{LocalWallet, SigningKey};
use tracing::info;
use url::Url;

use crate::error::PipelineError;
use self::failover::{ChainError, FailoverError};

/// Result of a read-style contract call, with the endpoint that served it.
#[derive(Clone, Debug)]
pub struct CallResponse {
    pub values: Vec<FieldElement>,
    pub endpoint: Url,
}

#[derive(Clone, Debug)]
pub struct SubmitResponse {
    pub transaction_hash: FieldElement,
    pub endpoint: Url,
}

/// Receipt status collapsed to the three cases the pipeline acts on.
/// Decoded once, here; nothing downstream looks at raw receipts.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReceiptState {
    /// Unknown hash or not yet in a block.
    Pending,
    Settled { block: u64 },
    Reverted { reason: String },
}

/// Explicit fee bounds for invoke submissions: a gas allowance and a price
/// ceiling, multiplied into the fee cap handed to the account layer.
#[derive(Clone, Copy, Debug)]
pub struct ExecutionBounds {
    pub gas: u64,
    pub gas_price: u128,
}

impl ExecutionBounds {
    /// Fee cap for one submission. The cap is always supplied, so the
    /// account layer never falls back to on-endpoint fee estimation.
    pub fn max_fee(self) -> FieldElement {
        FieldElement::from(u128::from(self.gas).saturating_mul(self.gas_price))
    }
}

/// The chain operations the pipeline needs, kept narrow so tests can fake
/// the chain without a transport.
#[cfg_attr(test, mockall::automock)]
pub trait ChainOps {
    fn call_contract(
        &self,
        request: FunctionCall,
    ) -> impl Future<Output = Result<CallResponse, PipelineError>> + Send;

    /// Input count of `entry_point` on the contract's class, `None` when the
    /// class does not expose it.
    fn entry_point_arity(
        &self,
        contract: FieldElement,
        entry_point: String,
    ) -> impl Future<Output = Result<Option<usize>, PipelineError>> + Send;

    fn submit_invoke(
        &self,
        calls: Vec<Call>,
        bounds: ExecutionBounds,
    ) -> impl Future<Output = Result<SubmitResponse, PipelineError>> + Send;

    fn receipt_state(
        &self,
        tx_hash: FieldElement,
    ) -> impl Future<Output = Result<ReceiptState, PipelineError>> + Send;
}

/// Signing identity for transaction submission.
#[derive(Clone)]
pub struct AccountConfig {
    pub signing_key: SigningKey,
    pub address: FieldElement,
}

pub struct RpcGateway {
    // Ordered candidate list, fixed for the life of the gateway.
    endpoints: Arc<[Url]>,
    call_timeout: Duration,
    chain_id: FieldElement,
    account: Option<AccountConfig>,
}

impl RpcGateway {
    /// Resolves the chain id through the failover pass and keeps it for the
    /// lifetime of the gateway. Fails fast when no endpoint can answer.
    pub async fn connect(
        endpoints: Vec<Url>,
        account: Option<AccountConfig>,
        call_timeout: Duration,
    ) -> Result<Self, PipelineError> {
        if endpoints.is_empty() {
            return Err(PipelineError::Config(
                "at least one RPC endpoint is required".into(),
            ));
        }
        let (chain_id, endpoint) =
            failover::execute(&endpoints, "starknet_chainId", |url| async move {
                let provider = provider_for(&url);
                bounded(call_timeout, async move {
                    provider.chain_id().await.map_err(classify)
                })
                .await
            })
            .await
            .map_err(|e| lift(e, "starknet_chainId"))?;

        let chain_name = parse_cairo_short_string(&chain_id)
            .unwrap_or_else(|_| format!("{chain_id:#x}"));
        info!(chain = %chain_name, %endpoint, "connected to chain");

        Ok(Self {
            endpoints: endpoints.into(),
            call_timeout,
            chain_id,
            account,
        })
    }

    pub fn chain_id(&self) -> FieldElement {
        self.chain_id
    }
}

impl ChainOps for RpcGateway {
    async fn call_contract(&self, request: FunctionCall) -> Result<CallResponse, PipelineError> {
        let timeout = self.call_timeout;
        let (values, endpoint) =
            failover::execute(&self.endpoints, "starknet_call", |url| {
                let request = request.clone();
                async move {
                    let provider = provider_for(&url);
                    bounded(timeout, async move {
                        provider
                            .call(&request, BlockId::Tag(BlockTag::Latest))
                            .await
                            .map_err(classify)
                    })
                    .await
                }
            })
            .await
            .map_err(|e| lift(e, "starknet_call"))?;
        Ok(CallResponse { values, endpoint })
    }

    async fn entry_point_arity(
        &self,
        contract: FieldElement,
        entry_point: String,
    ) -> Result<Option<usize>, PipelineError> {
        let timeout = self.call_timeout;
        let (class, _endpoint) =
            failover::execute(&self.endpoints, "starknet_getClassAt", |url| async move {
                let provider = provider_for(&url);
                bounded(timeout, async move {
                    provider
                        .get_class_at(BlockId::Tag(BlockTag::Latest), &contract)
                        .await
                        .map_err(classify)
                })
                .await
            })
            .await
            .map_err(|e| lift(e, "starknet_getClassAt"))?;
        Ok(count_entry_point_inputs(&class, &entry_point))
    }

    async fn submit_invoke(
        &self,
        calls: Vec<Call>,
        bounds: ExecutionBounds,
    ) -> Result<SubmitResponse, PipelineError> {
        let account = self.account.as_ref().ok_or_else(|| {
            PipelineError::Config("no submitting account configured".into())
        })?;
        let timeout = self.call_timeout;
        let chain_id = self.chain_id;
        let (transaction_hash, endpoint) = failover::execute(
            &self.endpoints,
            "starknet_addInvokeTransaction",
            |url| {
                let calls = calls.clone();
                let signer = LocalWallet::from(account.signing_key.clone());
                let address = account.address;
                async move {
                    let provider = provider_for(&url);
                    let mut chain_account = SingleOwnerAccount::new(
                        provider,
                        signer,
                        address,
                        chain_id,
                        ExecutionEncoding::New,
                    );
                    // Nonce from pending state, so back-to-back runs do not
                    // collide on the same nonce.
                    chain_account.set_block_id(BlockId::Tag(BlockTag::Pending));
                    bounded(timeout, async {
                        chain_account
                            .execute(calls)
                            .max_fee(bounds.max_fee())
                            .send()
                            .await
                            .map(|result| result.transaction_hash)
                            .map_err(classify_account)
                    })
                    .await
                }
            },
        )
        .await
        .map_err(|e| lift(e, "starknet_addInvokeTransaction"))?;
        Ok(SubmitResponse {
            transaction_hash,
            endpoint,
        })
    }

    async fn receipt_state(&self, tx_hash: FieldElement) -> Result<ReceiptState, PipelineError> {
        let timeout = self.call_timeout;
        let (state, _endpoint) = failover::execute(
            &self.endpoints,
            "starknet_getTransactionReceipt",
            |url| async move {
                let provider = provider_for(&url);
                bounded(timeout, async move {
                    match provider.get_transaction_receipt(&tx_hash).await {
                        Ok(receipt) => Ok(decode_receipt(receipt)),
                        // An unknown hash is a receipt that does not exist
                        // yet, not a failure.
                        Err(ProviderError::StarknetError(
                            StarknetError::TransactionHashNotFound,
                        )) => Ok(ReceiptState::Pending),
                        Err(e) => Err(classify(e)),
                    }
                })
                .await
            },
        )
        .await
        .map_err(|e| lift(e, "starknet_getTransactionReceipt"))?;
        Ok(state)
    }
}

fn provider_for(url: &Url) -> JsonRpcClient<HttpTransport> {
    JsonRpcClient::new(HttpTransport::new(url.clone()))
}

async fn bounded<T>(
    limit: Duration,
    fut: impl Future<Output = Result<T, ChainError>>,
) -> Result<T, ChainError> {
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(ChainError::Transport(format!(
            "no response within {limit:?}"
        ))),
    }
}

/// Maps provider failures onto retryability classes. Structured chain
/// errors mean the operation itself is bad and would fail anywhere.
fn classify(err: ProviderError) -> ChainError {
    match err {
        ProviderError::RateLimited => ChainError::RateLimited,
        ProviderError::StarknetError(StarknetError::ContractError(data)) => {
            ChainError::Rejected(data.revert_error)
        }
        ProviderError::StarknetError(StarknetError::TransactionExecutionError(data)) => {
            ChainError::Rejected(data.execution_error)
        }
        ProviderError::StarknetError(e) => ChainError::Rejected(e.to_string()),
        ProviderError::ArrayLengthMismatch => {
            ChainError::Rejected("array length mismatch in response".into())
        }
        other => classify_opaque(other.to_string()),
    }
}

/// Transport-level failures carry no structure, only a message. Endpoints
/// missing a method report it here rather than as a starknet error.
fn classify_opaque(message: String) -> ChainError {
    if message.to_ascii_lowercase().contains("method not found") {
        ChainError::Capability(message)
    } else {
        ChainError::Transport(message)
    }
}

fn classify_account<S>(err: AccountError<S>) -> ChainError
where
    S: std::error::Error,
{
    match err {
        AccountError::Provider(e) => classify(e),
        other => ChainError::Rejected(other.to_string()),
    }
}

fn lift(err: FailoverError, operation: &'static str) -> PipelineError {
    match &err {
        FailoverError::Exhausted(_) => PipelineError::RpcExhausted {
            operation,
            source: err,
        },
        FailoverError::Aborted { .. } => PipelineError::Chain {
            operation,
            source: err,
        },
    }
}

fn decode_receipt(receipt: MaybePendingTransactionReceipt) -> ReceiptState {
    match receipt {
        MaybePendingTransactionReceipt::Receipt(receipt) => {
            let (result, block) = match receipt {
                TransactionReceipt::Invoke(r) => (r.execution_result, r.block_number),
                TransactionReceipt::L1Handler(r) => (r.execution_result, r.block_number),
                TransactionReceipt::Declare(r) => (r.execution_result, r.block_number),
                TransactionReceipt::Deploy(r) => (r.execution_result, r.block_number),
                TransactionReceipt::DeployAccount(r) => (r.execution_result, r.block_number),
            };
            match result {
                ExecutionResult::Succeeded => ReceiptState::Settled { block },
                ExecutionResult::Reverted { reason } => ReceiptState::Reverted { reason },
            }
        }
        MaybePendingTransactionReceipt::PendingReceipt(receipt) => {
            let result = match receipt {
                PendingTransactionReceipt::Invoke(r) => r.execution_result,
                PendingTransactionReceipt::L1Handler(r) => r.execution_result,
                PendingTransactionReceipt::Declare(r) => r.execution_result,
                PendingTransactionReceipt::DeployAccount(r) => r.execution_result,
            };
            match result {
                // A revert is final even before block inclusion.
                ExecutionResult::Reverted { reason } => ReceiptState::Reverted { reason },
                ExecutionResult::Succeeded => ReceiptState::Pending,
            }
        }
    }
}

/// Input count of `entry_point` in a fetched class, handling both Sierra
/// classes (ABI as a JSON string, functions possibly nested in interfaces)
/// and legacy classes (typed ABI entries).
fn count_entry_point_inputs(class: &ContractClass, entry_point: &str) -> Option<usize> {
    match class {
        ContractClass::Sierra(sierra) => {
            let entries: Vec<serde_json::Value> = serde_json::from_str(&sierra.abi).ok()?;
            sierra_function_arity(&entries, entry_point)
        }
        ContractClass::Legacy(legacy) => legacy.abi.as_ref()?.iter().find_map(|entry| {
            match entry {
                LegacyContractAbiEntry::Function(f) if f.name == entry_point => {
                    Some(f.inputs.len())
                }
                _ => None,
            }
        }),
    }
}

fn sierra_function_arity(entries: &[serde_json::Value], entry_point: &str) -> Option<usize> {
    for entry in entries {
        match entry.get("type").and_then(serde_json::Value::as_str) {
            Some("function")
                if entry.get("name").and_then(serde_json::Value::as_str)
                    == Some(entry_point) =>
            {
                return entry
                    .get("inputs")
                    .and_then(serde_json::Value::as_array)
                    .map(Vec::len);
            }
            Some("interface") => {
                if let Some(items) = entry.get("items").and_then(serde_json::Value::as_array) {
                    if let Some(arity) = sierra_function_arity(items, entry_point) {
                        return Some(arity);
                    }
                }
            }
            _ => {}
        }
    }
    None
}

/// Order-preserving dedupe of configured endpoints.
pub fn normalize_endpoints(raw: impl IntoIterator<Item = Url>) -> Result<Vec<Url>, PipelineError> {
    let mut endpoints: Vec<Url> = Vec::new();
    for url in raw {
        if !endpoints.contains(&url) {
            endpoints.push(url);
        }
    }
    if endpoints.is_empty() {
        return Err(PipelineError::Config(
            "at least one RPC endpoint is required".into(),
        ));
    }
    Ok(endpoints)
}

/// Selector for a named entry point, with a configuration-shaped error for
/// names the hash rejects.
pub(crate) fn selector(name: &str) -> Result<FieldElement, PipelineError> {
    get_selector_from_name(name)
        .map_err(|e| PipelineError::Config(format!("invalid entry point name {name:?}: {e}")))
}
