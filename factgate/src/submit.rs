//! Transaction submission and settlement confirmation.
//!
//! Submission signs a single invoke under an explicit fee cap; fee
//! estimation is deliberately never consulted. Confirmation polls the
//! receipt until the transaction lands in a block, reverts, or the window
//! closes.

use std::time::Duration;

use starknet::accounts::Call;
use starknet::core::types::FieldElement;
use tokio::time::{sleep, Instant};
use tracing::{debug, info};

use crate::error::PipelineError;
use crate::rpc::{ChainOps, ExecutionBounds, ReceiptState, SubmitResponse};

#[derive(Clone, Copy, Debug)]
pub struct ConfirmationPolicy {
    pub poll_interval: Duration,
    pub timeout: Duration,
}

impl Default for ConfirmationPolicy {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
            timeout: Duration::from_secs(120),
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct Settlement {
    pub block: u64,
}

/// Submits the gated call. A definitive rejection at submission is treated
/// like a revert: the call itself is bad and retrying it cannot help.
pub async fn submit_call<G: ChainOps>(
    chain: &G,
    call: Call,
    bounds: ExecutionBounds,
) -> Result<SubmitResponse, PipelineError> {
    info!(
        calldata_len = call.calldata.len(),
        gas = bounds.gas,
        gas_price = bounds.gas_price,
        "submitting gated execution"
    );
    let response = chain
        .submit_invoke(vec![call], bounds)
        .await
        .map_err(|e| match e {
            PipelineError::Chain { source, .. } => PipelineError::TransactionReverted {
                reason: source.to_string(),
            },
            other => other,
        })?;
    let tx_hex = format!("{:#x}", response.transaction_hash);
    info!(tx = %tx_hex, endpoint = %response.endpoint, "transaction accepted");
    Ok(response)
}

/// Polls the receipt until the transaction settles or reverts.
///
/// A pending receipt is an ordinary value here, not a failure; only the
/// window closing turns the wait into a `ConfirmationTimeout`.
pub async fn await_settlement<G: ChainOps>(
    chain: &G,
    tx_hash: FieldElement,
    policy: ConfirmationPolicy,
) -> Result<Settlement, PipelineError> {
    let deadline = Instant::now() + policy.timeout;
    loop {
        match chain.receipt_state(tx_hash).await? {
            ReceiptState::Settled { block } => {
                info!(block, "transaction settled");
                return Ok(Settlement { block });
            }
            ReceiptState::Reverted { reason } => {
                return Err(PipelineError::TransactionReverted { reason });
            }
            ReceiptState::Pending => {
                debug!("receipt still pending");
            }
        }
        if Instant::now() + policy.poll_interval > deadline {
            return Err(PipelineError::ConfirmationTimeout {
                tx_hash: format!("{tx_hash:#x}"),
                waited_secs: policy.timeout.as_secs(),
            });
        }
        sleep(policy.poll_interval).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use url::Url;

    use crate::rpc::failover::{ChainError, FailoverError};
    use crate::rpc::MockChainOps;

    fn fast_policy() -> ConfirmationPolicy {
        ConfirmationPolicy {
            poll_interval: Duration::from_millis(5),
            timeout: Duration::from_millis(50),
        }
    }

    #[tokio::test]
    async fn settlement_is_reported_after_pending_polls() {
        let mut chain = MockChainOps::new();
        let polls = Arc::new(AtomicUsize::new(0));
        let counter = polls.clone();
        chain.expect_receipt_state().returning(move |_| {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            Box::pin(async move {
                if n < 2 {
                    Ok(ReceiptState::Pending)
                } else {
                    Ok(ReceiptState::Settled { block: 4_242 })
                }
            })
        });

        let settlement = await_settlement(&chain, FieldElement::ONE, fast_policy())
            .await
            .unwrap();
        assert_eq!(settlement.block, 4_242);
        assert_eq!(polls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn revert_surfaces_the_chain_reason() {
        let mut chain = MockChainOps::new();
        chain.expect_receipt_state().returning(|_| {
            Box::pin(async {
                Ok(ReceiptState::Reverted {
                    reason: "diversification bound violated".into(),
                })
            })
        });

        let err = await_settlement(&chain, FieldElement::ONE, fast_policy())
            .await
            .unwrap_err();
        match err {
            PipelineError::TransactionReverted { reason } => {
                assert!(reason.contains("diversification"));
            }
            other => panic!("expected revert, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn unresolved_transaction_times_out_with_its_hash() {
        let mut chain = MockChainOps::new();
        chain
            .expect_receipt_state()
            .returning(|_| Box::pin(async { Ok(ReceiptState::Pending) }));

        let err = await_settlement(&chain, FieldElement::from(0xfeedu32), fast_policy())
            .await
            .unwrap_err();
        match err {
            PipelineError::ConfirmationTimeout { tx_hash, .. } => {
                assert_eq!(tx_hash, "0xfeed");
            }
            other => panic!("expected confirmation timeout, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn submission_rejection_reads_as_a_revert() {
        let mut chain = MockChainOps::new();
        chain.expect_submit_invoke().returning(|_, _| {
            Box::pin(async {
                Err(PipelineError::Chain {
                    operation: "starknet_addInvokeTransaction",
                    source: FailoverError::Aborted {
                        endpoint: Url::parse("http://rpc.example/").unwrap(),
                        error: ChainError::Rejected("account validation failed".into()),
                    },
                })
            })
        });

        let call = Call {
            to: FieldElement::ONE,
            selector: FieldElement::TWO,
            calldata: vec![],
        };
        let bounds = ExecutionBounds {
            gas: 300_000,
            gas_price: 100,
        };
        let err = submit_call(&chain, call, bounds).await.unwrap_err();
        match err {
            PipelineError::TransactionReverted { reason } => {
                assert!(reason.contains("account validation failed"));
            }
            other => panic!("expected revert mapping, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn submission_success_passes_the_response_through() {
        let mut chain = MockChainOps::new();
        chain.expect_submit_invoke().returning(|calls, _| {
            assert_eq!(calls.len(), 1);
            Box::pin(async {
                Ok(SubmitResponse {
                    transaction_hash: FieldElement::from(0x77u32),
                    endpoint: Url::parse("http://rpc.example/").unwrap(),
                })
            })
        });

        let call = Call {
            to: FieldElement::ONE,
            selector: FieldElement::TWO,
            calldata: vec![FieldElement::THREE],
        };
        let bounds = ExecutionBounds {
            gas: 300_000,
            gas_price: 100,
        };
        let response = submit_call(&chain, call, bounds).await.unwrap();
        assert_eq!(response.transaction_hash, FieldElement::from(0x77u32));
    }
}
