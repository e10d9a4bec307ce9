//! Ordered endpoint failover for chain operations.
//!
//! Every RPC call in the crate funnels through [`execute`]: one pass over
//! the configured endpoints, first success wins, definitive rejections stop
//! the pass early. There is no retry of an endpoint that already failed.

use std::fmt;
use std::future::Future;

use itertools::Itertools;
use thiserror::Error;
use tracing::warn;
use url::Url;

/// How a single endpoint attempt failed.
#[derive(Clone, Debug, Error)]
pub enum ChainError {
    /// The endpoint could not be reached or did not answer in time.
    #[error("transport failure: {0}")]
    Transport(String),

    /// The endpoint throttled us.
    #[error("rate limited")]
    RateLimited,

    /// The endpoint lacks a method or feature this operation needs.
    #[error("endpoint capability gap: {0}")]
    Capability(String),

    /// The chain gave a definitive answer that the operation is invalid.
    /// Another endpoint would say the same thing.
    #[error("rejected: {0}")]
    Rejected(String),
}

impl ChainError {
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Rejected(_))
    }
}

/// One endpoint's failure within an exhausted pass.
#[derive(Clone, Debug)]
pub struct EndpointFailure {
    pub endpoint: Url,
    pub error: ChainError,
}

impl fmt::Display for EndpointFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.endpoint, self.error)
    }
}

#[derive(Clone, Debug, Error)]
pub enum FailoverError {
    /// Every endpoint failed retryably; the per-endpoint history is kept so
    /// operators can see which endpoint failed how.
    #[error("all {} endpoints failed: [{}]", .0.len(), render_failures(.0))]
    Exhausted(Vec<EndpointFailure>),

    /// An endpoint rejected the operation outright; the remaining endpoints
    /// were never consulted.
    #[error("rejected by {endpoint}: {error}")]
    Aborted { endpoint: Url, error: ChainError },
}

fn render_failures(failures: &[EndpointFailure]) -> String {
    failures.iter().map(ToString::to_string).join("; ")
}

/// Runs `op` against each endpoint in order until one succeeds.
///
/// Returns the successful value together with the endpoint that served it.
/// Retryable failures are logged and collected; a non-retryable failure
/// aborts the pass immediately.
pub async fn execute<T, Op, Fut>(
    endpoints: &[Url],
    operation: &str,
    mut op: Op,
) -> Result<(T, Url), FailoverError>
where
    Op: FnMut(Url) -> Fut,
    Fut: Future<Output = Result<T, ChainError>>,
{
    let mut failures = Vec::new();
    for endpoint in endpoints {
        match op(endpoint.clone()).await {
            Ok(value) => return Ok((value, endpoint.clone())),
            Err(error) if error.is_retryable() => {
                warn!(%endpoint, %error, operation, "endpoint failed, moving to the next");
                failures.push(EndpointFailure {
                    endpoint: endpoint.clone(),
                    error,
                });
            }
            Err(error) => {
                return Err(FailoverError::Aborted {
                    endpoint: endpoint.clone(),
                    error,
                })
            }
        }
    }
    Err(FailoverError::Exhausted(failures))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn endpoints() -> Vec<Url> {
        ["http://one.example/", "http://two.example/", "http://three.example/"]
            .iter()
            .map(|u| Url::parse(u).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn first_success_short_circuits() {
        let endpoints = endpoints();
        let attempts = Mutex::new(Vec::new());

        let (value, used) = execute(&endpoints, "test_op", |url| {
            attempts.lock().unwrap().push(url.clone());
            async move {
                if url.host_str() == Some("one.example") {
                    Err(ChainError::Transport("connection refused".into()))
                } else {
                    Ok(7u32)
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(value, 7);
        assert_eq!(used, endpoints[1]);
        assert_eq!(attempts.into_inner().unwrap(), vec![
            endpoints[0].clone(),
            endpoints[1].clone()
        ]);
    }

    #[tokio::test]
    async fn exhaustion_keeps_per_endpoint_history() {
        let endpoints = endpoints();
        let result: Result<((), Url), _> = execute(&endpoints, "test_op", |url| async move {
            if url.host_str() == Some("two.example") {
                Err(ChainError::RateLimited)
            } else {
                Err(ChainError::Transport(format!("{} unreachable", url)))
            }
        })
        .await;

        match result {
            Err(FailoverError::Exhausted(failures)) => {
                assert_eq!(failures.len(), 3);
                assert_eq!(failures[0].endpoint, endpoints[0]);
                assert!(matches!(failures[1].error, ChainError::RateLimited));
            }
            other => panic!("expected exhaustion, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn rejection_aborts_without_touching_later_endpoints() {
        let endpoints = endpoints();
        let attempts = Mutex::new(0usize);

        let result: Result<((), Url), _> = execute(&endpoints, "test_op", |_url| {
            *attempts.lock().unwrap() += 1;
            async { Err(ChainError::Rejected("entry point does not exist".into())) }
        })
        .await;

        assert!(matches!(result, Err(FailoverError::Aborted { .. })));
        assert_eq!(attempts.into_inner().unwrap(), 1);
    }

    #[tokio::test]
    async fn empty_endpoint_list_exhausts_immediately() {
        let result: Result<((), Url), _> =
            execute(&[], "test_op", |_url| async { Ok(()) }).await;
        assert!(matches!(result, Err(FailoverError::Exhausted(f)) if f.is_empty()));
    }

    #[test]
    fn exhaustion_display_names_every_endpoint() {
        let failures = vec![
            EndpointFailure {
                endpoint: Url::parse("http://one.example/").unwrap(),
                error: ChainError::Transport("boom-one".into()),
            },
            EndpointFailure {
                endpoint: Url::parse("http://two.example/").unwrap(),
                error: ChainError::Capability("no starknet_call".into()),
            },
        ];
        let text = FailoverError::Exhausted(failures).to_string();
        assert!(text.contains("boom-one"));
        assert!(text.contains("no starknet_call"));
        assert!(text.starts_with("all 2 endpoints failed"));
    }
}
