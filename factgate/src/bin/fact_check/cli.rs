use std::time::Duration;

use clap::{Parser, ValueHint};
use factgate::error::PipelineError;
use factgate::rpc::normalize_endpoints;
use url::Url;

/// Asks the fact registry whether a fact identifier has been registered and
/// verified.
#[derive(Parser)]
#[command(version = factgate::version())]
pub(crate) struct Cli {
    /// Fact identifier to query, hex.
    pub(crate) fact: String,
    /// Ordered, comma-separated JSON-RPC endpoints; earlier entries are
    /// preferred.
    #[arg(
        short = 'u',
        long,
        env = "FACTGATE_RPC_ENDPOINTS",
        value_delimiter = ',',
        value_hint = ValueHint::Url
    )]
    rpc_endpoints: Vec<Url>,
    /// Fact registry contract address.
    #[arg(long, env = "FACTGATE_REGISTRY_ADDRESS")]
    pub(crate) registry_address: String,
    /// Per-attempt RPC timeout in seconds.
    #[arg(long, env = "FACTGATE_RPC_TIMEOUT", default_value_t = 10)]
    rpc_timeout: u64,
}

impl Cli {
    pub(crate) fn endpoints(&self) -> Result<Vec<Url>, PipelineError> {
        normalize_endpoints(self.rpc_endpoints.iter().cloned())
    }

    pub(crate) fn rpc_timeout(&self) -> Duration {
        Duration::from_secs(self.rpc_timeout)
    }
}
