//! Shared command-line argument groups and their conversions into the
//! typed configurations the library consumes. Every flag also reads from a
//! `FACTGATE_`-prefixed environment variable, so deployments can configure
//! the binaries entirely through the environment.

use std::path::PathBuf;
use std::time::Duration;

use clap::Args;
use starknet::core::types::FieldElement;
use starknet::signers::SigningKey;
use url::Url;

use crate::error::PipelineError;
use crate::fs::default_artifacts_dir;
use crate::prover::ProverConfig;
use crate::registry::ProofSettings;
use crate::rpc::{normalize_endpoints, AccountConfig, ExecutionBounds};
use crate::submit::ConfirmationPolicy;
use crate::pipeline::PipelineConfig;

const PROVER_HELP_HEADING: &str = "Prover options";
const PROOF_HELP_HEADING: &str = "Proof settings";
const CHAIN_HELP_HEADING: &str = "Chain options";

#[derive(Args, Clone, Debug)]
pub struct CliProverConfig {
    /// Path to the external STARK prover binary.
    #[arg(long, env = "FACTGATE_PROVER_BIN", help_heading = PROVER_HELP_HEADING)]
    prover_bin: PathBuf,
    /// Prover wall-clock budget in seconds; the process is killed past it.
    #[arg(
        long,
        env = "FACTGATE_PROVER_TIMEOUT",
        default_value_t = 300,
        help_heading = PROVER_HELP_HEADING
    )]
    prover_timeout: u64,
    /// Directory that receives per-job run directories.
    #[arg(
        long,
        env = "FACTGATE_ARTIFACTS_DIR",
        default_value = default_artifacts_dir().into_os_string(),
        help_heading = PROVER_HELP_HEADING
    )]
    artifacts_dir: PathBuf,
    /// Ask the prover to emit verifier annotations alongside the proof.
    #[arg(
        long,
        env = "FACTGATE_GENERATE_ANNOTATIONS",
        default_value_t = false,
        help_heading = PROVER_HELP_HEADING
    )]
    generate_annotations: bool,
    /// Optional prover tuning file, forwarded verbatim.
    #[arg(long, env = "FACTGATE_PROVER_CONFIG_FILE", help_heading = PROVER_HELP_HEADING)]
    prover_config_file: Option<PathBuf>,
}

impl CliProverConfig {
    pub fn into_prover_config(self, settings: ProofSettings) -> ProverConfig {
        ProverConfig {
            binary: self.prover_bin,
            timeout: Duration::from_secs(self.prover_timeout),
            artifacts_dir: self.artifacts_dir,
            generate_annotations: self.generate_annotations,
            prover_config_file: self.prover_config_file,
            settings,
        }
    }
}

/// Proof system identifiers. Deliberately without defaults: they must match
/// the deployed verifier, and a silently wrong default would burn a full
/// proving run before failing on chain.
#[derive(Args, Clone, Debug)]
pub struct CliProofSettings {
    /// Proof layout identifier.
    #[arg(long, env = "FACTGATE_LAYOUT", help_heading = PROOF_HELP_HEADING)]
    layout: String,
    /// Commitment hasher identifier.
    #[arg(long, env = "FACTGATE_HASHER", help_heading = PROOF_HELP_HEADING)]
    hasher: String,
    /// Prover version identifier.
    #[arg(long, env = "FACTGATE_STONE_VERSION", help_heading = PROOF_HELP_HEADING)]
    stone_version: String,
    /// Memory verification mode identifier.
    #[arg(long, env = "FACTGATE_MEMORY_MODE", help_heading = PROOF_HELP_HEADING)]
    memory_mode: String,
}

impl From<CliProofSettings> for ProofSettings {
    fn from(cli: CliProofSettings) -> Self {
        Self {
            layout: cli.layout,
            hasher: cli.hasher,
            stone_version: cli.stone_version,
            memory_mode: cli.memory_mode,
        }
    }
}

#[derive(Args, Clone, Debug)]
pub struct CliChainConfig {
    /// Ordered, comma-separated JSON-RPC endpoints; earlier entries are
    /// preferred.
    #[arg(
        long,
        env = "FACTGATE_RPC_ENDPOINTS",
        value_delimiter = ',',
        help_heading = CHAIN_HELP_HEADING
    )]
    rpc_endpoints: Vec<Url>,
    /// Fact registry contract address.
    #[arg(long, env = "FACTGATE_REGISTRY_ADDRESS", help_heading = CHAIN_HELP_HEADING)]
    registry_address: String,
    /// Gated router contract address.
    #[arg(long, env = "FACTGATE_ROUTER_ADDRESS", help_heading = CHAIN_HELP_HEADING)]
    router_address: String,
    /// Entry point invoked on the router.
    #[arg(
        long,
        env = "FACTGATE_ENTRY_POINT",
        default_value = "propose_and_execute_allocation",
        help_heading = CHAIN_HELP_HEADING
    )]
    entry_point: String,
    /// Submitting account address.
    #[arg(long, env = "FACTGATE_ACCOUNT_ADDRESS", help_heading = CHAIN_HELP_HEADING)]
    account_address: String,
    /// Submitting account private key, hex.
    #[arg(
        long,
        env = "FACTGATE_PRIVATE_KEY",
        hide_env_values = true,
        help_heading = CHAIN_HELP_HEADING
    )]
    private_key: String,
    /// Gas allowance folded into the explicit fee cap of the invoke.
    #[arg(
        long,
        env = "FACTGATE_GAS",
        default_value_t = 300_000,
        help_heading = CHAIN_HELP_HEADING
    )]
    gas: u64,
    /// Gas price ceiling folded into the explicit fee cap, in fri.
    #[arg(
        long,
        env = "FACTGATE_GAS_PRICE",
        default_value_t = 200_000_000_000_000,
        help_heading = CHAIN_HELP_HEADING
    )]
    gas_price: u128,
    /// Per-attempt RPC timeout in seconds.
    #[arg(
        long,
        env = "FACTGATE_RPC_TIMEOUT",
        default_value_t = 10,
        help_heading = CHAIN_HELP_HEADING
    )]
    rpc_timeout: u64,
    /// Receipt poll interval in seconds.
    #[arg(
        long,
        env = "FACTGATE_POLL_INTERVAL",
        default_value_t = 2,
        help_heading = CHAIN_HELP_HEADING
    )]
    poll_interval: u64,
    /// Settlement confirmation window in seconds.
    #[arg(
        long,
        env = "FACTGATE_CONFIRMATION_TIMEOUT",
        default_value_t = 120,
        help_heading = CHAIN_HELP_HEADING
    )]
    confirmation_timeout: u64,
    /// Ceiling on one whole pipeline run, in seconds.
    #[arg(
        long,
        env = "FACTGATE_RUN_DEADLINE",
        default_value_t = 600,
        help_heading = CHAIN_HELP_HEADING
    )]
    run_deadline: u64,
    /// Model version tag passed to agent-aware contracts.
    #[arg(
        long,
        env = "FACTGATE_MODEL_VERSION",
        default_value_t = 1,
        help_heading = CHAIN_HELP_HEADING
    )]
    model_version: u32,
}

impl CliChainConfig {
    pub fn endpoints(&self) -> Result<Vec<Url>, PipelineError> {
        normalize_endpoints(self.rpc_endpoints.iter().cloned())
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_secs(self.rpc_timeout)
    }

    pub fn registry_address(&self) -> Result<FieldElement, PipelineError> {
        parse_felt("registry address", &self.registry_address)
    }

    pub fn account(&self) -> Result<AccountConfig, PipelineError> {
        Ok(AccountConfig {
            signing_key: SigningKey::from_secret_scalar(parse_felt(
                "account private key",
                &self.private_key,
            )?),
            address: parse_felt("account address", &self.account_address)?,
        })
    }

    pub fn pipeline_config(&self) -> Result<PipelineConfig, PipelineError> {
        Ok(PipelineConfig {
            router_address: parse_felt("router address", &self.router_address)?,
            entry_point: self.entry_point.clone(),
            model_version: self.model_version,
            bounds: ExecutionBounds {
                gas: self.gas,
                gas_price: self.gas_price,
            },
            confirmation: ConfirmationPolicy {
                poll_interval: Duration::from_secs(self.poll_interval),
                timeout: Duration::from_secs(self.confirmation_timeout),
            },
            run_deadline: Duration::from_secs(self.run_deadline),
        })
    }
}

fn parse_felt(label: &str, value: &str) -> Result<FieldElement, PipelineError> {
    FieldElement::from_hex_be(value)
        .map_err(|e| PipelineError::Config(format!("{label} is not a valid field element: {e}")))
}
