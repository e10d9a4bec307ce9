use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueHint};
use factgate::cli::{CliChainConfig, CliProofSettings, CliProverConfig};

#[derive(Parser)]
#[command(version = factgate::version(), propagate_version = true)]
pub(crate) struct Cli {
    #[command(subcommand)]
    pub(crate) command: Command,
}

#[allow(clippy::large_enum_variant)]
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Derives the prover parameter file for a trace length and prints it.
    Solve {
        /// Number of trace steps the parameters must cover.
        #[arg(short = 'n', long)]
        n_steps: u64,
    },
    /// Runs one allocation request end to end: proving, fact registration,
    /// and the gated execution transaction.
    Run(RunArgs),
}

#[derive(Args)]
pub(crate) struct RunArgs {
    /// Request document with venue metrics and optional signed constraints.
    #[arg(short = 'r', long, env = "FACTGATE_REQUEST", value_hint = ValueHint::FilePath)]
    pub(crate) request: PathBuf,
    /// Execution trace file handed to the prover.
    #[arg(long, env = "FACTGATE_TRACE_FILE", value_hint = ValueHint::FilePath)]
    pub(crate) trace_file: PathBuf,
    /// Memory file handed to the prover.
    #[arg(long, env = "FACTGATE_MEMORY_FILE", value_hint = ValueHint::FilePath)]
    pub(crate) memory_file: PathBuf,
    /// Public input emitted by the trace generator.
    #[arg(long, env = "FACTGATE_PUBLIC_INPUT_FILE", value_hint = ValueHint::FilePath)]
    pub(crate) public_input_file: PathBuf,
    /// Directory where job records are persisted.
    #[arg(
        long,
        env = "FACTGATE_JOB_DIR",
        default_value = "jobs",
        value_hint = ValueHint::DirPath
    )]
    pub(crate) job_dir: PathBuf,

    #[clap(flatten)]
    pub(crate) prover: CliProverConfig,

    #[clap(flatten)]
    pub(crate) proof_settings: CliProofSettings,

    #[clap(flatten)]
    pub(crate) chain: CliChainConfig,
}
