use std::fs::File;

use anyhow::{Context, Result};
use clap::Parser;
use dotenvy::dotenv;
use factgate::execution::ConstraintSignature;
use factgate::fri::{FriParameters, ProverParameters};
use factgate::fs::set_artifacts_dir_env_if_not_set;
use factgate::pipeline::{AllocationRequest, Pipeline};
use factgate::prover::{load_public_input, StoneProver, TraceInputs};
use factgate::registry::{FactRegistry, ProofSettings};
use factgate::risk::{MetricsPair, ProtocolMetrics};
use factgate::rpc::RpcGateway;
use factgate::store::JobStore;
use serde::Deserialize;
use serde_json::Deserializer;
use tracing::info;

use self::pipeline::*;
mod pipeline {
    pub mod cli;
}

/// On-disk allocation request: the venue metrics being attested and the
/// user's optional signed constraint block.
#[derive(Deserialize)]
struct RequestDocument {
    jediswap: ProtocolMetrics,
    ekubo: ProtocolMetrics,
    #[serde(default)]
    constraint: Option<ConstraintSignature>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    factgate::tracing::init();
    set_artifacts_dir_env_if_not_set()?;

    let args = cli::Cli::parse();

    match args.command {
        cli::Command::Solve { n_steps } => {
            let fri = FriParameters::for_trace(n_steps)?;
            let parameters = ProverParameters::for_fri(&fri);
            println!("{}", serde_json::to_string_pretty(&parameters)?);
            Ok(())
        }
        cli::Command::Run(run_args) => run(run_args).await,
    }
}

async fn run(args: cli::RunArgs) -> Result<()> {
    let file = File::open(&args.request)
        .with_context(|| format!("opening request document {}", args.request.display()))?;
    let des = &mut Deserializer::from_reader(&file);
    let document: RequestDocument = serde_path_to_error::deserialize(des)?;

    let public_input = load_public_input(&args.public_input_file).await?;

    let settings = ProofSettings::from(args.proof_settings);
    let gateway = RpcGateway::connect(
        args.chain.endpoints()?,
        Some(args.chain.account()?),
        args.chain.rpc_timeout(),
    )
    .await?;

    let pipeline = Pipeline::new(
        gateway,
        StoneProver::new(args.prover.into_prover_config(settings.clone())),
        FactRegistry::new(args.chain.registry_address()?, settings),
        JobStore::at(&args.job_dir)?,
        args.chain.pipeline_config()?,
    )?;

    let job = pipeline
        .run(AllocationRequest {
            metrics: MetricsPair {
                jediswap: document.jediswap,
                ekubo: document.ekubo,
            },
            trace: TraceInputs {
                trace_file: args.trace_file,
                memory_file: args.memory_file,
                public_input,
            },
            constraint: document.constraint,
        })
        .await?;

    println!("{}", serde_json::to_string_pretty(&job)?);

    if job.status.is_dead_end() {
        anyhow::bail!(
            "job {} ended {}: {}",
            job.id,
            job.status,
            job.error.as_deref().unwrap_or("no error recorded")
        );
    }
    info!(job_id = %job.id, status = %job.status, "run complete");
    Ok(())
}
