use anyhow::{Context, Result};
use clap::Parser;
use dotenvy::dotenv;
use factgate::registry::query_fact_validity;
use factgate::rpc::RpcGateway;
use starknet::core::types::FieldElement;
use tracing::warn;

use self::fact_check::*;
mod fact_check {
    pub mod cli;
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    factgate::tracing::init();

    let args = cli::Cli::parse();

    let registry = FieldElement::from_hex_be(&args.registry_address)
        .context("registry address is not a valid field element")?;
    let (fact, reduced) = felt_codec::hex_to_felt(&args.fact)?;
    if reduced {
        warn!(fact = %args.fact, "fact identifier exceeds the field modulus, querying its reduction");
    }

    let gateway = RpcGateway::connect(args.endpoints()?, None, args.rpc_timeout()).await?;
    let valid = query_fact_validity(&gateway, registry, fact).await?;

    println!(
        "{:#x}: {}",
        fact,
        if valid { "valid" } else { "not registered" }
    );
    Ok(())
}
