mod artifacts;
mod config;
mod pipeline;

use std::path::PathBuf;
use std::sync::Arc;

use aggregation::DevBackend;
use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use tracing::info;

use crate::artifacts::{
    load_circuit, load_tree, read_protocol_proofs, save_tree, write_json, FileArtifactStore, InputFormat,
};
use crate::config::ProverConfig;
use crate::pipeline::{
    build_circuit, load_imt_stage, load_pipeline, prove_imt_batch, prove_reductions, run_e2e, CircuitSpec,
    ProtocolProof,
};

#[derive(Parser, Debug)]
#[command(version, about = "Builds the aggregation circuits and proves batches of protocol proofs", long_about = None)]
struct Cli {
    /// Artifact directory (overrides PROVER_OUTPUT_DIR).
    #[arg(long, global = true)]
    out: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Compile a circuit and derive its keys.
    #[command(subcommand)]
    Build(BuildTarget),
    /// Prove with previously built keys.
    #[command(subcommand)]
    Prove(ProveTarget),
}

#[derive(Subcommand, Debug)]
enum BuildTarget {
    /// Reduction verifier for protocol proofs.
    Reduction {
        /// Commitment points carried by the protocol keys. One reduction key serves
        /// every slot of a batch, so protocols with and without commitments cannot be
        /// aggregated together.
        #[arg(long, default_value_t = 0)]
        commitments: usize,
    },
    /// IMT batch circuit.
    Imt(TreeParams),
    /// Aggregator over one batch.
    Agg(TreeParams),
}

#[derive(Args, Debug)]
struct TreeParams {
    /// Insertions per batch (overrides PROVER_BATCH_SIZE). When proving, must match
    /// the value the circuits were built with.
    #[arg(long, short)]
    batch_size: Option<usize>,

    /// Tree depth (overrides PROVER_TREE_DEPTH). When proving, must match the value
    /// the circuits were built with.
    #[arg(long, short = 't')]
    tree_depth: Option<usize>,
}

#[derive(Args, Debug)]
struct ProveInputs {
    /// JSON array of protocol proofs.
    #[arg(long)]
    proofs: PathBuf,

    /// JSON array of protocol verifying keys, one per proof.
    #[arg(long)]
    vks: PathBuf,

    /// JSON array of public input lists, one per proof.
    #[arg(long)]
    pis: PathBuf,

    /// Layout of the proof and key files.
    #[arg(long, value_enum, default_value_t = InputFormat::Native)]
    format: InputFormat,

    #[command(flatten)]
    params: TreeParams,
}

impl ProveInputs {
    fn read(&self) -> Result<Vec<ProtocolProof>> {
        read_protocol_proofs(&self.proofs, &self.vks, &self.pis, self.format)
    }
}

#[derive(Subcommand, Debug)]
enum ProveTarget {
    /// One reduction proof per protocol proof.
    Reduction(ProveInputs),
    /// Record the batch in the tree and prove the transition.
    Imt(ProveInputs),
    /// Reductions, tree transition and the aggregate proof.
    E2e(ProveInputs),
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let mut cfg = ProverConfig::from_env()?;
    if let Some(out) = cli.out {
        cfg.output_dir = out;
    }
    let params = match &cli.command {
        Commands::Build(BuildTarget::Imt(params) | BuildTarget::Agg(params)) => Some(params),
        Commands::Prove(ProveTarget::Reduction(inputs) | ProveTarget::Imt(inputs) | ProveTarget::E2e(inputs)) => {
            Some(&inputs.params)
        }
        Commands::Build(BuildTarget::Reduction { .. }) => None,
    };
    if let Some(params) = params {
        cfg.apply_overrides(params.tree_depth, params.batch_size)?;
    }

    let mut store = FileArtifactStore::new(&cfg.output_dir);
    let backend = Arc::new(DevBackend::new());
    info!(
        out = %store.root().display(),
        depth = ?cfg.tree_depth,
        batch = ?cfg.batch_size,
        max_concurrent = cfg.max_concurrent,
        "prover: starting"
    );

    match cli.command {
        Commands::Build(target) => build(&*backend, &mut store, &cfg, target),
        Commands::Prove(target) => prove(backend, &mut store, &cfg, target).await,
    }
}

fn build(backend: &DevBackend, store: &mut FileArtifactStore, cfg: &ProverConfig, target: BuildTarget) -> Result<()> {
    let spec = match target {
        BuildTarget::Reduction { commitments } => CircuitSpec::Reduction { commitments },
        BuildTarget::Imt(_) => CircuitSpec::Imt(cfg.build_params()?),
        BuildTarget::Agg(_) => CircuitSpec::Agg(cfg.build_params()?),
    };
    build_circuit(backend, store, spec)?;
    Ok(())
}

async fn prove(
    backend: Arc<DevBackend>,
    store: &mut FileArtifactStore,
    cfg: &ProverConfig,
    target: ProveTarget,
) -> Result<()> {
    match target {
        ProveTarget::Reduction(inputs) => {
            let protocols = inputs.read()?;
            let keys = Arc::new(load_circuit(store, "reduction")?);
            let proved = prove_reductions(backend, keys, &protocols, cfg.max_concurrent).await?;
            write_json(store, "reduction/reduction_proofs.json", &proved)?;
            info!(count = proved.len(), "prover: reduction proofs written");
        }
        ProveTarget::Imt(inputs) => {
            let protocols = inputs.read()?;
            let (reduction, imt_keys, params) = load_imt_stage(store, cfg)?;
            let mut tree = load_tree(store, params.tree_depth)?;

            let out =
                prove_imt_batch(backend, imt_keys, &reduction.vk, &mut tree, &protocols, params.batch_size).await?;
            write_json(store, "imt/imt_proof.json", &out)?;
            if cfg.persist_tree {
                save_tree(store, &tree)?;
            }
            info!(new_root = %hex::encode(out.new_root), "prover: imt proof written");
        }
        ProveTarget::E2e(inputs) => {
            let protocols = inputs.read()?;
            let (keys, params) = load_pipeline(store, cfg)?;
            let mut tree = load_tree(store, params.tree_depth)?;

            let out = run_e2e(backend, &keys, &mut tree, &protocols, params.batch_size, cfg.max_concurrent).await?;
            write_json(store, "e2e/e2e_proofs.json", &out)?;
            write_json(store, "e2e/aggregate_pis.json", &out.aggregate.public)?;
            if cfg.persist_tree {
                save_tree(store, &tree)?;
            }
            info!(
                old_root = %hex::encode(out.old_root),
                new_root = %hex::encode(out.new_root),
                "prover: aggregate proof written"
            );
        }
    }
    Ok(())
}
