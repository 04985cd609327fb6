//! Proving pipeline.
//!
//! Proving jobs run on the blocking pool, at most `max_concurrent` at a time. The
//! first failure cancels every job still waiting for a slot and is returned to the
//! caller; results come back in submission order.

use std::sync::Arc;

use aggregation::{
    combined_vk_hash, leaf_value, pis_identity, protocol_vk_identity, reduction_vk_identity, AggregatorCircuit,
    Circuit, ImtCircuit, PairingVerifier, Proof, ProvingBackend, ReductionCircuit, ReductionResult, VerifyingKey,
};
use anyhow::{anyhow, bail, Context, Result};
use imt::{Api, FieldBytes, Hash32, IndexedMerkleTree};
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::artifacts::{load_circuit, load_params, save_circuit, save_params, ArtifactStore, CircuitKeys};
use crate::config::{BatchParams, ProverConfig};

/// An externally produced proof submitted for aggregation.
#[derive(Clone, Debug)]
pub struct ProtocolProof {
    pub vk: VerifyingKey,
    pub proof: Proof,
    pub pis: Vec<FieldBytes>,
}

impl ProtocolProof {
    /// Pairs up the three parallel input arrays.
    pub fn zip(proofs: Vec<Proof>, vks: Vec<VerifyingKey>, pis: Vec<Vec<FieldBytes>>) -> Result<Vec<Self>> {
        if proofs.len() != vks.len() || proofs.len() != pis.len() {
            bail!(
                "input arrays differ in length: {} proofs, {} keys, {} public input lists",
                proofs.len(),
                vks.len(),
                pis.len()
            );
        }
        Ok(proofs
            .into_iter()
            .zip(vks)
            .zip(pis)
            .map(|((proof, vk), pis)| Self { vk, proof, pis })
            .collect())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proved {
    pub proof: Proof,
    pub public: Vec<FieldBytes>,
}

pub struct ProveJob<C> {
    pub keys: Arc<CircuitKeys>,
    pub circuit: C,
}

/// Reduction and IMT circuits proved side by side in one pool.
#[derive(Clone, Debug)]
pub enum InnerCircuit {
    Reduction(ReductionCircuit),
    Imt(ImtCircuit),
}

impl Circuit for InnerCircuit {
    fn name(&self) -> &'static str {
        match self {
            Self::Reduction(c) => c.name(),
            Self::Imt(c) => c.name(),
        }
    }

    fn define<A: Api>(&self, api: &mut A, verifier: &dyn PairingVerifier) -> aggregation::Result<()> {
        match self {
            Self::Reduction(c) => c.define(api, verifier),
            Self::Imt(c) => c.define(api, verifier),
        }
    }

    fn public_values(&self) -> Vec<FieldBytes> {
        match self {
            Self::Reduction(c) => c.public_values(),
            Self::Imt(c) => c.public_values(),
        }
    }

    fn secret_values(&self) -> Vec<FieldBytes> {
        match self {
            Self::Reduction(c) => c.secret_values(),
            Self::Imt(c) => c.secret_values(),
        }
    }
}

enum Outcome {
    Done(Proved),
    Cancelled,
    Failed(anyhow::Error),
}

/// Proves every job and returns the results in job order.
pub async fn prove_all<B, C>(backend: Arc<B>, jobs: Vec<ProveJob<C>>, max_concurrent: usize) -> Result<Vec<Proved>>
where
    B: ProvingBackend + 'static,
    C: Circuit + Send + 'static,
{
    let total = jobs.len();
    let semaphore = Arc::new(Semaphore::new(max_concurrent.max(1)));
    let cancel = CancellationToken::new();
    let mut set = JoinSet::new();

    for (idx, job) in jobs.into_iter().enumerate() {
        let backend = backend.clone();
        let semaphore = semaphore.clone();
        let cancel = cancel.clone();

        set.spawn(async move {
            let permit = tokio::select! {
                _ = cancel.cancelled() => return (idx, Outcome::Cancelled),
                permit = semaphore.acquire_owned() => permit,
            };
            let Ok(_permit) = permit else {
                return (idx, Outcome::Cancelled);
            };
            if cancel.is_cancelled() {
                return (idx, Outcome::Cancelled);
            }

            let circuit = job.circuit.name();
            info!(job = idx, circuit, "pipeline: proving");
            let keys = job.keys;
            let witness = job.circuit;
            let joined = tokio::task::spawn_blocking(move || backend.prove(&keys.cs, &keys.pk, &witness)).await;

            match joined {
                Ok(Ok((proof, public))) => (idx, Outcome::Done(Proved { proof, public })),
                Ok(Err(e)) => {
                    cancel.cancel();
                    (idx, Outcome::Failed(anyhow::Error::new(e).context(format!("proving {circuit} job {idx}"))))
                }
                Err(e) => {
                    cancel.cancel();
                    (idx, Outcome::Failed(anyhow!("proving {circuit} job {idx} panicked: {e}")))
                }
            }
        });
    }

    let mut slots: Vec<Option<Proved>> = (0..total).map(|_| None).collect();
    let mut first_error: Option<anyhow::Error> = None;

    while let Some(joined) = set.join_next().await {
        match joined {
            Ok((idx, Outcome::Done(proved))) => slots[idx] = Some(proved),
            Ok((_, Outcome::Cancelled)) => {}
            Ok((idx, Outcome::Failed(e))) => {
                warn!(job = idx, error = %e, "pipeline: job failed");
                first_error.get_or_insert(e);
            }
            Err(e) => {
                cancel.cancel();
                first_error.get_or_insert(anyhow!("proving task aborted: {e}"));
            }
        }
    }

    if let Some(e) = first_error {
        return Err(e);
    }
    slots
        .into_iter()
        .enumerate()
        .map(|(idx, slot)| slot.with_context(|| format!("job {idx} produced no proof")))
        .collect()
}

/// Re-checks a proof natively; a proof that does not verify stops the pipeline.
pub fn ensure_verified<B: ProvingBackend>(backend: &B, vk: &VerifyingKey, proved: &Proved, label: &str) -> Result<()> {
    if !backend.verify(&proved.proof, vk, &proved.public).with_context(|| format!("verify {label}"))? {
        bail!("{label} proof does not verify");
    }
    Ok(())
}

fn two(public: &[FieldBytes]) -> Result<[FieldBytes; 2]> {
    <[FieldBytes; 2]>::try_from(public).map_err(|_| anyhow!("expected 2 public inputs, got {}", public.len()))
}

/// Per-proof hashes the IMT and aggregator circuits are fed.
#[derive(Clone, Debug)]
pub struct Identities {
    pub vk_hashes: Vec<Hash32>,
    pub pis_hashes: Vec<Hash32>,
    pub combined: Vec<Hash32>,
}

impl Identities {
    pub fn compute(reduction_vk: &VerifyingKey, protocols: &[ProtocolProof]) -> Result<Self> {
        let reduction_vk_hash = reduction_vk_identity(reduction_vk)?;
        let mut ids = Self { vk_hashes: Vec::new(), pis_hashes: Vec::new(), combined: Vec::new() };
        for (i, p) in protocols.iter().enumerate() {
            let vk_hash = protocol_vk_identity(&p.vk).with_context(|| format!("protocol key {i}"))?;
            ids.pis_hashes.push(pis_identity(&p.pis).with_context(|| format!("public inputs {i}"))?);
            ids.combined.push(combined_vk_hash(&vk_hash, &reduction_vk_hash));
            ids.vk_hashes.push(vk_hash);
        }
        Ok(ids)
    }

    pub fn leaves(&self) -> Vec<Hash32> {
        self.combined.iter().zip(&self.pis_hashes).map(|(c, p)| leaf_value(c, p)).collect()
    }
}

fn reduction_jobs(keys: &Arc<CircuitKeys>, protocols: &[ProtocolProof]) -> Result<Vec<ProveJob<InnerCircuit>>> {
    protocols
        .iter()
        .enumerate()
        .map(|(i, p)| {
            let circuit = ReductionCircuit::new(p.vk.clone(), p.proof.clone(), p.pis.clone())
                .with_context(|| format!("reduction witness {i}"))?;
            Ok(ProveJob { keys: keys.clone(), circuit: InnerCircuit::Reduction(circuit) })
        })
        .collect()
}

/// Proves one reduction per protocol proof and verifies each result.
pub async fn prove_reductions<B: ProvingBackend + 'static>(
    backend: Arc<B>,
    keys: Arc<CircuitKeys>,
    protocols: &[ProtocolProof],
    max_concurrent: usize,
) -> Result<Vec<Proved>> {
    let jobs = reduction_jobs(&keys, protocols)?;
    let proved = prove_all(backend.clone(), jobs, max_concurrent).await?;
    for (i, p) in proved.iter().enumerate() {
        ensure_verified(&*backend, &keys.vk, p, &format!("reduction {i}"))?;
    }
    Ok(proved)
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BatchOutcome {
    pub imt: Proved,
    #[serde(with = "hex_hash")]
    pub old_root: Hash32,
    #[serde(with = "hex_hash")]
    pub new_root: Hash32,
}

fn check_batch(protocols: &[ProtocolProof], batch_size: usize) -> Result<()> {
    if protocols.len() != batch_size {
        bail!("got {} proofs, the IMT circuit is built for batches of {batch_size}", protocols.len());
    }
    Ok(())
}

/// Inserts the batch's leaves and proves the IMT transition. The tree is only
/// updated when the proof verifies.
pub async fn prove_imt_batch<B: ProvingBackend + 'static>(
    backend: Arc<B>,
    imt_keys: Arc<CircuitKeys>,
    reduction_vk: &VerifyingKey,
    tree: &mut IndexedMerkleTree,
    protocols: &[ProtocolProof],
    batch_size: usize,
) -> Result<BatchOutcome> {
    check_batch(protocols, batch_size)?;
    let ids = Identities::compute(reduction_vk, protocols)?;
    let mut next = tree.clone();
    let batch = next.insert_batch(&ids.leaves()).context("insert batch")?;
    let (old_root, new_root) = (batch.old_root, batch.new_root);

    let circuit = ImtCircuit::from_batch(next.depth(), ids.combined, ids.pis_hashes, batch)?;
    let job = ProveJob { keys: imt_keys.clone(), circuit };
    let imt = prove_all(backend.clone(), vec![job], 1).await?.pop().context("imt proof missing")?;
    ensure_verified(&*backend, &imt_keys.vk, &imt, "imt")?;

    *tree = next;
    info!(old_root = %hex::encode(old_root), new_root = %hex::encode(new_root), "pipeline: batch proved");
    Ok(BatchOutcome { imt, old_root, new_root })
}

#[derive(Debug)]
pub struct PipelineKeys {
    pub reduction: Arc<CircuitKeys>,
    pub imt: Arc<CircuitKeys>,
    pub agg: Arc<CircuitKeys>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct E2eOutcome {
    pub reductions: Vec<Proved>,
    pub imt: Proved,
    pub aggregate: Proved,
    #[serde(with = "hex_hash")]
    pub old_root: Hash32,
    #[serde(with = "hex_hash")]
    pub new_root: Hash32,
}

/// Full flow for one batch: identities, tree insertion, N reductions plus the IMT
/// proof in parallel, native re-verification, then the aggregate proof. The tree
/// is only updated once the aggregate verifies.
pub async fn run_e2e<B: ProvingBackend + 'static>(
    backend: Arc<B>,
    keys: &PipelineKeys,
    tree: &mut IndexedMerkleTree,
    protocols: &[ProtocolProof],
    batch_size: usize,
    max_concurrent: usize,
) -> Result<E2eOutcome> {
    check_batch(protocols, batch_size)?;
    let ids = Identities::compute(&keys.reduction.vk, protocols)?;

    let mut next = tree.clone();
    let batch = next.insert_batch(&ids.leaves()).context("insert batch")?;
    let (old_root, new_root) = (batch.old_root, batch.new_root);
    info!(
        batch = batch_size,
        old_root = %hex::encode(old_root),
        new_root = %hex::encode(new_root),
        "pipeline: leaves inserted"
    );

    let mut jobs = reduction_jobs(&keys.reduction, protocols)?;
    let imt_circuit = ImtCircuit::from_batch(next.depth(), ids.combined.clone(), ids.pis_hashes.clone(), batch)?;
    jobs.push(ProveJob { keys: keys.imt.clone(), circuit: InnerCircuit::Imt(imt_circuit) });

    let mut reductions = prove_all(backend.clone(), jobs, max_concurrent).await?;
    let imt = reductions.pop().context("imt proof missing")?;
    for (i, r) in reductions.iter().enumerate() {
        ensure_verified(&*backend, &keys.reduction.vk, r, &format!("reduction {i}"))?;
    }
    ensure_verified(&*backend, &keys.imt.vk, &imt, "imt")?;
    info!(reductions = reductions.len(), "pipeline: inner proofs verified");

    let results = reductions
        .iter()
        .map(|r| Ok(ReductionResult { proof: r.proof.clone(), public: two(&r.public)? }))
        .collect::<Result<Vec<_>>>()?;
    let circuit = AggregatorCircuit::new(
        ids.vk_hashes,
        ids.pis_hashes,
        keys.reduction.vk.clone(),
        results,
        keys.imt.vk.clone(),
        imt.proof.clone(),
        two(&imt.public)?,
        old_root,
        new_root,
    )?;
    let job = ProveJob { keys: keys.agg.clone(), circuit };
    let aggregate = prove_all(backend.clone(), vec![job], 1).await?.pop().context("aggregate proof missing")?;
    ensure_verified(&*backend, &keys.agg.vk, &aggregate, "aggregate")?;

    *tree = next;
    info!(new_root = %hex::encode(new_root), "pipeline: aggregate verified");
    Ok(E2eOutcome { reductions, imt, aggregate, old_root, new_root })
}

/// Circuit to compile, with the shape it is compiled for.
#[derive(Clone, Copy, Debug)]
pub enum CircuitSpec {
    Reduction { commitments: usize },
    Imt(BatchParams),
    Agg(BatchParams),
}

/// Compiles the circuit, derives its keys and stores them together with the
/// parameters they were built for.
pub fn build_circuit<B: ProvingBackend>(
    backend: &B,
    store: &mut dyn ArtifactStore,
    spec: CircuitSpec,
) -> Result<CircuitKeys> {
    let cs = match spec {
        CircuitSpec::Reduction { commitments } => backend.compile(&ReductionCircuit::placeholder(commitments)),
        CircuitSpec::Imt(p) => backend.compile(&ImtCircuit::placeholder(p.tree_depth, p.batch_size)),
        CircuitSpec::Agg(p) => backend.compile(&AggregatorCircuit::placeholder(p.batch_size)),
    }
    .with_context(|| format!("compile {spec:?}"))?;
    let name = cs.name.clone();
    let (pk, vk) = backend.setup(&cs).with_context(|| format!("setup {name}"))?;
    info!(circuit = %name, gates = cs.trace.gates.len(), public = cs.public_count, "pipeline: circuit built");

    let keys = CircuitKeys { cs, pk, vk };
    save_circuit(store, &name, &keys)?;
    if let CircuitSpec::Imt(params) | CircuitSpec::Agg(params) = spec {
        save_params(store, &name, &params)?;
    }
    Ok(keys)
}

/// IMT keys plus the reduction keys its leaves are derived from, with the
/// parameters recorded when the IMT circuit was built.
pub fn load_imt_stage(
    store: &dyn ArtifactStore,
    cfg: &ProverConfig,
) -> Result<(CircuitKeys, Arc<CircuitKeys>, BatchParams)> {
    let params = cfg.reconcile(load_params(store, "imt")?)?;
    let reduction = load_circuit(store, "reduction")?;
    let imt = Arc::new(load_circuit(store, "imt")?);
    Ok((reduction, imt, params))
}

/// All three circuits. The aggregator must have been built for the same batch
/// size as the IMT circuit.
pub fn load_pipeline(store: &dyn ArtifactStore, cfg: &ProverConfig) -> Result<(PipelineKeys, BatchParams)> {
    let (reduction, imt, params) = load_imt_stage(store, cfg)?;
    let agg_params = load_params(store, "agg")?;
    if agg_params.batch_size != params.batch_size {
        bail!(
            "aggregator was built for batches of {}, the IMT circuit for batches of {}",
            agg_params.batch_size,
            params.batch_size
        );
    }
    let keys = PipelineKeys { reduction: Arc::new(reduction), imt, agg: Arc::new(load_circuit(store, "agg")?) };
    Ok((keys, params))
}

mod hex_hash {
    use imt::Hash32;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(h: &Hash32, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&format!("0x{}", hex::encode(h)))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Hash32, D::Error> {
        let s = String::deserialize(d)?;
        let bytes = hex::decode(s.trim_start_matches("0x")).map_err(serde::de::Error::custom)?;
        bytes.try_into().map_err(|_| serde::de::Error::custom("expected 32 bytes"))
    }
}
