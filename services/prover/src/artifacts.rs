//! Artifact store: circuit keys, proofs and the persisted tree

use std::path::{Path, PathBuf};

use aggregation::{CircomProof, CircomVerifyingKey, ConstraintSystem, Proof, ProvingKey, VerifyingKey};
use anyhow::{bail, Context, Result};
use clap::ValueEnum;
use imt::{FieldBytes, IndexedMerkleTree, TreeSnapshot};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::config::BatchParams;
use crate::pipeline::ProtocolProof;

const TREE_SNAPSHOT: &str = "tree/tree_state.bin";

pub trait ArtifactStore: Send + Sync {
    fn get(&self, name: &str) -> Result<Option<Vec<u8>>>;
    fn put(&mut self, name: &str, bytes: &[u8]) -> Result<()>;
}

/// Artifacts as files below a root directory.
#[derive(Clone, Debug)]
pub struct FileArtifactStore {
    root: PathBuf,
}

impl FileArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }
}

impl ArtifactStore for FileArtifactStore {
    fn get(&self, name: &str) -> Result<Option<Vec<u8>>> {
        let path = self.path(name);
        match std::fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("read {}", path.display())),
        }
    }

    fn put(&mut self, name: &str, bytes: &[u8]) -> Result<()> {
        let path = self.path(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
        }
        std::fs::write(&path, bytes).with_context(|| format!("write {}", path.display()))?;
        debug!(path = %path.display(), len = bytes.len(), "artifacts: wrote");
        Ok(())
    }
}

/// In-memory artifacts for tests.
#[cfg(test)]
#[derive(Clone, Debug, Default)]
pub struct InMemoryArtifactStore {
    data: std::collections::HashMap<String, Vec<u8>>,
}

#[cfg(test)]
impl InMemoryArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[cfg(test)]
impl ArtifactStore for InMemoryArtifactStore {
    fn get(&self, name: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.data.get(name).cloned())
    }

    fn put(&mut self, name: &str, bytes: &[u8]) -> Result<()> {
        self.data.insert(name.to_string(), bytes.to_vec());
        Ok(())
    }
}

fn require(store: &dyn ArtifactStore, name: &str) -> Result<Vec<u8>> {
    store.get(name)?.with_context(|| format!("missing artifact {name}"))
}

pub fn write_json<T: Serialize>(store: &mut dyn ArtifactStore, name: &str, value: &T) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(value).with_context(|| format!("encode {name}"))?;
    store.put(name, &bytes)
}

pub fn read_json<T: DeserializeOwned>(store: &dyn ArtifactStore, name: &str) -> Result<T> {
    let bytes = require(store, name)?;
    serde_json::from_slice(&bytes).with_context(|| format!("decode {name}"))
}

pub fn write_bin<T: Serialize>(store: &mut dyn ArtifactStore, name: &str, value: &T) -> Result<()> {
    let bytes = bincode::serialize(value).with_context(|| format!("encode {name}"))?;
    store.put(name, &bytes)
}

pub fn read_bin<T: DeserializeOwned>(store: &dyn ArtifactStore, name: &str) -> Result<T> {
    let bytes = require(store, name)?;
    bincode::deserialize(&bytes).with_context(|| format!("decode {name}"))
}

/// Reads a JSON input file given on the command line.
pub fn read_json_file<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let bytes = std::fs::read(path).with_context(|| format!("read {}", path.display()))?;
    serde_json::from_slice(&bytes).with_context(|| format!("decode {}", path.display()))
}

/// Layout of the proof and key files given to `prove`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum InputFormat {
    /// This prover's own JSON encoding.
    #[default]
    Native,
    /// snarkjs `proof.json` / `verification_key.json` objects.
    Circom,
}

/// Reads the three parallel input arrays: proofs, verifying keys and public inputs.
pub fn read_protocol_proofs(
    proofs: &Path,
    vks: &Path,
    pis: &Path,
    format: InputFormat,
) -> Result<Vec<ProtocolProof>> {
    let (proofs, vks) = match format {
        InputFormat::Native => (read_json_file::<Vec<Proof>>(proofs)?, read_json_file::<Vec<VerifyingKey>>(vks)?),
        InputFormat::Circom => {
            let proofs = read_json_file::<Vec<CircomProof>>(proofs)?
                .iter()
                .enumerate()
                .map(|(i, p)| p.to_proof().with_context(|| format!("proof {i}")))
                .collect::<Result<Vec<_>>>()?;
            let vks = read_json_file::<Vec<CircomVerifyingKey>>(vks)?
                .iter()
                .enumerate()
                .map(|(i, vk)| vk.to_verifying_key().with_context(|| format!("verifying key {i}")))
                .collect::<Result<Vec<_>>>()?;
            (proofs, vks)
        }
    };
    let pis: Vec<Vec<FieldBytes>> = read_json_file(pis)?;
    ProtocolProof::zip(proofs, vks, pis)
}

/// Compiled circuit with its keys.
#[derive(Clone, Debug)]
pub struct CircuitKeys {
    pub cs: ConstraintSystem,
    pub pk: ProvingKey,
    pub vk: VerifyingKey,
}

/// `<name>/<name>_{cs,pk}.bin` and `<name>/<name>_vk.json`
pub fn save_circuit(store: &mut dyn ArtifactStore, name: &str, keys: &CircuitKeys) -> Result<()> {
    write_bin(store, &format!("{name}/{name}_cs.bin"), &keys.cs)?;
    write_bin(store, &format!("{name}/{name}_pk.bin"), &keys.pk)?;
    write_json(store, &format!("{name}/{name}_vk.json"), &keys.vk)
}

pub fn load_circuit(store: &dyn ArtifactStore, name: &str) -> Result<CircuitKeys> {
    let keys = CircuitKeys {
        cs: read_bin(store, &format!("{name}/{name}_cs.bin"))?,
        pk: read_bin(store, &format!("{name}/{name}_pk.bin"))?,
        vk: read_json(store, &format!("{name}/{name}_vk.json"))?,
    };
    if keys.cs.name != name || keys.pk.circuit != name {
        bail!(
            "artifacts under {name}/ belong to circuit {:?} (proving key for {:?})",
            keys.cs.name,
            keys.pk.circuit
        );
    }
    Ok(keys)
}

fn params_name(name: &str) -> String {
    format!("{name}/{name}_params.json")
}

/// Records the shape a circuit was built for next to its keys.
pub fn save_params(store: &mut dyn ArtifactStore, name: &str, params: &BatchParams) -> Result<()> {
    write_json(store, &params_name(name), params)
}

pub fn load_params(store: &dyn ArtifactStore, name: &str) -> Result<BatchParams> {
    let params: BatchParams = read_json(store, &params_name(name))
        .with_context(|| format!("build parameters for {name}; rebuild it with `build {name}`"))?;
    params.validate()?;
    Ok(params)
}

/// Loads the persisted tree, or starts an empty one when none exists.
pub fn load_tree(store: &dyn ArtifactStore, depth: usize) -> Result<IndexedMerkleTree> {
    let Some(bytes) = store.get(TREE_SNAPSHOT)? else {
        debug!(depth, "artifacts: no tree snapshot, starting empty");
        return IndexedMerkleTree::new(depth).context("create tree");
    };
    let snapshot: TreeSnapshot = bincode::deserialize(&bytes).context("decode tree snapshot")?;
    if snapshot.depth != depth {
        bail!("persisted tree has depth {}, configured depth is {depth}", snapshot.depth);
    }
    IndexedMerkleTree::from_snapshot(&snapshot).context("restore tree snapshot")
}

pub fn save_tree(store: &mut dyn ArtifactStore, tree: &IndexedMerkleTree) -> Result<()> {
    write_bin(store, TREE_SNAPSHOT, &tree.snapshot())
}
