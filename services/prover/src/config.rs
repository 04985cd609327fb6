use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use imt::codec::SUPPORTED_DEPTHS;
use serde::{Deserialize, Serialize};

pub const DEFAULT_TREE_DEPTH: usize = 9;
pub const DEFAULT_BATCH_SIZE: usize = 8;

/// Shape an IMT or aggregator circuit is compiled for. Recorded next to the keys.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchParams {
    pub tree_depth: usize,
    pub batch_size: usize,
}

impl BatchParams {
    /// Sanity checks (fail fast, fail loud)
    pub fn validate(&self) -> Result<()> {
        if !SUPPORTED_DEPTHS.contains(&self.tree_depth) {
            bail!("tree depth {} is not supported (use one of {:?})", self.tree_depth, SUPPORTED_DEPTHS);
        }
        if self.batch_size == 0 {
            bail!("batch size must be at least 1");
        }
        if self.batch_size as u64 >= 1u64 << self.tree_depth {
            bail!("batch size {} does not fit a tree of depth {}", self.batch_size, self.tree_depth);
        }
        Ok(())
    }
}

#[derive(Clone, Debug)]
pub struct ProverConfig {
    pub output_dir: PathBuf,
    /// Only set when given through the environment or a flag.
    pub tree_depth: Option<usize>,
    pub batch_size: Option<usize>,
    pub max_concurrent: usize,
    pub persist_tree: bool,
}

impl ProverConfig {
    pub fn from_env() -> Result<Self> {
        let output_dir = std::env::var("PROVER_OUTPUT_DIR").unwrap_or_else(|_| "artifacts".to_string());
        let tree_depth = parse_opt("PROVER_TREE_DEPTH")?;
        let batch_size = parse_opt("PROVER_BATCH_SIZE")?;
        let max_concurrent = parse_opt("PROVER_MAX_CONCURRENT")?
            .unwrap_or_else(|| std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1));
        let persist_tree = std::env::var("PROVER_PERSIST_TREE")
            .ok()
            .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "yes" | "YES"))
            .unwrap_or(true);

        let cfg = Self {
            output_dir: PathBuf::from(output_dir),
            tree_depth,
            batch_size,
            max_concurrent,
            persist_tree,
        };
        cfg.validate()?;
        Ok(cfg)
    }

    /// Flags win over the environment.
    pub fn apply_overrides(&mut self, tree_depth: Option<usize>, batch_size: Option<usize>) -> Result<()> {
        self.tree_depth = tree_depth.or(self.tree_depth);
        self.batch_size = batch_size.or(self.batch_size);
        self.validate()
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent == 0 {
            bail!("PROVER_MAX_CONCURRENT must be at least 1");
        }
        if let Some(depth) = self.tree_depth {
            if !SUPPORTED_DEPTHS.contains(&depth) {
                bail!("tree depth {depth} is not supported (use one of {:?})", SUPPORTED_DEPTHS);
            }
        }
        if self.batch_size == Some(0) {
            bail!("batch size must be at least 1");
        }
        Ok(())
    }

    /// Parameters for a new build: configured values, else the defaults.
    pub fn build_params(&self) -> Result<BatchParams> {
        let params = BatchParams {
            tree_depth: self.tree_depth.unwrap_or(DEFAULT_TREE_DEPTH),
            batch_size: self.batch_size.unwrap_or(DEFAULT_BATCH_SIZE),
        };
        params.validate()?;
        Ok(params)
    }

    /// Parameters recorded at build time, checked against anything configured.
    pub fn reconcile(&self, built: BatchParams) -> Result<BatchParams> {
        if let Some(depth) = self.tree_depth {
            if depth != built.tree_depth {
                bail!("tree depth {depth} requested, but the circuits were built for depth {}", built.tree_depth);
            }
        }
        if let Some(batch) = self.batch_size {
            if batch != built.batch_size {
                bail!("batch size {batch} requested, but the circuits were built for batches of {}", built.batch_size);
            }
        }
        Ok(built)
    }
}

fn parse_opt(key: &str) -> Result<Option<usize>> {
    match std::env::var(key) {
        Ok(v) => v
            .trim()
            .parse()
            .map(Some)
            .with_context(|| format!("Invalid value for env var {key}: {v:?}")),
        Err(_) => Ok(None),
    }
}
