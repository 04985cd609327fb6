//! Proof aggregation around the indexed Merkle tree.
//!
//! Circuits in this crate are written against [`imt::Api`] and run by a
//! [`ProvingBackend`]. The reduction circuit binds one protocol proof to its
//! padding-independent identity, the IMT circuit records a batch of identities in the
//! accumulator, and the aggregator circuit commits to all of them in two public inputs.

pub mod aggregator;
pub mod backend;
pub mod groth16;
pub mod identity;
pub mod imt_circuit;
pub mod reduction;

pub use aggregator::*;
pub use backend::*;
pub use groth16::*;
pub use identity::*;
pub use imt_circuit::*;
pub use reduction::*;

use imt::{ImtError, Violation};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AggregationError {
    #[error(transparent)]
    Constraint(Violation),

    #[error("shape mismatch: {0}")]
    ShapeMismatch(String),

    #[error("backend failure: {0}")]
    Backend(String),

    #[error("encoding error: {0}")]
    Encoding(String),

    #[error(transparent)]
    Imt(ImtError),
}

impl From<Violation> for AggregationError {
    fn from(v: Violation) -> Self {
        Self::Constraint(v)
    }
}

impl From<ImtError> for AggregationError {
    fn from(e: ImtError) -> Self {
        match e {
            ImtError::Constraint(v) => Self::Constraint(v),
            ImtError::ShapeMismatch(msg) => Self::ShapeMismatch(msg),
            ImtError::InvalidField(msg) => Self::Encoding(msg),
            other => Self::Imt(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, AggregationError>;
