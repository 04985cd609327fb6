//! Constraint API with two executors.
//!
//! Protocol code is written once against [`Api`]:
//! - [`Native`] evaluates every call and stops at the first violated assertion. It is
//!   used to build and self-check witnesses.
//! - [`Recorder`] evaluates the same calls and records one [`Gate`] per call. It keeps
//!   going past violations, which makes it usable as a circuit description: the
//!   recorded [`Trace`] depends only on the witness shape, and the collected violations
//!   say whether the witness satisfies it.
//!
//! Callers must stay branch-free with respect to witness values. Every check is
//! computed before it is combined, so both executors issue the identical sequence.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::codec;
use crate::Hash32;

/// A failed constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Error)]
pub enum Violation {
    #[error("non-membership violation: value does not sit strictly between low leaf and its successor")]
    NonMembership,
    #[error("inclusion mismatch: recomputed root differs")]
    Inclusion,
    #[error("pointer inheritance violation: new leaf does not inherit the low leaf's successor")]
    PointerInheritance,
    #[error("continuity violation: batch does not continue the previous batch")]
    Continuity,
    #[error("identity mismatch: public inputs do not bind the inner proof")]
    Identity,
    #[error("composition mismatch")]
    Composition,
    #[error("pairing verification failed")]
    PairingVerification,
}

/// One recorded operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Gate {
    Keccak { input_len: usize },
    Compare { width: usize },
    Equal { width: usize },
    IsZero { width: usize },
    Select { width: usize },
    Assert,
    Pairing { public_inputs: usize },
}

impl Gate {
    fn encode(&self, out: &mut Vec<u8>) {
        let (tag, arg) = match *self {
            Gate::Keccak { input_len } => (0u8, input_len),
            Gate::Compare { width } => (1, width),
            Gate::Equal { width } => (2, width),
            Gate::IsZero { width } => (3, width),
            Gate::Select { width } => (4, width),
            Gate::Assert => (5, 0),
            Gate::Pairing { public_inputs } => (6, public_inputs),
        };
        out.push(tag);
        out.extend_from_slice(&(arg as u64).to_be_bytes());
    }
}

pub trait Api {
    fn keccak(&mut self, input: &[u8]) -> Hash32;

    /// `a > b`, both read as big-endian unsigned integers of equal width.
    fn is_greater(&mut self, a: &[u8], b: &[u8]) -> bool;

    fn is_equal(&mut self, a: &[u8], b: &[u8]) -> bool;

    fn is_zero(&mut self, a: &[u8]) -> bool;

    fn select<const N: usize>(&mut self, cond: bool, when_true: &[u8; N], when_false: &[u8; N]) -> [u8; N];

    fn assert(&mut self, holds: bool, violation: Violation) -> Result<(), Violation>;

    /// Outcome of an externally performed pairing-based proof check.
    fn assert_pairing(&mut self, public_inputs: usize, verified: bool) -> Result<(), Violation>;
}

fn greater(a: &[u8], b: &[u8]) -> bool {
    debug_assert_eq!(a.len(), b.len());
    a.len() == b.len() && a > b
}

fn all_zero(a: &[u8]) -> bool {
    a.iter().all(|b| *b == 0)
}

/// Fail-fast evaluation.
#[derive(Debug, Default, Clone, Copy)]
pub struct Native;

impl Api for Native {
    fn keccak(&mut self, input: &[u8]) -> Hash32 {
        codec::keccak(input)
    }

    fn is_greater(&mut self, a: &[u8], b: &[u8]) -> bool {
        greater(a, b)
    }

    fn is_equal(&mut self, a: &[u8], b: &[u8]) -> bool {
        a == b
    }

    fn is_zero(&mut self, a: &[u8]) -> bool {
        all_zero(a)
    }

    fn select<const N: usize>(&mut self, cond: bool, when_true: &[u8; N], when_false: &[u8; N]) -> [u8; N] {
        if cond {
            *when_true
        } else {
            *when_false
        }
    }

    fn assert(&mut self, holds: bool, violation: Violation) -> Result<(), Violation> {
        if holds {
            Ok(())
        } else {
            Err(violation)
        }
    }

    fn assert_pairing(&mut self, _public_inputs: usize, verified: bool) -> Result<(), Violation> {
        self.assert(verified, Violation::PairingVerification)
    }
}

/// Recording evaluation; never short-circuits.
#[derive(Debug, Default, Clone)]
pub struct Recorder {
    gates: Vec<Gate>,
    violations: Vec<Violation>,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn gate_count(&self) -> usize {
        self.gates.len()
    }

    pub fn violations(&self) -> &[Violation] {
        &self.violations
    }

    /// The recorded trace and the first violated constraint, if any.
    pub fn finish(self) -> (Trace, Option<Violation>) {
        let first = self.violations.first().copied();
        (Trace { gates: self.gates }, first)
    }

    fn fail(&mut self, holds: bool, violation: Violation) {
        if !holds {
            self.violations.push(violation);
        }
    }
}

impl Api for Recorder {
    fn keccak(&mut self, input: &[u8]) -> Hash32 {
        self.gates.push(Gate::Keccak { input_len: input.len() });
        codec::keccak(input)
    }

    fn is_greater(&mut self, a: &[u8], b: &[u8]) -> bool {
        self.gates.push(Gate::Compare { width: a.len() });
        greater(a, b)
    }

    fn is_equal(&mut self, a: &[u8], b: &[u8]) -> bool {
        self.gates.push(Gate::Equal { width: a.len() });
        a == b
    }

    fn is_zero(&mut self, a: &[u8]) -> bool {
        self.gates.push(Gate::IsZero { width: a.len() });
        all_zero(a)
    }

    fn select<const N: usize>(&mut self, cond: bool, when_true: &[u8; N], when_false: &[u8; N]) -> [u8; N] {
        self.gates.push(Gate::Select { width: N });
        if cond {
            *when_true
        } else {
            *when_false
        }
    }

    fn assert(&mut self, holds: bool, violation: Violation) -> Result<(), Violation> {
        self.gates.push(Gate::Assert);
        self.fail(holds, violation);
        Ok(())
    }

    fn assert_pairing(&mut self, public_inputs: usize, verified: bool) -> Result<(), Violation> {
        self.gates.push(Gate::Pairing { public_inputs });
        self.fail(verified, Violation::PairingVerification);
        Ok(())
    }
}

/// Witness-independent description of a circuit run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trace {
    pub gates: Vec<Gate>,
}

impl Trace {
    pub fn len(&self) -> usize {
        self.gates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.gates.is_empty()
    }

    pub fn count(&self, pred: impl Fn(&Gate) -> bool) -> usize {
        self.gates.iter().filter(|g| pred(g)).count()
    }

    /// keccak over the canonical gate encoding.
    pub fn digest(&self) -> Hash32 {
        let mut buf = Vec::with_capacity(self.gates.len() * 9);
        for g in &self.gates {
            g.encode(&mut buf);
        }
        codec::keccak(&buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run<A: Api>(api: &mut A, a: &Hash32, b: &Hash32) -> Result<Hash32, Violation> {
        let gt = api.is_greater(a, b);
        api.assert(gt, Violation::NonMembership)?;
        let picked = api.select(gt, a, b);
        Ok(api.keccak(&picked))
    }

    #[test]
    fn test_native_fails_fast() {
        let small = [0u8; 32];
        let mut big = [0u8; 32];
        big[0] = 1;
        assert!(run(&mut Native, &big, &small).is_ok());
        assert_eq!(run(&mut Native, &small, &big), Err(Violation::NonMembership));
    }

    #[test]
    fn test_recorder_shape_is_value_independent() {
        let small = [0u8; 32];
        let mut big = [0u8; 32];
        big[31] = 9;

        let mut ok = Recorder::new();
        run(&mut ok, &big, &small).unwrap();
        let (ok_trace, ok_violation) = ok.finish();

        let mut bad = Recorder::new();
        run(&mut bad, &small, &big).unwrap();
        let (bad_trace, bad_violation) = bad.finish();

        assert_eq!(ok_violation, None);
        assert_eq!(bad_violation, Some(Violation::NonMembership));
        assert_eq!(ok_trace, bad_trace);
        assert_eq!(ok_trace.digest(), bad_trace.digest());
        assert_eq!(ok_trace.count(|g| matches!(g, Gate::Keccak { .. })), 1);
    }

    #[test]
    fn test_greater_is_big_endian() {
        let mut a = [0u8; 32];
        let mut b = [0u8; 32];
        a[0] = 1;
        b[31] = 255;
        assert!(Native.is_greater(&a, &b));
        assert!(!Native.is_greater(&b, &a));
        assert!(!Native.is_greater(&a, &a));
    }
}
