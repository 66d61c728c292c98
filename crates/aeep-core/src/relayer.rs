//! The on-chain anchor interface (§6.3).
//!
//! The smart contract itself is out of scope; the relayer client models
//! only the single method the interaction needs, `submitBatch`, plus two
//! read methods used by health/verification endpoints. [`MockRelayer`]
//! satisfies the same trait for local runs with an in-memory ledger and
//! deterministic fake transaction hashes — the same shape as the
//! teacher's `Facilitator` trait with one concrete `FacilitatorLocal`
//! implementation behind it.

use std::sync::atomic::{AtomicU64, Ordering};

use aeep_types::{MerkleProof, sha256_hex, verify_proof};

use crate::error::RelayerError;

/// The external collaborator the batching service submits anchored
/// Merkle roots to.
pub trait Relayer: Send + Sync + 'static {
    /// Submits a Merkle root for `count` interactions, returning the
    /// transaction hash the chain assigned.
    fn submit_batch(&self, root: &str, count: u64) -> Result<String, RelayerError>;

    /// Verifies a leaf's inclusion proof against `root`, a root this
    /// relayer previously returned a transaction hash for. The server
    /// already keeps `(batch_id -> root)` in its own store, so callers
    /// resolve `batch_id` to `root` before calling this.
    fn verify_inclusion(&self, root: &str, proof: &MerkleProof) -> bool {
        verify_proof(proof, root)
    }

    /// The relayer's on-chain balance, as a decimal string, for the
    /// `/health` endpoint.
    fn get_balance(&self) -> Result<String, RelayerError>;
}

/// A deterministic in-memory relayer for local runs and tests.
pub struct MockRelayer {
    submitted: AtomicU64,
    balance: String,
}

impl MockRelayer {
    pub fn new(starting_balance: impl Into<String>) -> Self {
        Self {
            submitted: AtomicU64::new(0),
            balance: starting_balance.into(),
        }
    }
}

impl Default for MockRelayer {
    fn default() -> Self {
        Self::new("1000.000000")
    }
}

impl Relayer for MockRelayer {
    fn submit_batch(&self, root: &str, count: u64) -> Result<String, RelayerError> {
        let sequence = self.submitted.fetch_add(1, Ordering::SeqCst);
        let preimage = format!("{root}:{count}:{sequence}");
        Ok(format!("0x{}", sha256_hex(preimage.as_bytes())))
    }

    fn get_balance(&self) -> Result<String, RelayerError> {
        Ok(self.balance.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn submit_batch_is_deterministic_given_sequence() {
        let relayer = MockRelayer::default();
        let first = relayer.submit_batch("root", 3).unwrap();
        let second = relayer.submit_batch("root", 3).unwrap();
        assert_ne!(first, second, "sequence counter disambiguates repeats");
    }

    #[test]
    fn balance_round_trips() {
        let relayer = MockRelayer::new("42.5");
        assert_eq!(relayer.get_balance().unwrap(), "42.5");
    }
}
