//! Merkle batching service (§4.4).
//!
//! Maintains an in-memory ordered buffer of interaction hashes awaiting
//! anchoring. Two triggers flush the buffer: the buffer reaching
//! `size_threshold`, or a background tick observing the buffer non-empty
//! and `time_threshold` elapsed since the last submission. Submission
//! never abandons a hash: a relayer failure re-prepends the batch's hashes
//! for the next attempt.

use std::sync::Arc;

use aeep_types::{MerkleTree, Timestamp};
use parking_lot::Mutex;
use tracing::{instrument, warn};

use crate::error::BatchingError;
use crate::relayer::Relayer;
use crate::store::{BatchRow, BatchStatus, InteractionRow, ProofRow, Store};

/// Tuning knobs for the batching service, mirrored in server config.
#[derive(Debug, Clone, Copy)]
pub struct BatchingConfig {
    pub size_threshold: usize,
    pub time_threshold_ms: u64,
}

impl Default for BatchingConfig {
    fn default() -> Self {
        Self {
            size_threshold: 100,
            time_threshold_ms: 5 * 60 * 1000,
        }
    }
}

struct Buffer {
    hashes: Vec<String>,
    last_batch_at: Timestamp,
}

/// The batching service. Cheap to clone: the buffer lives behind an `Arc`.
#[derive(Clone)]
pub struct BatchingService {
    config: BatchingConfig,
    buffer: Arc<Mutex<Buffer>>,
    store: Arc<dyn Store>,
    relayer: Arc<dyn Relayer>,
}

impl BatchingService {
    pub fn new(config: BatchingConfig, store: Arc<dyn Store>, relayer: Arc<dyn Relayer>) -> Self {
        Self {
            config,
            buffer: Arc::new(Mutex::new(Buffer {
                hashes: Vec::new(),
                last_batch_at: Timestamp::now(),
            })),
            store,
            relayer,
        }
    }

    /// Appends an interaction hash to the buffer. Flushes synchronously if
    /// the size threshold is crossed.
    #[instrument(skip(self))]
    pub fn add_interaction(&self, interaction_hash: String) {
        let should_flush = {
            let mut buffer = self.buffer.lock();
            buffer.hashes.push(interaction_hash);
            buffer.hashes.len() >= self.config.size_threshold
        };
        if should_flush {
            if let Err(err) = self.flush() {
                warn!(?err, "batch submission failed, hashes re-queued");
            }
        }
    }

    /// Called by the periodic time-trigger sweep: flushes the buffer if
    /// it is non-empty and the time threshold has elapsed.
    pub fn maybe_flush_on_timer(&self) {
        let due = {
            let buffer = self.buffer.lock();
            !buffer.hashes.is_empty()
                && buffer.last_batch_at.elapsed_seconds() * 1000 >= self.config.time_threshold_ms as i64
        };
        if due {
            if let Err(err) = self.flush() {
                warn!(?err, "timed batch submission failed, hashes re-queued");
            }
        }
    }

    /// Drains the buffer, builds a Merkle tree, persists the batch and its
    /// proofs, and submits the root through the relayer. On relayer
    /// failure the hashes are re-prepended for the next attempt and the
    /// batch row is marked `failed`.
    #[instrument(skip(self))]
    pub fn flush(&self) -> Result<(), BatchingError> {
        let hashes = {
            let mut buffer = self.buffer.lock();
            if buffer.hashes.is_empty() {
                return Ok(());
            }
            std::mem::take(&mut buffer.hashes)
        };

        let tree = MerkleTree::build(hashes.iter().map(|h| h.as_bytes()));
        let batch_id = self.store.next_batch_id();
        let batch = BatchRow {
            id: batch_id,
            merkle_root: tree.root(),
            interaction_count: hashes.len() as u64,
            tx_hash: None,
            status: BatchStatus::Pending,
            created_at: Timestamp::now(),
            submitted_at: None,
        };
        self.store
            .insert_batch(batch.clone())
            .map_err(BatchingError::Store)?;

        for hash in &hashes {
            if let Some(proof) = tree.proof_for(hash.as_bytes()) {
                self.store
                    .insert_proof(ProofRow {
                        interaction_hash: hash.clone(),
                        batch_id,
                        leaf_hash: proof.leaf_hash,
                        siblings: proof.siblings,
                    })
                    .map_err(BatchingError::Store)?;
            }
            set_interaction_batch_id(self.store.as_ref(), hash, batch_id);
        }

        match self
            .relayer
            .submit_batch(&batch.merkle_root, hashes.len() as u64)
        {
            Ok(tx_hash) => {
                let mut updated = batch;
                updated.status = BatchStatus::Submitted;
                updated.tx_hash = Some(tx_hash);
                updated.submitted_at = Some(Timestamp::now());
                self.store.update_batch(updated).map_err(BatchingError::Store)?;
                let mut buffer = self.buffer.lock();
                buffer.last_batch_at = Timestamp::now();
            }
            Err(err) => {
                warn!(?err, batch_id, "relayer submission failed");
                let mut updated = batch;
                updated.status = BatchStatus::Failed;
                self.store.update_batch(updated).map_err(BatchingError::Store)?;
                let mut buffer = self.buffer.lock();
                let mut requeued = hashes;
                requeued.extend(std::mem::take(&mut buffer.hashes));
                buffer.hashes = requeued;
            }
        }

        Ok(())
    }
}

fn set_interaction_batch_id(store: &dyn Store, interaction_hash: &str, batch_id: u64) {
    // `verified` is non-terminal, so every interaction the buffer can name
    // is still reachable through this scan; a durable store would instead
    // carry a secondary index on interaction_hash.
    for row in store.list_non_terminal_interactions() {
        if row.interaction_hash == interaction_hash {
            set_batch_id(store, row, batch_id);
            return;
        }
    }
}

fn set_batch_id(store: &dyn Store, mut row: InteractionRow, batch_id: u64) {
    let expected_version = row.version;
    row.batch_id = Some(batch_id);
    row.version += 1;
    let _ = store.compare_and_update_interaction(expected_version, row);
}
