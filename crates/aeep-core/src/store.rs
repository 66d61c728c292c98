//! Typed persistent state: row shapes and the `Store` trait.
//!
//! The protocol names one writer of truth for every entity in its data
//! model. [`InMemoryStore`] is the only implementation shipped here — a
//! `DashMap`-per-entity table plus a handful of `parking_lot`-guarded
//! secondary indexes — generalizing the teacher's single-purpose
//! `ProviderCache` (one `DashMap<Network, Provider>`) into a multi-table
//! store. A durable implementation would satisfy the same [`Store`] trait
//! against a real database; that implementation is out of scope.

use std::sync::atomic::{AtomicU64, Ordering};

use aeep_types::{Availability, Did, DidDocument, DidStatus, Timestamp};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::StoreError;

/// A registered agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRow {
    pub id: String,
    pub did: Did,
    pub status: DidStatus,
    pub availability: Availability,
    pub last_seen_at: Timestamp,
    pub display_name: String,
    pub description: String,
    pub endpoint: String,
    pub payment_address: String,
    pub trust_score: f64,
    pub interaction_count: u64,
    pub successful_count: u64,
    pub failed_count: u64,
    pub dispute_count: u64,
    pub did_document: DidDocument,
    pub created_at: Timestamp,
}

/// A named capability an agent offers; uniqueness is (agent_id, name).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapabilityRow {
    pub agent_id: String,
    pub name: String,
    pub metadata: Value,
}

/// Interaction lifecycle status, §3/§4.1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InteractionStatus {
    Pending,
    Offered,
    Accepted,
    Delivered,
    Verified,
    Completed,
    Expired,
    Rejected,
    Disputed,
    Failed,
}

impl InteractionStatus {
    pub fn is_terminal(self) -> bool {
        use InteractionStatus::*;
        matches!(self, Completed | Expired | Rejected | Failed)
    }
}

/// Outcome recorded once an interaction leaves `pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InteractionOutcome {
    Success,
    Failure,
    Timeout,
    Rejected,
    Dispute,
}

/// The server-side record of one end-to-end negotiation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InteractionRow {
    pub id: String,
    pub interaction_hash: String,
    pub initiator_did: Did,
    pub provider_did: Did,
    pub capability: String,
    pub status: InteractionStatus,
    pub outcome: Option<InteractionOutcome>,
    pub payment_tx_hash: Option<String>,
    pub payment_amount: Option<rust_decimal::Decimal>,
    pub batch_id: Option<u64>,
    pub request_payload: Value,
    pub offer_payload: Option<Value>,
    pub result_payload: Option<Value>,
    pub reason_code: Option<String>,
    pub reason: Option<String>,
    pub idempotency_key: String,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    /// Row version, bumped on every transition; a failed
    /// `compare_and_transition` (version mismatch) means a racing writer
    /// got there first and yields `INVALID_TRANSITION`.
    pub version: u64,
}

/// Message queue status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    Queued,
    Delivered,
    Failed,
}

/// A stored envelope awaiting delivery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageRow {
    pub id: String,
    pub message_type: String,
    pub from: Did,
    pub to: Did,
    pub envelope_json: Value,
    pub created_at: Timestamp,
    pub expires_at: Timestamp,
    pub status: MessageStatus,
    pub delivered_at: Option<Timestamp>,
    pub retry_count: u32,
    pub last_error: Option<String>,
}

/// A replay-protection record.
#[derive(Debug, Clone)]
pub struct NonceRow {
    pub nonce: String,
    pub did: Did,
    pub created_at: Timestamp,
    pub expires_at: Timestamp,
}

/// Batch status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    Pending,
    Submitted,
    Confirmed,
    Failed,
}

/// An anchoring unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchRow {
    pub id: u64,
    pub merkle_root: String,
    pub interaction_count: u64,
    pub tx_hash: Option<String>,
    pub status: BatchStatus,
    pub created_at: Timestamp,
    pub submitted_at: Option<Timestamp>,
}

/// A persisted Merkle inclusion proof for one anchored interaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProofRow {
    pub interaction_hash: String,
    pub batch_id: u64,
    pub leaf_hash: String,
    pub siblings: Vec<String>,
}

/// Typed access to every persisted entity in the data model.
///
/// Implemented synchronously here (the in-memory tables never suspend);
/// `aeep-core`'s callers treat every method as if it could, so a future
/// database-backed implementation behind a trait object needs no call-site
/// changes beyond adding `.await`.
pub trait Store: Send + Sync + 'static {
    fn insert_agent(&self, agent: AgentRow) -> Result<(), StoreError>;
    fn get_agent(&self, id: &str) -> Option<AgentRow>;
    fn get_agent_by_did(&self, did: &Did) -> Option<AgentRow>;
    fn update_agent(&self, agent: AgentRow) -> Result<(), StoreError>;
    fn list_agents(&self) -> Vec<AgentRow>;

    fn replace_capabilities(&self, agent_id: &str, capabilities: Vec<CapabilityRow>);
    fn capabilities_for(&self, agent_id: &str) -> Vec<CapabilityRow>;

    fn insert_interaction(&self, row: InteractionRow) -> Result<(), StoreError>;
    fn get_interaction(&self, id: &str) -> Option<InteractionRow>;
    fn get_interaction_by_idempotency_key(&self, key: &str) -> Option<InteractionRow>;
    fn find_latest_by_status_and_party(
        &self,
        status: InteractionStatus,
        party: &Did,
    ) -> Option<InteractionRow>;
    /// Atomic compare-and-swap on `(id, expected_version)`. Returns
    /// `Err(StoreError::Conflict)` if the row moved under us.
    fn compare_and_update_interaction(
        &self,
        expected_version: u64,
        updated: InteractionRow,
    ) -> Result<(), StoreError>;
    fn list_non_terminal_interactions(&self) -> Vec<InteractionRow>;
    fn list_interactions_by_batch(&self, batch_id: u64) -> Vec<InteractionRow>;

    fn insert_message(&self, message: MessageRow) -> Result<(), StoreError>;
    fn queued_messages_for(&self, to: &Did) -> Vec<MessageRow>;
    fn mark_message_delivered(&self, id: &str) -> Result<(), StoreError>;
    fn mark_message_failed(&self, id: &str, reason: String) -> Result<(), StoreError>;
    fn evict_expired_messages(&self, now: Timestamp) -> u64;

    fn insert_nonce(&self, row: NonceRow) -> Result<(), StoreError>;
    fn gc_expired_nonces(&self, now: Timestamp) -> u64;

    fn next_batch_id(&self) -> u64;
    fn insert_batch(&self, batch: BatchRow) -> Result<(), StoreError>;
    fn update_batch(&self, batch: BatchRow) -> Result<(), StoreError>;
    fn get_batch(&self, id: u64) -> Option<BatchRow>;
    fn list_batches(&self) -> Vec<BatchRow>;

    fn insert_proof(&self, proof: ProofRow) -> Result<(), StoreError>;
    fn get_proof(&self, interaction_hash: &str) -> Option<ProofRow>;
}

/// In-memory implementation of [`Store`]: one `DashMap` per entity, with a
/// couple of `Mutex`-guarded secondary indexes for the composite lookups
/// the engine needs (idempotency key, status+party fallback).
#[derive(Default)]
pub struct InMemoryStore {
    agents_by_id: DashMap<String, AgentRow>,
    agents_by_did: DashMap<String, String>,
    capabilities: DashMap<String, Vec<CapabilityRow>>,
    interactions: DashMap<String, InteractionRow>,
    idempotency_index: DashMap<String, String>,
    messages: DashMap<String, MessageRow>,
    nonces: DashMap<String, NonceRow>,
    batches: DashMap<u64, BatchRow>,
    proofs: DashMap<String, ProofRow>,
    batch_id_seq: AtomicU64,
    // Guards the read-modify-write of interaction rows so two concurrent
    // transitions on distinct interactions never block each other, but a
    // race on the same interaction is always serialized.
    interaction_lock: Mutex<()>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Store for InMemoryStore {
    fn insert_agent(&self, agent: AgentRow) -> Result<(), StoreError> {
        if self.agents_by_did.contains_key(agent.did.as_str()) {
            return Err(StoreError::Conflict("agent.did"));
        }
        self.agents_by_did
            .insert(agent.did.as_str().to_string(), agent.id.clone());
        self.agents_by_id.insert(agent.id.clone(), agent);
        Ok(())
    }

    fn get_agent(&self, id: &str) -> Option<AgentRow> {
        self.agents_by_id.get(id).map(|r| r.clone())
    }

    fn get_agent_by_did(&self, did: &Did) -> Option<AgentRow> {
        let id = self.agents_by_did.get(did.as_str())?;
        self.get_agent(&id)
    }

    fn update_agent(&self, agent: AgentRow) -> Result<(), StoreError> {
        if !self.agents_by_id.contains_key(&agent.id) {
            return Err(StoreError::NotFound);
        }
        self.agents_by_id.insert(agent.id.clone(), agent);
        Ok(())
    }

    fn list_agents(&self) -> Vec<AgentRow> {
        self.agents_by_id.iter().map(|r| r.clone()).collect()
    }

    fn replace_capabilities(&self, agent_id: &str, capabilities: Vec<CapabilityRow>) {
        self.capabilities
            .insert(agent_id.to_string(), capabilities);
    }

    fn capabilities_for(&self, agent_id: &str) -> Vec<CapabilityRow> {
        self.capabilities
            .get(agent_id)
            .map(|r| r.clone())
            .unwrap_or_default()
    }

    fn insert_interaction(&self, row: InteractionRow) -> Result<(), StoreError> {
        if self.interactions.contains_key(&row.id) {
            return Err(StoreError::Conflict("interaction.id"));
        }
        if self.idempotency_index.contains_key(&row.idempotency_key) {
            return Err(StoreError::Conflict("interaction.idempotency_key"));
        }
        self.idempotency_index
            .insert(row.idempotency_key.clone(), row.id.clone());
        self.interactions.insert(row.id.clone(), row);
        Ok(())
    }

    fn get_interaction(&self, id: &str) -> Option<InteractionRow> {
        self.interactions.get(id).map(|r| r.clone())
    }

    fn get_interaction_by_idempotency_key(&self, key: &str) -> Option<InteractionRow> {
        let id = self.idempotency_index.get(key)?;
        self.get_interaction(&id)
    }

    fn find_latest_by_status_and_party(
        &self,
        status: InteractionStatus,
        party: &Did,
    ) -> Option<InteractionRow> {
        self.interactions
            .iter()
            .filter(|r| {
                r.status == status && (&r.initiator_did == party || &r.provider_did == party)
            })
            .max_by_key(|r| r.updated_at)
            .map(|r| r.clone())
    }

    fn compare_and_update_interaction(
        &self,
        expected_version: u64,
        updated: InteractionRow,
    ) -> Result<(), StoreError> {
        let _guard = self.interaction_lock.lock();
        let mut entry = self
            .interactions
            .get_mut(&updated.id)
            .ok_or(StoreError::NotFound)?;
        if entry.version != expected_version {
            return Err(StoreError::Conflict("interaction.version"));
        }
        *entry = updated;
        Ok(())
    }

    fn list_non_terminal_interactions(&self) -> Vec<InteractionRow> {
        self.interactions
            .iter()
            .filter(|r| !r.status.is_terminal())
            .map(|r| r.clone())
            .collect()
    }

    fn list_interactions_by_batch(&self, batch_id: u64) -> Vec<InteractionRow> {
        self.interactions
            .iter()
            .filter(|r| r.batch_id == Some(batch_id))
            .map(|r| r.clone())
            .collect()
    }

    fn insert_message(&self, message: MessageRow) -> Result<(), StoreError> {
        if self.messages.contains_key(&message.id) {
            return Err(StoreError::Conflict("message.id"));
        }
        self.messages.insert(message.id.clone(), message);
        Ok(())
    }

    fn queued_messages_for(&self, to: &Did) -> Vec<MessageRow> {
        let mut rows: Vec<MessageRow> = self
            .messages
            .iter()
            .filter(|r| &r.to == to && r.status == MessageStatus::Queued)
            .map(|r| r.clone())
            .collect();
        rows.sort_by_key(|r| r.created_at);
        rows
    }

    fn mark_message_delivered(&self, id: &str) -> Result<(), StoreError> {
        let mut row = self.messages.get_mut(id).ok_or(StoreError::NotFound)?;
        row.status = MessageStatus::Delivered;
        row.delivered_at = Some(Timestamp::now());
        Ok(())
    }

    fn mark_message_failed(&self, id: &str, reason: String) -> Result<(), StoreError> {
        let mut row = self.messages.get_mut(id).ok_or(StoreError::NotFound)?;
        row.status = MessageStatus::Failed;
        row.last_error = Some(reason);
        Ok(())
    }

    fn evict_expired_messages(&self, now: Timestamp) -> u64 {
        let expired: Vec<String> = self
            .messages
            .iter()
            .filter(|r| r.status == MessageStatus::Queued && r.expires_at.is_before(&now))
            .map(|r| r.id.clone())
            .collect();
        for id in &expired {
            self.messages.remove(id);
        }
        expired.len() as u64
    }

    fn insert_nonce(&self, row: NonceRow) -> Result<(), StoreError> {
        match self.nonces.entry(row.nonce.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(StoreError::Conflict("nonce")),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(row);
                Ok(())
            }
        }
    }

    fn gc_expired_nonces(&self, now: Timestamp) -> u64 {
        let expired: Vec<String> = self
            .nonces
            .iter()
            .filter(|r| r.expires_at.is_before(&now))
            .map(|r| r.nonce.clone())
            .collect();
        for nonce in &expired {
            self.nonces.remove(nonce);
        }
        expired.len() as u64
    }

    fn next_batch_id(&self) -> u64 {
        self.batch_id_seq.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn insert_batch(&self, batch: BatchRow) -> Result<(), StoreError> {
        if self.batches.contains_key(&batch.id) {
            return Err(StoreError::Conflict("batch.id"));
        }
        self.batches.insert(batch.id, batch);
        Ok(())
    }

    fn update_batch(&self, batch: BatchRow) -> Result<(), StoreError> {
        if !self.batches.contains_key(&batch.id) {
            return Err(StoreError::NotFound);
        }
        self.batches.insert(batch.id, batch);
        Ok(())
    }

    fn get_batch(&self, id: u64) -> Option<BatchRow> {
        self.batches.get(&id).map(|r| r.clone())
    }

    fn list_batches(&self) -> Vec<BatchRow> {
        self.batches.iter().map(|r| r.clone()).collect()
    }

    fn insert_proof(&self, proof: ProofRow) -> Result<(), StoreError> {
        self.proofs
            .insert(proof.interaction_hash.clone(), proof);
        Ok(())
    }

    fn get_proof(&self, interaction_hash: &str) -> Option<ProofRow> {
        self.proofs.get(interaction_hash).map(|r| r.clone())
    }
}
