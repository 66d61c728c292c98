//! Envelope acceptance, message queueing, polling, and push delivery (§4.3).
//!
//! The queue is the authoritative delivery mechanism; the push stream is a
//! best-effort accelerator on top of it. A subscriber that can't keep up is
//! evicted rather than allowed to back-pressure the router — its pending
//! messages are still sitting in the queue for its next poll.

use std::sync::Arc;

use aeep_types::{Availability, Did, Envelope, Timestamp};
use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::instrument;

use crate::error::RouterError;
use crate::store::{MessageRow, MessageStatus, Store};

/// Default message expiry when an envelope carries no `expires` field.
pub const DEFAULT_MESSAGE_TTL_SECONDS: i64 = 24 * 60 * 60;

/// Per-agent live push-stream cap (§4.3, §5 resource bounds).
pub const MAX_STREAMS_PER_AGENT: usize = 3;
/// Global live push-stream cap across all agents.
pub const MAX_STREAMS_GLOBAL: usize = 100;

/// Outcome of accepting an envelope into the queue.
#[derive(Debug, Clone)]
pub struct AcceptedMessage {
    pub message_id: String,
    pub queued: bool,
    pub recipient_availability: Availability,
}

/// Envelope router: queueing, polling, and the push-stream subscriber
/// registry. Cheap to clone — the queue lives in the shared [`Store`] and
/// the subscriber table lives behind an `Arc`.
#[derive(Clone)]
pub struct MessageRouter {
    store: Arc<dyn Store>,
    streams: Arc<DashMap<String, Vec<mpsc::Sender<Value>>>>,
    message_ttl_seconds: i64,
    max_streams_per_agent: usize,
    max_streams_global: usize,
}

impl MessageRouter {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self::with_limits(
            store,
            DEFAULT_MESSAGE_TTL_SECONDS,
            MAX_STREAMS_PER_AGENT,
            MAX_STREAMS_GLOBAL,
        )
    }

    /// Builds a router with server-configured TTL and connection limits in
    /// place of the module defaults (§3.3).
    pub fn with_limits(
        store: Arc<dyn Store>,
        message_ttl_seconds: i64,
        max_streams_per_agent: usize,
        max_streams_global: usize,
    ) -> Self {
        Self {
            store,
            streams: Arc::new(DashMap::new()),
            message_ttl_seconds,
            max_streams_per_agent,
            max_streams_global,
        }
    }

    /// Accepts an already-authenticated envelope: resolves the recipient,
    /// persists it in the queue, and broadcasts it to any live push
    /// subscribers for the recipient.
    #[instrument(skip(self, envelope), fields(to = %envelope.to, message_id = %envelope.id))]
    pub fn accept(&self, envelope: &Envelope) -> Result<AcceptedMessage, RouterError> {
        let recipient = self
            .store
            .get_agent_by_did(&envelope.to)
            .ok_or(RouterError::RecipientNotFound)?;

        let now = Timestamp::now();
        let expires = envelope
            .expires
            .unwrap_or_else(|| now.plus_seconds(self.message_ttl_seconds));
        let envelope_json = serde_json::to_value(envelope).expect("envelope always serializes");
        let message_type = envelope_json
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_string();

        self.store.insert_message(MessageRow {
            id: envelope.id.clone(),
            message_type,
            from: envelope.from.clone(),
            to: envelope.to.clone(),
            envelope_json: envelope_json.clone(),
            created_at: now,
            expires_at: expires,
            status: MessageStatus::Queued,
            delivered_at: None,
            retry_count: 0,
            last_error: None,
        })?;

        self.broadcast(&recipient.id, envelope_json);

        Ok(AcceptedMessage {
            message_id: envelope.id.clone(),
            queued: true,
            recipient_availability: recipient.availability,
        })
    }

    /// Returns every `queued` envelope destined for `to`, marking each
    /// returned row `delivered`. A malformed stored row is marked `failed`
    /// and skipped rather than returned. Consuming: a second call with
    /// nothing newly queued returns an empty list.
    pub fn poll(&self, to: &Did) -> Vec<Value> {
        let rows = self.store.queued_messages_for(to);
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            if serde_json::from_value::<Envelope>(row.envelope_json.clone()).is_ok() {
                let _ = self.store.mark_message_delivered(&row.id);
                out.push(row.envelope_json);
            } else {
                let _ = self
                    .store
                    .mark_message_failed(&row.id, "stored envelope failed to parse".to_string());
            }
        }
        out
    }

    /// Opens a new push-stream subscription for `agent_id`, enforcing the
    /// per-agent and global connection caps.
    pub fn subscribe(&self, agent_id: &str) -> Result<mpsc::Receiver<Value>, RouterError> {
        let global_count: usize = self.streams.iter().map(|entry| entry.value().len()).sum();
        if global_count >= self.max_streams_global {
            return Err(RouterError::ConnectionLimit);
        }

        let mut entry = self.streams.entry(agent_id.to_string()).or_default();
        if entry.len() >= self.max_streams_per_agent {
            return Err(RouterError::ConnectionLimit);
        }
        let (tx, rx) = mpsc::channel(32);
        entry.push(tx);
        Ok(rx)
    }

    /// Drops subscribers whose channel has already closed (client
    /// disconnect) for `agent_id`. Called opportunistically by the stream
    /// handler on teardown.
    pub fn evict_closed(&self, agent_id: &str) {
        if let Some(mut entry) = self.streams.get_mut(agent_id) {
            entry.retain(|tx| !tx.is_closed());
        }
    }

    fn broadcast(&self, agent_id: &str, payload: Value) {
        if let Some(mut entry) = self.streams.get_mut(agent_id) {
            // A full or closed channel means a slow or dead subscriber;
            // evict it in place rather than let it back-pressure delivery.
            entry.retain(|tx| tx.try_send(payload.clone()).is_ok());
        }
    }
}

/// Background sweep: evicts queued messages whose `expires_at` has passed.
pub fn sweep_expired_messages(store: &dyn Store) -> u64 {
    store.evict_expired_messages(Timestamp::now())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;
    use aeep_types::{Availability, DidDocument, DidStatus, VerificationKey};

    fn agent(did: &str) -> crate::store::AgentRow {
        let d = Did::parse(did).unwrap();
        crate::store::AgentRow {
            id: d.agent_id().to_string(),
            did: d.clone(),
            status: DidStatus::Active,
            availability: Availability::Online,
            last_seen_at: Timestamp::now(),
            display_name: "agent".into(),
            description: String::new(),
            endpoint: String::new(),
            payment_address: String::new(),
            trust_score: 0.5,
            interaction_count: 0,
            successful_count: 0,
            failed_count: 0,
            dispute_count: 0,
            did_document: DidDocument {
                id: d.clone(),
                verification_method: VerificationKey {
                    id: format!("{did}#key-1"),
                    key_type: "Ed25519VerificationKey2020".into(),
                    controller: d.clone(),
                    public_key_multibase: "z6MkhaXgBZDvotDkL5257faiztiGiC2QtKLGpbnnEGta2doK"
                        .into(),
                },
                key_agreement: VerificationKey {
                    id: format!("{did}#key-2"),
                    key_type: "X25519KeyAgreementKey2020".into(),
                    controller: d,
                    public_key_multibase: "z6MkhaXgBZDvotDkL5257faiztiGiC2QtKLGpbnnEGta2doK"
                        .into(),
                },
            },
            created_at: Timestamp::now(),
        }
    }

    fn envelope(from: &str, to: &str) -> Envelope {
        Envelope {
            version: "0.1.0".into(),
            id: uuid::Uuid::now_v7().to_string(),
            message_type: aeep_types::MessageType::Heartbeat,
            from: Did::parse(from).unwrap(),
            to: Did::parse(to).unwrap(),
            created: Timestamp::now(),
            expires: None,
            payload: serde_json::json!({"availability": "online"}),
            nonce: uuid::Uuid::now_v7().to_string(),
            signature: "sig".into(),
        }
    }

    #[test]
    fn poll_is_consuming() {
        let store = Arc::new(InMemoryStore::new());
        store.insert_agent(agent("did:aeep:recipient")).unwrap();
        let router = MessageRouter::new(store.clone() as Arc<dyn Store>);
        let env = envelope("did:aeep:sender", "did:aeep:recipient");
        router.accept(&env).unwrap();

        let recipient = Did::parse("did:aeep:recipient").unwrap();
        assert_eq!(router.poll(&recipient).len(), 1);
        assert_eq!(router.poll(&recipient).len(), 0);
    }

    #[test]
    fn accept_rejects_unknown_recipient() {
        let store = Arc::new(InMemoryStore::new());
        let router = MessageRouter::new(store as Arc<dyn Store>);
        let env = envelope("did:aeep:sender", "did:aeep:ghost");
        assert!(router.accept(&env).is_err());
    }

    #[test]
    fn subscriber_cap_per_agent_is_enforced() {
        let store = Arc::new(InMemoryStore::new());
        let router = MessageRouter::new(store as Arc<dyn Store>);
        for _ in 0..MAX_STREAMS_PER_AGENT {
            router.subscribe("agent-1").unwrap();
        }
        assert!(router.subscribe("agent-1").is_err());
    }
}
