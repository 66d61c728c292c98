//! End-to-end negotiation scenarios driven directly against the engine
//! (store + registry + negotiation + batching), bypassing the HTTP layer.

use std::sync::Arc;

use aeep_core::batching::{BatchingConfig, BatchingService};
use aeep_core::error::NegotiationError;
use aeep_core::negotiation;
use aeep_core::registry;
use aeep_core::relayer::MockRelayer;
use aeep_core::store::{InMemoryStore, InteractionStatus, Store};
use aeep_types::signing::Ed25519Keypair;
use aeep_types::{
    AcceptPayload, AcceptancePolicy, Did, DidDocument, MessageType, OfferPayload, PaymentPayload,
    RejectPayload, RequestPayload, ResultPayload, Timestamp, VerificationKey, VerifyPayload,
    canonicalize_value, sha256_hex,
};
use serde::Serialize;
use serde_json::json;

fn did_document(did: &Did, keypair: &Ed25519Keypair) -> DidDocument {
    DidDocument {
        id: did.clone(),
        verification_method: VerificationKey {
            id: format!("{did}#key-1"),
            key_type: "Ed25519VerificationKey2020".to_string(),
            controller: did.clone(),
            public_key_multibase: keypair.public_key_multibase(),
        },
        key_agreement: VerificationKey {
            id: format!("{did}#key-agreement"),
            key_type: "X25519KeyAgreementKey2020".to_string(),
            controller: did.clone(),
            public_key_multibase: aeep_types::signing::X25519Keypair::generate().public_key_multibase(),
        },
    }
}

fn register(store: &dyn Store, did_str: &str, capability: &str) -> (Did, Ed25519Keypair) {
    let did = Did::parse(did_str).unwrap();
    let keypair = Ed25519Keypair::generate();
    registry::register(
        store,
        did.clone(),
        did_document(&did, &keypair),
        did.agent_id().to_string(),
        "test agent".to_string(),
        "https://example.invalid/agent".to_string(),
        "0xpayment".to_string(),
        vec![(capability.to_string(), json!({"rate": "0.03"}))],
    )
    .unwrap();
    (did, keypair)
}

/// Builds and signs an envelope the same way the client SDK does, without
/// taking a dependency on it from this crate's test target.
fn envelope(
    keypair: &Ed25519Keypair,
    message_type: MessageType,
    from: &Did,
    to: &Did,
    payload: impl Serialize,
    id: &str,
) -> aeep_types::Envelope {
    let mut env = aeep_types::Envelope {
        version: "0.1.0".to_string(),
        id: id.to_string(),
        message_type,
        from: from.clone(),
        to: to.clone(),
        created: Timestamp::now(),
        expires: None,
        payload: serde_json::to_value(payload).unwrap(),
        nonce: uuid::Uuid::now_v7().to_string(),
        signature: String::new(),
    };
    let signing_input = env.signing_input().unwrap();
    env.signature = aeep_types::util::encode_str(keypair.sign(signing_input.as_bytes()));
    env
}

fn offer_hash(offer: &OfferPayload) -> String {
    let value = serde_json::to_value(offer).unwrap();
    let canonical = canonicalize_value(value).unwrap();
    sha256_hex(canonical.as_bytes())
}

struct Harness {
    store: Arc<InMemoryStore>,
    batching: BatchingService,
}

impl Harness {
    fn new(size_threshold: usize) -> Self {
        let store = Arc::new(InMemoryStore::new());
        let relayer = Arc::new(MockRelayer::new("1000.000000"));
        let batching = BatchingService::new(
            BatchingConfig {
                size_threshold,
                time_threshold_ms: 5 * 60 * 1000,
            },
            store.clone(),
            relayer,
        );
        Self { store, batching }
    }
}

#[test]
fn happy_path_drives_an_interaction_to_completion() {
    let harness_store = InMemoryStore::new();
    let relayer = Arc::new(MockRelayer::new("1000.000000"));
    let batching_store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
    let batching = BatchingService::new(BatchingConfig::default(), batching_store, relayer);

    let (initiator, i_key) = register(&harness_store, "did:aeep:initiator-1", "buyer");
    let (provider, p_key) = register(&harness_store, "did:aeep:provider-1", "financial-analysis");

    let request = RequestPayload {
        task_type: "financial-analysis".to_string(),
        parameters: json!({"ticker": "ACME"}),
        max_budget: "0.05".parse().unwrap(),
        currency: "USDC".to_string(),
        deadline: 3600,
        acceptance_policy: AcceptancePolicy::Auto,
        idempotency_key: "k-happy-path".to_string(),
    };
    let request_envelope = envelope(&i_key, MessageType::Request, &initiator, &provider, request, "req-1");
    let interaction = negotiation::handle_message(&harness_store, &batching, &request_envelope).unwrap();
    assert_eq!(interaction.status, InteractionStatus::Pending);

    let offer = OfferPayload {
        request_id: interaction.id.clone(),
        price: "0.03".parse().unwrap(),
        protocol_fee: "0.00075".parse().unwrap(),
        total_cost: "0.03075".parse().unwrap(),
        description: None,
    };
    let offer_envelope = envelope(&p_key, MessageType::Offer, &provider, &initiator, offer.clone(), "offer-1");
    let interaction = negotiation::handle_message(&harness_store, &batching, &offer_envelope).unwrap();
    assert_eq!(interaction.status, InteractionStatus::Offered);

    let accept = AcceptPayload {
        offer_id: interaction.id.clone(),
        offer_hash: offer_hash(&offer),
    };
    let accept_envelope = envelope(&i_key, MessageType::Accept, &initiator, &provider, accept, "accept-1");
    let interaction = negotiation::handle_message(&harness_store, &batching, &accept_envelope).unwrap();
    assert_eq!(interaction.status, InteractionStatus::Accepted);

    let result = ResultPayload {
        request_id: interaction.id.clone(),
        result_hash: "deadbeef".to_string(),
        result: Some(json!({"summary": "buy"})),
    };
    let result_envelope = envelope(&p_key, MessageType::Result, &provider, &initiator, result, "result-1");
    let interaction = negotiation::handle_message(&harness_store, &batching, &result_envelope).unwrap();
    assert_eq!(interaction.status, InteractionStatus::Delivered);

    let verify = VerifyPayload {
        request_id: interaction.id.clone(),
        result_hash: Some("deadbeef".to_string()),
        verified: true,
        dispute_code: None,
    };
    let verify_envelope = envelope(&i_key, MessageType::Verify, &initiator, &provider, verify, "verify-1");
    let interaction = negotiation::handle_message(&harness_store, &batching, &verify_envelope).unwrap();
    assert_eq!(interaction.status, InteractionStatus::Verified);

    let payment = PaymentPayload {
        request_id: interaction.id.clone(),
        tx_hash: "0xabc".to_string(),
        amount: "0.03075".parse().unwrap(),
    };
    let payment_envelope = envelope(&i_key, MessageType::Payment, &initiator, &provider, payment, "payment-1");
    let interaction = negotiation::handle_message(&harness_store, &batching, &payment_envelope).unwrap();
    assert_eq!(interaction.status, InteractionStatus::Completed);

    let provider_row = harness_store.get_agent_by_did(&provider).unwrap();
    let initiator_row = harness_store.get_agent_by_did(&initiator).unwrap();
    assert_eq!(provider_row.successful_count, 1);
    assert_eq!(initiator_row.successful_count, 1);
    assert!(provider_row.trust_score > 0.50);
}

#[test]
fn offer_exceeding_budget_is_rejected_and_interaction_stays_pending() {
    let harness = Harness::new(100);
    let (initiator, i_key) = register(&harness.store, "did:aeep:initiator-2", "buyer");
    let (provider, p_key) = register(&harness.store, "did:aeep:provider-2", "financial-analysis");

    let request = RequestPayload {
        task_type: "financial-analysis".to_string(),
        parameters: json!({}),
        max_budget: "0.05".parse().unwrap(),
        currency: "USDC".to_string(),
        deadline: 3600,
        acceptance_policy: AcceptancePolicy::Auto,
        idempotency_key: "k-budget".to_string(),
    };
    let request_envelope = envelope(&i_key, MessageType::Request, &initiator, &provider, request, "req-2");
    let interaction = negotiation::handle_message(&harness.store, &harness.batching, &request_envelope).unwrap();

    let offer = OfferPayload {
        request_id: interaction.id.clone(),
        price: "0.08".parse().unwrap(),
        protocol_fee: "0.002".parse().unwrap(),
        total_cost: "0.082".parse().unwrap(),
        description: None,
    };
    let offer_envelope = envelope(&p_key, MessageType::Offer, &provider, &initiator, offer, "offer-2");
    let err = negotiation::handle_message(&harness.store, &harness.batching, &offer_envelope).unwrap_err();
    assert!(matches!(err, NegotiationError::BudgetExceeded));

    let reloaded = harness.store.get_interaction(&interaction.id).unwrap();
    assert_eq!(reloaded.status, InteractionStatus::Pending);
}

#[test]
fn replayed_nonce_is_rejected_by_the_auth_pipeline() {
    use aeep_core::auth::{self, AuthConfig};

    let store = InMemoryStore::new();
    let (initiator, i_key) = register(&store, "did:aeep:initiator-3", "buyer");
    let (provider, _) = register(&store, "did:aeep:provider-3", "financial-analysis");

    let request = RequestPayload {
        task_type: "financial-analysis".to_string(),
        parameters: json!({}),
        max_budget: "0.05".parse().unwrap(),
        currency: "USDC".to_string(),
        deadline: 3600,
        acceptance_policy: AcceptancePolicy::Auto,
        idempotency_key: "k-replay".to_string(),
    };
    let request_envelope = envelope(&i_key, MessageType::Request, &initiator, &provider, request, "req-3");

    let config = AuthConfig::default();
    auth::authenticate(&store, &config, &request_envelope).expect("first delivery authenticates");
    let err = auth::authenticate(&store, &config, &request_envelope).unwrap_err();
    assert!(matches!(err, aeep_core::error::AuthError::NonceReused));
}

#[test]
fn expired_pending_interaction_rejects_late_offers() {
    let harness = Harness::new(100);
    let (initiator, i_key) = register(&harness.store, "did:aeep:initiator-4", "buyer");
    let (provider, p_key) = register(&harness.store, "did:aeep:provider-4", "financial-analysis");

    let request = RequestPayload {
        task_type: "financial-analysis".to_string(),
        parameters: json!({}),
        max_budget: "0.05".parse().unwrap(),
        currency: "USDC".to_string(),
        deadline: 3600,
        acceptance_policy: AcceptancePolicy::Auto,
        idempotency_key: "k-ttl".to_string(),
    };
    let request_envelope = envelope(&i_key, MessageType::Request, &initiator, &provider, request, "req-4");
    let interaction = negotiation::handle_message(&harness.store, &harness.batching, &request_envelope).unwrap();

    // Force the row's clock backward past the 60s pending TTL instead of
    // sleeping in a test.
    let mut backdated = harness.store.get_interaction(&interaction.id).unwrap();
    let expected_version = backdated.version;
    backdated.updated_at = backdated.updated_at.plus_seconds(-61);
    harness
        .store
        .compare_and_update_interaction(expected_version, backdated)
        .unwrap();

    let swept = negotiation::sweep_expired(&harness.store);
    assert_eq!(swept, 1);
    let reloaded = harness.store.get_interaction(&interaction.id).unwrap();
    assert_eq!(reloaded.status, InteractionStatus::Expired);

    let offer = OfferPayload {
        request_id: interaction.id.clone(),
        price: "0.03".parse().unwrap(),
        protocol_fee: "0.00075".parse().unwrap(),
        total_cost: "0.03075".parse().unwrap(),
        description: None,
    };
    let offer_envelope = envelope(&p_key, MessageType::Offer, &provider, &initiator, offer, "offer-4");
    let err = negotiation::handle_message(&harness.store, &harness.batching, &offer_envelope).unwrap_err();
    assert!(matches!(err, NegotiationError::InvalidTransition));
}

#[test]
fn disputed_interaction_sweeps_to_failed_not_expired() {
    let harness = Harness::new(100);
    let (initiator, i_key) = register(&harness.store, "did:aeep:initiator-4b", "buyer");
    let (provider, p_key) = register(&harness.store, "did:aeep:provider-4b", "financial-analysis");

    let request = RequestPayload {
        task_type: "financial-analysis".to_string(),
        parameters: json!({}),
        max_budget: "0.05".parse().unwrap(),
        currency: "USDC".to_string(),
        deadline: 3600,
        acceptance_policy: AcceptancePolicy::Auto,
        idempotency_key: "k-dispute".to_string(),
    };
    let request_envelope = envelope(&i_key, MessageType::Request, &initiator, &provider, request, "req-4b");
    let interaction = negotiation::handle_message(&harness.store, &harness.batching, &request_envelope).unwrap();

    let offer = OfferPayload {
        request_id: interaction.id.clone(),
        price: "0.03".parse().unwrap(),
        protocol_fee: "0.00075".parse().unwrap(),
        total_cost: "0.03075".parse().unwrap(),
        description: None,
    };
    let offer_envelope = envelope(&p_key, MessageType::Offer, &provider, &initiator, offer.clone(), "offer-4b");
    negotiation::handle_message(&harness.store, &harness.batching, &offer_envelope).unwrap();

    let accept = AcceptPayload {
        offer_id: interaction.id.clone(),
        offer_hash: offer_hash(&offer),
    };
    let accept_envelope = envelope(&i_key, MessageType::Accept, &initiator, &provider, accept, "accept-4b");
    negotiation::handle_message(&harness.store, &harness.batching, &accept_envelope).unwrap();

    let result = ResultPayload {
        request_id: interaction.id.clone(),
        result_hash: "deadbeef".to_string(),
        result: None,
    };
    let result_envelope = envelope(&p_key, MessageType::Result, &provider, &initiator, result, "result-4b");
    negotiation::handle_message(&harness.store, &harness.batching, &result_envelope).unwrap();

    let verify = VerifyPayload {
        request_id: interaction.id.clone(),
        result_hash: Some("deadbeef".to_string()),
        verified: false,
        dispute_code: Some("quality".to_string()),
    };
    let verify_envelope = envelope(&i_key, MessageType::Verify, &initiator, &provider, verify, "verify-4b");
    let disputed = negotiation::handle_message(&harness.store, &harness.batching, &verify_envelope).unwrap();
    assert_eq!(disputed.status, InteractionStatus::Disputed);

    // Force the row's clock backward past the 30s disputed TTL instead of
    // sleeping in a test.
    let mut backdated = harness.store.get_interaction(&interaction.id).unwrap();
    let expected_version = backdated.version;
    backdated.updated_at = backdated.updated_at.plus_seconds(-31);
    harness
        .store
        .compare_and_update_interaction(expected_version, backdated)
        .unwrap();

    let swept = negotiation::sweep_expired(&harness.store);
    assert_eq!(swept, 1);
    let reloaded = harness.store.get_interaction(&interaction.id).unwrap();
    // `disputed` only ever transitions to `failed` in the allowed graph
    // (spec.md §4.1) — the sweep must never force it into `expired`.
    assert_eq!(reloaded.status, InteractionStatus::Failed);
}

#[test]
fn batch_anchors_once_size_threshold_is_reached() {
    let store = InMemoryStore::new();
    let relayer = Arc::new(MockRelayer::new("1000.000000"));
    let shared_store: Arc<dyn Store> = Arc::new(store);
    let batching = BatchingService::new(
        BatchingConfig { size_threshold: 2, time_threshold_ms: 5 * 60 * 1000 },
        shared_store.clone(),
        relayer,
    );

    let (initiator, i_key) = register(shared_store.as_ref(), "did:aeep:initiator-5", "buyer");
    let (provider, p_key) = register(shared_store.as_ref(), "did:aeep:provider-5", "financial-analysis");

    let mut interaction_ids = Vec::new();
    for n in 0..2 {
        let request = RequestPayload {
            task_type: "financial-analysis".to_string(),
            parameters: json!({}),
            max_budget: "0.05".parse().unwrap(),
            currency: "USDC".to_string(),
            deadline: 3600,
            acceptance_policy: AcceptancePolicy::Auto,
            idempotency_key: format!("k-batch-{n}"),
        };
        let request_envelope = envelope(
            &i_key,
            MessageType::Request,
            &initiator,
            &provider,
            request,
            &format!("req-batch-{n}"),
        );
        let interaction =
            negotiation::handle_message(shared_store.as_ref(), &batching, &request_envelope).unwrap();

        let offer = OfferPayload {
            request_id: interaction.id.clone(),
            price: "0.03".parse().unwrap(),
            protocol_fee: "0.00075".parse().unwrap(),
            total_cost: "0.03075".parse().unwrap(),
            description: None,
        };
        let offer_envelope = envelope(
            &p_key,
            MessageType::Offer,
            &provider,
            &initiator,
            offer.clone(),
            &format!("offer-batch-{n}"),
        );
        let interaction =
            negotiation::handle_message(shared_store.as_ref(), &batching, &offer_envelope).unwrap();

        let accept = AcceptPayload { offer_id: interaction.id.clone(), offer_hash: offer_hash(&offer) };
        let accept_envelope = envelope(
            &i_key,
            MessageType::Accept,
            &initiator,
            &provider,
            accept,
            &format!("accept-batch-{n}"),
        );
        negotiation::handle_message(shared_store.as_ref(), &batching, &accept_envelope).unwrap();

        let result = ResultPayload {
            request_id: interaction.id.clone(),
            result_hash: format!("hash-{n}"),
            result: None,
        };
        let result_envelope = envelope(
            &p_key,
            MessageType::Result,
            &provider,
            &initiator,
            result,
            &format!("result-batch-{n}"),
        );
        negotiation::handle_message(shared_store.as_ref(), &batching, &result_envelope).unwrap();

        let verify = VerifyPayload {
            request_id: interaction.id.clone(),
            result_hash: Some(format!("hash-{n}")),
            verified: true,
            dispute_code: None,
        };
        let verify_envelope = envelope(
            &i_key,
            MessageType::Verify,
            &initiator,
            &provider,
            verify,
            &format!("verify-batch-{n}"),
        );
        let verified =
            negotiation::handle_message(shared_store.as_ref(), &batching, &verify_envelope).unwrap();
        interaction_ids.push(verified.id.clone());
    }

    let batches = shared_store.list_batches();
    assert_eq!(batches.len(), 1);
    let batch = &batches[0];
    assert_eq!(batch.interaction_count, 2);
    assert_eq!(batch.status, aeep_core::store::BatchStatus::Submitted);

    for id in &interaction_ids {
        let row = shared_store.get_interaction(id).unwrap();
        assert_eq!(row.batch_id, Some(batch.id));
        let proof = shared_store.get_proof(&row.interaction_hash).unwrap();
        assert!(aeep_types::verify_proof(
            &aeep_types::MerkleProof { leaf_hash: proof.leaf_hash, siblings: proof.siblings },
            &batch.merkle_root,
        ));
    }
}

#[test]
fn only_the_initiator_may_accept_an_offer() {
    let harness = Harness::new(100);
    let (initiator, i_key) = register(&harness.store, "did:aeep:initiator-6", "buyer");
    let (provider, p_key) = register(&harness.store, "did:aeep:provider-6", "financial-analysis");
    let (outsider, o_key) = register(&harness.store, "did:aeep:outsider-6", "buyer");

    let request = RequestPayload {
        task_type: "financial-analysis".to_string(),
        parameters: json!({}),
        max_budget: "0.05".parse().unwrap(),
        currency: "USDC".to_string(),
        deadline: 3600,
        acceptance_policy: AcceptancePolicy::Auto,
        idempotency_key: "k-authz".to_string(),
    };
    let request_envelope = envelope(&i_key, MessageType::Request, &initiator, &provider, request, "req-6");
    let interaction = negotiation::handle_message(&harness.store, &harness.batching, &request_envelope).unwrap();

    let offer = OfferPayload {
        request_id: interaction.id.clone(),
        price: "0.03".parse().unwrap(),
        protocol_fee: "0.00075".parse().unwrap(),
        total_cost: "0.03075".parse().unwrap(),
        description: None,
    };
    let offer_envelope = envelope(&p_key, MessageType::Offer, &provider, &initiator, offer.clone(), "offer-6");
    let interaction = negotiation::handle_message(&harness.store, &harness.batching, &offer_envelope).unwrap();

    let accept = AcceptPayload { offer_id: interaction.id.clone(), offer_hash: offer_hash(&offer) };
    let accept_envelope = envelope(&o_key, MessageType::Accept, &outsider, &provider, accept, "accept-6");
    let err = negotiation::handle_message(&harness.store, &harness.batching, &accept_envelope).unwrap_err();
    assert!(matches!(err, NegotiationError::WrongRole));

    let reloaded = harness.store.get_interaction(&interaction.id).unwrap();
    assert_eq!(reloaded.status, InteractionStatus::Offered);
}

#[test]
fn offer_reject_recorded_with_reason() {
    let harness = Harness::new(100);
    let (initiator, i_key) = register(&harness.store, "did:aeep:initiator-7", "buyer");
    let (provider, p_key) = register(&harness.store, "did:aeep:provider-7", "financial-analysis");

    let request = RequestPayload {
        task_type: "financial-analysis".to_string(),
        parameters: json!({}),
        max_budget: "0.05".parse().unwrap(),
        currency: "USDC".to_string(),
        deadline: 3600,
        acceptance_policy: AcceptancePolicy::Auto,
        idempotency_key: "k-reject".to_string(),
    };
    let request_envelope = envelope(&i_key, MessageType::Request, &initiator, &provider, request, "req-7");
    let interaction = negotiation::handle_message(&harness.store, &harness.batching, &request_envelope).unwrap();

    let offer = OfferPayload {
        request_id: interaction.id.clone(),
        price: "0.03".parse().unwrap(),
        protocol_fee: "0.00075".parse().unwrap(),
        total_cost: "0.03075".parse().unwrap(),
        description: None,
    };
    let offer_envelope = envelope(&p_key, MessageType::Offer, &provider, &initiator, offer, "offer-7");
    let interaction = negotiation::handle_message(&harness.store, &harness.batching, &offer_envelope).unwrap();

    let reject = RejectPayload {
        offer_id: interaction.id.clone(),
        reason_code: "price_too_high".to_string(),
        reason: Some("needed a lower rate".to_string()),
    };
    let reject_envelope = envelope(&i_key, MessageType::Reject, &initiator, &provider, reject, "reject-7");
    let rejected = negotiation::handle_message(&harness.store, &harness.batching, &reject_envelope).unwrap();
    assert_eq!(rejected.status, InteractionStatus::Rejected);

    let reloaded = harness.store.get_interaction(&rejected.id).unwrap();
    assert_eq!(reloaded.reason_code.as_deref(), Some("price_too_high"));
    assert_eq!(reloaded.reason.as_deref(), Some("needed a lower rate"));
}
