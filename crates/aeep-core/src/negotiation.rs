//! The per-interaction negotiation state machine (§4.1).
//!
//! Every message is matched to exactly one target transition. The engine
//! never partially mutates an interaction: either `compare_and_update` of
//! the whole row succeeds, or nothing changes — `0 rows changed` under a
//! concurrent writer surfaces as [`NegotiationError::InvalidTransition`]
//! rather than a corrupted row, per the per-row "locking" design note.

use aeep_types::{
    AcceptPayload, Did, Envelope, MessageType, OfferPayload, PaymentFailedPayload,
    PaymentPayload, RejectPayload, RequestPayload, ResultPayload, Timestamp, VerifyPayload,
    canonical_hash, canonicalize_value,
};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde_json::Value;
use tracing::instrument;

use crate::batching::BatchingService;
use crate::error::NegotiationError;
use crate::store::{InteractionOutcome, InteractionRow, InteractionStatus, Store};
use crate::trust::score;

const FEE_RATE: &str = "0.025";
const FEE_EPSILON: f64 = 1e-6;

/// TTL, in seconds, allowed to dwell in each non-terminal step before the
/// sweep forces expiry.
pub fn ttl_seconds_for(status: InteractionStatus) -> Option<i64> {
    match status {
        InteractionStatus::Pending => Some(60),
        InteractionStatus::Offered => Some(300),
        InteractionStatus::Accepted => Some(3600),
        InteractionStatus::Delivered => Some(30),
        InteractionStatus::Verified => Some(60),
        InteractionStatus::Disputed => Some(30),
        _ => None,
    }
}

/// Drives one envelope through the negotiation engine, mutating the
/// matched interaction and returning its new state.
#[instrument(skip_all, err, fields(message_type = ?envelope.message_type))]
pub fn handle_message(
    store: &dyn Store,
    batching: &BatchingService,
    envelope: &Envelope,
) -> Result<InteractionRow, NegotiationError> {
    match envelope.message_type {
        MessageType::Request => handle_request(store, envelope),
        MessageType::Offer => handle_offer(store, envelope),
        MessageType::Accept => handle_accept(store, envelope),
        MessageType::Reject => handle_reject(store, envelope),
        MessageType::Result => handle_result(store, envelope),
        MessageType::Verify => handle_verify(store, batching, envelope),
        MessageType::Payment => handle_payment(store, envelope),
        MessageType::PaymentFailed => handle_payment_failed(store, envelope),
        MessageType::Heartbeat => unreachable!("heartbeat is not a negotiation message"),
    }
}

fn parse_payload<T: serde::de::DeserializeOwned>(value: &Value) -> Result<T, NegotiationError> {
    serde_json::from_value(value.clone()).map_err(|_| NegotiationError::InvalidTransition)
}

/// Looks an interaction up first by id, then by the lookup-rule fallback:
/// the most-recently-updated interaction whose current status matches
/// `expected_status` and whose initiator or provider is `sender`.
fn lookup_interaction(
    store: &dyn Store,
    request_or_offer_id: &str,
    expected_status: InteractionStatus,
    sender: &Did,
) -> Result<InteractionRow, NegotiationError> {
    if let Some(row) = store.get_interaction(request_or_offer_id) {
        return Ok(row);
    }
    store
        .find_latest_by_status_and_party(expected_status, sender)
        .ok_or(NegotiationError::InteractionNotFound)
}

fn require_role(row: &InteractionRow, sender: &Did, expect_initiator: bool) -> Result<(), NegotiationError> {
    let expected = if expect_initiator {
        &row.initiator_did
    } else {
        &row.provider_did
    };
    if expected != sender {
        return Err(NegotiationError::WrongRole);
    }
    Ok(())
}

fn require_status(
    row: &InteractionRow,
    expected: InteractionStatus,
) -> Result<(), NegotiationError> {
    if row.status != expected {
        return Err(NegotiationError::InvalidTransition);
    }
    Ok(())
}

fn commit(
    store: &dyn Store,
    mut row: InteractionRow,
    new_status: InteractionStatus,
) -> Result<InteractionRow, NegotiationError> {
    let expected_version = row.version;
    row.status = new_status;
    row.updated_at = Timestamp::now();
    row.version += 1;
    store.compare_and_update_interaction(expected_version, row.clone())?;
    Ok(row)
}

fn handle_request(store: &dyn Store, envelope: &Envelope) -> Result<InteractionRow, NegotiationError> {
    let payload: RequestPayload = parse_payload(&envelope.payload)?;
    if payload.idempotency_key.is_empty() {
        return Err(NegotiationError::MissingIdempotencyKey);
    }
    if let Some(existing) = store.get_interaction_by_idempotency_key(&payload.idempotency_key) {
        return Ok(existing);
    }
    store
        .get_agent_by_did(&envelope.to)
        .ok_or(NegotiationError::ProviderNotFound)?;

    let interaction_hash = canonical_hash(envelope).map_err(|_| NegotiationError::InvalidTransition)?;
    let now = Timestamp::now();
    let row = InteractionRow {
        id: envelope.id.clone(),
        interaction_hash,
        initiator_did: envelope.from.clone(),
        provider_did: envelope.to.clone(),
        capability: payload.task_type,
        status: InteractionStatus::Pending,
        outcome: None,
        payment_tx_hash: None,
        payment_amount: None,
        batch_id: None,
        request_payload: envelope.payload.clone(),
        offer_payload: None,
        result_payload: None,
        reason_code: None,
        reason: None,
        idempotency_key: payload.idempotency_key,
        created_at: now,
        updated_at: now,
        version: 0,
    };
    store
        .insert_interaction(row.clone())
        .map_err(|_| NegotiationError::InvalidTransition)?;
    Ok(row)
}

fn handle_offer(store: &dyn Store, envelope: &Envelope) -> Result<InteractionRow, NegotiationError> {
    let payload: OfferPayload = parse_payload(&envelope.payload)?;
    let row = lookup_interaction(
        store,
        &payload.request_id,
        InteractionStatus::Pending,
        &envelope.from,
    )?;
    require_status(&row, InteractionStatus::Pending)?;
    require_role(&row, &envelope.from, false)?;

    let request: RequestPayload =
        parse_payload(&row.request_payload).map_err(|_| NegotiationError::InvalidTransition)?;

    let fee_rate: Decimal = FEE_RATE.parse().expect("valid decimal literal");
    let expected_fee = (payload.price * fee_rate).round_dp(6);
    if (expected_fee - payload.protocol_fee).abs().to_f64().unwrap_or(f64::MAX) > FEE_EPSILON {
        return Err(NegotiationError::InvalidFee);
    }
    let expected_total = (payload.price + payload.protocol_fee).round_dp(6);
    if (expected_total - payload.total_cost).abs().to_f64().unwrap_or(f64::MAX) > FEE_EPSILON {
        return Err(NegotiationError::InvalidTotal);
    }
    if payload.total_cost > request.max_budget {
        return Err(NegotiationError::BudgetExceeded);
    }

    let mut updated = row;
    updated.offer_payload = Some(serde_json::to_value(&payload).expect("offer payload serializes"));
    commit(store, updated, InteractionStatus::Offered)
}

fn handle_accept(store: &dyn Store, envelope: &Envelope) -> Result<InteractionRow, NegotiationError> {
    let payload: AcceptPayload = parse_payload(&envelope.payload)?;
    let row = lookup_interaction(
        store,
        &payload.offer_id,
        InteractionStatus::Offered,
        &envelope.from,
    )?;
    require_status(&row, InteractionStatus::Offered)?;
    require_role(&row, &envelope.from, true)?;

    let offer_payload = row
        .offer_payload
        .clone()
        .ok_or(NegotiationError::InvalidTransition)?;
    let computed = canonicalize_value(offer_payload)
        .and_then(|s| Ok(aeep_types::sha256_hex(s.as_bytes())))
        .map_err(|_| NegotiationError::InvalidTransition)?;
    if computed != payload.offer_hash {
        return Err(NegotiationError::OfferHashMismatch);
    }

    commit(store, row, InteractionStatus::Accepted)
}

fn handle_reject(store: &dyn Store, envelope: &Envelope) -> Result<InteractionRow, NegotiationError> {
    let payload: RejectPayload = parse_payload(&envelope.payload)?;
    let row = lookup_interaction(
        store,
        &payload.offer_id,
        InteractionStatus::Offered,
        &envelope.from,
    )?;
    require_status(&row, InteractionStatus::Offered)?;
    require_role(&row, &envelope.from, true)?;

    let mut updated = row;
    updated.outcome = Some(InteractionOutcome::Rejected);
    updated.reason_code = Some(payload.reason_code);
    updated.reason = payload.reason;
    commit(store, updated, InteractionStatus::Rejected)
}

fn handle_result(store: &dyn Store, envelope: &Envelope) -> Result<InteractionRow, NegotiationError> {
    let payload: ResultPayload = parse_payload(&envelope.payload)?;
    if payload.result_hash.is_empty() {
        return Err(NegotiationError::MissingResultHash);
    }
    let row = lookup_interaction(
        store,
        &payload.request_id,
        InteractionStatus::Accepted,
        &envelope.from,
    )?;
    require_status(&row, InteractionStatus::Accepted)?;
    require_role(&row, &envelope.from, false)?;

    let mut updated = row;
    updated.result_payload = Some(serde_json::to_value(&payload).expect("result payload serializes"));
    commit(store, updated, InteractionStatus::Delivered)
}

fn handle_verify(
    store: &dyn Store,
    batching: &BatchingService,
    envelope: &Envelope,
) -> Result<InteractionRow, NegotiationError> {
    let payload: VerifyPayload = parse_payload(&envelope.payload)?;
    let row = lookup_interaction(
        store,
        &payload.request_id,
        InteractionStatus::Delivered,
        &envelope.from,
    )?;
    require_status(&row, InteractionStatus::Delivered)?;
    require_role(&row, &envelope.from, true)?;

    if let (Some(expected), Some(stored_result)) = (&payload.result_hash, &row.result_payload) {
        let stored: ResultPayload =
            parse_payload(stored_result).map_err(|_| NegotiationError::InvalidTransition)?;
        if expected != &stored.result_hash {
            return Err(NegotiationError::InvalidTransition);
        }
    }

    let mut updated = row;
    if payload.verified {
        updated.outcome = Some(InteractionOutcome::Success);
        let committed = commit(store, updated, InteractionStatus::Verified)?;
        batching.add_interaction(committed.interaction_hash.clone());
        Ok(committed)
    } else {
        updated.outcome = Some(InteractionOutcome::Dispute);
        let committed = commit(store, updated, InteractionStatus::Disputed)?;
        // The dispute counter increments against the disputed party (the
        // provider, since the initiator is the one signaling the dispute)
        // at the `disputed` transition itself — there is no later
        // adjudication step on this server (spec.md §9 open question).
        record_dispute(store, &committed.provider_did);
        Ok(committed)
    }
}

fn handle_payment(store: &dyn Store, envelope: &Envelope) -> Result<InteractionRow, NegotiationError> {
    let payload: PaymentPayload = parse_payload(&envelope.payload)?;
    if payload.tx_hash.is_empty() {
        return Err(NegotiationError::MissingResultHash);
    }
    let row = lookup_interaction(
        store,
        &payload.request_id,
        InteractionStatus::Verified,
        &envelope.from,
    )?;
    require_status(&row, InteractionStatus::Verified)?;
    require_role(&row, &envelope.from, true)?;

    let offer: OfferPayload = parse_payload(
        row.offer_payload
            .as_ref()
            .ok_or(NegotiationError::InvalidTransition)?,
    )?;
    if (payload.amount - offer.total_cost).abs().to_f64().unwrap_or(f64::MAX) > FEE_EPSILON {
        return Err(NegotiationError::AmountMismatch);
    }

    let mut updated = row;
    updated.outcome = Some(InteractionOutcome::Success);
    updated.payment_tx_hash = Some(payload.tx_hash);
    updated.payment_amount = Some(payload.amount);
    let committed = commit(store, updated, InteractionStatus::Completed)?;

    record_completion(store, &committed.initiator_did);
    record_completion(store, &committed.provider_did);

    Ok(committed)
}

fn handle_payment_failed(
    store: &dyn Store,
    envelope: &Envelope,
) -> Result<InteractionRow, NegotiationError> {
    let payload: PaymentFailedPayload = parse_payload(&envelope.payload)?;
    let row = lookup_interaction(
        store,
        &payload.request_id,
        InteractionStatus::Verified,
        &envelope.from,
    )?;
    if row.status != InteractionStatus::Verified && row.status != InteractionStatus::Disputed {
        return Err(NegotiationError::InvalidTransition);
    }
    if row.initiator_did != envelope.from && row.provider_did != envelope.from {
        return Err(NegotiationError::WrongRole);
    }

    let mut updated = row;
    updated.outcome = Some(InteractionOutcome::Failure);
    let committed = commit(store, updated, InteractionStatus::Failed)?;
    record_failure(store, &committed.initiator_did);
    Ok(committed)
}

fn record_completion(store: &dyn Store, did: &Did) {
    if let Some(mut agent) = store.get_agent_by_did(did) {
        agent.interaction_count += 1;
        agent.successful_count += 1;
        agent.trust_score = score(agent.successful_count, agent.failed_count, agent.dispute_count);
        let _ = store.update_agent(agent);
    }
}

fn record_failure(store: &dyn Store, did: &Did) {
    if let Some(mut agent) = store.get_agent_by_did(did) {
        agent.interaction_count += 1;
        agent.failed_count += 1;
        agent.trust_score = score(agent.successful_count, agent.failed_count, agent.dispute_count);
        let _ = store.update_agent(agent);
    }
}

fn record_dispute(store: &dyn Store, did: &Did) {
    if let Some(mut agent) = store.get_agent_by_did(did) {
        agent.dispute_count += 1;
        agent.trust_score = score(agent.successful_count, agent.failed_count, agent.dispute_count);
        let _ = store.update_agent(agent);
    }
}

/// Periodic TTL sweep (§4.1): forces every non-terminal interaction whose
/// dwell time in its current status exceeds that step's TTL out of that
/// status. Idempotent — an interaction already moved by a racing writer
/// simply fails its compare-and-update and is picked up (or skipped, if it
/// left the non-terminal set) by the next tick.
///
/// `disputed` only ever transitions to `failed` in the allowed graph (§4.1);
/// every other non-terminal status sweeps to `expired`, outcome `timeout`.
#[instrument(skip(store))]
pub fn sweep_expired(store: &dyn Store) -> u64 {
    let mut count = 0;
    for row in store.list_non_terminal_interactions() {
        let Some(ttl) = ttl_seconds_for(row.status) else {
            continue;
        };
        if row.updated_at.elapsed_seconds() < ttl {
            continue;
        }
        let expected_version = row.version;
        let mut updated = row.clone();
        if row.status == InteractionStatus::Disputed {
            updated.status = InteractionStatus::Failed;
            updated.outcome = Some(InteractionOutcome::Failure);
        } else {
            updated.status = InteractionStatus::Expired;
            updated.outcome = Some(InteractionOutcome::Timeout);
        }
        updated.updated_at = Timestamp::now();
        updated.version += 1;
        if store
            .compare_and_update_interaction(expected_version, updated)
            .is_ok()
        {
            count += 1;
        }
    }
    count
}
