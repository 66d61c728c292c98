//! The HTTP surface (§6.1).
//!
//! Generalizes the teacher's `handlers.rs` — `routes<A>() -> Router<A>` over
//! a generic `Facilitator` — into a router over one concrete [`AppState`],
//! since AEEP's engine is a fixed set of cooperating services rather than a
//! pluggable payment-scheme registry. Every write endpoint runs the envelope
//! through [`auth`] before touching the registry, router, or negotiation
//! engine; every handler returns [`ApiError`], whose `IntoResponse` impl
//! shapes the error body the same way the teacher shapes
//! `FacilitatorLocalError`.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::{Duration, Instant};

use aeep_types::{Did, Envelope};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::routing::{delete, get, post, put};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::{Stream, StreamExt};
use tracing::instrument;

use crate::auth::{
    AuthConfig, authenticate, authenticate_poll, authenticate_reactivation, authenticate_registration,
};
use crate::batching::BatchingService;
use crate::error::{ApiError, AuthError, NegotiationError, RegistryError};
use crate::negotiation::handle_message;
use crate::registry::{self, AgentUpdate, DiscoveryFilter};
use crate::relayer::Relayer;
use crate::router::MessageRouter;
use crate::store::Store;

/// Shared service handles every handler needs, the AEEP analogue of the
/// teacher's `A: Facilitator` state parameter, except AEEP has exactly one
/// engine shape so this is a concrete struct rather than a trait bound.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub router: MessageRouter,
    pub batching: BatchingService,
    pub relayer: Arc<dyn Relayer>,
    pub auth_config: AuthConfig,
    pub server_did: Did,
    started_at: Instant,
}

impl AppState {
    pub fn new(
        store: Arc<dyn Store>,
        router: MessageRouter,
        batching: BatchingService,
        relayer: Arc<dyn Relayer>,
        auth_config: AuthConfig,
        server_did: Did,
    ) -> Self {
        Self {
            store,
            router,
            batching,
            relayer,
            auth_config,
            server_did,
            started_at: Instant::now(),
        }
    }

    fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/.well-known/did.json", get(get_server_did_document))
        .route("/health", get(get_health))
        .route("/api/v1/agents", post(register_agent).get(discover_agents))
        .route("/api/v1/agents/{id}", get(get_agent).put(update_agent).delete(deactivate_agent))
        .route("/api/v1/agents/{id}/card", get(get_agent_card))
        .route("/api/v1/agents/{id}/did", get(get_agent_did))
        .route("/api/v1/agents/{id}/status", get(get_agent_status))
        .route("/api/v1/agents/{id}/heartbeat", post(heartbeat_agent))
        .route("/api/v1/agents/{id}/revoke", post(revoke_agent))
        .route("/api/v1/agents/{id}/reactivate", post(reactivate_agent))
        .route("/api/v1/messages", post(send_message))
        .route("/api/v1/messages/{agent_id}", get(poll_messages))
        .route("/api/v1/messages/{agent_id}/stream", get(stream_messages))
        .route("/api/v1/verify/{interaction_hash}", get(verify_interaction))
        .route("/api/v1/batches", get(list_batches))
        .route("/api/v1/batches/{id}", get(get_batch))
        .with_state(state)
}

#[derive(Deserialize)]
struct RegisterRequest {
    envelope: Envelope,
    did_document: aeep_types::DidDocument,
    public_key: String,
}

#[derive(Deserialize)]
struct RegistrationPayload {
    display_name: String,
    description: String,
    endpoint: String,
    payment_address: String,
    #[serde(default)]
    capabilities: Vec<(String, Value)>,
}

/// `POST /api/v1/agents`: registers a new agent. The envelope is signed
/// with the public key carried in the body rather than one already on
/// file — the sender is, by definition, not yet a known agent (§4.2, §4.6).
#[instrument(skip_all, err)]
pub async fn register_agent(
    State(state): State<AppState>,
    Json(body): Json<RegisterRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let key_bytes = aeep_types::util::decode_str(&body.public_key)
        .map_err(|_| ApiError::Auth(AuthError::InvalidSignature))?;
    let public_key: [u8; 32] = key_bytes
        .as_slice()
        .try_into()
        .map_err(|_| ApiError::Auth(AuthError::InvalidSignature))?;
    authenticate_registration(state.store.as_ref(), &state.auth_config, &body.envelope, &public_key)?;

    let payload: RegistrationPayload = serde_json::from_value(body.envelope.payload.clone())
        .map_err(|_| ApiError::Auth(AuthError::MalformedEnvelope))?;

    let agent = registry::register(
        state.store.as_ref(),
        body.envelope.from.clone(),
        body.did_document,
        payload.display_name,
        payload.description,
        payload.endpoint,
        payload.payment_address,
        payload.capabilities,
    )?;
    Ok((StatusCode::CREATED, Json(json!(agent))))
}

#[derive(Deserialize)]
struct DiscoverQuery {
    capability: Option<String>,
    trust_min: Option<f64>,
    status: Option<aeep_types::DidStatus>,
    availability: Option<aeep_types::Availability>,
    #[serde(default = "default_discover_limit")]
    limit: usize,
    #[serde(default)]
    offset: usize,
}

fn default_discover_limit() -> usize {
    DiscoveryFilter::DEFAULT_LIMIT
}

/// `GET /api/v1/agents`: discovery, filtered and paginated.
#[instrument(skip_all)]
pub async fn discover_agents(
    State(state): State<AppState>,
    Query(query): Query<DiscoverQuery>,
) -> impl IntoResponse {
    let filter = DiscoveryFilter {
        capability: query.capability,
        trust_min: query.trust_min,
        status: query.status,
        availability: query.availability,
        limit: query.limit,
        offset: query.offset,
    };
    let agents = registry::discover(state.store.as_ref(), &filter);
    Json(json!({ "agents": agents }))
}

/// `GET /api/v1/agents/{id}`: the full agent record.
#[instrument(skip_all, err)]
pub async fn get_agent(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let mut agent = state
        .store
        .get_agent(&id)
        .ok_or(RegistryError::AgentNotFound)?;
    agent.trust_score = registry::effective_trust_score(&agent);
    Ok(Json(json!(agent)))
}

#[derive(Serialize)]
struct AgentCard {
    id: String,
    did: Did,
    display_name: String,
    description: String,
    endpoint: String,
    payment_address: String,
    capabilities: Vec<String>,
    trust_score: f64,
    status: aeep_types::DidStatus,
    availability: aeep_types::Availability,
}

/// `GET /api/v1/agents/{id}/card`: the flat, public-facing agent summary.
#[instrument(skip_all, err)]
pub async fn get_agent_card(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let agent = state
        .store
        .get_agent(&id)
        .ok_or(RegistryError::AgentNotFound)?;
    let capabilities = state
        .store
        .capabilities_for(&id)
        .into_iter()
        .map(|c| c.name)
        .collect();
    let trust_score = registry::effective_trust_score(&agent);
    Ok(Json(json!(AgentCard {
        id: agent.id,
        did: agent.did,
        display_name: agent.display_name,
        description: agent.description,
        endpoint: agent.endpoint,
        payment_address: agent.payment_address,
        capabilities,
        trust_score,
        status: agent.status,
        availability: agent.availability,
    })))
}

/// `GET /api/v1/agents/{id}/did`: the agent's DID document.
#[instrument(skip_all, err)]
pub async fn get_agent_did(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let agent = state
        .store
        .get_agent(&id)
        .ok_or(RegistryError::AgentNotFound)?;
    Ok(Json(json!(agent.did_document)))
}

/// `GET /api/v1/agents/{id}/status`: status and availability only.
#[instrument(skip_all, err)]
pub async fn get_agent_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let agent = state
        .store
        .get_agent(&id)
        .ok_or(RegistryError::AgentNotFound)?;
    Ok(Json(json!({
        "status": agent.status,
        "availability": agent.availability,
        "last_seen_at": agent.last_seen_at,
    })))
}

/// `PUT /api/v1/agents/{id}`: self-only update, carried as a signed envelope.
#[instrument(skip_all, err)]
pub async fn update_agent(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(envelope): Json<Envelope>,
) -> Result<impl IntoResponse, ApiError> {
    let sender = authenticate(state.store.as_ref(), &state.auth_config, &envelope)?;
    let patch: AgentUpdate = serde_json::from_value(envelope.payload.clone())
        .map_err(|_| ApiError::Auth(AuthError::MalformedEnvelope))?;
    let agent = registry::update(state.store.as_ref(), &id, &sender.did, patch)?;
    Ok(Json(json!(agent)))
}

/// `DELETE /api/v1/agents/{id}`: self-only deactivation, carried as a signed
/// envelope (the body of a DELETE is unusual but this is the only way the
/// action can be authenticated the way every other mutation is).
#[instrument(skip_all, err)]
pub async fn deactivate_agent(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(envelope): Json<Envelope>,
) -> Result<impl IntoResponse, ApiError> {
    let sender = authenticate(state.store.as_ref(), &state.auth_config, &envelope)?;
    let agent = registry::deactivate(state.store.as_ref(), &id, &sender.did)?;
    Ok(Json(json!(agent)))
}

/// `POST /api/v1/agents/{id}/revoke`: self-only, terminal DID revocation
/// (`active` → `revoked` only; the graph has no out-edge from `revoked`).
#[instrument(skip_all, err)]
pub async fn revoke_agent(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(envelope): Json<Envelope>,
) -> Result<impl IntoResponse, ApiError> {
    let sender = authenticate(state.store.as_ref(), &state.auth_config, &envelope)?;
    let agent = registry::revoke(state.store.as_ref(), &id, &sender.did)?;
    Ok(Json(json!(agent)))
}

/// `POST /api/v1/agents/{id}/reactivate`: self-only, `deactivated` → `active`
/// — the one allowed return path in the DID status graph.
#[instrument(skip_all, err)]
pub async fn reactivate_agent(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(envelope): Json<Envelope>,
) -> Result<impl IntoResponse, ApiError> {
    let sender = authenticate_reactivation(state.store.as_ref(), &state.auth_config, &envelope)?;
    let agent = registry::reactivate(state.store.as_ref(), &id, &sender.did)?;
    Ok(Json(json!(agent)))
}

#[derive(Deserialize)]
struct HeartbeatPayload {
    availability: aeep_types::Availability,
}

/// `POST /api/v1/agents/{id}/heartbeat`: self-only liveness refresh.
#[instrument(skip_all, err)]
pub async fn heartbeat_agent(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(envelope): Json<Envelope>,
) -> Result<impl IntoResponse, ApiError> {
    let sender = authenticate(state.store.as_ref(), &state.auth_config, &envelope)?;
    let payload: HeartbeatPayload = serde_json::from_value(envelope.payload.clone())
        .map_err(|_| ApiError::Auth(AuthError::MalformedEnvelope))?;
    let agent = registry::heartbeat(state.store.as_ref(), &id, &sender.did, payload.availability)?;
    Ok(Json(json!(agent)))
}

/// `POST /api/v1/messages`: the single entry point for every negotiation
/// message. Authenticates, queues for delivery, and — if the envelope is a
/// negotiation type — drives it through the state machine synchronously.
#[instrument(skip_all, err, fields(message_type = ?envelope.message_type))]
pub async fn send_message(
    State(state): State<AppState>,
    Json(envelope): Json<Envelope>,
) -> Result<impl IntoResponse, ApiError> {
    authenticate(state.store.as_ref(), &state.auth_config, &envelope)?;
    let accepted = state.router.accept(&envelope)?;
    let interaction = if envelope.message_type.is_negotiation_message() {
        Some(handle_message(state.store.as_ref(), &state.batching, &envelope)?)
    } else {
        None
    };
    Ok(Json(json!({
        "message_id": accepted.message_id,
        "queued": accepted.queued,
        "recipient_availability": accepted.recipient_availability,
        "interaction": interaction,
    })))
}

#[derive(Deserialize)]
struct DidQuery {
    did: String,
}

/// `GET /api/v1/messages/{agent_id}`: polls and drains the agent's queue.
#[instrument(skip_all, err)]
pub async fn poll_messages(
    State(state): State<AppState>,
    Path(agent_id): Path<String>,
    Query(query): Query<DidQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let did = Did::parse(&query.did).map_err(|_| ApiError::Auth(AuthError::InvalidDidFormat))?;
    authenticate_poll(state.store.as_ref(), &agent_id, &did)?;
    Ok(Json(state.router.poll(&did)))
}

/// `GET /api/v1/messages/{agent_id}/stream`: the push-delivery accelerator
/// on top of the queue, as an SSE stream.
#[instrument(skip_all, err)]
pub async fn stream_messages(
    State(state): State<AppState>,
    Path(agent_id): Path<String>,
    Query(query): Query<DidQuery>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let did = Did::parse(&query.did).map_err(|_| ApiError::Auth(AuthError::InvalidDidFormat))?;
    authenticate_poll(state.store.as_ref(), &agent_id, &did)?;
    let receiver = state.router.subscribe(&agent_id)?;
    let stream = ReceiverStream::new(receiver).map(|payload| {
        Ok(Event::default()
            .json_data(payload)
            .unwrap_or_else(|_| Event::default().data("{}")))
    });
    Ok(Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(30))))
}

/// `GET /api/v1/verify/{interaction_hash}`: the Merkle inclusion proof and
/// the batch it anchors into.
#[instrument(skip_all, err)]
pub async fn verify_interaction(
    State(state): State<AppState>,
    Path(interaction_hash): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let proof = state
        .store
        .get_proof(&interaction_hash)
        .ok_or(NegotiationError::InteractionNotFound)?;
    let batch = state
        .store
        .get_batch(proof.batch_id)
        .ok_or(NegotiationError::InteractionNotFound)?;
    let verified = aeep_types::verify_proof(
        &aeep_types::MerkleProof {
            leaf_hash: proof.leaf_hash.clone(),
            siblings: proof.siblings.clone(),
        },
        &batch.merkle_root,
    );
    Ok(Json(json!({
        "interaction_hash": interaction_hash,
        "verified": verified,
        "proof": proof,
        "batch": batch,
    })))
}

/// `GET /api/v1/batches`: every batch this server has assembled.
#[instrument(skip_all)]
pub async fn list_batches(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({ "batches": state.store.list_batches() }))
}

/// `GET /api/v1/batches/{id}`: one batch by id.
#[instrument(skip_all, err)]
pub async fn get_batch(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> Result<impl IntoResponse, ApiError> {
    let batch = state
        .store
        .get_batch(id)
        .ok_or(NegotiationError::InteractionNotFound)?;
    Ok(Json(json!(batch)))
}

/// `GET /.well-known/did.json`: the server's own DID document, so agents can
/// verify envelopes the server itself signs (none, today — reserved for a
/// future server-originated message type).
#[instrument(skip_all)]
pub async fn get_server_did_document(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({ "id": state.server_did }))
}

/// `GET /health`: liveness and a coarse view of engine state.
#[instrument(skip_all)]
pub async fn get_health(State(state): State<AppState>) -> impl IntoResponse {
    let agents_count = state.store.list_agents().len();
    let batches_count = state.store.list_batches().len();
    let pending_interactions = state.store.list_non_terminal_interactions().len();
    let relayer_balance = state.relayer.get_balance().unwrap_or_else(|_| "unknown".to_string());
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "agents_count": agents_count,
        "batches_count": batches_count,
        "pending_interactions": pending_interactions,
        "relayer_balance": relayer_balance,
        "uptime_seconds": state.uptime_seconds(),
    }))
}
