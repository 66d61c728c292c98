//! Component error types and the HTTP boundary mapping.
//!
//! Each subsystem gets its own `thiserror`-derived enum; [`ApiError`]
//! composes them into the single type handlers return, and its
//! `IntoResponse` impl maps every variant to the `{ error: { code, message,
//! details } }` body and status code from the error handling design —
//! the same shape as the teacher's `impl IntoResponse for
//! FacilitatorLocalError`.

use aeep_types::ErrorCode;
use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("envelope is missing required fields")]
    MalformedEnvelope,
    #[error("envelope timestamp is outside the allowed clock skew")]
    ClockSkew,
    #[error("nonce has already been used")]
    NonceReused,
    #[error("signature verification failed")]
    InvalidSignature,
    #[error("DID is not registered")]
    DidNotFound,
    #[error("DID has been revoked")]
    DidRevoked,
    #[error("DID has been deactivated")]
    DidDeactivated,
    #[error("DID is malformed")]
    InvalidDidFormat,
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("an agent with this DID already exists")]
    AgentExists,
    #[error("agent not found")]
    AgentNotFound,
    #[error("only the owning agent may perform this action")]
    NotOwner,
    #[error("DID status transition is not allowed from the current status")]
    InvalidTransition,
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Error)]
pub enum RouterError {
    #[error("recipient agent not found")]
    RecipientNotFound,
    #[error("too many concurrent push connections")]
    ConnectionLimit,
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Error)]
pub enum NegotiationError {
    #[error("no interaction matches this message")]
    InteractionNotFound,
    #[error("the sender is not authorized for this transition")]
    WrongRole,
    #[error("transition is not legal from the interaction's current state")]
    InvalidTransition,
    #[error("idempotency_key is required on a request message")]
    MissingIdempotencyKey,
    #[error("the provider DID is not registered")]
    ProviderNotFound,
    #[error("computed offer hash does not match the supplied offer_hash")]
    OfferHashMismatch,
    #[error("protocol_fee does not match round(price * 0.025, 6)")]
    InvalidFee,
    #[error("total_cost does not match round(price + protocol_fee, 6)")]
    InvalidTotal,
    #[error("total_cost exceeds the initiator's max_budget")]
    BudgetExceeded,
    #[error("payment amount does not match the stored total_cost")]
    AmountMismatch,
    #[error("result_hash is required")]
    MissingResultHash,
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Error)]
pub enum BatchingError {
    #[error("batch row and persisted proofs disagree")]
    BatchInconsistency,
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Error)]
pub enum RelayerError {
    #[error("relayer call timed out")]
    Timeout,
    #[error("relayer rejected the submission: {0}")]
    Rejected(String),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("unique constraint violated on {0}")]
    Conflict(&'static str),
    #[error("row not found")]
    NotFound,
}

/// The single error type every HTTP handler returns.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Router(#[from] RouterError),
    #[error(transparent)]
    Negotiation(#[from] NegotiationError),
    #[error(transparent)]
    Batching(#[from] BatchingError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ApiError {
    fn code(&self) -> ErrorCode {
        match self {
            ApiError::Auth(e) => match e {
                AuthError::MalformedEnvelope => ErrorCode::MalformedEnvelope,
                AuthError::ClockSkew => ErrorCode::ClockSkew,
                AuthError::NonceReused => ErrorCode::NonceReused,
                AuthError::InvalidSignature => ErrorCode::InvalidSignature,
                AuthError::DidNotFound => ErrorCode::DidNotFound,
                AuthError::DidRevoked => ErrorCode::DidRevoked,
                AuthError::DidDeactivated => ErrorCode::DidDeactivated,
                AuthError::InvalidDidFormat => ErrorCode::InvalidDidFormat,
                AuthError::Store(_) => ErrorCode::StoreError,
            },
            ApiError::Registry(e) => match e {
                RegistryError::AgentExists => ErrorCode::AgentExists,
                RegistryError::AgentNotFound => ErrorCode::AgentNotFound,
                RegistryError::NotOwner => ErrorCode::NotOwner,
                RegistryError::InvalidTransition => ErrorCode::InvalidTransition,
                RegistryError::Store(_) => ErrorCode::StoreError,
            },
            ApiError::Router(e) => match e {
                RouterError::RecipientNotFound => ErrorCode::RecipientNotFound,
                RouterError::ConnectionLimit => ErrorCode::ConnectionLimit,
                RouterError::Store(_) => ErrorCode::StoreError,
            },
            ApiError::Negotiation(e) => match e {
                NegotiationError::InteractionNotFound => ErrorCode::InteractionNotFound,
                NegotiationError::WrongRole => ErrorCode::WrongRole,
                NegotiationError::InvalidTransition => ErrorCode::InvalidTransition,
                NegotiationError::MissingIdempotencyKey => ErrorCode::MissingIdempotencyKey,
                NegotiationError::ProviderNotFound => ErrorCode::ProviderNotFound,
                NegotiationError::OfferHashMismatch => ErrorCode::OfferHashMismatch,
                NegotiationError::InvalidFee => ErrorCode::InvalidFee,
                NegotiationError::InvalidTotal => ErrorCode::InvalidTotal,
                NegotiationError::BudgetExceeded => ErrorCode::BudgetExceeded,
                NegotiationError::AmountMismatch => ErrorCode::AmountMismatch,
                NegotiationError::MissingResultHash => ErrorCode::MissingResultHash,
                NegotiationError::Store(_) => ErrorCode::StoreError,
            },
            ApiError::Batching(e) => match e {
                BatchingError::BatchInconsistency => ErrorCode::BatchInconsistency,
                BatchingError::Store(_) => ErrorCode::StoreError,
            },
            ApiError::Store(_) => ErrorCode::StoreError,
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorBodyInner,
}

#[derive(Serialize)]
struct ErrorBodyInner {
    code: ErrorCode,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<Value>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let code = self.code();
        let status =
            StatusCode::from_u16(code.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = ErrorBody {
            error: ErrorBodyInner {
                code,
                message: self.to_string(),
                details: None,
            },
        };
        (status, Json(body)).into_response()
    }
}
