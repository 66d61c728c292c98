//! Shared error taxonomy for AEEP wire types.
//!
//! Mirrors the teacher's `ErrorReason` pattern: a flat, `snake_case`-coded
//! enum that is cheap to serialize into the `{ error: { code, ... } }`
//! envelope the HTTP surface returns, plus narrower `thiserror` enums for
//! failures that are purely local to this crate (canonicalization, signing,
//! multibase decoding).

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while producing canonical JSON.
#[derive(Debug, Error)]
pub enum CanonicalizationError {
    #[error("failed to serialize value: {0}")]
    Serialize(#[source] serde_json::Error),
}

/// Errors raised by the signing primitives.
#[derive(Debug, Error)]
pub enum SigningError {
    #[error("invalid key length: expected 32 bytes, got {0}")]
    InvalidKeyLength(usize),
    #[error("malformed signature bytes")]
    MalformedSignature,
    #[error("signature verification failed")]
    VerificationFailed,
    #[error("multibase decode error: {0}")]
    Multibase(#[source] multibase::Error),
    #[error("unsupported multicodec prefix: {0:#x} {1:#x}")]
    UnsupportedMulticodec(u8, u8),
}

/// Errors raised while parsing or validating a DID string.
#[derive(Debug, Error)]
pub enum DidError {
    #[error("malformed DID: {0}")]
    Malformed(String),
}

/// The coded error taxonomy shared by every layer of the protocol.
///
/// This is the same shape used in the HTTP error envelope `{ error: { code,
/// message, details } }`; `aeep-core` composes these into richer,
/// `thiserror`-derived component errors and maps them to HTTP statuses at
/// the boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Identity
    DidNotFound,
    DidRevoked,
    DidDeactivated,
    InvalidDidFormat,
    // Authentication
    InvalidSignature,
    NonceReused,
    ClockSkew,
    MalformedEnvelope,
    // Authorization
    NotOwner,
    WrongRole,
    // Registry
    AgentExists,
    AgentNotFound,
    // State machine
    InvalidTransition,
    InteractionNotFound,
    // Negotiation integrity
    OfferHashMismatch,
    InvalidFee,
    InvalidTotal,
    BudgetExceeded,
    AmountMismatch,
    MissingResultHash,
    MissingIdempotencyKey,
    ProviderNotFound,
    RecipientNotFound,
    // Resource limits
    ConnectionLimit,
    RateLimited,
    // Internal
    BatchInconsistency,
    StoreError,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered = serde_json::to_string(self).unwrap_or_default();
        write!(f, "{}", rendered.trim_matches('"'))
    }
}

impl ErrorCode {
    /// The HTTP status this code maps to, per the error handling design.
    pub fn http_status(&self) -> u16 {
        use ErrorCode::*;
        match self {
            DidRevoked | DidDeactivated | InvalidDidFormat | NotOwner | WrongRole
            | ProviderNotFound => 403,
            DidNotFound | AgentNotFound | InteractionNotFound | RecipientNotFound => 404,
            InvalidSignature | ClockSkew | MalformedEnvelope | InvalidTransition
            | OfferHashMismatch | InvalidFee | InvalidTotal | BudgetExceeded | AmountMismatch
            | MissingResultHash | MissingIdempotencyKey => 400,
            NonceReused => 401,
            AgentExists => 409,
            ConnectionLimit | RateLimited => 429,
            BatchInconsistency | StoreError => 500,
        }
    }
}
