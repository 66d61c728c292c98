//! Errors surfaced by the agent-side SDK.

use thiserror::Error;

/// Everything that can go wrong building, sending, or decoding an AEEP call.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("http transport error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("failed to encode request body: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("failed to canonicalize envelope for signing")]
    Canonicalization,

    #[error("server rejected the request: {code}: {message}")]
    Server { code: String, message: String },
}
