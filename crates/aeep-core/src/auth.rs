//! The envelope authentication pipeline (§4.2).
//!
//! Every write endpoint that accepts an envelope runs it through
//! [`authenticate`] before any handler-specific logic executes: shape
//! check, clock skew, nonce replay, key resolution, DID status gate, and
//! signature verification, in that order. The nonce insertion is the
//! commit point — it is the unique index in the store that arbitrates two
//! concurrent requests racing on the same nonce.

use aeep_types::{Did, DidStatus, Envelope, Timestamp, signing};
use tracing::instrument;

use crate::error::AuthError;
use crate::store::{NonceRow, Store};

/// Maximum permitted clock skew between an envelope's `created` timestamp
/// and the server's own clock.
pub const CLOCK_SKEW_SECONDS: i64 = 5 * 60;

/// Nonce replay-protection window.
pub const NONCE_TTL_SECONDS: i64 = 24 * 60 * 60;

/// Outcome of a successful authentication pass: who sent it, and whether
/// they were already a registered agent.
pub struct AuthenticatedSender {
    pub did: Did,
    pub registered: bool,
}

/// Tuning knobs for the authentication pipeline that the server configures
/// at startup (§3.3). The clock skew tolerance is a protocol constant, not
/// exposed here, since spec.md §4.2 fixes it at five minutes.
#[derive(Debug, Clone, Copy)]
pub struct AuthConfig {
    pub nonce_ttl_seconds: i64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            nonce_ttl_seconds: NONCE_TTL_SECONDS,
        }
    }
}

/// Runs the full authentication pipeline for a non-registration envelope.
/// The sender's DID must already resolve to a registered, active agent.
#[instrument(skip_all, err, fields(from = %envelope.from, nonce = %envelope.nonce))]
pub fn authenticate(
    store: &dyn Store,
    config: &AuthConfig,
    envelope: &Envelope,
) -> Result<AuthenticatedSender, AuthError> {
    check_skew(envelope.created)?;

    let agent = store
        .get_agent_by_did(&envelope.from)
        .ok_or(AuthError::DidNotFound)?;
    match agent.status {
        DidStatus::Active => {}
        DidStatus::Revoked => return Err(AuthError::DidRevoked),
        DidStatus::Deactivated => return Err(AuthError::DidDeactivated),
    }

    let public_key =
        signing::decode_ed25519_public_key(&agent.did_document.verification_method.public_key_multibase)
            .map_err(|_| AuthError::InvalidSignature)?;

    verify_and_consume_nonce(store, config, envelope, &public_key)?;

    Ok(AuthenticatedSender {
        did: envelope.from.clone(),
        registered: true,
    })
}

/// Runs the pipeline for an envelope that must be allowed to reactivate a
/// `deactivated` agent — every check `authenticate` runs, except the DID
/// status gate accepts `active` or `deactivated` rather than `active` only.
/// `revoked` is still rejected: the status graph has no out-edge from it.
#[instrument(skip_all, err, fields(from = %envelope.from, nonce = %envelope.nonce))]
pub fn authenticate_reactivation(
    store: &dyn Store,
    config: &AuthConfig,
    envelope: &Envelope,
) -> Result<AuthenticatedSender, AuthError> {
    check_skew(envelope.created)?;

    let agent = store
        .get_agent_by_did(&envelope.from)
        .ok_or(AuthError::DidNotFound)?;
    if agent.status == DidStatus::Revoked {
        return Err(AuthError::DidRevoked);
    }

    let public_key =
        signing::decode_ed25519_public_key(&agent.did_document.verification_method.public_key_multibase)
            .map_err(|_| AuthError::InvalidSignature)?;

    verify_and_consume_nonce(store, config, envelope, &public_key)?;

    Ok(AuthenticatedSender {
        did: envelope.from.clone(),
        registered: true,
    })
}

/// Runs the pipeline for a registration envelope, where the sender is not
/// yet a known agent and instead supplies its own public key in the body.
#[instrument(skip_all, err, fields(from = %envelope.from, nonce = %envelope.nonce))]
pub fn authenticate_registration(
    store: &dyn Store,
    config: &AuthConfig,
    envelope: &Envelope,
    public_key: &[u8; 32],
) -> Result<AuthenticatedSender, AuthError> {
    check_skew(envelope.created)?;

    if store.get_agent_by_did(&envelope.from).is_some() {
        // Registration must go through the registry's own AGENT_EXISTS
        // check; authentication itself still succeeds so the handler can
        // produce that specific error.
    }

    verify_and_consume_nonce(store, config, envelope, public_key)?;

    Ok(AuthenticatedSender {
        did: envelope.from.clone(),
        registered: false,
    })
}

/// The lightweight variant used by polling endpoints: only checks that the
/// agent exists and that the supplied `did` matches the path's agent id.
pub fn authenticate_poll(
    store: &dyn Store,
    agent_id: &str,
    did: &Did,
) -> Result<(), AuthError> {
    let agent = store.get_agent(agent_id).ok_or(AuthError::DidNotFound)?;
    if &agent.did != did {
        return Err(AuthError::DidNotFound);
    }
    Ok(())
}

fn check_skew(created: Timestamp) -> Result<(), AuthError> {
    let now = Timestamp::now();
    if now.abs_diff_seconds(&created) > CLOCK_SKEW_SECONDS {
        return Err(AuthError::ClockSkew);
    }
    Ok(())
}

fn verify_and_consume_nonce(
    store: &dyn Store,
    config: &AuthConfig,
    envelope: &Envelope,
    public_key: &[u8; 32],
) -> Result<(), AuthError> {
    let signing_input = envelope
        .signing_input()
        .map_err(|_| AuthError::MalformedEnvelope)?;
    signing::verify(
        signing_input.as_bytes(),
        &aeep_types::util::decode_str(&envelope.signature).map_err(|_| AuthError::InvalidSignature)?,
        public_key,
    )
    .map_err(|_| AuthError::InvalidSignature)?;

    let now = Timestamp::now();
    store
        .insert_nonce(NonceRow {
            nonce: envelope.nonce.clone(),
            did: envelope.from.clone(),
            created_at: now,
            expires_at: now.plus_seconds(config.nonce_ttl_seconds),
        })
        .map_err(|_| AuthError::NonceReused)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;

    #[test]
    fn poll_requires_matching_did() {
        let store = InMemoryStore::new();
        let err = authenticate_poll(&store, "no-such-agent", &Did::parse("did:aeep:x").unwrap());
        assert!(err.is_err());
    }
}
