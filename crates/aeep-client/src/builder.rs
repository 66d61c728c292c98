//! Envelope construction and signing.
//!
//! The server derives every signature and hash from the envelope's
//! canonical form with `signature` stripped (`Envelope::signing_input`);
//! this module is the client-side mirror that builds that same shape, signs
//! it, and fills the signature back in.

use aeep_types::signing::Ed25519Keypair;
use aeep_types::{Did, Envelope, MessageType, Timestamp};
use serde::Serialize;

use crate::error::ClientError;

/// Wire version stamped on every envelope this SDK builds.
pub const WIRE_VERSION: &str = "0.1.0";

/// Builds and signs an envelope of `message_type` from `from` to `to`
/// carrying `payload`. `expires_in_seconds` is relative to the moment the
/// envelope is built, matching the server's own default-TTL convention for
/// untimed envelopes.
pub fn build_envelope<T: Serialize>(
    keypair: &Ed25519Keypair,
    message_type: MessageType,
    from: Did,
    to: Did,
    payload: &T,
    expires_in_seconds: Option<i64>,
) -> Result<Envelope, ClientError> {
    let payload_value = serde_json::to_value(payload)?;
    let created = Timestamp::now();
    let mut envelope = Envelope {
        version: WIRE_VERSION.to_string(),
        id: uuid::Uuid::now_v7().to_string(),
        message_type,
        from,
        to,
        created,
        expires: expires_in_seconds.map(|seconds| created.plus_seconds(seconds)),
        payload: payload_value,
        nonce: uuid::Uuid::now_v7().to_string(),
        signature: String::new(),
    };

    let signing_input = envelope
        .signing_input()
        .map_err(|_| ClientError::Canonicalization)?;
    envelope.signature = aeep_types::util::encode_str(keypair.sign(signing_input.as_bytes()));
    Ok(envelope)
}

#[cfg(test)]
mod tests {
    use super::*;
    use aeep_types::signing;
    use serde_json::json;

    #[test]
    fn built_envelope_verifies_against_its_own_key() {
        let keypair = Ed25519Keypair::generate();
        let from = Did::parse("did:aeep:initiator").unwrap();
        let to = Did::parse("did:aeep:provider").unwrap();
        let envelope = build_envelope(
            &keypair,
            MessageType::Heartbeat,
            from,
            to,
            &json!({"availability": "online"}),
            Some(3600),
        )
        .unwrap();

        let signing_input = envelope.signing_input().unwrap();
        let signature = aeep_types::util::decode_str(&envelope.signature).unwrap();
        signing::verify(signing_input.as_bytes(), &signature, &keypair.public_key_bytes()).unwrap();
        assert!(envelope.expires.is_some());
    }
}
