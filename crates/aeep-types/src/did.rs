//! DID strings and DID documents.
//!
//! A DID names an agent: `did:<method>:<agent-id>`. The document attached
//! to a registered agent lists exactly one Ed25519 verification key and one
//! X25519 key-agreement key, each multibase-encoded.

use std::fmt::{Display, Formatter};

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::DidError;

static DID_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^did:[a-z0-9]+:[a-zA-Z0-9._%-]+$").expect("valid regex"));

/// A decentralized identifier, validated against `did:<method>:<id>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Did(String);

impl Did {
    pub fn parse(raw: impl Into<String>) -> Result<Self, DidError> {
        let raw = raw.into();
        if !DID_PATTERN.is_match(&raw) {
            return Err(DidError::Malformed(raw));
        }
        Ok(Did(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The method-specific identifier suffix, used as the agent's primary
    /// key (e.g. `did:aeep:abc123` → `abc123`).
    pub fn agent_id(&self) -> &str {
        self.0.rsplit(':').next().unwrap_or(&self.0)
    }
}

impl TryFrom<String> for Did {
    type Error = DidError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Did::parse(value)
    }
}

impl From<Did> for String {
    fn from(value: Did) -> Self {
        value.0
    }
}

impl Display for Did {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for Did {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Status of a DID across its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DidStatus {
    Active,
    Revoked,
    Deactivated,
}

impl DidStatus {
    /// Whether `self -> next` is an allowed DID status transition.
    pub fn can_transition_to(self, next: DidStatus) -> bool {
        use DidStatus::*;
        matches!(
            (self, next),
            (Active, Revoked) | (Active, Deactivated) | (Deactivated, Active)
        )
    }
}

/// A verification method entry inside a DID document: a multibase-encoded
/// public key of a known purpose.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationKey {
    pub id: String,
    #[serde(rename = "type")]
    pub key_type: String,
    pub controller: Did,
    pub public_key_multibase: String,
}

/// The DID document stored for a registered agent: one Ed25519 key for
/// envelope signatures, one X25519 key for key agreement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DidDocument {
    pub id: Did,
    pub verification_method: VerificationKey,
    pub key_agreement: VerificationKey,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_valid_did() {
        let did = Did::parse("did:aeep:abc123").unwrap();
        assert_eq!(did.agent_id(), "abc123");
    }

    #[test]
    fn rejects_malformed_did() {
        assert!(Did::parse("not-a-did").is_err());
    }

    #[test]
    fn status_transition_graph() {
        assert!(DidStatus::Active.can_transition_to(DidStatus::Revoked));
        assert!(DidStatus::Active.can_transition_to(DidStatus::Deactivated));
        assert!(DidStatus::Deactivated.can_transition_to(DidStatus::Active));
        assert!(!DidStatus::Revoked.can_transition_to(DidStatus::Active));
        assert!(!DidStatus::Deactivated.can_transition_to(DidStatus::Revoked));
    }
}
