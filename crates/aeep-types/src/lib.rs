#![cfg_attr(docsrs, feature(doc_auto_cfg))]

//! Wire types for the Agent-to-Agent Economic Exchange Protocol (AEEP).
//!
//! This crate is blockchain-agnostic and transport-agnostic: it defines the
//! DID and envelope wire formats, the canonical JSON form every signature
//! and hash is computed over, the Ed25519/X25519 signing primitives, and
//! the Merkle tree used to anchor completed interactions on-chain.
//!
//! # Modules
//!
//! - [`did`] - DID strings, DID documents, and status lifecycle
//! - [`envelope`] - the signed envelope and its typed message payloads
//! - [`canonical`] - canonical JSON serialization and SHA-256 hashing
//! - [`merkle`] - sorted-leaf Merkle tree, proofs, and verification
//! - [`signing`] - Ed25519/X25519 keypairs and multibase key codecs
//! - [`timestamp`] - ISO 8601 timestamp type used by envelopes and rows
//! - [`error`] - the shared error-code taxonomy and local error enums
//! - [`util`] - base64url helpers

pub mod canonical;
pub mod did;
pub mod envelope;
pub mod error;
pub mod merkle;
pub mod signing;
pub mod timestamp;
pub mod util;

pub use canonical::{canonical_hash, canonical_json, canonicalize_value, sha256_bytes, sha256_hex};
pub use did::{Did, DidDocument, DidStatus, VerificationKey};
pub use envelope::{
    AcceptPayload, AcceptancePolicy, Availability, Envelope, HeartbeatPayload, MessageType,
    OfferPayload, PaymentFailedPayload, PaymentPayload, RejectPayload, RequestPayload,
    ResultPayload, VerifyPayload,
};
pub use error::{CanonicalizationError, DidError, ErrorCode, SigningError};
pub use merkle::{MerkleProof, MerkleTree, verify_proof};
pub use timestamp::Timestamp;
