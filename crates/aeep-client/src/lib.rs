#![cfg_attr(docsrs, feature(doc_auto_cfg))]

//! Agent-side SDK for the Agent-to-Agent Economic Exchange Protocol.
//!
//! An agent holds its own [`Ed25519Keypair`](aeep_types::signing::Ed25519Keypair)
//! off-server and uses [`AeepClient`] to register, discover peers, and drive
//! the negotiation state machine against a server's HTTP surface. Every
//! outbound envelope is built and signed locally by [`build_envelope`]
//! before it leaves the process — the server never sees a private key.
//!
//! # Modules
//!
//! - [`builder`] — envelope construction and Ed25519 signing
//! - [`client`] — [`AeepClient`], the HTTP-facing SDK
//! - [`error`] — [`ClientError`]

pub mod builder;
pub mod client;
pub mod error;

pub use builder::build_envelope;
pub use client::AeepClient;
pub use error::ClientError;
