#![cfg_attr(docsrs, feature(doc_auto_cfg))]

//! The AEEP exchange engine: persistent store, identity registry, envelope
//! authentication pipeline, message router, negotiation state machine,
//! trust scoring, Merkle batching, and the Axum HTTP surface over all of it.
//!
//! This crate builds the `Router` but never serves it — it has no `main`,
//! no CLI, and no listener. The `aeep-server` binary crate at the workspace
//! root wires [`handlers::routes`] to a `TcpListener` and spawns the
//! background sweep tasks, the same division of labor the teacher draws
//! between `x402-facilitator-local` (engine) and `facilitator/` (binary +
//! HTTP wiring) — except here the router construction itself lives with the
//! engine, since `src/handlers.rs` in the teacher is a thin adapter over a
//! single `Facilitator` trait object while AEEP's handlers reach directly
//! into several concrete services.
//!
//! # Modules
//!
//! - [`store`] — typed row shapes and the [`store::Store`] trait, with an
//!   in-memory implementation
//! - [`registry`] — DID registration, update, deactivation, heartbeat, discovery
//! - [`auth`] — the envelope authentication pipeline (§4.2)
//! - [`router`] — envelope acceptance, queueing, polling, push streams (§4.3)
//! - [`negotiation`] — the ten-state per-interaction state machine (§4.1)
//! - [`trust`] — the bounded trust-score function and inactivity decay (§4.5)
//! - [`batching`] — Merkle batch assembly, proof persistence, relayer submission (§4.4)
//! - [`relayer`] — the on-chain anchor interface and a mock implementation
//! - [`error`] — component error taxonomies and the HTTP boundary mapping
//! - [`handlers`] — [`handlers::AppState`] and the full HTTP route table (§6.1)
//! - [`util`] — graceful shutdown and telemetry helpers

pub mod auth;
pub mod batching;
pub mod error;
pub mod handlers;
pub mod negotiation;
pub mod registry;
pub mod relayer;
pub mod router;
pub mod store;
pub mod trust;
pub mod util;

pub use auth::{AuthConfig, AuthenticatedSender, authenticate, authenticate_poll, authenticate_registration};
pub use batching::{BatchingConfig, BatchingService};
pub use error::ApiError;
pub use handlers::{AppState, routes};
pub use negotiation::handle_message;
pub use registry::{DiscoveryFilter, DiscoveryResult};
pub use relayer::{MockRelayer, Relayer};
pub use router::{AcceptedMessage, MessageRouter};
pub use store::{InMemoryStore, Store};
