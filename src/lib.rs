//! The AEEP server binary crate.
//!
//! This crate is the process that actually listens on a socket: it owns
//! configuration loading, telemetry initialization, and assembly of the
//! [`aeep_core`] engine into a running Axum server. The protocol's wire
//! types live in `aeep-types`, the engine itself in `aeep-core`, and the
//! agent-side SDK in `aeep-client` — this crate only wires them together.
//!
//! # Modules
//!
//! - [`config`] — CLI args, JSON config file, and environment fallbacks
//! - [`telemetry`] — process-wide `tracing` subscriber initialization

pub mod config;
pub mod telemetry;
