//! Shared helpers used by `aeep-core` and re-exported for `aeep-server`:
//!
//! - [`sig_down`] - graceful shutdown signal handling

pub mod sig_down;

pub use sig_down::*;
