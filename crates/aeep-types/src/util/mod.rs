//! Utility types shared across `aeep-types`.
//!
//! - [`b64`] - base64url encoding/decoding helpers

pub mod b64;

pub use b64::*;
