//! Base64url encoding and decoding utilities.
//!
//! This module provides [`Base64Bytes`], a wrapper type for working with
//! base64url-encoded data on the wire — signatures, raw public key bytes,
//! and anything else the protocol needs as opaque bytes inside JSON.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD as b64;
use std::borrow::Cow;
use std::fmt::Display;

/// A wrapper for base64url-encoded (no padding) byte data.
///
/// Holds bytes that represent base64url-encoded data and provides methods
/// for encoding and decoding. Uses copy-on-write semantics to avoid
/// unnecessary allocations.
///
/// ```rust
/// use aeep_types::util::Base64Bytes;
///
/// let encoded = Base64Bytes::encode(b"hello world");
/// let decoded = encoded.decode().unwrap();
/// assert_eq!(decoded, b"hello world");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Base64Bytes<'a>(pub Cow<'a, [u8]>);

impl Base64Bytes<'_> {
    /// Decodes the base64url string bytes to raw binary data.
    pub fn decode(&self) -> Result<Vec<u8>, base64::DecodeError> {
        b64.decode(&self.0)
    }

    /// Encodes raw binary data into base64url string bytes.
    pub fn encode<T: AsRef<[u8]>>(input: T) -> Base64Bytes<'static> {
        let encoded = b64.encode(input.as_ref());
        Base64Bytes(Cow::Owned(encoded.into_bytes()))
    }
}

impl AsRef<[u8]> for Base64Bytes<'_> {
    fn as_ref(&self) -> &[u8] {
        self.0.as_ref()
    }
}

impl<'a> From<&'a [u8]> for Base64Bytes<'a> {
    fn from(slice: &'a [u8]) -> Self {
        Base64Bytes(Cow::Borrowed(slice))
    }
}

impl Display for Base64Bytes<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(self.0.as_ref()))
    }
}

/// Encodes bytes directly to a `String`, the form most call sites want.
pub fn encode_str<T: AsRef<[u8]>>(input: T) -> String {
    b64.encode(input.as_ref())
}

/// Decodes a base64url string directly into bytes.
pub fn decode_str(input: &str) -> Result<Vec<u8>, base64::DecodeError> {
    b64.decode(input)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips() {
        let encoded = Base64Bytes::encode(b"hello world");
        assert_eq!(encoded.to_string(), encode_str(b"hello world"));
        assert_eq!(encoded.decode().unwrap(), b"hello world");
    }

    #[test]
    fn no_padding_characters() {
        let encoded = encode_str(b"a");
        assert!(!encoded.contains('='));
    }
}
