//! Byte encoders that turn serialized cursors into client-safe strings.
//!
//! Encoders know nothing about cursor shapes; they only move bytes to a
//! string and back. [`crate::token::TokenSerializer`] sits on top.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use ring::hmac;

/// Length of an HMAC-SHA256 tag in bytes.
const HMAC_TAG_LEN: usize = 32;

/// Errors raised while encoding or decoding a token.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EncoderError {
    /// The encoded string is not valid for this encoder.
    #[error("malformed token: {message}")]
    Malformed { message: String },

    /// The authentication tag did not match the payload.
    #[error("token signature mismatch")]
    SignatureMismatch,

    /// The encoder was configured with an unusable key.
    #[error("invalid encoder key: {message}")]
    InvalidKey { message: String },
}

/// Result type for encoder operations.
pub type EncoderResult<T> = Result<T, EncoderError>;

/// Encodes opaque bytes into a string and back.
pub trait Encoder: Send + Sync + std::fmt::Debug {
    /// Encodes `data` into a string.
    fn encode(&self, data: &[u8]) -> EncoderResult<String>;

    /// Decodes a string produced by [`Encoder::encode`].
    fn decode(&self, encoded: &str) -> EncoderResult<Vec<u8>>;
}

/// Pass-through encoder: the UTF-8 payload is the token.
///
/// Only for trusted callers and tests; clients can read and forge tokens.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopEncoder;

impl Encoder for NoopEncoder {
    fn encode(&self, data: &[u8]) -> EncoderResult<String> {
        String::from_utf8(data.to_vec()).map_err(|e| EncoderError::Malformed {
            message: e.to_string(),
        })
    }

    fn decode(&self, encoded: &str) -> EncoderResult<Vec<u8>> {
        Ok(encoded.as_bytes().to_vec())
    }
}

/// URL-safe base64 without padding.
#[derive(Debug, Clone, Copy, Default)]
pub struct Base64Encoder;

impl Encoder for Base64Encoder {
    fn encode(&self, data: &[u8]) -> EncoderResult<String> {
        Ok(URL_SAFE_NO_PAD.encode(data))
    }

    fn decode(&self, encoded: &str) -> EncoderResult<Vec<u8>> {
        URL_SAFE_NO_PAD
            .decode(encoded)
            .map_err(|e| EncoderError::Malformed {
                message: e.to_string(),
            })
    }
}

/// Authenticated encoder: `base64(payload || HMAC-SHA256(key, payload))`.
///
/// Any change to the encoded string either breaks the base64 or the tag, so
/// tampering always surfaces as an error.
pub struct HmacEncoder {
    key: hmac::Key,
}

impl HmacEncoder {
    /// Creates an encoder signing with `secret`. An empty secret is rejected.
    pub fn new(secret: &[u8]) -> EncoderResult<Self> {
        if secret.is_empty() {
            return Err(EncoderError::InvalidKey {
                message: "key must not be empty".to_string(),
            });
        }
        Ok(Self {
            key: hmac::Key::new(hmac::HMAC_SHA256, secret),
        })
    }
}

// The key never shows up in logs.
impl std::fmt::Debug for HmacEncoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HmacEncoder")
            .field("key", &"[REDACTED]")
            .finish()
    }
}

impl Encoder for HmacEncoder {
    fn encode(&self, data: &[u8]) -> EncoderResult<String> {
        let tag = hmac::sign(&self.key, data);
        let mut signed = Vec::with_capacity(data.len() + HMAC_TAG_LEN);
        signed.extend_from_slice(data);
        signed.extend_from_slice(tag.as_ref());
        Ok(URL_SAFE_NO_PAD.encode(signed))
    }

    fn decode(&self, encoded: &str) -> EncoderResult<Vec<u8>> {
        let mut signed = URL_SAFE_NO_PAD
            .decode(encoded)
            .map_err(|e| EncoderError::Malformed {
                message: e.to_string(),
            })?;
        if signed.len() < HMAC_TAG_LEN {
            return Err(EncoderError::Malformed {
                message: "token shorter than signature".to_string(),
            });
        }

        let payload_len = signed.len() - HMAC_TAG_LEN;
        let (payload, tag) = signed.split_at(payload_len);
        hmac::verify(&self.key, payload, tag).map_err(|_| EncoderError::SignatureMismatch)?;

        signed.truncate(payload_len);
        Ok(signed)
    }
}
