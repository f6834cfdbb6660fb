//! Chunk payload wire format
//!
//! A chunk response body is a JSON string literal holding base64: exactly one
//! leading `"` and one trailing `"` around the encoded bytes. Anything else is
//! rejected with a typed error instead of being trimmed blindly.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use thiserror::Error;

use crate::error::UpdateError;

/// Delimiter byte surrounding the encoded chunk
pub const PAYLOAD_DELIMITER: u8 = b'"';

/// Chunk payload framing errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PayloadError {
    /// Body has no bytes at all
    #[error("empty response body")]
    EmptyBody,

    /// First byte is not the delimiter
    #[error("missing leading delimiter")]
    MissingLeadingDelimiter,

    /// Last byte is not the delimiter (or the body is a lone delimiter)
    #[error("missing trailing delimiter")]
    MissingTrailingDelimiter,

    /// Nothing between the delimiters
    #[error("empty payload between delimiters")]
    EmptyPayload,

    /// Inner text is not valid base64
    #[error("invalid base64 payload: {0}")]
    Base64(String),
}

impl From<PayloadError> for UpdateError {
    fn from(e: PayloadError) -> Self {
        UpdateError::ResponseParse(e.to_string())
    }
}

/// Strip exactly one leading and one trailing delimiter.
pub fn strip_delimiters(body: &[u8]) -> Result<&[u8], PayloadError> {
    let (first, rest) = body.split_first().ok_or(PayloadError::EmptyBody)?;
    if *first != PAYLOAD_DELIMITER {
        return Err(PayloadError::MissingLeadingDelimiter);
    }
    let (last, inner) = rest
        .split_last()
        .ok_or(PayloadError::MissingTrailingDelimiter)?;
    if *last != PAYLOAD_DELIMITER {
        return Err(PayloadError::MissingTrailingDelimiter);
    }
    if inner.is_empty() {
        return Err(PayloadError::EmptyPayload);
    }
    Ok(inner)
}

/// Unwrap and decode a chunk response body into raw chunk bytes.
pub fn decode_chunk_payload(body: &[u8]) -> Result<Vec<u8>, PayloadError> {
    let inner = strip_delimiters(body)?;
    STANDARD
        .decode(inner)
        .map_err(|e| PayloadError::Base64(e.to_string()))
}

/// Frame raw bytes the way the blob-range endpoint does.
pub fn encode_chunk_payload(chunk: &[u8]) -> Vec<u8> {
    let encoded = STANDARD.encode(chunk);
    let mut body = Vec::with_capacity(encoded.len().saturating_add(2));
    body.push(PAYLOAD_DELIMITER);
    body.extend_from_slice(encoded.as_bytes());
    body.push(PAYLOAD_DELIMITER);
    body
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decodes_quoted_base64() -> Result<(), PayloadError> {
        let decoded = decode_chunk_payload(b"\"aGVsbG8=\"")?;
        assert_eq!(decoded, b"hello");
        Ok(())
    }

    #[test]
    fn test_encode_matches_decoder() -> Result<(), PayloadError> {
        let chunk: Vec<u8> = (0u8..=255).collect();
        let body = encode_chunk_payload(&chunk);
        assert_eq!(body.first(), Some(&b'"'));
        assert_eq!(body.last(), Some(&b'"'));
        assert_eq!(decode_chunk_payload(&body)?, chunk);
        Ok(())
    }

    #[test]
    fn test_rejects_missing_delimiters() {
        assert_eq!(
            decode_chunk_payload(b"aGVsbG8=\""),
            Err(PayloadError::MissingLeadingDelimiter)
        );
        assert_eq!(
            decode_chunk_payload(b"\"aGVsbG8="),
            Err(PayloadError::MissingTrailingDelimiter)
        );
        assert_eq!(
            decode_chunk_payload(b"\"aGVsbG8=\"\n"),
            Err(PayloadError::MissingTrailingDelimiter)
        );
    }

    #[test]
    fn test_rejects_empty_and_truncated_bodies() {
        assert_eq!(decode_chunk_payload(b""), Err(PayloadError::EmptyBody));
        assert_eq!(
            decode_chunk_payload(b"\""),
            Err(PayloadError::MissingTrailingDelimiter)
        );
        assert_eq!(decode_chunk_payload(b"\"\""), Err(PayloadError::EmptyPayload));
    }

    #[test]
    fn test_rejects_invalid_base64() {
        assert!(matches!(
            decode_chunk_payload(b"\"not base64!\""),
            Err(PayloadError::Base64(_))
        ));
    }

    #[test]
    fn test_payload_error_maps_to_parse_error() {
        let err: UpdateError = PayloadError::EmptyPayload.into();
        assert!(matches!(err, UpdateError::ResponseParse(_)));
        assert!(err.is_retryable());
    }
}
