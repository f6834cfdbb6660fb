//! Content digests for chunk integrity checks
//!
//! The server declares a digest per chunk as base64 of the raw digest bytes
//! (the `Content-MD5` convention). Comparison happens on raw bytes so padding
//! or surrounding whitespace in the header does not matter.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};

/// Digest algorithm used for the per-chunk integrity header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DigestAlgorithm {
    /// 16-byte MD5, as carried by `Content-MD5`
    #[default]
    Md5,
    /// 32-byte SHA-256
    Sha256,
}

impl DigestAlgorithm {
    /// Raw digest bytes of `data`
    pub fn compute(self, data: &[u8]) -> Vec<u8> {
        match self {
            DigestAlgorithm::Md5 => {
                use md5::{Digest, Md5};
                Md5::digest(data).to_vec()
            }
            DigestAlgorithm::Sha256 => {
                use sha2::{Digest, Sha256};
                Sha256::digest(data).to_vec()
            }
        }
    }

    /// Base64 of the raw digest of `data`
    pub fn compute_base64(self, data: &[u8]) -> String {
        STANDARD.encode(self.compute(data))
    }

    /// Length in bytes of a raw digest
    pub fn output_len(self) -> usize {
        match self {
            DigestAlgorithm::Md5 => 16,
            DigestAlgorithm::Sha256 => 32,
        }
    }

    /// Check `data` against a base64 digest declared by the server.
    ///
    /// Returns the computed base64 digest on mismatch so callers can log both.
    /// A declared digest of another algorithm's length never matches.
    pub fn verify(self, data: &[u8], declared: &str) -> Result<(), String> {
        let computed = self.compute(data);
        match STANDARD.decode(declared.trim()) {
            Ok(expected) if expected.len() != self.output_len() => Err(STANDARD.encode(computed)),
            Ok(expected) if expected == computed => Ok(()),
            _ => Err(STANDARD.encode(computed)),
        }
    }
}

impl std::fmt::Display for DigestAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DigestAlgorithm::Md5 => write!(f, "md5"),
            DigestAlgorithm::Sha256 => write!(f, "sha256"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_md5_known_vector() {
        // RFC 1321 test suite: MD5("abc")
        assert_eq!(
            DigestAlgorithm::Md5.compute_base64(b"abc"),
            "kAFQmDzST7DWlj99KOF/cg=="
        );
    }

    #[test]
    fn test_output_lengths() {
        assert_eq!(DigestAlgorithm::Md5.compute(b"x").len(), 16);
        assert_eq!(DigestAlgorithm::Sha256.compute(b"x").len(), 32);
        assert_eq!(DigestAlgorithm::Md5.output_len(), 16);
        assert_eq!(DigestAlgorithm::Sha256.output_len(), 32);
    }

    #[test]
    fn test_verify_accepts_matching_header_with_whitespace() {
        let declared = format!(" {} ", DigestAlgorithm::Md5.compute_base64(b"chunk"));
        assert!(DigestAlgorithm::Md5.verify(b"chunk", &declared).is_ok());
    }

    #[test]
    fn test_verify_rejects_mismatch_and_garbage() {
        let other = DigestAlgorithm::Md5.compute_base64(b"other");
        assert_eq!(
            DigestAlgorithm::Md5.verify(b"chunk", &other),
            Err(DigestAlgorithm::Md5.compute_base64(b"chunk"))
        );
        assert!(DigestAlgorithm::Md5.verify(b"chunk", "%%%not-base64").is_err());
        assert!(DigestAlgorithm::Md5.verify(b"chunk", "").is_err());
    }

    #[test]
    fn test_verify_rejects_digest_of_other_algorithm() {
        let sha = DigestAlgorithm::Sha256.compute_base64(b"chunk");
        assert!(DigestAlgorithm::Md5.verify(b"chunk", &sha).is_err());
        assert!(DigestAlgorithm::Sha256.verify(b"chunk", &sha).is_ok());
    }

    #[test]
    fn test_serde_lowercase() -> Result<(), serde_json::Error> {
        assert_eq!(serde_json::to_string(&DigestAlgorithm::Sha256)?, "\"sha256\"");
        let parsed: DigestAlgorithm = serde_json::from_str("\"md5\"")?;
        assert_eq!(parsed, DigestAlgorithm::Md5);
        Ok(())
    }
}
