// island-registry-core/src/digest.rs
// ============================================================================
// Module: Streaming Digest Service
// Description: Chunked SHA-256 digesting with a parallel byte counter.
// Purpose: Verify artifact digests and sizes without buffering whole bodies.
// Dependencies: sha2, subtle
// ============================================================================

//! ## Overview
//! The fetcher streams artifact bodies through [`StreamingDigest`] so digest
//! and size verification never require the full artifact in memory. Hex
//! comparisons over declared digests run in constant time.

// ============================================================================
// SECTION: Imports
// ============================================================================

use sha2::Digest;
use sha2::Sha256;
use subtle::ConstantTimeEq;
use thiserror::Error;

use crate::hashing::HashAlgorithm;
use crate::hashing::HashDigest;
use crate::hashing::hex_encode;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Digest and size verification failures.
#[derive(Debug, Error)]
pub enum DigestError {
    /// Computed digest disagrees with the declared digest.
    #[error("digest mismatch: expected {expected}, actual {actual}")]
    Mismatch {
        /// Declared digest value.
        expected: String,
        /// Computed digest value.
        actual: String,
    },
    /// Observed byte count disagrees with the declared size.
    #[error("size mismatch: expected {expected} bytes, actual {actual} bytes")]
    SizeMismatch {
        /// Declared byte count.
        expected: u64,
        /// Observed byte count.
        actual: u64,
    },
}

// ============================================================================
// SECTION: Streaming Digest
// ============================================================================

/// Incremental SHA-256 digest with a running byte counter.
pub struct StreamingDigest {
    /// Incremental hasher state.
    hasher: Sha256,
    /// Bytes observed so far.
    bytes_seen: u64,
}

impl StreamingDigest {
    /// Creates an empty streaming digest.
    #[must_use]
    pub fn new() -> Self {
        Self {
            hasher: Sha256::new(),
            bytes_seen: 0,
        }
    }

    /// Feeds a chunk of bytes into the digest.
    pub fn update(&mut self, chunk: &[u8]) {
        self.hasher.update(chunk);
        self.bytes_seen = self.bytes_seen.saturating_add(chunk.len() as u64);
    }

    /// Returns the number of bytes observed so far.
    #[must_use]
    pub const fn bytes_seen(&self) -> u64 {
        self.bytes_seen
    }

    /// Consumes the digest and returns the final value with the byte count.
    #[must_use]
    pub fn finalize(self) -> (HashDigest, u64) {
        let digest = self.hasher.finalize();
        (HashDigest::new(HashAlgorithm::Sha256, &digest), self.bytes_seen)
    }
}

impl Default for StreamingDigest {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// SECTION: Verification
// ============================================================================

/// Verifies a computed digest and byte count against declared values.
///
/// The hex comparison is constant time so declared digests cannot be probed
/// byte-by-byte.
///
/// # Errors
///
/// Returns [`DigestError::Mismatch`] or [`DigestError::SizeMismatch`].
pub fn verify_digest(
    computed: &HashDigest,
    computed_size: u64,
    declared_hex: &str,
    declared_size: u64,
) -> Result<(), DigestError> {
    if computed_size != declared_size {
        return Err(DigestError::SizeMismatch {
            expected: declared_size,
            actual: computed_size,
        });
    }
    if !constant_time_eq_str(&computed.value, declared_hex) {
        return Err(DigestError::Mismatch {
            expected: declared_hex.to_string(),
            actual: computed.value.clone(),
        });
    }
    Ok(())
}

/// Returns true when a declared digest has the right shape for the algorithm.
///
/// The registry only accepts lowercase hex of the exact width; uppercase or
/// truncated digests are rejected before any fetch is attempted.
#[must_use]
pub fn is_well_formed_digest(algorithm: HashAlgorithm, declared_hex: &str) -> bool {
    declared_hex.len() == algorithm.hex_width()
        && declared_hex.bytes().all(|b| b.is_ascii_digit() || matches!(b, b'a'..=b'f'))
}

// ============================================================================
// SECTION: Constant-Time Comparison
// ============================================================================

/// Compares two byte slices in constant time.
#[must_use]
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.ct_eq(b).into()
}

/// Compares two strings in constant time.
#[must_use]
pub fn constant_time_eq_str(a: &str, b: &str) -> bool {
    constant_time_eq(a.as_bytes(), b.as_bytes())
}

/// Encodes raw digest bytes as lowercase hex.
#[must_use]
pub fn to_hex(bytes: &[u8]) -> String {
    hex_encode(bytes)
}
